//! Event subsystem analysis: discover targets, assign latch bits, and wire
//! source edges across components.
//!
//! Sources firing into the same target are kept by identity, never merged by
//! condition equivalence: two structurally identical triggers from different
//! populations get separate monitor lists. Redundant lists are accepted in
//! exchange for staying correct under future edits to either population.

use crate::ir::ast::{CompId, ModelArena, TriggerKind};
use crate::ir::error::ErrorLog;
use crate::ir::expr::Expr;

/// Delay from a firing source to its target. Constant delays are detected
/// statically; anything else is computed at run time.
#[derive(Clone, Debug, PartialEq)]
pub enum Delay {
    Constant(f64),
    Runtime(Expr),
}

impl Delay {
    pub fn from_expr(expr: &Expr) -> Delay {
        match expr.as_const() {
            Some(v) => Delay::Constant(v),
            None => Delay::Runtime(expr.clone()),
        }
    }
}

/// One (sender, target) edge.
#[derive(Clone, Debug, PartialEq)]
pub struct EventSource {
    pub sender: CompId,
    pub delay: Delay,
}

/// An analyzed event target, owned by its component.
#[derive(Clone, Debug, PartialEq)]
pub struct EventTarget {
    pub label: String,
    pub trigger: TriggerKind,
    pub condition: Expr,
    /// Index into the owning component's local flag word.
    pub latch_bit: usize,
    /// Whether a dedicated time-of-last-fire slot disambiguates duplicate
    /// triggering within one simulation step.
    pub last_fire_slot: bool,
    pub watchers: Vec<EventSource>,
}

/// Analyze events for the whole model. Returns one target list per
/// component, indexed by arena position.
pub fn analyze_events(arena: &ModelArena, log: &mut ErrorLog) -> Vec<Vec<EventTarget>> {
    let mut tables: Vec<Vec<EventTarget>> = arena
        .components
        .iter()
        .map(|comp| {
            comp.event_targets
                .iter()
                .enumerate()
                .map(|(i, decl)| EventTarget {
                    label: decl.label.clone(),
                    trigger: decl.trigger,
                    condition: decl.condition.clone(),
                    latch_bit: i,
                    last_fire_slot: false,
                    watchers: Vec::new(),
                })
                .collect()
        })
        .collect();

    // Wire source edges. Each declared source keeps its own entry.
    for sender in &arena.components {
        for source in &sender.event_sources {
            let Some(target_comp) = arena.lookup(&source.target_component) else {
                log.fatal(
                    &sender.path,
                    format!(
                        "event source targets unknown component '{}'",
                        source.target_component
                    ),
                );
                continue;
            };
            let table = &mut tables[target_comp.0];
            let Some(target) = table.iter_mut().find(|t| t.label == source.label) else {
                log.fatal(
                    &sender.path,
                    format!(
                        "event source targets unknown event '{}' on '{}'",
                        source.label, source.target_component
                    ),
                );
                continue;
            };
            target.watchers.push(EventSource {
                sender: sender.id,
                delay: Delay::from_expr(&source.delay),
            });
        }
    }

    // Timing discipline. Only non-zero triggers can re-fire on re-evaluation
    // within one step, so only they carry the coincident-cycle guard; the
    // guard compares against a stored time of last fire, not the raw
    // condition.
    for (idx, table) in tables.iter_mut().enumerate() {
        let owner = CompId(idx);
        for target in table.iter_mut() {
            if target.trigger != TriggerKind::NonZero {
                continue;
            }
            let multi_watched = target.watchers.len() > 1;
            let same_comp_immediate = target.watchers.iter().any(|w| {
                w.sender == owner
                    && matches!(w.delay, Delay::Constant(d) if d <= 0.0)
            });
            target.last_fire_slot = multi_watched || same_comp_immediate;
        }
    }

    tables
}
