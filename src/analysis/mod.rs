//! The storage & lifecycle analyzer: runs every backend analysis pass in
//! order and collects the results into one side table per component.
//!
//! Pass order is fixed: binding resolution, special-variable binding,
//! bottom-up classification, event analysis, connection eligibility
//! (bottom-up then top-down), bottom-up needs derivation, flag-word sizing.
//! Each component's state advances `Unanalyzed -> Classified -> Flagged`;
//! the emitter later marks `Emitted`. Transitions are one-way.

pub mod classify;
pub mod connection;
pub mod events;
pub mod flagword;
pub mod needs;
pub mod special;

use crate::ir::ast::{CompId, ModelArena};
use crate::ir::error::{BackendError, ErrorLog};
use crate::options::{component_integrator, BackendOptions, Integrator};

use classify::{classify_component, Classification};
use connection::analyze_connections;
use events::{analyze_events, EventTarget};
use flagword::{build_word, FlagBit, FlagWord};
use needs::{derive_needs, Needs, NeedsInputs};
use special::{bind_specials, Specials};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassState {
    Unanalyzed,
    Classified,
    Flagged,
    Emitted,
}

/// Analyzer output for one component. The emitter generates code from this
/// plus the variables' own tags, nothing else.
#[derive(Clone, Debug)]
pub struct BackendData {
    pub state: PassState,
    pub class: Classification,
    pub specials: Specials,
    pub targets: Vec<EventTarget>,
    pub needs: Needs,
    pub integrator: Integrator,
    pub inactive_eligible: bool,
    pub local_flags: Option<FlagWord>,
    pub global_flags: Option<FlagWord>,
}

impl Default for BackendData {
    fn default() -> Self {
        Self {
            state: PassState::Unanalyzed,
            class: Classification::default(),
            specials: Specials::default(),
            targets: Vec::new(),
            needs: Needs::default(),
            integrator: Integrator::Euler,
            inactive_eligible: false,
            local_flags: None,
            global_flags: None,
        }
    }
}

/// Whole-model analysis result; indexed by [`CompId`].
#[derive(Debug, Default)]
pub struct Analysis {
    pub data: Vec<BackendData>,
}

impl Analysis {
    pub fn get(&self, id: CompId) -> &BackendData {
        &self.data[id.0]
    }

    pub fn get_mut(&mut self, id: CompId) -> &mut BackendData {
        &mut self.data[id.0]
    }
}

/// Run the full analysis over an arena whose bindings are already resolved.
pub fn analyze(
    arena: &ModelArena,
    opts: &BackendOptions,
    log: &mut ErrorLog,
) -> Result<Analysis, BackendError> {
    let mut analysis = Analysis {
        data: vec![BackendData::default(); arena.len()],
    };

    // Specials first; their placement errors fire before anything else.
    let specials: Vec<Specials> = arena
        .components
        .iter()
        .map(|c| bind_specials(c, log))
        .collect();
    log.check()?;

    // Bottom-up classification.
    let postorder = arena.postorder();
    let mut classes: Vec<Classification> = vec![Classification::default(); arena.len()];
    for &id in &postorder {
        let comp = arena.get(id);
        classes[id.0] = classify_component(comp, &specials[id.0], log);
    }
    log.check()?;

    // Events.
    let targets = analyze_events(arena, log);
    log.check()?;

    // Connection eligibility, bottom-up then top-down.
    let conn = analyze_connections(arena, &classes, &specials);

    for &id in &postorder {
        // The driver sequences integration stages once for the whole tree;
        // a component cannot run a different stage count than its container.
        let integrator = component_integrator(arena.get(id), opts);
        if integrator != opts.integrator {
            log.fatal(
                &arena.get(id).path,
                format!(
                    "integrator override {:?} conflicts with the model integrator {:?}",
                    integrator, opts.integrator
                ),
            );
        }
        let d = analysis.get_mut(id);
        d.class = classes[id.0].clone();
        d.specials = specials[id.0].clone();
        d.targets = targets[id.0].clone();
        d.inactive_eligible = conn[id.0].inactive_eligible;
        d.integrator = integrator;
        d.state = PassState::Classified;
    }
    log.check()?;

    // Bottom-up needs derivation; children are Flagged before their parent.
    for &id in &postorder {
        let comp = arena.get(id);
        let child_needs: Vec<Needs> = comp
            .children
            .iter()
            .map(|&c| {
                debug_assert!(analysis.get(c).state >= PassState::Flagged);
                analysis.get(c).needs
            })
            .collect();
        let seats_connections = comp.children.iter().any(|&c| {
            let child = arena.get(c);
            child.is_connection() && !child.bindings.is_empty()
        });
        let d = analysis.get(id);
        let needs = derive_needs(
            &NeedsInputs {
                comp,
                class: &d.class,
                specials: &d.specials,
                targets: &d.targets,
                integrator: d.integrator,
                has_sources: !comp.event_sources.is_empty(),
                force_instance_tracking: conn[id.0].force_instance_tracking,
                inactive_eligible: conn[id.0].inactive_eligible,
                seats_connections,
            },
            &child_needs,
            opts,
        );

        let (local, global) = size_flag_words(&needs, &analysis.get(id).targets, &comp.path, log);
        let d = analysis.get_mut(id);
        d.needs = needs;
        d.local_flags = local;
        d.global_flags = global;
        d.state = PassState::Flagged;
    }
    log.check()?;

    Ok(analysis)
}

/// Count required bits and pick word widths. Local: one latch per event
/// target plus alive / newborn / duplicate-guard bits. Global: clear-newborn
/// and inactive guards.
fn size_flag_words(
    needs: &Needs,
    targets: &[EventTarget],
    path: &str,
    log: &mut ErrorLog,
) -> (Option<FlagWord>, Option<FlagWord>) {
    let mut local_bits: Vec<FlagBit> = (0..targets.len()).map(FlagBit::Event).collect();
    if needs.alive_bit {
        local_bits.push(FlagBit::Alive);
    }
    if needs.newborn_bit {
        local_bits.push(FlagBit::Newborn);
    }
    if needs.dup_guard_bit {
        local_bits.push(FlagBit::DupGuard);
    }

    let mut global_bits: Vec<FlagBit> = Vec::new();
    if needs.clear_newborn {
        global_bits.push(FlagBit::ClearNewbornGuard);
    }
    if needs.inactive_guard {
        global_bits.push(FlagBit::InactiveGuard);
    }

    let local = build_word(local_bits, path, log);
    let global = build_word(global_bits, path, log);
    (local, global)
}
