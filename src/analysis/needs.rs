//! The needs vector: one named boolean per lifecycle operation, derived as a
//! pure function of classification-list sizes, special-variable handles,
//! event tables, and the needs of child components.
//!
//! A method whose flag is false is never emitted, and no caller ever
//! references it; parents inherit the need for any operation a child needs
//! because the parent must call into its children.

use crate::ir::ast::{Component, ComponentKind, TriggerKind};
use crate::options::{BackendOptions, Integrator};

use super::classify::Classification;
use super::events::EventTarget;
use super::special::Specials;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Needs {
    // Lifecycle methods.
    pub construct: bool,
    pub destroy: bool,
    pub clear: bool,
    pub init: bool,
    pub update: bool,
    pub integrate: bool,
    pub derivative: bool,
    /// Snapshot integrated state (multi-stage integration only).
    pub preserve: bool,
    pub restore: bool,
    /// Derivative stack push (multi-stage integration only).
    pub push_der: bool,
    /// Stack consumption inside `integrate`, one pop per stage, never
    /// cascaded so pushes and pops balance per level.
    pub pop_der: bool,
    /// Commit shadow accumulators at phase end.
    pub flush: bool,
    /// Publish externally read values after the step.
    pub finalize: bool,
    /// Spatial path reporting.
    pub path: bool,

    // Structural dynamics.
    pub die: bool,
    pub grow: bool,
    pub split: bool,
    /// Connection (re)discovery.
    pub locate: bool,

    // Flag words and their bits.
    pub local_flags: bool,
    pub global_flags: bool,
    pub alive_bit: bool,
    pub newborn_bit: bool,
    pub dup_guard_bit: bool,
    pub clear_newborn: bool,
    pub inactive_guard: bool,

    // Event machinery.
    pub step_events: bool,
    pub timed_events: bool,

    // Bookkeeping.
    pub count_tracking: bool,
    pub instance_tracking: bool,
    pub thread_local: bool,
}

/// Inputs that are not part of the classification itself.
pub struct NeedsInputs<'a> {
    pub comp: &'a Component,
    pub class: &'a Classification,
    pub specials: &'a Specials,
    pub targets: &'a [EventTarget],
    pub integrator: Integrator,
    pub has_sources: bool,
    /// Forced by a container that cannot skip this component wholesale.
    pub force_instance_tracking: bool,
    /// Connection eligible to be skipped while its populations are empty.
    pub inactive_eligible: bool,
    /// This component seats the binding pointers of a child connection.
    pub seats_connections: bool,
}

pub fn derive_needs(input: &NeedsInputs<'_>, children: &[Needs], opts: &BackendOptions) -> Needs {
    let comp = input.comp;
    let class = input.class;
    let specials = input.specials;

    let any_child = |f: fn(&Needs) -> bool| children.iter().any(f);
    let multi_stage = input.integrator.is_multi_stage();

    let mut n = Needs::default();

    n.update = !class.update.is_empty() || any_child(|c| c.update);
    n.integrate = !class.integrated.is_empty() || any_child(|c| c.integrate);
    n.derivative = !class.derivative.is_empty() || any_child(|c| c.derivative);
    n.init = !class.init.is_empty()
        || specials.count.is_some()
        || specials.index.is_some()
        || any_child(|c| c.init);

    n.preserve = (n.integrate && multi_stage) || any_child(|c| c.preserve);
    n.restore = n.preserve || any_child(|c| c.restore);
    n.push_der = (n.derivative && multi_stage) || any_child(|c| c.push_der);
    n.pop_der = n.push_der || any_child(|c| c.pop_der);

    n.flush = !class.buffered_external_write.is_empty() || any_child(|c| c.flush);
    n.finalize = !class.buffered_external_read.is_empty() || any_child(|c| c.finalize);
    // Event latches and the cycle guard are per-step state and reset with
    // the shadow accumulators.
    n.clear = !class.buffered_external_write.is_empty()
        || !class.buffered_internal.is_empty()
        || !input.targets.is_empty()
        || any_child(|c| c.clear);

    // Structural flags distinguish "happens here" from "happens somewhere
    // below": the cascade methods follow the propagated flag, the per-instance
    // bits only the local one.
    let local_die = specials.death.is_some();
    let local_grow = comp.kind == ComponentKind::Population && specials.count.is_some();
    let local_split = specials.type_sel.is_some();

    n.path = specials.position.is_some() || any_child(|c| c.path);
    n.die = local_die || any_child(|c| c.die);
    n.grow = local_grow || any_child(|c| c.grow);
    n.split = local_split || any_child(|c| c.split);
    n.locate = input.seats_connections || any_child(|c| c.locate);

    n.step_events = input.targets.iter().any(|t| t.trigger == TriggerKind::EveryStep)
        || any_child(|c| c.step_events);
    n.timed_events = input.has_sources
        || input.targets.iter().any(|t| !t.watchers.is_empty())
        || any_child(|c| c.timed_events);

    n.count_tracking = specials.count.is_some();
    n.instance_tracking = input.force_instance_tracking
        || (comp.kind == ComponentKind::Population && (local_die || local_split));

    n.alive_bit = specials.live.is_some() || local_die || n.instance_tracking;
    n.newborn_bit = local_grow || local_split;
    // Only coincident non-zero triggers need the cycle guard.
    n.dup_guard_bit = input
        .targets
        .iter()
        .filter(|t| t.trigger == TriggerKind::NonZero)
        .count()
        > 1;
    n.clear_newborn = n.newborn_bit;
    // Newborn marks are consumed at the end of the step, in finalize.
    n.finalize = n.finalize || n.clear_newborn;
    n.inactive_guard = comp.is_connection() && input.inactive_eligible;

    n.local_flags = !input.targets.is_empty() || n.alive_bit || n.newborn_bit || n.dup_guard_bit;
    n.global_flags = n.clear_newborn || n.inactive_guard;

    n.construct = !class.members.is_empty()
        || n.local_flags
        || n.global_flags
        || comp.kind != ComponentKind::Singleton
        || any_child(|c| c.construct);
    n.destroy = (n.construct && comp.kind != ComponentKind::Singleton)
        || n.instance_tracking
        || any_child(|c| c.destroy);

    n.thread_local = opts.thread_local;

    n
}
