//! Variable classification: partition each component's variables into the
//! semantic storage lists the emitter reads.
//!
//! Buffering discipline: a buffered variable's writes go to a shadow "next"
//! slot during the owning phase, and a single copy step at phase end makes
//! the new value visible. All readers within one step therefore see a
//! consistent pre-step value.

use crate::ir::ast::{Combiner, Component, Variable};
use crate::ir::error::ErrorLog;

use super::special::Specials;

/// A classification list, split into per-instance and per-population halves.
/// Entries are indices into the component's variable table, in declaration
/// (= dependency) order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Split {
    pub local: Vec<usize>,
    pub global: Vec<usize>,
}

impl Split {
    pub fn push(&mut self, var: &Variable, index: usize) {
        if var.tags.global {
            self.global.push(index);
        } else {
            self.local.push(index);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.global.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.local.contains(&index) || self.global.contains(&index)
    }

    fn all(&self) -> impl Iterator<Item = usize> + '_ {
        self.local.iter().chain(self.global.iter()).copied()
    }

    fn clear(&mut self) {
        self.local.clear();
        self.global.clear();
    }
}

/// Where a buffered variable's readers live relative to its write phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Variables with storage (every stored variable appears here or is
    /// preexistent, never both).
    pub members: Split,
    /// Participate in the init phase.
    pub init: Split,
    /// Recomputed every step.
    pub update: Split,
    /// Double-buffered; read-after-write ordering matters within the phase.
    pub buffered_internal: Split,
    /// Double-buffered; read outside the owning update phase.
    pub buffered_external_read: Split,
    /// Double-buffered; written from outside, shadow slot is an accumulator
    /// cleared to the combiner identity at phase start.
    pub buffered_external_write: Split,
    /// Order-0 variables advanced by the integrator.
    pub integrated: Split,
    /// Higher-order variables feeding the integrator.
    pub derivative: Split,
}

impl Classification {
    /// Mutual-exclusion and completeness check over storage outcomes; used
    /// by tests and debug assertions.
    pub fn storage_outcome(&self, comp: &Component, index: usize) -> StorageOutcome {
        let var = &comp.variables[index];
        if var.tags.preexistent {
            return StorageOutcome::Preexistent;
        }
        if self.members.contains(index) {
            return StorageOutcome::Member;
        }
        StorageOutcome::Excluded
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageOutcome {
    Member,
    Preexistent,
    Excluded,
}

/// A pure alias: a reference variable with no equations of its own. Reads
/// through it compile to reads of the referent; it needs no classification.
fn is_pure_alias(var: &Variable) -> bool {
    var.tags.reference && !var.has_equations()
}

/// Classify one component's variables. Specials `$index`/`$live` are skipped
/// entirely (bespoke storage); the remaining variables are visited in
/// declaration order, which the front end guarantees is dependency order.
pub fn classify_component(
    comp: &Component,
    specials: &Specials,
    _log: &mut ErrorLog,
) -> Classification {
    let mut class = Classification::default();

    for (i, var) in comp.variables.iter().enumerate() {
        if specials.is_bespoke(i) {
            continue;
        }
        if var.tags.constant || is_pure_alias(var) || var.is_dead_temporary() {
            continue;
        }

        // Storage.
        if !var.tags.temporary && !var.tags.dummy && !var.tags.preexistent {
            class.members.push(var, i);
        }

        // Phase participation. Derivative equations run in the derivative
        // phase, never in update.
        let noop = var.combiner.is_noop();
        if var.has_equations() && !var.tags.init_only && !noop && var.order == 0 {
            class.update.push(var, i);
        }
        if !(noop && !var.used) {
            class.init.push(var, i);
        }

        // Integration.
        if var.order > 0 {
            class.derivative.push(var, i);
        } else if comp
            .variables
            .iter()
            .any(|other| other.derivative_of == Some(i))
        {
            class.integrated.push(var, i);
        }

        // Buffering.
        let combining = !matches!(var.combiner, Combiner::Replace | Combiner::Noop);
        if var.tags.external_write {
            class.buffered_external_write.push(var, i);
        } else if var.tags.external_read {
            class.buffered_external_read.push(var, i);
        } else if var.tags.cycle || combining {
            class.buffered_internal.push(var, i);
        }
    }

    purge_dead_lists(comp, &mut class);
    class
}

/// Drop any list that, after classification, holds only unused temporaries.
/// Dead temporaries are filtered up front, so this catches lists whose every
/// surviving entry is a temporary nothing reads.
fn purge_dead_lists(comp: &Component, class: &mut Classification) {
    let only_dead = |s: &Split| -> bool {
        !s.is_empty()
            && s.all().all(|i| {
                let v = &comp.variables[i];
                v.tags.temporary && !v.used
            })
    };
    for list in [
        &mut class.init,
        &mut class.update,
        &mut class.buffered_internal,
        &mut class.buffered_external_read,
        &mut class.buffered_external_write,
    ] {
        if only_dead(list) {
            list.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::special::bind_specials;
    use crate::ir::ast::{ComponentDecl, ComponentKind, GuardedEquation, ModelArena, VarTags};
    use crate::ir::expr::Expr;
    use indexmap::IndexMap;

    fn var(name: &str, combiner: Combiner, tags: VarTags, eqs: usize) -> Variable {
        Variable {
            name: name.to_string(),
            order: 0,
            combiner,
            equations: (0..eqs)
                .map(|_| GuardedEquation {
                    guard: None,
                    value: Expr::Const(1.0),
                })
                .collect(),
            tags,
            exponent: 0,
            used: true,
            derivative_of: None,
        }
    }

    fn arena_of(variables: Vec<Variable>) -> ModelArena {
        ModelArena::from_decl(&ComponentDecl {
            name: "cells".to_string(),
            kind: ComponentKind::Population,
            variables,
            bindings: vec![],
            metadata: IndexMap::new(),
            event_targets: vec![],
            event_sources: vec![],
            children: vec![],
        })
    }

    #[test]
    fn test_storage_completeness_and_exclusion() {
        let mut constant = var("k", Combiner::Replace, VarTags::default(), 0);
        constant.tags.constant = true;
        let mut pre = var("engine", Combiner::Noop, VarTags::default(), 0);
        pre.tags.preexistent = true;
        let plain = var("v", Combiner::Replace, VarTags::default(), 1);
        let mut global = var("g", Combiner::Replace, VarTags::default(), 1);
        global.tags.global = true;

        let arena = arena_of(vec![constant, pre, plain, global]);
        let comp = arena.get(arena.root());
        let mut log = ErrorLog::new();
        let specials = bind_specials(comp, &mut log);
        let class = classify_component(comp, &specials, &mut log);

        // Every stored variable is member xor preexistent.
        assert_eq!(class.storage_outcome(comp, 0), StorageOutcome::Excluded);
        assert_eq!(class.storage_outcome(comp, 1), StorageOutcome::Preexistent);
        assert_eq!(class.storage_outcome(comp, 2), StorageOutcome::Member);
        assert_eq!(class.storage_outcome(comp, 3), StorageOutcome::Member);

        // Local and global halves never share a variable.
        assert_eq!(class.members.local, vec![2]);
        assert_eq!(class.members.global, vec![3]);
    }

    #[test]
    fn test_update_and_init_eligibility() {
        let updated = var("v", Combiner::Replace, VarTags::default(), 1);
        let mut init_only = var("v0", Combiner::Replace, VarTags::default(), 1);
        init_only.tags.init_only = true;
        let storage_only = var("w", Combiner::Noop, VarTags::default(), 0);
        let mut dead_storage = var("z", Combiner::Noop, VarTags::default(), 0);
        dead_storage.used = false;

        let arena = arena_of(vec![updated, init_only, storage_only, dead_storage]);
        let comp = arena.get(arena.root());
        let mut log = ErrorLog::new();
        let specials = bind_specials(comp, &mut log);
        let class = classify_component(comp, &specials, &mut log);

        assert_eq!(class.update.local, vec![0]);
        // init takes everything except unused no-op-combiner variables.
        assert_eq!(class.init.local, vec![0, 1, 2]);
    }

    #[test]
    fn test_derivative_links() {
        let pos = var("x", Combiner::Replace, VarTags::default(), 0);
        let mut vel = var("x", Combiner::Replace, VarTags::default(), 1);
        vel.order = 1;
        vel.derivative_of = Some(0);

        let arena = arena_of(vec![pos, vel]);
        let comp = arena.get(arena.root());
        let mut log = ErrorLog::new();
        let specials = bind_specials(comp, &mut log);
        let class = classify_component(comp, &specials, &mut log);

        assert_eq!(class.integrated.local, vec![0]);
        assert_eq!(class.derivative.local, vec![1]);
    }

    #[test]
    fn test_buffering_categories() {
        let mut ext_write = var("input", Combiner::Add, VarTags::default(), 0);
        ext_write.tags.external_write = true;
        let mut ext_read = var("output", Combiner::Replace, VarTags::default(), 1);
        ext_read.tags.external_read = true;
        let mut cyclic = var("mem", Combiner::Replace, VarTags::default(), 1);
        cyclic.tags.cycle = true;
        let accum = var("sum", Combiner::Add, VarTags::default(), 1);

        let arena = arena_of(vec![ext_write, ext_read, cyclic, accum]);
        let comp = arena.get(arena.root());
        let mut log = ErrorLog::new();
        let specials = bind_specials(comp, &mut log);
        let class = classify_component(comp, &specials, &mut log);

        assert_eq!(class.buffered_external_write.local, vec![0]);
        assert_eq!(class.buffered_external_read.local, vec![1]);
        assert_eq!(class.buffered_internal.local, vec![2, 3]);
    }

    #[test]
    fn test_bespoke_specials_not_classified() {
        let mut live = var("$live", Combiner::Noop, VarTags::default(), 0);
        live.name = "$live".to_string();
        let mut index = var("$index", Combiner::Noop, VarTags::default(), 0);
        index.name = "$index".to_string();

        let arena = arena_of(vec![live, index]);
        let comp = arena.get(arena.root());
        let mut log = ErrorLog::new();
        let specials = bind_specials(comp, &mut log);
        let class = classify_component(comp, &specials, &mut log);

        assert!(class.members.is_empty());
        assert!(class.init.is_empty());
    }
}
