//! Well-known special variables, bound by name and order convention.
//!
//! `$index` and `$live` receive bespoke storage (a monotonic counter and a
//! single flag bit) and are excluded from ordinary classification.

use crate::ir::ast::{Component, ComponentKind};
use crate::ir::error::ErrorLog;

pub const VAR_COUNT: &str = "$n";
pub const VAR_DEATH: &str = "$death";
pub const VAR_TYPE: &str = "$type";
pub const VAR_INDEX: &str = "$index";
pub const VAR_LIVE: &str = "$live";
pub const VAR_TIME: &str = "$t";
pub const VAR_POSITION: &str = "$pos";

/// Handles to the well-known variables of one component (indices into its
/// variable table).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Specials {
    /// Population count.
    pub count: Option<usize>,
    /// Probability-of-death rate.
    pub death: Option<usize>,
    /// Structural-type selector.
    pub type_sel: Option<usize>,
    /// Monotonic instance index.
    pub index: Option<usize>,
    /// Liveness flag.
    pub live: Option<usize>,
    /// Simulation time (order 0).
    pub time: Option<usize>,
    /// Time derivative, i.e. the step size (order 1).
    pub time_der: Option<usize>,
    /// Spatial position.
    pub position: Option<usize>,
}

impl Specials {
    /// Variables that never enter ordinary classification.
    pub fn is_bespoke(&self, var_index: usize) -> bool {
        self.index == Some(var_index) || self.live == Some(var_index)
    }
}

/// Bind the special variables of `comp` and validate their placement.
///
/// Declaring the population count explicitly on a connection component is
/// fatal: connections derive cardinality from their bindings. A count
/// variable that looks constant while the component can structurally change
/// only warrants a warning.
pub fn bind_specials(comp: &Component, log: &mut ErrorLog) -> Specials {
    let mut specials = Specials::default();
    for (i, var) in comp.variables.iter().enumerate() {
        match (var.name.as_str(), var.order) {
            (VAR_COUNT, 0) => specials.count = Some(i),
            (VAR_DEATH, 0) => specials.death = Some(i),
            (VAR_TYPE, 0) => specials.type_sel = Some(i),
            (VAR_INDEX, 0) => specials.index = Some(i),
            (VAR_LIVE, 0) => specials.live = Some(i),
            (VAR_TIME, 0) => specials.time = Some(i),
            (VAR_TIME, 1) => specials.time_der = Some(i),
            (VAR_POSITION, 0) => specials.position = Some(i),
            _ => {}
        }
    }

    if comp.kind == ComponentKind::Connection && specials.count.is_some() {
        log.fatal(
            &comp.path,
            "explicit population size on a connection component; \
             connections derive cardinality from their bindings",
        );
    }

    if let Some(n) = specials.count {
        let count_var = &comp.variables[n];
        let structurally_dynamic =
            specials.death.is_some() || specials.type_sel.is_some();
        if count_var.tags.constant && structurally_dynamic {
            log.warn(
                &comp.path,
                "population count is tagged constant but structural \
                 dynamics (death or type change) can change it",
            );
        }
    }

    specials
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ast::{Combiner, ComponentDecl, ModelArena, VarTags, Variable};
    use indexmap::IndexMap;

    fn var(name: &str, order: u8) -> Variable {
        Variable {
            name: name.to_string(),
            order,
            combiner: Combiner::Replace,
            equations: vec![],
            tags: VarTags::default(),
            exponent: 0,
            used: true,
            derivative_of: None,
        }
    }

    fn component(kind: ComponentKind, variables: Vec<Variable>) -> ModelArena {
        ModelArena::from_decl(&ComponentDecl {
            name: "cells".to_string(),
            kind,
            variables,
            bindings: vec![],
            metadata: IndexMap::new(),
            event_targets: vec![],
            event_sources: vec![],
            children: vec![],
        })
    }

    #[test]
    fn test_binding_by_name_and_order() {
        let arena = component(
            ComponentKind::Population,
            vec![var("$n", 0), var("v", 0), var("$t", 0), var("$t", 1), var("$live", 0)],
        );
        let mut log = ErrorLog::new();
        let s = bind_specials(arena.get(arena.root()), &mut log);
        assert_eq!(s.count, Some(0));
        assert_eq!(s.time, Some(2));
        assert_eq!(s.time_der, Some(3));
        assert_eq!(s.live, Some(4));
        assert!(s.is_bespoke(4));
        assert!(!s.is_bespoke(1));
        assert!(log.check().is_ok());
    }

    #[test]
    fn test_count_on_connection_is_fatal() {
        let arena = component(ComponentKind::Connection, vec![var("$n", 0)]);
        let mut log = ErrorLog::new();
        bind_specials(arena.get(arena.root()), &mut log);
        assert!(log.check().is_err());
    }

    #[test]
    fn test_constant_count_under_dynamics_warns() {
        let mut count = var("$n", 0);
        count.tags.constant = true;
        let arena = component(ComponentKind::Population, vec![count, var("$death", 0)]);
        let mut log = ErrorLog::new();
        bind_specials(arena.get(arena.root()), &mut log);
        assert!(log.check().is_ok());
        assert_eq!(log.diagnostics.len(), 1);
    }
}
