//! Connection inactivity eligibility.
//!
//! A connection instance may be skipped entirely while the populations it
//! binds are empty, but only if nothing per-step can happen inside it and
//! every bound population can report emptiness cheaply. Eligibility is
//! computed bottom-up, then rechecked top-down: an ineligible connection
//! forces retroactive instance tracking in the populations it touches, since
//! they must be iterable even while "empty".

use crate::ir::ast::{ComponentKind, ModelArena};

use super::classify::Classification;
use super::special::Specials;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Eligible to be treated as inactive while its populations are empty.
    pub inactive_eligible: bool,
    /// Instance tracking imposed from above.
    pub force_instance_tracking: bool,
}

pub fn analyze_connections(
    arena: &ModelArena,
    classes: &[Classification],
    specials: &[Specials],
) -> Vec<ConnectionInfo> {
    let mut info = vec![ConnectionInfo::default(); arena.len()];

    // Bottom-up: decide per-component eligibility.
    for &id in &arena.postorder() {
        let comp = arena.get(id);
        info[id.0].inactive_eligible = match comp.kind {
            // A population reports emptiness cheaply only when it tracks an
            // explicit count.
            ComponentKind::Population => specials[id.0].count.is_some(),
            ComponentKind::Singleton => true,
            ComponentKind::Connection => {
                let class = &classes[id.0];
                let no_dynamics = class.update.is_empty();
                let no_death = specials[id.0].death.is_none();
                let targets_eligible = comp
                    .bindings
                    .iter()
                    .all(|b| info[b.target.0].inactive_eligible);
                no_dynamics && no_death && targets_eligible
            }
        };
    }

    // Top-down recheck: an ineligible connection keeps running while its
    // populations are empty, so those populations must track instances.
    for &id in &arena.preorder() {
        let comp = arena.get(id);
        if comp.is_connection() && !info[id.0].inactive_eligible {
            for b in &comp.bindings {
                info[b.target.0].force_instance_tracking = true;
            }
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classify::classify_component;
    use crate::analysis::special::bind_specials;
    use crate::ir::ast::{
        BindingDecl, Combiner, ComponentDecl, GuardedEquation, VarTags, Variable,
    };
    use crate::ir::error::ErrorLog;
    use crate::ir::expr::Expr;
    use crate::ir::resolve::resolve_bindings;
    use indexmap::IndexMap;

    fn var(name: &str, eqs: usize) -> Variable {
        Variable {
            name: name.to_string(),
            order: 0,
            combiner: Combiner::Replace,
            equations: (0..eqs)
                .map(|_| GuardedEquation {
                    guard: None,
                    value: Expr::Const(0.0),
                })
                .collect(),
            tags: VarTags::default(),
            exponent: 0,
            used: true,
            derivative_of: None,
        }
    }

    fn decl(name: &str, kind: ComponentKind, variables: Vec<Variable>) -> ComponentDecl {
        ComponentDecl {
            name: name.to_string(),
            kind,
            variables,
            bindings: vec![],
            metadata: IndexMap::new(),
            event_targets: vec![],
            event_sources: vec![],
            children: vec![],
        }
    }

    fn build(link_vars: Vec<Variable>, link_death: bool) -> (ModelArena, Vec<ConnectionInfo>) {
        let cells = decl("cells", ComponentKind::Population, vec![var("$n", 0)]);
        let mut link_vars = link_vars;
        if link_death {
            link_vars.push(var("$death", 1));
        }
        let mut links = decl("links", ComponentKind::Connection, link_vars);
        links.bindings = vec![
            BindingDecl {
                name: "pre".to_string(),
                target: "world.cells".to_string(),
            },
            BindingDecl {
                name: "post".to_string(),
                target: "world.cells".to_string(),
            },
        ];
        let mut root = decl("world", ComponentKind::Singleton, vec![]);
        root.children = vec![cells, links];

        let mut arena = ModelArena::from_decl(&root);
        let mut log = ErrorLog::new();
        resolve_bindings(&mut arena, &mut log);
        let specials: Vec<_> = arena
            .components
            .iter()
            .map(|c| bind_specials(c, &mut log))
            .collect();
        let classes: Vec<_> = arena
            .components
            .iter()
            .zip(&specials)
            .map(|(c, s)| classify_component(c, s, &mut log))
            .collect();
        let info = analyze_connections(&arena, &classes, &specials);
        (arena, info)
    }

    #[test]
    fn test_quiet_connection_is_eligible() {
        let (arena, info) = build(vec![], false);
        let links = arena.lookup("world.links").unwrap();
        assert!(info[links.0].inactive_eligible);
        let cells = arena.lookup("world.cells").unwrap();
        assert!(!info[cells.0].force_instance_tracking);
    }

    #[test]
    fn test_one_update_equation_flips_eligibility() {
        let (arena, info) = build(vec![var("w", 1)], false);
        let links = arena.lookup("world.links").unwrap();
        assert!(!info[links.0].inactive_eligible);
        // The touched population must now track instances.
        let cells = arena.lookup("world.cells").unwrap();
        assert!(info[cells.0].force_instance_tracking);
    }

    #[test]
    fn test_death_term_flips_eligibility() {
        let (arena, info) = build(vec![], true);
        let links = arena.lookup("world.links").unwrap();
        assert!(!info[links.0].inactive_eligible);
    }
}
