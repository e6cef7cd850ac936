//! Name and reference resolution over the component arena.
//!
//! Connection bindings arrive as dotted component paths; variable references
//! arrive as names optionally qualified by a binding. Both resolve to stable
//! arena indices here. An unresolved reference is an internal inconsistency
//! of the model and therefore fatal, never a transient condition.

use crate::ir::ast::{Binding, CompId, ModelArena};
use crate::ir::error::ErrorLog;
use crate::ir::expr::VarRef;

/// Resolve every component's binding declarations into [`Binding`] entries.
/// Reports a fatal diagnostic for any path that does not name a component.
pub fn resolve_bindings(arena: &mut ModelArena, log: &mut ErrorLog) {
    for idx in 0..arena.len() {
        let id = CompId(idx);
        let decls = arena.get(id).binding_decls.clone();
        let mut resolved = Vec::with_capacity(decls.len());
        for decl in &decls {
            match arena.lookup(&decl.target) {
                Some(target) => resolved.push(Binding {
                    name: decl.name.clone(),
                    target,
                }),
                None => {
                    let path = arena.get(id).path.clone();
                    log.fatal(
                        &path,
                        format!(
                            "connection binding '{}' targets unknown component '{}'",
                            decl.name, decl.target
                        ),
                    );
                }
            }
        }
        arena.get_mut(id).bindings = resolved;
    }
}

/// Resolve a variable reference in the scope of `comp` to its owning
/// component and variable index. A reference qualified by a binding name
/// resolves through that binding's target component.
pub fn resolve_ref(arena: &ModelArena, comp: CompId, r: &VarRef) -> Option<(CompId, usize)> {
    let owner = match &r.binding {
        None => comp,
        Some(binding) => {
            let c = arena.get(comp);
            c.bindings.iter().find(|b| b.name == *binding)?.target
        }
    };
    let idx = arena.get(owner).find_var(&r.name)?;
    Some((owner, idx))
}

/// [`resolve_ref`] that reports a fatal diagnostic on failure.
pub fn resolve_ref_checked(
    arena: &ModelArena,
    comp: CompId,
    r: &VarRef,
    log: &mut ErrorLog,
) -> Option<(CompId, usize)> {
    let resolved = resolve_ref(arena, comp, r);
    if resolved.is_none() {
        let path = arena.get(comp).path.clone();
        log.fatal(&path, format!("unresolved variable reference '{}'", r));
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ast::{BindingDecl, Combiner, ComponentDecl, ComponentKind, Variable};
    use indexmap::IndexMap;

    fn var(name: &str) -> Variable {
        Variable {
            name: name.to_string(),
            order: 0,
            combiner: Combiner::Replace,
            equations: vec![],
            tags: Default::default(),
            exponent: 0,
            used: true,
            derivative_of: None,
        }
    }

    fn model() -> ModelArena {
        let tree = ComponentDecl {
            name: "world".to_string(),
            kind: ComponentKind::Singleton,
            variables: vec![],
            bindings: vec![],
            metadata: IndexMap::new(),
            event_targets: vec![],
            event_sources: vec![],
            children: vec![
                ComponentDecl {
                    name: "cells".to_string(),
                    kind: ComponentKind::Population,
                    variables: vec![var("v")],
                    bindings: vec![],
                    metadata: IndexMap::new(),
                    event_targets: vec![],
                    event_sources: vec![],
                    children: vec![],
                },
                ComponentDecl {
                    name: "links".to_string(),
                    kind: ComponentKind::Connection,
                    variables: vec![],
                    bindings: vec![BindingDecl {
                        name: "pre".to_string(),
                        target: "world.cells".to_string(),
                    }],
                    metadata: IndexMap::new(),
                    event_targets: vec![],
                    event_sources: vec![],
                    children: vec![],
                },
            ],
        };
        ModelArena::from_decl(&tree)
    }

    #[test]
    fn test_binding_resolution() {
        let mut arena = model();
        let mut log = ErrorLog::new();
        resolve_bindings(&mut arena, &mut log);
        assert!(log.check().is_ok());

        let links = arena.lookup("world.links").unwrap();
        assert_eq!(arena.get(links).bindings[0].target, arena.lookup("world.cells").unwrap());

        let r = VarRef::bound("pre", "v");
        let (owner, idx) = resolve_ref(&arena, links, &r).unwrap();
        assert_eq!(owner, arena.lookup("world.cells").unwrap());
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_unresolved_reference_is_fatal() {
        let mut arena = model();
        let mut log = ErrorLog::new();
        resolve_bindings(&mut arena, &mut log);
        let cells = arena.lookup("world.cells").unwrap();
        let r = VarRef::local("missing");
        assert!(resolve_ref_checked(&arena, cells, &r, &mut log).is_none());
        assert!(log.check().is_err());
    }

    #[test]
    fn test_unknown_binding_target_is_fatal() {
        let tree = crate::ir::ast::ComponentDecl {
            name: "world".to_string(),
            kind: ComponentKind::Singleton,
            variables: vec![],
            bindings: vec![BindingDecl {
                name: "pre".to_string(),
                target: "world.nowhere".to_string(),
            }],
            metadata: IndexMap::new(),
            event_targets: vec![],
            event_sources: vec![],
            children: vec![],
        };
        let mut arena = ModelArena::from_decl(&tree);
        let mut log = ErrorLog::new();
        resolve_bindings(&mut arena, &mut log);
        assert!(log.check().is_err());
    }
}
