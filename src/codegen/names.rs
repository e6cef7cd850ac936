//! Naming conventions for the emitted C++.
//!
//! Special variables keep a trailing underscore so generated fields never
//! collide with user variable names (user names cannot start with `$`).
//! Shadow fields carry the fixed `next_` prefix.

use crate::ir::ast::{Component, Variable};

/// `cells` -> `Cells`, `fast_cells` -> `FastCells`, `left.cells` ->
/// `LeftCells`.
pub fn pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if ch == '_' || ch == '$' || ch == '.' {
            upper = true;
            continue;
        }
        if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Name scope of a component: its dotted path without the root segment,
/// which every path shares. Components with the same name under different
/// parents keep distinct scopes.
pub fn scope(comp: &Component) -> &str {
    match comp.path.split_once('.') {
        Some((_, rest)) => rest,
        None => &comp.path,
    }
}

pub fn part_class(comp: &Component) -> String {
    format!("{}Part", pascal_case(scope(comp)))
}

pub fn pop_class(comp: &Component) -> String {
    format!("{}Pop", pascal_case(scope(comp)))
}

fn sanitize(name: &str) -> String {
    if let Some(stripped) = name.strip_prefix('$') {
        format!("{}_", stripped)
    } else {
        name.to_string()
    }
}

/// Storage field for a variable; derivatives get a `d<order>_` prefix since
/// they share their base variable's name.
pub fn field_name(var: &Variable) -> String {
    let base = sanitize(&var.name);
    match var.order {
        0 => base,
        1 => format!("d_{}", base),
        n => format!("d{}_{}", n, base),
    }
}

/// Population-level fields use the same convention; they live in a separate
/// class so no extra mangling is required.
pub fn pop_field_name(var: &Variable) -> String {
    field_name(var)
}

/// Shadow "next" slot of a buffered variable.
pub fn shadow_name(var: &Variable) -> String {
    format!("next_{}", field_name(var))
}

/// Per-target time-of-last-fire slot.
pub fn last_fire_name(label: &str) -> String {
    format!("last_fire_{}_", sanitize(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ast::{Combiner, VarTags};

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

    #[test]
    fn test_names() {
        assert_eq!(pascal_case("fast_cells"), "FastCells");
        assert_eq!(pascal_case("left.cells"), "LeftCells");
        assert_eq!(field_name(&var("v", 0)), "v");
        assert_eq!(field_name(&var("v", 1)), "d_v");
        assert_eq!(field_name(&var("v", 2)), "d2_v");
        assert_eq!(field_name(&var("$n", 0)), "n_");
        assert_eq!(shadow_name(&var("sum", 0)), "next_sum");
        assert_eq!(last_fire_name("spike"), "last_fire_spike_");
    }
}
