//! End-to-end scenarios over [`popart::compile`]: whole models in, generated
//! module text out. Each test pins one observable consequence of the
//! analysis (method set, storage, guard emission) rather than the full text.

use indexmap::IndexMap;
use unindent::unindent;

use popart::compile;
use popart::ir::error::BackendError;
use popart::ir::ast::{
    BindingDecl, Combiner, ComponentDecl, ComponentKind, EventSourceDecl, EventTargetDecl,
    GuardedEquation, MetaValue, TriggerKind, VarTags, Variable,
};
use popart::ir::expr::{BinOp, Expr, Func, UnOp, VarRef};
use popart::options::{BackendOptions, Integrator, NumericMode};

fn var(name: &str, equations: Vec<Expr>) -> Variable {
    Variable {
        name: name.to_string(),
        order: 0,
        combiner: Combiner::Replace,
        equations: equations
            .into_iter()
            .map(|value| GuardedEquation { guard: None, value })
            .collect(),
        tags: VarTags::default(),
        exponent: 0,
        used: true,
        derivative_of: None,
    }
}

fn deriv(name: &str, of: usize, value: Expr) -> Variable {
    let mut v = var(name, vec![value]);
    v.order = 1;
    v.derivative_of = Some(of);
    v
}

fn component(name: &str, kind: ComponentKind, variables: Vec<Variable>) -> ComponentDecl {
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

/// Text of one emitted method, from its signature line to the next
/// top-level definition.
fn method_body<'a>(out: &'a str, sig: &str) -> &'a str {
    let start = out.find(sig).unwrap_or_else(|| panic!("missing `{sig}`"));
    let rest = &out[start + sig.len()..];
    let end = rest.find("\nvoid ").unwrap_or(rest.len());
    &rest[..end]
}

// ---------------------------------------------------------------------------
// integration strategy
// ---------------------------------------------------------------------------

/// One decaying state: x' = -x, x(0) = 1.
fn decay_model() -> ComponentDecl {
    let mut x = var("x", vec![Expr::Const(1.0)]);
    x.tags.init_only = true;
    let dx = deriv(
        "x",
        0,
        Expr::Unary {
            op: UnOp::Neg,
            rhs: Box::new(Expr::var("x")),
        },
    );
    component("world", ComponentKind::Singleton, vec![x, dx])
}

#[test]
fn test_euler_stays_single_stage() {
    let out = compile(&decay_model(), &BackendOptions::default()).unwrap();
    assert!(out.contains("void integrate(double dt);"));
    assert!(out.contains("d_x"));
    // No snapshot record, no derivative stack, no stage sequencing.
    assert!(!out.contains("saved_"));
    assert!(!out.contains("der_stack_"));
    assert!(!out.contains("push_derivatives"));
    assert!(!out.contains("advance("));
}

#[test]
fn test_rk4_emits_stage_machinery() {
    let opts = BackendOptions {
        integrator: Integrator::Rk4,
        ..Default::default()
    };
    let out = compile(&decay_model(), &opts).unwrap();
    assert!(out.contains("Saved saved_;"));
    assert!(out.contains("der_stack_[4][1];"));
    assert!(out.contains("void advance(double h);"));
    assert!(out.contains("root_pop.preserve();"));
    assert!(out.contains("root_pop.restore();"));
    // Four derivative evaluations pushed per step.
    let pushes = out.matches("root_pop.push_derivatives();").count();
    assert_eq!(pushes, 4);
    // Stage sequencing runs inside sim_step, before the final integrate.
    assert!(out.find("root_pop.restore();").unwrap() < out.find("root_pop.integrate(dt);").unwrap());
}

#[test]
fn test_nested_rk4_balances_stage_pops() {
    let mut x = var("x", vec![Expr::Const(1.0)]);
    x.tags.init_only = true;
    let dx = deriv(
        "x",
        0,
        Expr::Unary {
            op: UnOp::Neg,
            rhs: Box::new(Expr::var("x")),
        },
    );
    let mut y = var("y", vec![Expr::Const(1.0)]);
    y.tags.init_only = true;
    let dy = deriv(
        "y",
        0,
        Expr::Unary {
            op: UnOp::Neg,
            rhs: Box::new(Expr::var("y")),
        },
    );
    let mut cells = component("cells", ComponentKind::Population, vec![x, dx]);
    cells.children = vec![component("organelles", ComponentKind::Population, vec![y, dy])];
    let mut root = component("world", ComponentKind::Singleton, vec![]);
    root.children = vec![cells];

    let opts = BackendOptions {
        integrator: Integrator::Rk4,
        ..Default::default()
    };
    let out = compile(&root, &opts).unwrap();

    // Each level drains exactly the four stages it pushed; the child's
    // stack is consumed by the child's own integrate, nowhere else.
    let body = method_body(&out, "void CellsPart::integrate(double dt) {");
    assert_eq!(body.matches("--der_sp_;").count(), 4);
    assert!(body.contains("organelles_pop_.integrate(dt);"));
    let child = method_body(&out, "void CellsOrganellesPart::integrate(double dt) {");
    assert_eq!(child.matches("--der_sp_;").count(), 4);
    assert_eq!(out.matches("--der_sp_;").count(), 8);
    // Pushes cascade down the tree; no cascading drain method exists.
    assert!(out.contains("organelles_pop_.push_derivatives();"));
    assert!(!out.contains("pop_derivatives"));
}

#[test]
fn test_mixed_integrators_are_rejected() {
    let mut root = decay_model();
    let mut child = component("fast", ComponentKind::Singleton, vec![]);
    child
        .metadata
        .insert("integrator".to_string(), MetaValue::Str("rk4".to_string()));
    root.children.push(child);
    let err = compile(&root, &BackendOptions::default()).unwrap_err();
    assert!(matches!(err, BackendError::Aborted { .. }));
}

#[test]
fn test_driver_quartet_shape() {
    let out = compile(&decay_model(), &BackendOptions::default()).unwrap();
    assert!(out.contains(&unindent(
        r#"
        extern "C" void run(double t, double dt) {
            sim_step(t, dt);
        }
        "#,
    )));
    assert!(out.contains("extern \"C\" void init()"));
    assert!(out.contains("extern \"C\" void finish(double t)"));
    assert!(out.contains("extern \"C\" void releaseMemory()"));
}

// ---------------------------------------------------------------------------
// connection inactivity
// ---------------------------------------------------------------------------

fn grid_model(link_vars: Vec<Variable>) -> ComponentDecl {
    let cells = component(
        "cells",
        ComponentKind::Population,
        vec![var("$n", vec![Expr::Const(8.0)]), var("v", vec![Expr::Const(0.0)])],
    );
    let mut links = component("links", ComponentKind::Connection, link_vars);
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
    let mut root = component("world", ComponentKind::Singleton, vec![]);
    root.children = vec![cells, links];
    root
}

#[test]
fn test_quiet_connection_goes_dormant() {
    let out = compile(&grid_model(vec![]), &BackendOptions::default()).unwrap();
    // Nothing per-step happens inside the connection: while both bound
    // populations are empty the whole collector is skipped.
    assert!(out.contains("links_pop_.gflags_ |= LinksPop::G_INACTIVE;"));
    assert!(out.contains("links_pop_.gflags_ &= ~LinksPop::G_INACTIVE;"));
    // The bound population needs no liveness bookkeeping for this.
    assert!(!out.contains("F_ALIVE"));
}

#[test]
fn test_connection_update_forces_instance_tracking() {
    let w = var("w", vec![Expr::Var(VarRef::bound("pre", "v"))]);
    let out = compile(&grid_model(vec![w]), &BackendOptions::default()).unwrap();
    // One per-step equation is enough to lose the dormancy shortcut and to
    // impose liveness tracking on the population it reads through.
    assert!(!out.contains("G_INACTIVE"));
    assert!(out.contains("F_ALIVE"));
    assert!(out.contains("alive_count_"));
}

#[test]
fn test_binding_pointers_reseated_by_index() {
    let out = compile(&grid_model(vec![]), &BackendOptions::default()).unwrap();
    // Element indices survive vector reallocation; raw pointers do not.
    assert!(out.contains("size_t pre_idx_;"));
    assert!(out.contains("if (c.pre_idx_ < cells_pop_.parts_.size())"));
    assert!(out.contains("c.pre_ = &cells_pop_.parts_[c.pre_idx_];"));
    assert!(out.contains("c.pre_pop_ = &cells_pop_;"));
}

// ---------------------------------------------------------------------------
// naming
// ---------------------------------------------------------------------------

#[test]
fn test_same_name_under_different_parents_stays_distinct() {
    let cells = || {
        component(
            "cells",
            ComponentKind::Population,
            vec![var("v", vec![Expr::Const(0.0)])],
        )
    };
    let mut left = component("left", ComponentKind::Singleton, vec![]);
    left.children = vec![cells()];
    let mut right = component("right", ComponentKind::Singleton, vec![]);
    right.children = vec![cells()];
    let mut root = component("world", ComponentKind::Singleton, vec![]);
    root.children = vec![left, right];
    let out = compile(&root, &BackendOptions::default()).unwrap();

    // Class names and engine ids carry the enclosing scope.
    assert!(out.contains("class LeftCellsPart;"));
    assert!(out.contains("class RightCellsPart;"));
    assert!(out.contains("COMP_LEFT_CELLS"));
    assert!(out.contains("COMP_RIGHT_CELLS"));
    assert_eq!(out.matches("class CellsPart").count(), 0);
    assert_eq!(out.matches("COMP_CELLS ").count(), 0);
}

#[test]
fn test_unused_pop_reference_is_silenced() {
    let out = compile(&decay_model(), &BackendOptions::default()).unwrap();
    assert!(out.contains("(void)pop;"));
}

// ---------------------------------------------------------------------------
// events
// ---------------------------------------------------------------------------

fn spiking_model(watchers: &[&str], delay: Expr) -> ComponentDecl {
    let mut root = component(
        "world",
        ComponentKind::Singleton,
        vec![var("u", vec![Expr::Const(1.0)])],
    );
    root.event_targets = vec![EventTargetDecl {
        label: "spike".to_string(),
        trigger: TriggerKind::NonZero,
        condition: Expr::binary(BinOp::Gt, Expr::var("$t"), Expr::Const(0.0)),
    }];
    for name in watchers {
        let mut child = component(name, ComponentKind::Singleton, vec![]);
        child.event_sources = vec![EventSourceDecl {
            target_component: "world".to_string(),
            label: "spike".to_string(),
            delay: delay.clone(),
        }];
        root.children.push(child);
    }
    root
}

#[test]
fn test_two_watchers_share_a_latch_slot() {
    let out = compile(
        &spiking_model(&["axon", "dendrite"], Expr::Const(0.0)),
        &BackendOptions::default(),
    )
    .unwrap();
    // Two senders can hit the same target in one step; the stored time of
    // last fire deduplicates the latch.
    assert!(out.contains("last_fire_spike_"));
    assert!(out.contains("last_fire_spike_ < t"));
    assert!(out.contains("engine_pending(COMP_WORLD, 0)"));
    assert!(out.contains("flags_ |= F_EV0"));
    // Immediate constant delay bypasses the engine's time arithmetic.
    assert!(out.contains("engine_schedule_steps(COMP_WORLD, 0, 0);"));
}

#[test]
fn test_coincident_nonzero_triggers_latch_once() {
    let mut root = component(
        "world",
        ComponentKind::Singleton,
        vec![var("u", vec![Expr::Const(1.0)])],
    );
    root.event_targets = vec![
        EventTargetDecl {
            label: "spike".to_string(),
            trigger: TriggerKind::NonZero,
            condition: Expr::binary(BinOp::Gt, Expr::var("$t"), Expr::Const(0.0)),
        },
        EventTargetDecl {
            label: "burst".to_string(),
            trigger: TriggerKind::NonZero,
            condition: Expr::binary(BinOp::Gt, Expr::var("$t"), Expr::Const(1.0)),
        },
    ];
    let out = compile(&root, &BackendOptions::default()).unwrap();

    // The first non-zero trigger latching in a step sets the guard; the
    // second consults it and stands down until the next step.
    assert!(out.contains("&& !(flags_ & F_DUPGUARD)"));
    assert!(out.contains("| F_DUPGUARD;"));
    // The guard resets with the latches at the top of the step.
    let clear = method_body(&out, "void WorldPart::clear_buffers() {");
    assert!(clear.contains("F_DUPGUARD"));
}

#[test]
fn test_single_nonzero_trigger_carries_no_guard() {
    let out = compile(
        &spiking_model(&["axon"], Expr::Const(2.0)),
        &BackendOptions::default(),
    )
    .unwrap();
    assert!(!out.contains("F_DUPGUARD"));
}

#[test]
fn test_constant_delay_on_the_step_grid() {
    let mut decl = spiking_model(&["axon"], Expr::Const(2.0));
    decl.metadata.insert("poll".to_string(), MetaValue::Float(0.5));
    let out = compile(&decl, &BackendOptions::default()).unwrap();
    // 2.0 / 0.5 steps, precomputed at compile time.
    assert!(out.contains("engine_schedule_steps(COMP_WORLD, 0, 4);"));
    // A single watcher with a positive delay needs no latch slot.
    assert!(!out.contains("last_fire_"));
}

#[test]
fn test_runtime_delay_goes_through_the_queue() {
    let mut decl = spiking_model(&[], Expr::Const(0.0));
    let mut child = component(
        "axon",
        ComponentKind::Singleton,
        vec![var("lag", vec![Expr::Const(0.25)])],
    );
    child.event_sources = vec![EventSourceDecl {
        target_component: "world".to_string(),
        label: "spike".to_string(),
        delay: Expr::var("lag"),
    }];
    decl.children.push(child);
    let out = compile(&decl, &BackendOptions::default()).unwrap();
    assert!(out.contains("engine_schedule(COMP_WORLD, 0, lag);"));
}

#[test]
fn test_event_timing_policy_moves_the_check() {
    let decl = spiking_model(&["axon"], Expr::Const(0.0));
    let after = compile(&decl, &BackendOptions::default()).unwrap();
    assert!(after.find("root_pop.update(t, dt);").unwrap()
        < after.find("root_pop.check_events(t, dt);").unwrap());

    let mut before = decl.clone();
    before.metadata.insert(
        "event-timing-policy".to_string(),
        MetaValue::Str("before".to_string()),
    );
    let out = compile(&before, &BackendOptions::default()).unwrap();
    assert!(out.find("root_pop.check_events(t, dt);").unwrap()
        < out.find("root_pop.update(t, dt);").unwrap());
}

// ---------------------------------------------------------------------------
// structural dynamics
// ---------------------------------------------------------------------------

#[test]
fn test_population_growth_and_death() {
    let cells = component(
        "cells",
        ComponentKind::Population,
        vec![
            var("$n", vec![Expr::Const(8.0)]),
            var("$death", vec![Expr::Const(0.0)]),
            var("x", vec![Expr::Const(1.0)]),
        ],
    );
    let mut root = component("world", ComponentKind::Singleton, vec![]);
    root.children = vec![cells];
    let out = compile(&root, &BackendOptions::default()).unwrap();

    assert!(out.contains("void CellsPop::grow(int count, double t, double dt)"));
    assert!(out.contains("parts_.push_back(CellsPart());"));
    assert!(out.contains("p.flags_ |= CellsPart::F_NEWBORN;"));
    assert!(out.contains("++alive_count_;"));
    // Growth reconciliation at the tail of the update phase.
    assert!(out.contains("grow((int)n_ - alive_count_, t, dt);"));
    // Death marks the instance and keeps the slot.
    assert!(out.contains("p.die();"));
    assert!(out.contains("--alive_count_;"));
    assert!(out.contains("root_pop.apply_deaths(dt);"));
    // Newborns skip one finalize before becoming ordinary instances.
    assert!(out.contains("if (gflags_ & G_CLEARNEW)"));
    assert!(out.contains("p.flags_ &= ~CellsPart::F_NEWBORN;"));
}

#[test]
fn test_type_split_targets_the_sibling() {
    let mut cells = component(
        "cells",
        ComponentKind::Population,
        vec![
            var("$n", vec![Expr::Const(4.0)]),
            var("$type", vec![Expr::Const(0.0)]),
            var("$index", vec![]),
        ],
    );
    cells.variables[2].combiner = Combiner::Noop;
    let debris = component(
        "debris",
        ComponentKind::Population,
        vec![var("$n", vec![Expr::Const(0.0)])],
    );
    let mut root = component("world", ComponentKind::Singleton, vec![]);
    root.children = vec![cells, debris];
    let out = compile(&root, &BackendOptions::default()).unwrap();

    assert!(out.contains("void CellsPop::apply_splits()"));
    assert!(out.contains("int sel = (int)p.type_;"));
    assert!(out.contains("if (sel == 0) continue;"));
    // Outcome 1 is the first (and only) sibling, carried by instance index.
    assert!(out.contains("engine_split(COMP_DEBRIS, 1, p.index_);"));
    // The converted instance leaves this population.
    assert!(out.contains("p.die();"));
    assert!(out.contains("--alive_count_;"));
    assert!(out.contains("root_pop.apply_splits();"));
}

// ---------------------------------------------------------------------------
// external buffering
// ---------------------------------------------------------------------------

#[test]
fn test_external_wiring_through_the_engine() {
    let mut input = var("input", vec![]);
    input.combiner = Combiner::Add;
    input.tags.external_write = true;
    let mut output = var("output", vec![Expr::var("input")]);
    output.tags.external_read = true;
    let root = component("world", ComponentKind::Singleton, vec![input, output]);
    let out = compile(&root, &BackendOptions::default()).unwrap();

    // External writes accumulate in a shadow slot, then publish on flush.
    assert!(out.contains("next_input"));
    assert!(out.contains("engine_publish(COMP_WORLD, 0, (double)input);"));
    // External reads are sampled once per step, after everything local ran.
    assert!(out.contains("output = (double)engine_probe(COMP_WORLD, 1);"));
    assert!(out.find("root_pop.flush();").unwrap() < out.find("root_pop.finalize();").unwrap());
}

// ---------------------------------------------------------------------------
// fixed point
// ---------------------------------------------------------------------------

#[test]
fn test_fixed_point_lowering() {
    let mut x = var("x", vec![Expr::Const(1.0)]);
    x.tags.init_only = true;
    x.exponent = 12;
    let mut dx = deriv(
        "x",
        0,
        Expr::Unary {
            op: UnOp::Neg,
            rhs: Box::new(Expr::var("x")),
        },
    );
    dx.exponent = 8;
    let mut y = var(
        "y",
        vec![Expr::Call {
            func: Func::Exp,
            args: vec![Expr::var("x")],
        }],
    );
    y.exponent = 10;
    let root = component("world", ComponentKind::Singleton, vec![x, dx, y]);

    let opts = BackendOptions {
        numeric: NumericMode::Fixed { bits: 32 },
        ..Default::default()
    };
    let out = compile(&root, &opts).unwrap();

    assert!(out.contains("int32_t"));
    assert!(!out.contains("double x"));
    // Products widen, then shift back down by the half-word.
    assert!(out.contains("(int64_t)"));
    assert!(out.contains(">> 16)"));
    // Transcendentals defer to exponent-aware runtime helpers.
    assert!(out.contains("int32_t fx_exp(int32_t x, int ex, int eout);"));
    assert!(out.contains("fx_exp(x, 12, 10)"));
}
