//! Definitions pass: out-of-line method bodies for every Part/Pop pair.
//!
//! Each method is emitted only when the corresponding needs flag is set, and
//! every parent method cascades into the child populations that share the
//! need. Structural dynamics (growth, death, split, locate) and the event
//! machinery live in [`super::dynamics`].

use crate::analysis::needs::Needs;
use crate::analysis::BackendData;
use crate::ir::ast::{Combiner, CompId, Component, Variable};
use crate::ir::error::ErrorLog;

use super::dynamics;
use super::expr::ExprScope;
use super::names::{field_name, last_fire_name, part_class, pop_class, shadow_name};
use super::numeric::NumericStrategy;
use super::Emitter;

pub fn emit_component_defs(em: &mut Emitter<'_>, id: CompId, log: &mut ErrorLog) {
    let d = em.analysis.get(id).clone();
    emit_part_defs(em, id, &d, log);
    emit_pop_defs(em, id, &d, log);
}

// ---------------------------------------------------------------------------
// shared helpers
// ---------------------------------------------------------------------------

pub fn part_scope<'a>(em: &Emitter<'a>, id: CompId) -> ExprScope<'a> {
    ExprScope {
        arena: em.arena,
        comp: id,
        part_recv: "",
        pop_recv: "pop.",
        time_exp: em.time_exp,
    }
}

pub fn pop_scope<'a>(em: &Emitter<'a>, id: CompId) -> ExprScope<'a> {
    ExprScope {
        arena: em.arena,
        comp: id,
        part_recv: "",
        pop_recv: "",
        time_exp: em.time_exp,
    }
}

/// Index of the derivative variable for integrated variable `i`.
pub fn deriv_index(comp: &Component, i: usize) -> Option<usize> {
    comp.variables.iter().position(|v| v.derivative_of == Some(i))
}

fn writes_shadow(d: &BackendData, i: usize) -> bool {
    d.class.buffered_internal.contains(i) || d.class.buffered_external_write.contains(i)
}

/// Whether the Part class gets a `finalize` method. Newborn clearing is a
/// population-level concern, so the instance method exists only for sampled
/// external reads or to reach a child population that finalizes.
pub fn part_finalizes(em: &Emitter<'_>, id: CompId) -> bool {
    let d = em.analysis.get(id);
    !d.class.buffered_external_read.local.is_empty()
        || em
            .arena
            .get(id)
            .children
            .iter()
            .any(|&c| em.analysis.get(c).needs.finalize)
}

fn is_combining(var: &Variable) -> bool {
    !matches!(var.combiner, Combiner::Replace | Combiner::Noop)
}

/// `acc = <combine>(acc, val)` right-hand side for one contribution.
fn combine_rhs(
    s: &dyn NumericStrategy,
    comb: Combiner,
    acc: &str,
    val: String,
    exp: i32,
) -> String {
    match comb {
        Combiner::Replace | Combiner::Noop => val,
        Combiner::Add => format!("({} + {})", acc, val),
        Combiner::Mul => s.align(s.raw_mul(acc, &val), s.natural_exp_mul(exp, exp), exp),
        Combiner::Div => s.align(s.raw_div(acc, &val), s.natural_exp_div(exp, exp), exp),
        Combiner::Min => format!("std::min({}, {})", acc, val),
        Combiner::Max => format!("std::max({}, {})", acc, val),
    }
}

/// Convert a rendered value to engine-facing `double`.
pub fn as_double(s: &dyn NumericStrategy, rendered: &str, exp: i32) -> String {
    if s.is_fixed() {
        format!("((double){} / {:.1})", rendered, 2f64.powi(exp))
    } else {
        format!("(double){}", rendered)
    }
}

fn from_double(s: &dyn NumericStrategy, rendered: &str, exp: i32) -> String {
    if s.is_fixed() {
        format!("({})({} * {:.1})", s.value_type(), rendered, 2f64.powi(exp))
    } else {
        format!("({}){}", s.value_type(), rendered)
    }
}

/// Emit the guarded equation chain assigning into `dest`.
///
/// Replace variables get a first-match-wins `if`/`else if` chain;
/// `default_copy` supplies the carry-forward branch a fully guarded chain
/// needs when the destination is a shadow. Combining variables apply every
/// matching contribution independently.
pub fn emit_chain(
    em: &mut Emitter<'_>,
    sc: &ExprScope<'_>,
    var: &Variable,
    dest: &str,
    default_copy: Option<String>,
    force_replace: bool,
    log: &mut ErrorLog,
) {
    let exp = var.exponent;
    if is_combining(var) && !force_replace {
        for eq in &var.equations {
            let val = sc.render(&*em.strategy, &eq.value, exp, log);
            let rhs = combine_rhs(&*em.strategy, var.combiner, dest, val, exp);
            match &eq.guard {
                Some(g) => {
                    let cond = sc.render_bool(&*em.strategy, g, log);
                    em.p.open(format!("if ({})", cond));
                    em.p.line(format!("{} = {};", dest, rhs));
                    em.p.close();
                }
                None => em.p.line(format!("{} = {};", dest, rhs)),
            }
        }
        return;
    }

    let mut chained = false;
    for eq in &var.equations {
        let val = sc.render(&*em.strategy, &eq.value, exp, log);
        match &eq.guard {
            Some(g) => {
                let cond = sc.render_bool(&*em.strategy, g, log);
                let head = if chained { "else if" } else { "if" };
                em.p.open(format!("{} ({})", head, cond));
                em.p.line(format!("{} = {};", dest, val));
                em.p.close();
                chained = true;
            }
            None => {
                // Unguarded equation terminates the chain.
                if chained {
                    em.p.open("else");
                    em.p.line(format!("{} = {};", dest, val));
                    em.p.close();
                } else {
                    em.p.line(format!("{} = {};", dest, val));
                }
                return;
            }
        }
    }
    if chained {
        if let Some(src) = default_copy {
            em.p.open("else");
            em.p.line(format!("{} = {};", dest, src));
            em.p.close();
        }
    }
}

/// Cascade a call into every child population whose needs include it.
fn cascade(em: &mut Emitter<'_>, id: CompId, need: fn(&Needs) -> bool, call: &str) {
    let children = em.arena.get(id).children.clone();
    for c in children {
        if need(&em.analysis.get(c).needs) {
            let name = em.arena.get(c).name.clone();
            em.p.line(format!("{}_pop_.{}", name, call));
        }
    }
}

// ---------------------------------------------------------------------------
// part methods
// ---------------------------------------------------------------------------

fn emit_part_defs(em: &mut Emitter<'_>, id: CompId, d: &BackendData, log: &mut ErrorLog) {
    let comp = em.arena.get(id);
    let n = &d.needs;
    let part = part_class(comp);
    let pop = pop_class(comp);
    let v = em.value_type();

    if n.construct {
        em.p.open(format!("void {}::construct({}& pop)", part, pop));
        em.p.line("(void)pop;");
        let zero = em.strategy.literal(0.0, 0);
        for &i in &d.class.members.local {
            let var = &comp.variables[i];
            let z = em.strategy.literal(0.0, var.exponent);
            em.p.line(format!("{} = {};", field_name(var), z));
        }
        for &i in d
            .class
            .buffered_internal
            .local
            .iter()
            .chain(&d.class.buffered_external_write.local)
        {
            let var = &comp.variables[i];
            let init = match var.combiner.identity() {
                Some(c) => em.strategy.literal(c, var.exponent),
                None => field_name(var),
            };
            em.p.line(format!("{} = {};", shadow_name(var), init));
        }
        if d.specials.index.is_some() {
            em.p.line("index_ = pop.next_index_++;");
        }
        if d.local_flags.is_some() {
            if n.alive_bit {
                em.p.line("flags_ = F_ALIVE;");
            } else {
                em.p.line("flags_ = 0;");
            }
        }
        if n.push_der && !d.class.derivative.local.is_empty() {
            em.p.line("der_sp_ = 0;");
        }
        for t in &d.targets {
            if t.last_fire_slot {
                let neg = em.strategy.literal(f64::NEG_INFINITY, em.time_exp);
                em.p.line(format!("{} = {};", last_fire_name(&t.label), neg));
            }
            if matches!(
                t.trigger,
                crate::ir::ast::TriggerKind::Rise
                    | crate::ir::ast::TriggerKind::Fall
                    | crate::ir::ast::TriggerKind::Change
            ) {
                em.p.line(format!("prev_{}_ = {};", t.label, zero));
            }
        }
        for b in comp.bindings.iter() {
            em.p.line(format!("{}_ = nullptr;", b.name));
            em.p.line(format!("{}_pop_ = nullptr;", b.name));
            if !em.arena.get(b.target).is_singleton() {
                em.p.line(format!("{}_idx_ = 0;", b.name));
            }
        }
        cascade(em, id, |c| c.construct, "construct();");
        em.p.close();
        em.p.blank();
    }

    if n.clear {
        em.p.open(format!("void {}::clear_buffers()", part));
        for &i in d
            .class
            .buffered_internal
            .local
            .iter()
            .chain(&d.class.buffered_external_write.local)
        {
            let var = &comp.variables[i];
            let reset = match var.combiner.identity() {
                Some(c) => em.strategy.literal(c, var.exponent),
                None => field_name(var),
            };
            em.p.line(format!("{} = {};", shadow_name(var), reset));
        }
        if let Some(word) = &d.local_flags {
            // Event latches and the coincidence guard reset every step.
            let mask: Vec<String> = word
                .bits
                .iter()
                .filter(|b| {
                    matches!(
                        b,
                        crate::analysis::flagword::FlagBit::Event(_)
                            | crate::analysis::flagword::FlagBit::DupGuard
                    )
                })
                .map(|b| b.cpp_name("F"))
                .collect();
            if !mask.is_empty() {
                em.p.line(format!("flags_ &= ~({});", mask.join(" | ")));
            }
        }
        cascade(em, id, |c| c.clear, "clear_buffers();");
        em.p.close();
        em.p.blank();
    }

    if n.init {
        em.p.open(format!("void {}::init({}& pop, {v} t, {v} dt)", part, pop));
        em.p.line("(void)pop;");
        let sc = part_scope(em, id);
        for &i in &d.class.init.local {
            let var = &comp.variables[i];
            if var.equations.is_empty() {
                if let Some(c) = var.combiner.identity() {
                    let lit = em.strategy.literal(c, var.exponent);
                    em.p.line(format!("{} = {};", field_name(var), lit));
                }
                continue;
            }
            let dest = field_name(var);
            emit_chain(em, &sc, var, &dest, None, true, log);
        }
        cascade(em, id, |c| c.init, "init(t, dt);");
        em.p.close();
        em.p.blank();
    }

    if n.update {
        em.p.open(format!("void {}::update({}& pop, {v} t, {v} dt)", part, pop));
        em.p.line("(void)pop;");
        let sc = part_scope(em, id);
        for &i in &d.class.update.local {
            let var = &comp.variables[i];
            let dest = if writes_shadow(d, i) {
                shadow_name(var)
            } else {
                field_name(var)
            };
            let default_copy = if writes_shadow(d, i) && !is_combining(var) {
                Some(field_name(var))
            } else {
                None
            };
            emit_chain(em, &sc, var, &dest, default_copy, false, log);
        }
        // Per-instance contributions into combining population variables.
        for &i in &d.class.update.global {
            let var = &comp.variables[i];
            if !is_combining(var) {
                continue;
            }
            let dest = format!("pop.{}", shadow_name(var));
            emit_chain(em, &sc, var, &dest, None, false, log);
        }
        cascade(em, id, |c| c.update, "update(t, dt);");
        em.p.close();
        em.p.blank();
    }

    if n.derivative {
        em.p.open(format!(
            "void {}::derivative({}& pop, {v} t, {v} dt)",
            part, pop
        ));
        em.p.line("(void)pop;");
        let sc = part_scope(em, id);
        for &i in &d.class.derivative.local {
            let var = &comp.variables[i];
            let dest = field_name(var);
            emit_chain(em, &sc, var, &dest, None, true, log);
        }
        cascade(em, id, |c| c.derivative, "derivative(t, dt);");
        em.p.close();
        em.p.blank();
    }

    if n.integrate {
        emit_part_integrate(em, id, d);
    }

    if n.preserve {
        em.p.open(format!("void {}::preserve()", part));
        for &i in &d.class.integrated.local {
            let var = &comp.variables[i];
            em.p.line(format!("saved_.{} = {};", field_name(var), field_name(var)));
        }
        cascade(em, id, |c| c.preserve, "preserve();");
        em.p.close();
        em.p.blank();
    }

    if n.restore {
        em.p.open(format!("void {}::restore()", part));
        for &i in &d.class.integrated.local {
            let var = &comp.variables[i];
            em.p.line(format!("{} = saved_.{};", field_name(var), field_name(var)));
        }
        cascade(em, id, |c| c.restore, "restore();");
        em.p.close();
        em.p.blank();
    }

    if n.push_der {
        em.p.open(format!("void {}::push_derivatives()", part));
        for (slot, &i) in d.class.derivative.local.iter().enumerate() {
            let var = &comp.variables[i];
            em.p.line(format!("der_stack_[der_sp_][{}] = {};", slot, field_name(var)));
        }
        if !d.class.derivative.local.is_empty() {
            em.p.line("++der_sp_;");
        }
        cascade(em, id, |c| c.push_der, "push_derivatives();");
        em.p.close();
        em.p.blank();
    }

    if n.flush {
        em.p.open(format!("void {}::flush()", part));
        for &i in &d.class.buffered_external_write.local {
            let var = &comp.variables[i];
            em.p.line(format!("{} = {};", field_name(var), shadow_name(var)));
            let val = as_double(&*em.strategy, &field_name(var), var.exponent);
            em.p.line(format!(
                "engine_publish({}, {}, {});",
                em.comp_const(id),
                i,
                val
            ));
        }
        cascade(em, id, |c| c.flush, "flush();");
        em.p.close();
        em.p.blank();
    }

    if part_finalizes(em, id) {
        em.p.open(format!("void {}::finalize()", part));
        for &i in &d.class.buffered_external_read.local {
            let var = &comp.variables[i];
            let probe = format!("engine_probe({}, {})", em.comp_const(id), i);
            em.p.line(format!(
                "{} = {};",
                field_name(var),
                from_double(&*em.strategy, &probe, var.exponent)
            ));
        }
        cascade(em, id, |c| c.finalize, "finalize();");
        em.p.close();
        em.p.blank();
    }

    if n.path {
        em.p.open(format!("void {}::path(std::vector<{v}>& out) const", part));
        if let Some(i) = d.specials.position {
            let var = &comp.variables[i];
            em.p.line(format!("out.push_back({});", field_name(var)));
        }
        cascade(em, id, |c| c.path, "path(out);");
        em.p.close();
        em.p.blank();
    }

    if d.specials.death.is_some() || d.specials.type_sel.is_some() {
        em.p.open(format!("void {}::die()", part));
        if n.alive_bit {
            em.p.line("flags_ &= ~F_ALIVE;");
        }
        em.p.close();
        em.p.blank();
    }

    if n.locate {
        dynamics::emit_part_locate(em, id, d, log);
    }

    if super::decl::has_event_checks(em, id) {
        dynamics::emit_part_check_events(em, id, d, log);
    }
    if super::decl::has_event_fires(em, id) {
        dynamics::emit_part_fire_events(em, id, d, log);
    }

    if n.alive_bit {
        em.p.open(format!("{v} {}::live_value() const", part));
        let exp = d
            .specials
            .live
            .map(|i| em.arena.get(id).variables[i].exponent)
            .unwrap_or(0);
        let one = em.strategy.literal(1.0, exp);
        let zero = em.strategy.literal(0.0, exp);
        em.p.line(format!("return (flags_ & F_ALIVE) ? {} : {};", one, zero));
        em.p.close();
        em.p.blank();
    }
}

fn emit_part_integrate(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let part = part_class(comp);
    let v = em.value_type();
    let te = em.time_exp;

    em.p.open(format!("void {}::integrate({v} dt)", part));
    if d.integrator.is_multi_stage() {
        // Weighted Runge-Kutta combination, popping stages in reverse.
        let pairs: Vec<(usize, usize)> = d
            .class
            .integrated
            .local
            .iter()
            .filter_map(|&i| deriv_index(comp, i).map(|j| (i, j)))
            .collect();
        for &(i, _) in &pairs {
            let var = &comp.variables[i];
            em.p.line(format!("{v} acc_{};", field_name(var)));
        }
        for (stage, weight_double) in [(4, false), (3, true), (2, true), (1, false)] {
            // Stage pops stay level-local; the integrate cascade below lets
            // each child drain its own stack.
            if d.needs.pop_der && !d.class.derivative.local.is_empty() {
                em.p.line("--der_sp_;");
                for (slot, &j) in d.class.derivative.local.iter().enumerate() {
                    let dv = field_name(&comp.variables[j]);
                    em.p.line(format!("{} = der_stack_[der_sp_][{}];", dv, slot));
                }
            }
            for &(i, j) in &pairs {
                let var = &comp.variables[i];
                let dv = field_name(&comp.variables[j]);
                let acc = format!("acc_{}", field_name(var));
                let term = if weight_double {
                    format!("({dv} + {dv})")
                } else {
                    dv.clone()
                };
                if stage == 4 {
                    em.p.line(format!("{} = {};", acc, term));
                } else {
                    em.p.line(format!("{} = ({} + {});", acc, acc, term));
                }
            }
        }
        for &(i, j) in &pairs {
            let var = &comp.variables[i];
            let ed = comp.variables[j].exponent;
            let acc = format!("acc_{}", field_name(var));
            let raw = em.strategy.raw_mul(&acc, "dt");
            let aligned = em
                .strategy
                .align(raw, em.strategy.natural_exp_mul(ed, te), var.exponent);
            let sixth = em.strategy.div_small_int(&aligned, 6);
            em.p.line(format!(
                "{} = (saved_.{} + {});",
                field_name(var),
                field_name(var),
                sixth
            ));
        }
    } else {
        for &i in &d.class.integrated.local {
            let Some(j) = deriv_index(comp, i) else { continue };
            let var = &comp.variables[i];
            let ed = comp.variables[j].exponent;
            let raw = em.strategy.raw_mul(&field_name(&comp.variables[j]), "dt");
            let step = em
                .strategy
                .align(raw, em.strategy.natural_exp_mul(ed, te), var.exponent);
            em.p.line(format!(
                "{} = ({} + {});",
                field_name(var),
                field_name(var),
                step
            ));
        }
    }
    cascade(em, id, |c| c.integrate, "integrate(dt);");
    em.p.close();
    em.p.blank();

    if d.integrator.is_multi_stage() {
        em.p.open(format!("void {}::advance({v} h)", part));
        let comp = em.arena.get(id);
        for &i in &d.class.integrated.local {
            let Some(j) = deriv_index(comp, i) else { continue };
            let var = &comp.variables[i];
            let ed = comp.variables[j].exponent;
            let raw = em.strategy.raw_mul(&field_name(&comp.variables[j]), "h");
            let step = em
                .strategy
                .align(raw, em.strategy.natural_exp_mul(ed, te), var.exponent);
            em.p.line(format!(
                "{} = (saved_.{} + {});",
                field_name(var),
                field_name(var),
                step
            ));
        }
        cascade(em, id, |c| c.integrate, "advance(h);");
        em.p.close();
        em.p.blank();
    }
}

// ---------------------------------------------------------------------------
// pop methods
// ---------------------------------------------------------------------------

/// Open a loop over the live parts; returns the receiver prefix.
fn open_part_loop(em: &mut Emitter<'_>, comp: &Component, d: &BackendData) -> &'static str {
    if comp.is_singleton() {
        return "one_.";
    }
    em.p.open("for (auto& p : parts_)");
    if d.needs.instance_tracking {
        em.p.line(format!(
            "if (!(p.flags_ & {}::F_ALIVE)) continue;",
            part_class(comp)
        ));
    }
    "p."
}

fn close_part_loop(em: &mut Emitter<'_>, comp: &Component) {
    if !comp.is_singleton() {
        em.p.close();
    }
}

fn emit_pop_defs(em: &mut Emitter<'_>, id: CompId, d: &BackendData, log: &mut ErrorLog) {
    let comp = em.arena.get(id);
    let n = &d.needs;
    let pop = pop_class(comp);
    let v = em.value_type();

    if n.construct {
        em.p.open(format!("void {}::construct()", pop));
        for &i in &d.class.members.global {
            let var = &comp.variables[i];
            let z = em.strategy.literal(0.0, var.exponent);
            em.p.line(format!("{} = {};", field_name(var), z));
        }
        for &i in d
            .class
            .buffered_internal
            .global
            .iter()
            .chain(&d.class.buffered_external_write.global)
        {
            let var = &comp.variables[i];
            let init = match var.combiner.identity() {
                Some(c) => em.strategy.literal(c, var.exponent),
                None => field_name(var),
            };
            em.p.line(format!("{} = {};", shadow_name(var), init));
        }
        if d.specials.index.is_some() {
            em.p.line("next_index_ = 0;");
        }
        if n.instance_tracking {
            em.p.line("alive_count_ = 0;");
        }
        if d.global_flags.is_some() {
            em.p.line("gflags_ = 0;");
        }
        if em.opts.profiling {
            em.p.line("prof_updates_ = 0;");
            em.p.line("prof_events_ = 0;");
        }
        if n.push_der && !d.class.derivative.global.is_empty() {
            em.p.line("der_sp_ = 0;");
        }
        if comp.is_singleton() {
            em.p.line("one_.construct(*this);");
        }
        em.p.close();
        em.p.blank();
    }

    if n.destroy {
        em.p.open(format!("void {}::destroy()", pop));
        if !comp.is_singleton() {
            em.p.line("parts_.clear();");
        }
        if n.instance_tracking {
            em.p.line("alive_count_ = 0;");
        }
        em.p.close();
        em.p.blank();
    }

    if n.clear {
        em.p.open(format!("void {}::clear_buffers()", pop));
        for &i in d
            .class
            .buffered_internal
            .global
            .iter()
            .chain(&d.class.buffered_external_write.global)
        {
            let var = &comp.variables[i];
            let reset = match var.combiner.identity() {
                Some(c) => em.strategy.literal(c, var.exponent),
                None => field_name(var),
            };
            em.p.line(format!("{} = {};", shadow_name(var), reset));
        }
        let recv = open_part_loop(em, comp, d);
        em.p.line(format!("{}clear_buffers();", recv));
        close_part_loop(em, comp);
        em.p.close();
        em.p.blank();
    }

    if n.init {
        em.p.open(format!("void {}::init({v} t, {v} dt)", pop));
        let sc = pop_scope(em, id);
        for &i in &d.class.init.global {
            let var = &comp.variables[i];
            if var.equations.is_empty() {
                if let Some(c) = var.combiner.identity() {
                    let lit = em.strategy.literal(c, var.exponent);
                    em.p.line(format!("{} = {};", field_name(var), lit));
                }
                continue;
            }
            let dest = field_name(var);
            emit_chain(em, &sc, var, &dest, None, true, log);
        }
        // Initial population from the count variable, then per-part init.
        if n.grow && n.count_tracking && !comp.is_singleton() {
            if let Some(c) = d.specials.count {
                let var = &comp.variables[c];
                let count = em
                    .strategy
                    .align(field_name(var), var.exponent, 0);
                em.p.line(format!("grow((int){}, t, dt);", count));
            }
        } else {
            let recv = open_part_loop(em, comp, d);
            em.p.line(format!("{}init(*this, t, dt);", recv));
            close_part_loop(em, comp);
        }
        em.p.close();
        em.p.blank();
    }

    if n.update {
        em.p.open(format!("void {}::update({v} t, {v} dt)", pop));
        if n.inactive_guard {
            em.p.line("if (gflags_ & G_INACTIVE) return;");
        }
        if em.opts.profiling {
            em.p.line("++prof_updates_;");
        }
        let recv = open_part_loop(em, comp, d);
        em.p.line(format!("{}update(*this, t, dt);", recv));
        close_part_loop(em, comp);

        // Population-level equations run after every instance contributed.
        let sc = pop_scope(em, id);
        for &i in &d.class.update.global {
            let var = &comp.variables[i];
            if is_combining(var) {
                continue;
            }
            let dest = if writes_shadow(d, i) {
                shadow_name(var)
            } else {
                field_name(var)
            };
            let default_copy = if writes_shadow(d, i) {
                Some(field_name(var))
            } else {
                None
            };
            emit_chain(em, &sc, var, &dest, default_copy, false, log);
        }

        // Two-phase update: expose internally buffered values.
        emit_internal_flip(em, id, d);

        dynamics::emit_growth_check(em, id, d);
        em.p.close();
        em.p.blank();
    }

    if n.derivative {
        em.p.open(format!("void {}::derivative({v} t, {v} dt)", pop));
        if n.inactive_guard {
            em.p.line("if (gflags_ & G_INACTIVE) return;");
        }
        let recv = open_part_loop(em, comp, d);
        em.p.line(format!("{}derivative(*this, t, dt);", recv));
        close_part_loop(em, comp);
        let sc = pop_scope(em, id);
        for &i in &d.class.derivative.global {
            let var = &comp.variables[i];
            let dest = field_name(var);
            emit_chain(em, &sc, var, &dest, None, true, log);
        }
        em.p.close();
        em.p.blank();
    }

    if n.integrate {
        emit_pop_integrate(em, id, d);
    }

    if n.preserve {
        em.p.open(format!("void {}::preserve()", pop));
        for &i in &d.class.integrated.global {
            let var = &comp.variables[i];
            em.p.line(format!("saved_.{} = {};", field_name(var), field_name(var)));
        }
        let recv = open_part_loop(em, comp, d);
        em.p.line(format!("{}preserve();", recv));
        close_part_loop(em, comp);
        em.p.close();
        em.p.blank();
    }

    if n.restore {
        em.p.open(format!("void {}::restore()", pop));
        for &i in &d.class.integrated.global {
            let var = &comp.variables[i];
            em.p.line(format!("{} = saved_.{};", field_name(var), field_name(var)));
        }
        let recv = open_part_loop(em, comp, d);
        em.p.line(format!("{}restore();", recv));
        close_part_loop(em, comp);
        em.p.close();
        em.p.blank();
    }

    if n.push_der {
        em.p.open(format!("void {}::push_derivatives()", pop));
        for (slot, &i) in d.class.derivative.global.iter().enumerate() {
            let var = &comp.variables[i];
            em.p.line(format!("der_stack_[der_sp_][{}] = {};", slot, field_name(var)));
        }
        if !d.class.derivative.global.is_empty() {
            em.p.line("++der_sp_;");
        }
        let recv = open_part_loop(em, comp, d);
        em.p.line(format!("{}push_derivatives();", recv));
        close_part_loop(em, comp);
        em.p.close();
        em.p.blank();
    }

    if n.flush {
        em.p.open(format!("void {}::flush()", pop));
        for &i in &d.class.buffered_external_write.global {
            let var = &comp.variables[i];
            em.p.line(format!("{} = {};", field_name(var), shadow_name(var)));
            let val = as_double(&*em.strategy, &field_name(var), var.exponent);
            em.p.line(format!(
                "engine_publish({}, {}, {});",
                em.comp_const(id),
                i,
                val
            ));
        }
        let recv = open_part_loop(em, comp, d);
        em.p.line(format!("{}flush();", recv));
        close_part_loop(em, comp);
        em.p.close();
        em.p.blank();
    }

    if n.finalize {
        em.p.open(format!("void {}::finalize()", pop));
        if n.clear_newborn {
            em.p.open("if (gflags_ & G_CLEARNEW)");
            if !comp.is_singleton() {
                em.p.open("for (auto& p : parts_)");
                em.p.line(format!(
                    "p.flags_ &= ~{}::F_NEWBORN;",
                    part_class(comp)
                ));
                em.p.close();
            }
            em.p.line("gflags_ &= ~G_CLEARNEW;");
            em.p.close();
        }
        for &i in &d.class.buffered_external_read.global {
            let var = &comp.variables[i];
            let probe = format!("engine_probe({}, {})", em.comp_const(id), i);
            em.p.line(format!(
                "{} = {};",
                field_name(var),
                from_double(&*em.strategy, &probe, var.exponent)
            ));
        }
        if part_finalizes(em, id) {
            let recv = open_part_loop(em, comp, d);
            em.p.line(format!("{}finalize();", recv));
            close_part_loop(em, comp);
        }
        em.p.close();
        em.p.blank();
    }

    if n.path {
        em.p.open(format!("void {}::path(std::vector<{v}>& out) const", pop));
        if comp.is_singleton() {
            em.p.line("one_.path(out);");
        } else {
            em.p.open("for (const auto& p : parts_)");
            if n.instance_tracking {
                em.p.line(format!(
                    "if (!(p.flags_ & {}::F_ALIVE)) continue;",
                    part_class(comp)
                ));
            }
            em.p.line("p.path(out);");
            em.p.close();
        }
        em.p.close();
        em.p.blank();
    }

    if n.count_tracking && !comp.is_singleton() {
        dynamics::emit_pop_grow(em, id, d);
    }
    if n.die {
        dynamics::emit_pop_apply_deaths(em, id, d);
    }
    if n.split {
        dynamics::emit_pop_apply_splits(em, id, d, log);
    }
    if n.locate {
        dynamics::emit_pop_locate(em, id, d);
    }
    if super::decl::has_event_checks(em, id) {
        dynamics::emit_pop_check_events(em, id, d);
    }
    if super::decl::has_event_fires(em, id) {
        dynamics::emit_pop_fire_events(em, id, d);
    }
}

/// Copy internally buffered shadows into their fields at the end of the
/// population's update phase.
fn emit_internal_flip(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let has_local = !d.class.buffered_internal.local.is_empty();
    if has_local {
        if comp.is_singleton() {
            for &i in &d.class.buffered_internal.local {
                let var = &comp.variables[i];
                em.p.line(format!(
                    "one_.{} = one_.{};",
                    field_name(var),
                    shadow_name(var)
                ));
            }
        } else {
            em.p.open("for (auto& p : parts_)");
            for &i in &d.class.buffered_internal.local {
                let var = &comp.variables[i];
                em.p.line(format!("p.{} = p.{};", field_name(var), shadow_name(var)));
            }
            em.p.close();
        }
    }
    for &i in &d.class.buffered_internal.global {
        let var = &comp.variables[i];
        em.p.line(format!("{} = {};", field_name(var), shadow_name(var)));
    }
}

fn emit_pop_integrate(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let pop = pop_class(comp);
    let v = em.value_type();
    let te = em.time_exp;

    em.p.open(format!("void {}::integrate({v} dt)", pop));
    if d.integrator.is_multi_stage() {
        let pairs: Vec<(usize, usize)> = d
            .class
            .integrated
            .global
            .iter()
            .filter_map(|&i| deriv_index(comp, i).map(|j| (i, j)))
            .collect();
        for &(i, _) in &pairs {
            let var = &comp.variables[i];
            em.p.line(format!("{v} acc_{};", field_name(var)));
        }
        for (stage, weight_double) in [(4, false), (3, true), (2, true), (1, false)] {
            // Level-local stage pop; the part loop at the tail drains the
            // per-instance stacks.
            if d.needs.pop_der && !d.class.derivative.global.is_empty() {
                em.p.line("--der_sp_;");
                for (slot, &j) in d.class.derivative.global.iter().enumerate() {
                    let dv = field_name(&comp.variables[j]);
                    em.p.line(format!("{} = der_stack_[der_sp_][{}];", dv, slot));
                }
            }
            for &(i, j) in &pairs {
                let var = &comp.variables[i];
                let dv = field_name(&comp.variables[j]);
                let acc = format!("acc_{}", field_name(var));
                let term = if weight_double {
                    format!("({dv} + {dv})")
                } else {
                    dv.clone()
                };
                if stage == 4 {
                    em.p.line(format!("{} = {};", acc, term));
                } else {
                    em.p.line(format!("{} = ({} + {});", acc, acc, term));
                }
            }
        }
        for &(i, j) in &pairs {
            let var = &comp.variables[i];
            let ed = comp.variables[j].exponent;
            let acc = format!("acc_{}", field_name(var));
            let raw = em.strategy.raw_mul(&acc, "dt");
            let aligned = em
                .strategy
                .align(raw, em.strategy.natural_exp_mul(ed, te), var.exponent);
            let sixth = em.strategy.div_small_int(&aligned, 6);
            em.p.line(format!(
                "{} = (saved_.{} + {});",
                field_name(var),
                field_name(var),
                sixth
            ));
        }
    } else {
        for &i in &d.class.integrated.global {
            let Some(j) = deriv_index(comp, i) else { continue };
            let var = &comp.variables[i];
            let ed = comp.variables[j].exponent;
            let raw = em.strategy.raw_mul(&field_name(&comp.variables[j]), "dt");
            let step = em
                .strategy
                .align(raw, em.strategy.natural_exp_mul(ed, te), var.exponent);
            em.p.line(format!(
                "{} = ({} + {});",
                field_name(var),
                field_name(var),
                step
            ));
        }
    }
    let recv = open_part_loop(em, comp, d);
    em.p.line(format!("{}integrate(dt);", recv));
    close_part_loop(em, comp);
    em.p.close();
    em.p.blank();

    if d.integrator.is_multi_stage() {
        em.p.open(format!("void {}::advance({v} h)", pop));
        for &i in &d.class.integrated.global {
            let Some(j) = deriv_index(comp, i) else { continue };
            let var = &comp.variables[i];
            let ed = comp.variables[j].exponent;
            let raw = em.strategy.raw_mul(&field_name(&comp.variables[j]), "h");
            let step = em
                .strategy
                .align(raw, em.strategy.natural_exp_mul(ed, te), var.exponent);
            em.p.line(format!(
                "{} = (saved_.{} + {});",
                field_name(var),
                field_name(var),
                step
            ));
        }
        let recv = open_part_loop(em, comp, d);
        em.p.line(format!("{}advance(h);", recv));
        close_part_loop(em, comp);
        em.p.close();
        em.p.blank();
    }
}
