//! Declarations pass: preamble, forward declarations, and the Part/Pop
//! class bodies with storage mirroring the classification lists and method
//! prototypes mirroring the needs flags.

use crate::analysis::BackendData;
use crate::ir::ast::{CompId, TriggerKind};

use super::names::{field_name, last_fire_name, part_class, pop_class, shadow_name};
use super::Emitter;

pub fn emit_preamble(em: &mut Emitter<'_>) {
    let v = em.value_type();
    em.p.line(format!(
        "// Generated by popart {}. Do not edit.",
        env!("CARGO_PKG_VERSION")
    ));
    em.p.line("#include <algorithm>");
    em.p.line("#include <cmath>");
    em.p.line("#include <cstddef>");
    em.p.line("#include <cstdint>");
    em.p.line("#include <vector>");
    em.p.blank();

    if em.opts.debug {
        em.p.line("#define POPART_DEBUG 1");
        em.p.blank();
    }

    // Simulation engine interface: scheduling queue, RNG, structural ops.
    em.p.open("extern \"C\"");
    em.p.line("double engine_random();");
    em.p.line(format!("void engine_schedule(int comp, int ev, {} delay);", v));
    em.p.line("void engine_schedule_steps(int comp, int ev, long steps);");
    em.p.line("int engine_pending(int comp, int ev);");
    em.p.line("void engine_publish(int comp, int var, double value);");
    em.p.line("double engine_probe(int comp, int var);");
    em.p.line("void engine_split(int comp, int outcome, uint64_t index);");
    em.p.close();
    em.p.blank();

    if em.strategy.is_fixed() {
        // Exponent-aware runtime helpers; the lowering passes exponents,
        // never run-time shift amounts.
        for f in ["exp", "log", "sqrt", "sin", "cos", "atan"] {
            em.p.line(format!("{v} fx_{f}({v} x, int ex, int eout);"));
        }
        em.p.line(format!("{v} fx_pow({v} a, int ea, {v} b, int eb, int eout);"));
        em.p.line(format!("{v} fx_norm({v} a, int ea, {v} b, int eb, int eout);"));
        em.p.blank();
    }

    // Component ids for the engine interface.
    for comp in &em.arena.components {
        let name = em.comp_const(comp.id);
        em.p.line(format!("static const int {} = {};", name, comp.id.0));
    }
    em.p.blank();

    // Forward declarations so binding pointers can cross the tree freely.
    for comp in &em.arena.components {
        em.p.line(format!("class {};", part_class(comp)));
        em.p.line(format!("class {};", pop_class(comp)));
    }
    em.p.blank();
}

pub fn emit_component_decl(em: &mut Emitter<'_>, id: CompId) {
    let d = em.analysis.get(id).clone();
    emit_part_decl(em, id, &d);
    emit_pop_decl(em, id, &d);
}

fn emit_part_decl(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let v = em.value_type();
    let part = part_class(comp);
    let pop = pop_class(comp);
    let n = &d.needs;

    em.p.line(format!("// {} instance state", comp.path));
    em.p.open(format!("class {}", part));
    em.p.label("public:");

    // Local members, in classification order.
    for &i in &d.class.members.local {
        em.p.line(format!("{} {};", v, field_name(&comp.variables[i])));
    }
    // External reads are sampled once per step straight into the field, so
    // only internal and external-write buffering gets a shadow slot.
    for &i in d
        .class
        .buffered_internal
        .local
        .iter()
        .chain(&d.class.buffered_external_write.local)
    {
        em.p.line(format!("{} {};", v, shadow_name(&comp.variables[i])));
    }

    if d.specials.index.is_some() {
        em.p.line("uint64_t index_;");
    }

    // Snapshot record and derivative stack exist only under multi-stage
    // integration.
    if n.preserve && !d.class.integrated.local.is_empty() {
        em.p.open("struct Saved");
        for &i in &d.class.integrated.local {
            em.p.line(format!("{} {};", v, field_name(&comp.variables[i])));
        }
        em.p.close_semi();
        em.p.line("Saved saved_;");
    }
    if n.push_der && !d.class.derivative.local.is_empty() {
        em.p.line(format!(
            "{} der_stack_[{}][{}];",
            v,
            d.integrator.stages(),
            d.class.derivative.local.len()
        ));
        em.p.line("int der_sp_;");
    }

    if let Some(word) = &d.local_flags {
        em.p.line(format!("{} flags_;", word.cpp_type()));
        for (i, bit) in word.bits.iter().enumerate() {
            em.p.line(format!(
                "static const {} {} = 1u << {};",
                word.cpp_type(),
                bit.cpp_name("F"),
                i
            ));
        }
    }

    // Event bookkeeping slots.
    for t in &d.targets {
        if matches!(t.trigger, TriggerKind::Rise | TriggerKind::Fall | TriggerKind::Change) {
            em.p.line(format!("{} prev_{}_;", v, t.label));
        }
        if t.last_fire_slot {
            em.p.line(format!("{} {};", v, last_fire_name(&t.label)));
        }
    }

    // Connection binding pointers, re-seated by locate() after any target
    // reallocation. The element index survives reallocation; the pointers
    // do not.
    for b in &comp.bindings {
        let target = em.arena.get(b.target);
        em.p.line(format!("{}* {}_;", part_class(target), b.name));
        em.p.line(format!("{}* {}_pop_;", pop_class(target), b.name));
        if !target.is_singleton() {
            em.p.line(format!("size_t {}_idx_;", b.name));
        }
    }

    // Contained populations.
    for &child in &comp.children {
        let c = em.arena.get(child);
        em.p.line(format!("{} {}_pop_;", pop_class(c), c.name));
    }

    em.p.blank();

    // Method set is exactly the true needs flags.
    if n.construct {
        em.p.line(format!("void construct({}& pop);", pop));
    }
    if n.clear {
        em.p.line("void clear_buffers();");
    }
    if n.init {
        em.p.line(format!("void init({}& pop, {v} t, {v} dt);", pop));
    }
    if n.update {
        em.p.line(format!("void update({}& pop, {v} t, {v} dt);", pop));
    }
    if n.derivative {
        em.p.line(format!("void derivative({}& pop, {v} t, {v} dt);", pop));
    }
    if n.integrate {
        em.p.line(format!("void integrate({v} dt);"));
        if d.integrator.is_multi_stage() {
            em.p.line(format!("void advance({v} h);"));
        }
    }
    if n.preserve {
        em.p.line("void preserve();");
    }
    if n.restore {
        em.p.line("void restore();");
    }
    if n.push_der {
        em.p.line("void push_derivatives();");
    }
    if n.flush {
        em.p.line("void flush();");
    }
    if super::defs::part_finalizes(em, id) {
        em.p.line("void finalize();");
    }
    if n.path {
        em.p.line(format!("void path(std::vector<{v}>& out) const;"));
    }
    if d.specials.death.is_some() || d.specials.type_sel.is_some() {
        em.p.line("void die();");
    }
    if n.locate {
        em.p.line(format!("void locate({}& pop);", pop));
    }
    if has_event_checks(em, id) {
        em.p.line(format!("void check_events({}& pop, {v} t, {v} dt);", pop));
    }
    if has_event_fires(em, id) {
        em.p.line(format!("void fire_events({v} t, {v} dt);"));
    }
    if n.alive_bit {
        em.p.line(format!("{v} live_value() const;"));
    }

    em.p.close_semi();
    em.p.blank();
}

fn emit_pop_decl(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let v = em.value_type();
    let part = part_class(comp);
    let pop = pop_class(comp);
    let n = &d.needs;

    em.p.line(format!("// {} collector", comp.path));
    em.p.open(format!("class {}", pop));
    em.p.label("public:");

    if comp.is_singleton() {
        em.p.line(format!("{} one_;", part));
    } else {
        em.p.line(format!("std::vector<{}> parts_;", part));
    }

    for &i in &d.class.members.global {
        em.p.line(format!("{} {};", v, field_name(&comp.variables[i])));
    }
    for &i in d
        .class
        .buffered_internal
        .global
        .iter()
        .chain(&d.class.buffered_external_write.global)
    {
        em.p.line(format!("{} {};", v, shadow_name(&comp.variables[i])));
    }

    if d.specials.index.is_some() {
        em.p.line("uint64_t next_index_;");
    }
    if n.instance_tracking {
        em.p.line("int alive_count_;");
    }
    if let Some(word) = &d.global_flags {
        em.p.line(format!("{} gflags_;", word.cpp_type()));
        for (i, bit) in word.bits.iter().enumerate() {
            em.p.line(format!(
                "static const {} {} = 1u << {};",
                word.cpp_type(),
                bit.cpp_name("G"),
                i
            ));
        }
    }
    if em.opts.profiling {
        em.p.line("uint64_t prof_updates_;");
        em.p.line("uint64_t prof_events_;");
    }

    // Global integrated state mirrors the per-part snapshot machinery.
    if n.preserve && !d.class.integrated.global.is_empty() {
        em.p.open("struct Saved");
        for &i in &d.class.integrated.global {
            em.p.line(format!("{} {};", v, field_name(&comp.variables[i])));
        }
        em.p.close_semi();
        em.p.line("Saved saved_;");
    }
    if n.push_der && !d.class.derivative.global.is_empty() {
        em.p.line(format!(
            "{} der_stack_[{}][{}];",
            v,
            d.integrator.stages(),
            d.class.derivative.global.len()
        ));
        em.p.line("int der_sp_;");
    }

    em.p.blank();

    if n.construct {
        em.p.line("void construct();");
    }
    if n.destroy {
        em.p.line("void destroy();");
    }
    if n.clear {
        em.p.line("void clear_buffers();");
    }
    if n.init {
        em.p.line(format!("void init({v} t, {v} dt);"));
    }
    if n.update {
        em.p.line(format!("void update({v} t, {v} dt);"));
    }
    if n.derivative {
        em.p.line(format!("void derivative({v} t, {v} dt);"));
    }
    if n.integrate {
        em.p.line(format!("void integrate({v} dt);"));
        if d.integrator.is_multi_stage() {
            em.p.line(format!("void advance({v} h);"));
        }
    }
    if n.preserve {
        em.p.line("void preserve();");
    }
    if n.restore {
        em.p.line("void restore();");
    }
    if n.push_der {
        em.p.line("void push_derivatives();");
    }
    if n.flush {
        em.p.line("void flush();");
    }
    if n.finalize {
        em.p.line("void finalize();");
    }
    if n.path {
        em.p.line(format!("void path(std::vector<{v}>& out) const;"));
    }
    if n.count_tracking && !comp.is_singleton() {
        em.p.line(format!("void grow(int count, {v} t, {v} dt);"));
    }
    if n.die {
        em.p.line(format!("void apply_deaths({v} dt);"));
    }
    if n.split {
        em.p.line("void apply_splits();");
    }
    if n.locate {
        em.p.line("void locate();");
    }
    if has_event_checks(em, id) {
        em.p.line(format!("void check_events({v} t, {v} dt);"));
    }
    if has_event_fires(em, id) {
        em.p.line(format!("void fire_events({v} t, {v} dt);"));
    }

    em.p.close_semi();
    em.p.blank();
}

/// Whether this component or any descendant owns event targets.
pub fn has_event_checks(em: &Emitter<'_>, id: CompId) -> bool {
    if !em.analysis.get(id).targets.is_empty() {
        return true;
    }
    em.arena
        .get(id)
        .children
        .iter()
        .any(|&c| has_event_checks(em, c))
}

/// Whether this component or any descendant declares event sources.
pub fn has_event_fires(em: &Emitter<'_>, id: CompId) -> bool {
    if !em.arena.get(id).event_sources.is_empty() {
        return true;
    }
    em.arena
        .get(id)
        .children
        .iter()
        .any(|&c| has_event_fires(em, c))
}
