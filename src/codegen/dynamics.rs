//! Structural dynamics and event machinery: population growth, death and
//! type-split application, binding rediscovery after reallocation, and the
//! event check/fire pair that talks to the simulation engine queue.

use crate::analysis::events::Delay;
use crate::analysis::flagword::FlagBit;
use crate::analysis::BackendData;
use crate::ir::ast::{CompId, TriggerKind};
use crate::ir::error::ErrorLog;

use super::defs::part_scope;
use super::names::{field_name, last_fire_name, part_class, pop_class};
use super::Emitter;

// ---------------------------------------------------------------------------
// growth
// ---------------------------------------------------------------------------

/// Reconcile the live population against the count variable; emitted at the
/// tail of `Pop::update`.
pub fn emit_growth_check(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let n = &d.needs;
    if comp.is_singleton() || !n.grow || !n.count_tracking {
        return;
    }
    let Some(c) = d.specials.count else { return };
    let var = &comp.variables[c];
    let target = format!(
        "(int){}",
        em.strategy.align(field_name(var), var.exponent, 0)
    );
    let have = if n.instance_tracking {
        "alive_count_".to_string()
    } else {
        "(int)parts_.size()".to_string()
    };
    em.p.open(format!("if ({} > {})", target, have));
    em.p.line(format!("grow({} - {}, t, dt);", target, have));
    em.p.close();
}

pub fn emit_pop_grow(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let n = &d.needs;
    let pop = pop_class(comp);
    let part = part_class(comp);
    let v = em.value_type();

    em.p.open(format!("void {}::grow(int count, {v} t, {v} dt)", pop));
    em.p.open("for (int k = 0; k < count; ++k)");
    em.p.line(format!("parts_.push_back({}());", part));
    em.p.line(format!("{}& p = parts_.back();", part));
    em.p.line("p.construct(*this);");
    if n.newborn_bit {
        em.p.line(format!("p.flags_ |= {}::F_NEWBORN;", part));
    }
    if n.init {
        em.p.line("p.init(*this, t, dt);");
    }
    if n.instance_tracking {
        em.p.line("++alive_count_;");
    }
    em.p.close();
    if n.clear_newborn {
        em.p.line("if (count > 0) gflags_ |= G_CLEARNEW;");
    }
    em.p.close();
    em.p.blank();
}

// ---------------------------------------------------------------------------
// death and split
// ---------------------------------------------------------------------------

pub fn emit_pop_apply_deaths(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let n = &d.needs;
    let pop = pop_class(comp);
    let part = part_class(comp);
    let v = em.value_type();

    em.p.open(format!("void {}::apply_deaths({v} dt)", pop));
    em.p.line("(void)dt;");
    let death = d.specials.death.map(|i| {
        let var = &comp.variables[i];
        (field_name(var), em.strategy.literal(0.0, var.exponent))
    });
    let die_children: Vec<String> = comp
        .children
        .iter()
        .filter(|&&c| em.analysis.get(c).needs.die)
        .map(|&c| em.arena.get(c).name.clone())
        .collect();

    if comp.is_singleton() {
        if let Some((field, zero)) = &death {
            em.p.open(format!("if (one_.{} != {})", field, zero));
            em.p.line("one_.die();");
            em.p.close();
        }
        for c in &die_children {
            em.p.line(format!("one_.{}_pop_.apply_deaths(dt);", c));
        }
    } else {
        em.p.open("for (auto& p : parts_)");
        if n.instance_tracking {
            em.p.line(format!("if (!(p.flags_ & {}::F_ALIVE)) continue;", part));
        }
        if let Some((field, zero)) = &death {
            em.p.open(format!("if (p.{} != {})", field, zero));
            em.p.line("p.die();");
            if n.instance_tracking {
                em.p.line("--alive_count_;");
            }
            em.p.close();
        }
        for c in &die_children {
            em.p.line(format!("p.{}_pop_.apply_deaths(dt);", c));
        }
        em.p.close();
    }
    em.p.close();
    em.p.blank();
}

pub fn emit_pop_apply_splits(
    em: &mut Emitter<'_>,
    id: CompId,
    d: &BackendData,
    log: &mut ErrorLog,
) {
    let comp = em.arena.get(id);
    let n = &d.needs;
    let pop = pop_class(comp);
    let part = part_class(comp);

    em.p.open(format!("void {}::apply_splits()", pop));

    let split_children: Vec<String> = comp
        .children
        .iter()
        .filter(|&&c| em.analysis.get(c).needs.split)
        .map(|&c| em.arena.get(c).name.clone())
        .collect();

    // Statically enumerated conversion outcomes: the component's siblings,
    // in declaration order, with outcome 0 meaning "stay".
    let outcomes: Vec<CompId> = match (d.specials.type_sel, comp.parent) {
        (Some(_), Some(parent)) => em
            .arena
            .get(parent)
            .children
            .iter()
            .copied()
            .filter(|&c| c != id)
            .collect(),
        (Some(_), None) => {
            log.fatal(&comp.path, "the root component cannot change type");
            Vec::new()
        }
        _ => Vec::new(),
    };
    if d.specials.type_sel.is_some() && comp.is_connection() {
        log.fatal(&comp.path, "a connection cannot change type");
    }
    for &o in &outcomes {
        let target = em.arena.get(o);
        if target.is_connection() != comp.is_connection() {
            log.fatal(
                &comp.path,
                format!(
                    "cannot convert between connection and non-connection '{}'",
                    target.path
                ),
            );
        }
    }

    if d.specials.type_sel.is_none() && split_children.is_empty() {
        em.p.close();
        em.p.blank();
        return;
    }

    if comp.is_singleton() {
        for c in &split_children {
            em.p.line(format!("one_.{}_pop_.apply_splits();", c));
        }
        em.p.close();
        em.p.blank();
        return;
    }

    em.p.open("for (auto& p : parts_)");
    if n.instance_tracking {
        em.p.line(format!("if (!(p.flags_ & {}::F_ALIVE)) continue;", part));
    }
    for c in &split_children {
        em.p.line(format!("p.{}_pop_.apply_splits();", c));
    }
    if let Some(ts) = d.specials.type_sel {
        let var = &comp.variables[ts];
        let sel = format!(
            "(int){}",
            em.strategy
                .align(format!("p.{}", field_name(var)), var.exponent, 0)
        );
        em.p.line(format!("int sel = {};", sel));
        em.p.line("if (sel == 0) continue;");
        let index = if d.specials.index.is_some() {
            "p.index_"
        } else {
            "0"
        };
        em.p.open("switch (sel)");
        for (k, &o) in outcomes.iter().enumerate() {
            em.p.line(format!("case {}:", k + 1));
            em.p.line(format!(
                "    engine_split({}, {}, {});",
                em.comp_const(o),
                k + 1,
                index
            ));
            em.p.line("    break;");
        }
        em.p.line("default:");
        em.p.line("    break;");
        em.p.close();
        em.p.line("p.die();");
        if n.instance_tracking {
            em.p.line("--alive_count_;");
        }
    }
    em.p.close();
    em.p.close();
    em.p.blank();
}

// ---------------------------------------------------------------------------
// locate
// ---------------------------------------------------------------------------

/// Re-seat every connection child's binding pointers. Instance pointers go
/// stale whenever the target vector reallocates; the stored element index
/// does not.
pub fn emit_part_locate(em: &mut Emitter<'_>, id: CompId, _d: &BackendData, log: &mut ErrorLog) {
    let comp = em.arena.get(id);
    let part = part_class(comp);
    let pop = pop_class(comp);

    em.p.open(format!("void {}::locate({}& pop)", part, pop));
    em.p.line("(void)pop;");

    for &child in &comp.children {
        let conn = em.arena.get(child);
        if !conn.is_connection() || conn.bindings.is_empty() {
            continue;
        }
        let conn_needs = em.analysis.get(child).needs.clone();
        let seat = |em: &mut Emitter<'_>, recv: &str, log: &mut ErrorLog| {
            for b in conn.bindings.iter() {
                let target = em.arena.get(b.target);
                if b.target == id {
                    em.p.line(format!("{}{}_ = this;", recv, b.name));
                    em.p.line(format!("{}{}_pop_ = &pop;", recv, b.name));
                } else if target.parent == Some(id) {
                    em.p.line(format!("{}{}_pop_ = &{}_pop_;", recv, b.name, target.name));
                    if target.is_singleton() {
                        em.p.line(format!(
                            "{}{}_ = &{}_pop_.one_;",
                            recv, b.name, target.name
                        ));
                    } else {
                        em.p.open(format!(
                            "if ({}{}_idx_ < {}_pop_.parts_.size())",
                            recv, b.name, target.name
                        ));
                        em.p.line(format!(
                            "{}{}_ = &{}_pop_.parts_[{}{}_idx_];",
                            recv, b.name, target.name, recv, b.name
                        ));
                        em.p.close();
                    }
                } else {
                    log.fatal(
                        &conn.path,
                        format!(
                            "binding '{}' targets '{}' outside the enclosing component",
                            b.name, target.path
                        ),
                    );
                }
            }
        };
        if conn.is_singleton() {
            let recv = format!("{}_pop_.one_.", conn.name);
            seat(em, &recv, log);
        } else {
            em.p.open(format!("for (auto& c : {}_pop_.parts_)", conn.name));
            seat(em, "c.", log);
            em.p.close();
        }

        // A connection over empty populations goes dormant until the next
        // locate pass revives it.
        if conn_needs.inactive_guard {
            let empties: Vec<String> = conn
                .bindings
                .iter()
                .filter_map(|b| {
                    let target = em.arena.get(b.target);
                    if target.parent == Some(id) && !target.is_singleton() {
                        Some(format!("{}_pop_.parts_.empty()", target.name))
                    } else {
                        None
                    }
                })
                .collect();
            if !empties.is_empty() {
                let conn_pop = pop_class(conn);
                em.p.open(format!("if ({})", empties.join(" && ")));
                em.p.line(format!(
                    "{}_pop_.gflags_ |= {}::G_INACTIVE;",
                    conn.name, conn_pop
                ));
                em.p.close();
                em.p.open("else");
                em.p.line(format!(
                    "{}_pop_.gflags_ &= ~{}::G_INACTIVE;",
                    conn.name, conn_pop
                ));
                em.p.close();
            }
        }
    }

    // Deeper levels re-seat their own connections.
    let children = comp.children.clone();
    for c in children {
        if em.analysis.get(c).needs.locate {
            let name = em.arena.get(c).name.clone();
            em.p.line(format!("{}_pop_.locate();", name));
        }
    }
    em.p.close();
    em.p.blank();
}

pub fn emit_pop_locate(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let pop = pop_class(comp);
    let part = part_class(comp);

    em.p.open(format!("void {}::locate()", pop));
    if comp.is_singleton() {
        em.p.line("one_.locate(*this);");
    } else {
        em.p.open("for (auto& p : parts_)");
        if d.needs.instance_tracking {
            em.p.line(format!("if (!(p.flags_ & {}::F_ALIVE)) continue;", part));
        }
        em.p.line("p.locate(*this);");
        em.p.close();
    }
    em.p.close();
    em.p.blank();
}

// ---------------------------------------------------------------------------
// events
// ---------------------------------------------------------------------------

pub fn emit_part_check_events(
    em: &mut Emitter<'_>,
    id: CompId,
    d: &BackendData,
    log: &mut ErrorLog,
) {
    let comp = em.arena.get(id);
    let part = part_class(comp);
    let pop = pop_class(comp);
    let v = em.value_type();

    em.p.open(format!(
        "void {}::check_events({}& pop, {v} t, {v} dt)",
        part, pop
    ));
    em.p.line("(void)pop;");
    em.p.line("(void)t;");
    em.p.line("(void)dt;");
    let sc = part_scope(em, id);
    for target in &d.targets {
        let bit = FlagBit::Event(target.latch_bit).cpp_name("F");
        let label = &target.label;
        let trig = format!("trig_{}", label);
        match target.trigger {
            TriggerKind::EveryStep => {
                em.p.line(format!("bool {} = true;", trig));
            }
            TriggerKind::NonZero => {
                let cond = sc.render_bool(&*em.strategy, &target.condition, log);
                em.p.line(format!(
                    "bool {} = {} || engine_pending({}, {}) != 0;",
                    trig,
                    cond,
                    em.comp_const(id),
                    target.latch_bit
                ));
            }
            TriggerKind::Rise | TriggerKind::Fall | TriggerKind::Change => {
                let e = sc.natural(&*em.strategy, &target.condition, 0);
                let cur = sc.render(&*em.strategy, &target.condition, e, log);
                let zero = em.strategy.literal(0.0, e);
                em.p.line(format!("{v} cur_{} = {};", label, cur));
                let test = match target.trigger {
                    TriggerKind::Rise => format!(
                        "(prev_{l}_ <= {z} && cur_{l} > {z})",
                        l = label,
                        z = zero
                    ),
                    TriggerKind::Fall => format!(
                        "(prev_{l}_ > {z} && cur_{l} <= {z})",
                        l = label,
                        z = zero
                    ),
                    _ => format!("(cur_{l} != prev_{l}_)", l = label),
                };
                em.p.line(format!("bool {} = {};", trig, test));
                em.p.line(format!("prev_{l}_ = cur_{l};", l = label));
            }
        }

        // Coincident-cycle guard: the first non-zero trigger latching in a
        // step suppresses the rest until clear_buffers resets the bit.
        let guarded = d.needs.dup_guard_bit && target.trigger == TriggerKind::NonZero;
        let latch = if guarded {
            format!("flags_ |= {} | F_DUPGUARD;", bit)
        } else {
            format!("flags_ |= {};", bit)
        };
        let cond = if guarded {
            format!("{} && !(flags_ & F_DUPGUARD)", trig)
        } else {
            trig.clone()
        };
        if target.last_fire_slot {
            let slot = last_fire_name(label);
            em.p.open(format!("if ({} && {} < t)", cond, slot));
            em.p.line(latch);
            em.p.line(format!("{} = t;", slot));
            em.p.close();
        } else {
            em.p.open(format!("if ({})", cond));
            em.p.line(latch);
            em.p.close();
        }
    }

    let children = comp.children.clone();
    for c in children {
        if super::decl::has_event_checks(em, c) {
            let name = em.arena.get(c).name.clone();
            em.p.line(format!("{}_pop_.check_events(t, dt);", name));
        }
    }
    em.p.close();
    em.p.blank();
}

pub fn emit_part_fire_events(
    em: &mut Emitter<'_>,
    id: CompId,
    _d: &BackendData,
    log: &mut ErrorLog,
) {
    let comp = em.arena.get(id);
    let part = part_class(comp);
    let v = em.value_type();

    em.p.open(format!("void {}::fire_events({v} t, {v} dt)", part));
    em.p.line("(void)t;");
    em.p.line("(void)dt;");
    let sc = part_scope(em, id);
    for src in comp.event_sources.iter() {
        let Some(tid) = em.arena.lookup(&src.target_component) else {
            // Already reported during event analysis.
            continue;
        };
        let Some(target) = em
            .analysis
            .get(tid)
            .targets
            .iter()
            .find(|t| t.label == src.label)
            .cloned()
        else {
            continue;
        };
        let cond = sc.render_bool(&*em.strategy, &target.condition, log);
        em.p.open(format!("if ({})", cond));
        let tconst = em.comp_const(tid);
        match Delay::from_expr(&src.delay) {
            Delay::Constant(c) => {
                // A constant delay landing on a step multiple avoids the
                // run-time division in the engine.
                let steps = em.step.and_then(|s| {
                    let k = c / s;
                    (c >= 0.0 && (k - k.round()).abs() < 1e-9).then_some(k.round() as i64)
                });
                match steps {
                    Some(k) => em.p.line(format!(
                        "engine_schedule_steps({}, {}, {});",
                        tconst, target.latch_bit, k
                    )),
                    None if c <= 0.0 => em.p.line(format!(
                        "engine_schedule_steps({}, {}, 0);",
                        tconst, target.latch_bit
                    )),
                    None => {
                        let lit = em.strategy.literal(c, em.time_exp);
                        em.p.line(format!(
                            "engine_schedule({}, {}, {});",
                            tconst, target.latch_bit, lit
                        ));
                    }
                }
            }
            Delay::Runtime(e) => {
                let delay = sc.render(&*em.strategy, &e, em.time_exp, log);
                em.p.line(format!(
                    "engine_schedule({}, {}, {});",
                    tconst, target.latch_bit, delay
                ));
            }
        }
        em.p.close();
    }

    let children = comp.children.clone();
    for c in children {
        if super::decl::has_event_fires(em, c) {
            let name = em.arena.get(c).name.clone();
            em.p.line(format!("{}_pop_.fire_events(t, dt);", name));
        }
    }
    em.p.close();
    em.p.blank();
}

pub fn emit_pop_check_events(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let pop = pop_class(comp);
    let part = part_class(comp);
    let v = em.value_type();

    em.p.open(format!("void {}::check_events({v} t, {v} dt)", pop));
    if em.opts.profiling {
        em.p.line("++prof_events_;");
    }
    if comp.is_singleton() {
        em.p.line("one_.check_events(*this, t, dt);");
    } else {
        em.p.open("for (auto& p : parts_)");
        if d.needs.instance_tracking {
            em.p.line(format!("if (!(p.flags_ & {}::F_ALIVE)) continue;", part));
        }
        em.p.line("p.check_events(*this, t, dt);");
        em.p.close();
    }
    em.p.close();
    em.p.blank();
}

pub fn emit_pop_fire_events(em: &mut Emitter<'_>, id: CompId, d: &BackendData) {
    let comp = em.arena.get(id);
    let pop = pop_class(comp);
    let part = part_class(comp);
    let v = em.value_type();

    em.p.open(format!("void {}::fire_events({v} t, {v} dt)", pop));
    if comp.is_singleton() {
        em.p.line("one_.fire_events(t, dt);");
    } else {
        em.p.open("for (auto& p : parts_)");
        if d.needs.instance_tracking {
            em.p.line(format!("if (!(p.flags_ & {}::F_ALIVE)) continue;", part));
        }
        em.p.line("p.fire_events(t, dt);");
        em.p.close();
    }
    em.p.close();
    em.p.blank();
}
