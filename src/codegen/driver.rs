//! Top-level driver: one simulation-state instance plus the
//! init/run/finish/releaseMemory quartet the host engine links against.

use crate::options::EventTiming;

use super::decl::{has_event_checks, has_event_fires};
use super::names::pop_class;
use super::Emitter;

pub fn emit_driver(em: &mut Emitter<'_>) {
    let root = em.arena.root();
    let comp = em.arena.get(root);
    let d = em.analysis.get(root).clone();
    let n = d.needs.clone();
    let pop = pop_class(comp);
    let v = em.value_type();

    em.p.line("// ------------------------------------------------------------------");
    em.p.line("// driver");
    em.p.line("// ------------------------------------------------------------------");
    if n.thread_local {
        em.p.line(format!("thread_local {} root_pop;", pop));
    } else {
        em.p.line(format!("static {} root_pop;", pop));
    }
    em.p.blank();

    let checks = has_event_checks(em, root);
    let fires = has_event_fires(em, root);
    let events = |em: &mut Emitter<'_>| {
        if checks {
            em.p.line("root_pop.check_events(t, dt);");
        }
        if fires {
            em.p.line("root_pop.fire_events(t, dt);");
        }
    };

    em.p.open(format!("static void sim_step({v} t, {v} dt)"));
    if n.clear {
        em.p.line("root_pop.clear_buffers();");
    }
    if em.opts.event_timing == EventTiming::Before {
        events(em);
    }
    if n.update {
        em.p.line("root_pop.update(t, dt);");
    }
    if em.opts.event_timing == EventTiming::During {
        events(em);
    }
    if n.integrate {
        if d.integrator.is_multi_stage() {
            let half = em.strategy.halve("dt");
            em.p.line("root_pop.preserve();");
            em.p.line("root_pop.derivative(t, dt);");
            em.p.line("root_pop.push_derivatives();");
            em.p.line(format!("root_pop.advance({});", half));
            em.p.line(format!("root_pop.derivative((t + {}), dt);", half));
            em.p.line("root_pop.push_derivatives();");
            em.p.line(format!("root_pop.advance({});", half));
            em.p.line(format!("root_pop.derivative((t + {}), dt);", half));
            em.p.line("root_pop.push_derivatives();");
            em.p.line("root_pop.advance(dt);");
            em.p.line("root_pop.derivative((t + dt), dt);");
            em.p.line("root_pop.push_derivatives();");
            em.p.line("root_pop.restore();");
            em.p.line("root_pop.integrate(dt);");
        } else {
            if n.derivative {
                em.p.line("root_pop.derivative(t, dt);");
            }
            em.p.line("root_pop.integrate(dt);");
        }
    } else if n.derivative {
        em.p.line("root_pop.derivative(t, dt);");
    }
    if n.flush {
        em.p.line("root_pop.flush();");
    }
    if em.opts.event_timing == EventTiming::After {
        events(em);
    }
    if n.die {
        em.p.line("root_pop.apply_deaths(dt);");
    }
    if n.split {
        em.p.line("root_pop.apply_splits();");
    }
    if n.locate {
        em.p.line("root_pop.locate();");
    }
    if n.finalize {
        em.p.line("root_pop.finalize();");
    }
    em.p.close();
    em.p.blank();

    let t0 = em.strategy.literal(0.0, em.time_exp);
    let dt0 = match em.step {
        Some(s) => em.strategy.literal(s, em.time_exp),
        None => em.strategy.literal(0.0, em.time_exp),
    };

    em.p.open("extern \"C\" void init()");
    if n.construct {
        em.p.line("root_pop.construct();");
    }
    if n.init {
        em.p.line(format!("root_pop.init({}, {});", t0, dt0));
    }
    if n.locate {
        em.p.line("root_pop.locate();");
    }
    em.p.close();
    em.p.blank();

    em.p.open(format!("extern \"C\" void run({v} t, {v} dt)"));
    em.p.line("sim_step(t, dt);");
    em.p.close();
    em.p.blank();

    em.p.open(format!("extern \"C\" void finish({v} t)"));
    em.p.line("(void)t;");
    if n.flush {
        em.p.line("root_pop.flush();");
    }
    if em.opts.profiling {
        let rc = em.comp_const(root);
        em.p.line(format!(
            "engine_publish({}, -1, (double)root_pop.prof_updates_);",
            rc
        ));
        em.p.line(format!(
            "engine_publish({}, -2, (double)root_pop.prof_events_);",
            rc
        ));
    }
    em.p.close();
    em.p.blank();

    em.p.open("extern \"C\" void releaseMemory()");
    if n.destroy {
        em.p.line("root_pop.destroy();");
    }
    em.p.close();
}
