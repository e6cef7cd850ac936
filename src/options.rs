//! Backend configuration: numeric mode, integrator, and the named options
//! recognized through model metadata.

use crate::ir::ast::{Component, MetaValue};
use crate::ir::error::ErrorLog;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumericMode {
    Float32,
    Float64,
    /// Scaled-integer representation with a global bit width (16 or 32).
    Fixed { bits: u8 },
}

impl NumericMode {
    pub fn is_fixed(&self) -> bool {
        matches!(self, NumericMode::Fixed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrator {
    Euler,
    Rk4,
}

impl Integrator {
    pub fn stages(&self) -> usize {
        match self {
            Integrator::Euler => 1,
            Integrator::Rk4 => 4,
        }
    }

    pub fn is_multi_stage(&self) -> bool {
        self.stages() > 1
    }

    pub fn parse(s: &str) -> Option<Integrator> {
        match s {
            "euler" => Some(Integrator::Euler),
            "rk4" => Some(Integrator::Rk4),
            _ => None,
        }
    }
}

/// When the event poll runs relative to the integrate/update pair of a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTiming {
    Before,
    During,
    After,
}

#[derive(Clone, Debug)]
pub struct BackendOptions {
    pub numeric: NumericMode,
    pub integrator: Integrator,
    pub event_timing: EventTiming,
    /// Emit debug symbols / keep generated names readable.
    pub debug: bool,
    /// Instrument step functions with counters.
    pub profiling: bool,
    /// Make the simulation state thread-local.
    pub thread_local: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            numeric: NumericMode::Float64,
            integrator: Integrator::Euler,
            event_timing: EventTiming::After,
            debug: false,
            profiling: false,
            thread_local: false,
        }
    }
}

impl BackendOptions {
    /// Apply the named options recognized in the root component's metadata.
    /// An unsupported numeric type is a soft warning; compilation continues
    /// with the default (double).
    pub fn apply_metadata(&mut self, root: &Component, log: &mut ErrorLog) {
        for (key, value) in &root.metadata {
            match key.as_str() {
                "numeric-type" => match value.as_str() {
                    Some("float") => self.numeric = NumericMode::Float32,
                    Some("double") => self.numeric = NumericMode::Float64,
                    Some("fixed-int") => self.numeric = NumericMode::Fixed { bits: 32 },
                    other => {
                        log.warn(
                            &root.path,
                            format!(
                                "unsupported numeric type {:?}, falling back to double",
                                other.unwrap_or("")
                            ),
                        );
                        self.numeric = NumericMode::Float64;
                    }
                },
                "integrator" => {
                    if let Some(s) = value.as_str() {
                        match Integrator::parse(s) {
                            Some(i) => self.integrator = i,
                            None => log.warn(
                                &root.path,
                                format!("unknown integrator '{}', keeping {:?}", s, self.integrator),
                            ),
                        }
                    }
                }
                "event-timing-policy" => match value.as_str() {
                    Some("before") => self.event_timing = EventTiming::Before,
                    Some("during") => self.event_timing = EventTiming::During,
                    Some("after") => self.event_timing = EventTiming::After,
                    _ => log.warn(&root.path, "unknown event-timing-policy, keeping default"),
                },
                "debug" => self.debug = value.as_bool().unwrap_or(false),
                "profiling-mode" => self.profiling = value.as_bool().unwrap_or(false),
                "thread-local" => self.thread_local = value.as_bool().unwrap_or(false),
                _ => {}
            }
        }
    }
}

/// Per-component integrator choice: metadata override, else the global one.
pub fn component_integrator(comp: &Component, opts: &BackendOptions) -> Integrator {
    comp.metadata
        .get("integrator")
        .and_then(MetaValue::as_str)
        .and_then(Integrator::parse)
        .unwrap_or(opts.integrator)
}
