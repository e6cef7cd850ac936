//! Code generation: walks the analyzed component tree twice (declarations,
//! then definitions) and prints one self-contained C++ module implementing
//! the Part/Population class pair per component plus the top-level driver.
//!
//! The two numeric backends share this entire module; the fixed-point
//! variant differs only through the [`numeric::NumericStrategy`] object.

pub mod decl;
pub mod defs;
pub mod driver;
pub mod dynamics;
pub mod expr;
pub mod names;
pub mod numeric;

use crate::analysis::{Analysis, PassState};
use crate::ir::ast::{CompId, ModelArena};
use crate::ir::error::{BackendError, ErrorLog};
use crate::options::{BackendOptions, NumericMode};

use numeric::{FixedStrategy, FloatStrategy, NumericStrategy};

/// Indented text sink for the generated module.
#[derive(Default)]
pub struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    pub fn line(&mut self, s: impl AsRef<str>) {
        let s = s.as_ref();
        if s.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Open a brace block: `header {`.
    pub fn open(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.indent += 1;
    }

    pub fn close(&mut self) {
        self.indent -= 1;
        self.line("}");
    }

    /// Access label inside a class body (`public:`), outdented one level.
    pub fn label(&mut self, s: impl AsRef<str>) {
        self.indent -= 1;
        self.line(s);
        self.indent += 1;
    }

    /// Close a class body: `};`.
    pub fn close_semi(&mut self) {
        self.indent -= 1;
        self.line("};");
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Emission context shared by both passes.
pub struct Emitter<'a> {
    pub arena: &'a ModelArena,
    pub analysis: &'a mut Analysis,
    pub opts: &'a BackendOptions,
    pub strategy: Box<dyn NumericStrategy>,
    /// Exponent of the time parameters in fixed-point mode.
    pub time_exp: i32,
    /// Simulation step interval when statically known (root `poll`
    /// metadata); enables constant-delay-to-step conversion.
    pub step: Option<f64>,
    pub p: Printer,
}

impl<'a> Emitter<'a> {
    pub fn new(
        arena: &'a ModelArena,
        analysis: &'a mut Analysis,
        opts: &'a BackendOptions,
    ) -> Self {
        let strategy: Box<dyn NumericStrategy> = match opts.numeric {
            NumericMode::Float32 => Box::new(FloatStrategy { single: true }),
            NumericMode::Float64 => Box::new(FloatStrategy { single: false }),
            NumericMode::Fixed { bits } => Box::new(FixedStrategy { bits }),
        };
        let root = arena.get(arena.root());
        let time_exp = root
            .find_var(crate::analysis::special::VAR_TIME)
            .map(|i| root.variables[i].exponent)
            .unwrap_or(0);
        let step = root.metadata.get("poll").and_then(|m| m.as_f64());
        Self {
            arena,
            analysis,
            opts,
            strategy,
            time_exp,
            step,
            p: Printer::default(),
        }
    }

    pub fn value_type(&self) -> &'static str {
        self.strategy.value_type()
    }

    /// Constant name for a component id, used by the event engine interface.
    /// Derived from the path scope so same-named components under different
    /// parents stay distinct.
    pub fn comp_const(&self, id: CompId) -> String {
        format!(
            "COMP_{}",
            names::scope(self.arena.get(id))
                .to_uppercase()
                .replace('.', "_")
                .replace('$', "")
        )
    }
}

/// Generate the complete module for an analyzed model.
pub fn generate(
    arena: &ModelArena,
    analysis: &mut Analysis,
    opts: &BackendOptions,
    log: &mut ErrorLog,
) -> Result<String, BackendError> {
    for id in arena.postorder() {
        if analysis.get(id).state < PassState::Flagged {
            return Err(BackendError::Internal(format!(
                "component '{}' reached emission before being flagged",
                arena.get(id).path
            )));
        }
    }

    let mut em = Emitter::new(arena, analysis, opts);

    decl::emit_preamble(&mut em);

    // Declarations, children first.
    let order = arena.postorder();
    for &id in &order {
        decl::emit_component_decl(&mut em, id);
    }

    // Definitions, same order; no forward references can occur.
    for &id in &order {
        defs::emit_component_defs(&mut em, id, log);
        em.analysis.get_mut(id).state = PassState::Emitted;
    }

    driver::emit_driver(&mut em);

    log.check()?;
    Ok(em.p.finish())
}
