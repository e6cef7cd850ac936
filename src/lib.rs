//! Backend that lowers a declarative population/part equation model into a
//! self-contained imperative C++ module.
//!
//! The pipeline is strictly one-directional: the front end's component tree
//! is interned into an arena, bindings are resolved, the analyzer fills one
//! side table per component (classification, specials, events, needs, flag
//! words), and the emitter prints the Part/Pop class pair per component plus
//! the driver quartet. Nothing here calls back into the front end.

use std::sync::Once;

pub mod analysis;
pub mod codegen;
pub mod ir;
pub mod options;
pub mod support;

use ir::ast::{ComponentDecl, ModelArena};
use ir::error::{BackendError, ErrorLog};
use options::BackendOptions;

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::init();
    });
}

/// Compile one model declaration to generated source.
///
/// Model metadata may override pieces of `options`; the effective options
/// are what the analysis and emission passes see.
pub fn compile(decl: &ComponentDecl, options: &BackendOptions) -> Result<String, BackendError> {
    let mut log = ErrorLog::new();

    let mut arena = ModelArena::from_decl(decl);
    ir::resolve::resolve_bindings(&mut arena, &mut log);
    log.check()?;

    let mut opts = options.clone();
    opts.apply_metadata(arena.get(arena.root()), &mut log);
    log.check()?;

    let mut analysis = analysis::analyze(&arena, &opts, &mut log)?;
    codegen::generate(&arena, &mut analysis, &opts, &mut log)
}
