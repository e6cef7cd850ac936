//! Backend error taxonomy and the run-scoped diagnostic sink.
//!
//! Model-inconsistency and resource-exhaustion conditions are collected into
//! the [`ErrorLog`] with component/variable path context; when any fatal
//! diagnostic was recorded the compilation surfaces the single
//! [`BackendError::Aborted`] signal, so the orchestration layer can tell
//! "your model is invalid" apart from "the compiler itself crashed".

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Logged; compilation continues with a safe fallback.
    Warning,
    /// Recorded; compilation aborts after the current pass.
    Fatal,
}

/// One reported condition, carrying the offending component (and variable)
/// path.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Fatal => "error",
        };
        write!(f, "{}: {}: {}", tag, self.path, self.message)
    }
}

/// Run-scoped diagnostic accumulator. One per compilation request; never
/// shared across runs.
#[derive(Debug, Default)]
pub struct ErrorLog {
    pub diagnostics: Vec<Diagnostic>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fatal(&mut self, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Fatal,
            path: path.to_string(),
            message: message.into(),
        });
    }

    pub fn warn(&mut self, path: &str, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}: {}", path, message);
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: path.to_string(),
            message,
        });
    }

    pub fn has_fatal(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Fatal)
    }

    /// Convert the accumulated state into the abort signal, if any fatal
    /// diagnostic was recorded.
    pub fn check(&self) -> Result<(), BackendError> {
        if self.has_fatal() {
            Err(BackendError::Aborted {
                diagnostics: self.diagnostics.clone(),
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The model is invalid; all recorded diagnostics ride along.
    #[error("compilation aborted: {}", format_diagnostics(diagnostics))]
    Aborted { diagnostics: Vec<Diagnostic> },

    /// Internal inconsistency in the backend itself (a bug, not a model
    /// error). Never retried.
    #[error("internal backend error: {0}")]
    Internal(String),
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let fatal = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Fatal)
        .map(|d| d.to_string())
        .collect::<Vec<_>>();
    format!("{} error(s)\n{}", fatal.len(), fatal.join("\n"))
}
