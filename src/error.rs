//! Error types and diagnostic reporting for the distributed sparse core

use std::sync::Mutex;
use thiserror::Error;

/// Errors detected at construction time.
///
/// Per the component contracts, these are the only failures that stop an
/// object from being built; `factor`/`apply` never return a `Result` — they
/// report through a [`Reporter`] and become a no-op instead (see the
/// `TypeMismatch` handling in `distributed_matrix` and the preconditioners).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DfemError {
    /// Non-square A, a row/column dimension mismatch between A, B, the halo
    /// and the row owner map, or mismatched block sizes.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A matrix or vector of unexpected dynamic kind was passed.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// An MPI-level send/recv/wait failed. Fatal — there is no recovery
    /// path, callers should propagate this up and abort the run.
    #[error("communication failure: {0}")]
    Communication(String),
}

/// Result alias used across the crate.
pub type DfemResult<T> = Result<T, DfemError>;

/// Sink for non-fatal diagnostics raised during `factor`/`apply`.
///
/// `factor` and `apply` return no value (they are wrapped by an outer Krylov
/// method that observes residuals instead). A [`DfemError::TypeMismatch`]
/// encountered mid-call is reported here and the call becomes a no-op; it is
/// never propagated as a `Result`.
pub trait Reporter {
    /// Record a diagnostic message.
    fn report(&self, message: &str);
}

/// Default reporter: routes diagnostics through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, message: &str) {
        log::error!("{message}");
    }
}

/// Test-only reporter that records messages instead of logging them, so
/// assertions can check that a no-op call actually reported something.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    /// True once at least one message has been reported.
    pub fn has_reports(&self) -> bool {
        !self.messages.lock().unwrap().is_empty()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
