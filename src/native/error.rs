//! Errors reported by the inline executor.
//!
//! A fault raised by native code while it runs (segmentation fault, abort)
//! has no variant here: native code executes unsandboxed on the calling
//! thread, so such faults take the whole process down.

use thiserror::Error;

use super::diagnostic::{parse_diagnostics, Diagnostic};

/// Recoverable failures of a single inline execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// Inline native execution is not available on this host.
    #[error("inline native execution is not supported on this host")]
    Unsupported,

    /// The compiler rejected the unit, or a flag was refused before compiling.
    #[error("native compilation failed:\n{diagnostics}")]
    CompileFailed {
        /// Compiler output (never empty).
        diagnostics: String,
    },

    /// An artifact was produced but could not be loaded or its entry point
    /// could not be resolved.
    #[error("failed to load native artifact: {reason}")]
    LoadFailed {
        /// Loader message.
        reason: String,
    },
}

impl ExecutionError {
    /// Build a `CompileFailed`, substituting `fallback` when the compiler
    /// printed nothing.
    pub fn compile_failed(
        diagnostics: impl Into<String>,
        fallback: impl FnOnce() -> String,
    ) -> Self {
        let text = diagnostics.into();
        let diagnostics = if text.trim().is_empty() {
            fallback()
        } else {
            text
        };
        ExecutionError::CompileFailed { diagnostics }
    }

    pub fn load_failed(reason: impl Into<String>) -> Self {
        ExecutionError::LoadFailed {
            reason: reason.into(),
        }
    }

    /// Raw compiler output, if this is a compile failure.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            ExecutionError::CompileFailed { diagnostics } => Some(diagnostics),
            _ => None,
        }
    }

    /// Structured compiler messages, if this is a compile failure.
    pub fn parsed_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics().map(parse_diagnostics).unwrap_or_default()
    }

    pub fn is_compile_failure(&self) -> bool {
        matches!(self, ExecutionError::CompileFailed { .. })
    }
}
