//! Inline native code execution
//!
//! Compiles a snippet of C (a preamble of top-level declarations plus a body
//! of statements) with per-call compiler flags, loads the result and runs it
//! once, synchronously.
//!
//! # Architecture
//!
//! ```text
//! supported() ──► InlineExecutor ──► NativeToolchain::compile ──► CompiledArtifact
//!                      │                 (cc subprocess)          (dlopen / invoke)
//!                      └── InlineUnit ──► TranslationUnit
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! if cinline::supported() {
//!     cinline::run(
//!         "#include <stdio.h>",
//!         r#"printf("FOO was defined to be %d\n", FOO);"#,
//!         ["-DFOO=14"],
//!     )
//!     .unwrap();
//! }
//! ```

pub mod diagnostic;
pub mod error;
pub mod executor;
pub mod loader;
pub mod probe;
pub mod toolchain;
pub mod unit;

pub use diagnostic::{parse_diagnostics, Diagnostic, Severity};
pub use error::ExecutionError;
pub use executor::InlineExecutor;
pub use loader::CompiledArtifact;
pub use toolchain::{NativeToolchain, SystemToolchain};
pub use unit::{InlineUnit, TranslationUnit};

use once_cell::sync::Lazy;
use tracing::warn;

use crate::util::config::InlineConfig;

/// Process-wide executor over the configured system toolchain.
static DEFAULT_EXECUTOR: Lazy<InlineExecutor> = Lazy::new(|| {
    let config = InlineConfig::load().unwrap_or_else(|err| {
        warn!("ignoring invalid configuration: {}", err);
        InlineConfig::default()
    });
    InlineExecutor::from_config(&config)
});

/// Whether inline native execution is available on this host.
///
/// Computed on first call and cached for the life of the process.
pub fn supported() -> bool {
    DEFAULT_EXECUTOR.is_supported()
}

/// Compile and run `body` after `preamble`, with `flags` applied to this
/// compilation only.
pub fn run<I, S>(
    preamble: &str,
    body: &str,
    flags: I,
) -> Result<(), ExecutionError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    DEFAULT_EXECUTOR.run(&InlineUnit::new(preamble, body, flags))
}

#[cfg(test)]
mod tests;
