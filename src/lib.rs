//! cinline - inline native code execution
//!
//! Compiles C snippets supplied at a call site with the host toolchain and
//! runs them in-process, the way a runtime's C-extension layer runs inline
//! native code.
//!
//! # Example
//!
//! ```no_run
//! use cinline::{run, supported, ExecutionError};
//!
//! fn main() -> Result<(), ExecutionError> {
//!     if supported() {
//!         run(
//!             "#include <stdio.h>",
//!             r#"printf("FOO was defined to be %d\n", FOO);"#,
//!             ["-DFOO=14"],
//!         )?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Crate Features
//!
//! - `native` (default): enable inline execution; without it [`supported`]
//!   always returns `false`

#![doc(html_root_url = "https://docs.rs/cinline")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod native;

// Utility modules
pub mod util;

// Re-exports
pub use native::{
    run, supported, CompiledArtifact, Diagnostic, ExecutionError, InlineExecutor, InlineUnit,
    NativeToolchain, Severity, SystemToolchain, TranslationUnit,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "cinline";
