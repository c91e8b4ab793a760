//! The inline executor.
//!
//! One call to [`InlineExecutor::run`] goes through:
//!
//! ```text
//! probe ─► validate flags ─► synthesize ─► compile (toolchain) ─► load ─► invoke ─► unload
//! ```
//!
//! Each call gets its own temporary build directory, which is removed when the
//! call returns whatever the outcome.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::error::ExecutionError;
use super::loader::CompiledArtifact;
use super::probe::host_supports;
use super::toolchain::{NativeToolchain, SystemToolchain};
use super::unit::InlineUnit;
use crate::util::config::InlineConfig;

const BUILD_DIR_PREFIX: &str = "cinline-";

/// Compiles and runs inline units through a [`NativeToolchain`].
#[derive(Debug)]
pub struct InlineExecutor<T = SystemToolchain> {
    toolchain: T,
    work_dir: Option<PathBuf>,
    available: OnceCell<bool>,
}

impl Default for InlineExecutor<SystemToolchain> {
    fn default() -> Self {
        Self::from_config(&InlineConfig::default())
    }
}

impl InlineExecutor<SystemToolchain> {
    pub fn from_config(config: &InlineConfig) -> Self {
        let executor = Self::with_toolchain(SystemToolchain::from_config(config));
        match &config.work_dir {
            Some(dir) => executor.with_work_dir(dir),
            None => executor,
        }
    }
}

impl<T: NativeToolchain> InlineExecutor<T> {
    pub fn with_toolchain(toolchain: T) -> Self {
        Self {
            toolchain,
            work_dir: None,
            available: OnceCell::new(),
        }
    }

    /// Create build directories under `dir` instead of the system temp dir.
    pub fn with_work_dir(
        mut self,
        dir: impl AsRef<Path>,
    ) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Capability probe for this executor's toolchain; computed once.
    pub fn is_supported(&self) -> bool {
        *self
            .available
            .get_or_init(|| host_supports(&self.toolchain))
    }

    /// Compile `unit`, run its body once on this thread, then unload it.
    pub fn run(
        &self,
        unit: &InlineUnit,
    ) -> Result<(), ExecutionError> {
        if !self.is_supported() {
            return Err(ExecutionError::Unsupported);
        }
        unit.validate_flags()?;

        let build_dir = self.build_dir()?;
        let translation_unit = unit.synthesize();
        debug!(
            "inline unit {} in {}",
            translation_unit.entry(),
            build_dir.path().display()
        );

        let artifact_path =
            self.toolchain
                .compile(&translation_unit, unit.flags(), build_dir.path())?;
        let artifact = CompiledArtifact::load(&artifact_path, translation_unit.entry())?;
        artifact.invoke();
        drop(artifact);

        if let Err(err) = build_dir.close() {
            warn!("failed to remove build directory: {}", err);
        }
        info!("ran inline unit {}", translation_unit.entry());
        Ok(())
    }

    fn build_dir(&self) -> Result<TempDir, ExecutionError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(BUILD_DIR_PREFIX);
        let dir = match &self.work_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(|err| ExecutionError::CompileFailed {
            diagnostics: format!("failed to create build directory: {}", err),
        })
    }
}
