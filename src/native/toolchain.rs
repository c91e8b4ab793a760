//! Native compiler toolchains.
//!
//! [`NativeToolchain`] is the seam between the executor and whatever turns a
//! [`TranslationUnit`] into a loadable shared object. [`SystemToolchain`]
//! drives a C compiler as a subprocess.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::error::ExecutionError;
use super::unit::TranslationUnit;
use crate::util::config::InlineConfig;

/// Compiles translation units into loadable artifacts.
pub trait NativeToolchain {
    /// Whether this toolchain can compile at all on this host.
    fn is_available(&self) -> bool;

    /// Compile `unit` with `flags` into a shared object inside `out_dir`,
    /// returning its path or the compiler's diagnostics.
    fn compile(
        &self,
        unit: &TranslationUnit,
        flags: &[String],
        out_dir: &Path,
    ) -> Result<PathBuf, ExecutionError>;
}

impl<T: NativeToolchain + ?Sized> NativeToolchain for &T {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn compile(
        &self,
        unit: &TranslationUnit,
        flags: &[String],
        out_dir: &Path,
    ) -> Result<PathBuf, ExecutionError> {
        (**self).compile(unit, flags, out_dir)
    }
}

const SOURCE_NAME: &str = "unit.c";
const POLL_INTERVAL: Duration = Duration::from_millis(5);
const DRAIN_GRACE: Duration = Duration::from_millis(200);

#[cfg(target_os = "macos")]
const ARTIFACT_NAME: &str = "unit.dylib";
#[cfg(not(target_os = "macos"))]
const ARTIFACT_NAME: &str = "unit.so";

/// The host C compiler, invoked as `cc -shared -fPIC ...`.
#[derive(Debug, Clone)]
pub struct SystemToolchain {
    compiler: PathBuf,
    compiler_args: Vec<String>,
    extra_flags: Vec<String>,
    timeout: Duration,
}

impl Default for SystemToolchain {
    fn default() -> Self {
        Self::from_config(&InlineConfig::default())
    }
}

impl SystemToolchain {
    pub fn from_config(config: &InlineConfig) -> Self {
        Self {
            compiler: config.compiler.clone(),
            compiler_args: config.compiler_args.clone(),
            extra_flags: config.extra_flags.clone(),
            timeout: config.compile_timeout(),
        }
    }

    pub fn compiler(&self) -> &Path {
        &self.compiler
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the full compiler command line.
    pub fn command(
        &self,
        source: &Path,
        artifact: &Path,
        flags: &[String],
    ) -> Command {
        let mut cmd = Command::new(&self.compiler);
        cmd.args(&self.compiler_args)
            .arg("-shared")
            .arg("-fPIC")
            .arg("-Werror=implicit-function-declaration");
        for arg in strict_link_args() {
            cmd.arg(arg);
        }
        cmd.args(&self.extra_flags).args(flags);
        cmd.arg("-o").arg(artifact).arg(source);
        cmd
    }
}

fn strict_link_args() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &["-Wl,-undefined,error"]
    } else if cfg!(target_os = "linux") {
        &["-Wl,--no-undefined"]
    } else {
        &[]
    }
}

impl NativeToolchain for SystemToolchain {
    fn is_available(&self) -> bool {
        let status = Command::new(&self.compiler)
            .args(&self.compiler_args)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!(
                    "compiler {} --version exited with {}",
                    self.compiler.display(),
                    status
                );
                false
            }
            Err(err) => {
                warn!("compiler {} not usable: {}", self.compiler.display(), err);
                false
            }
        }
    }

    fn compile(
        &self,
        unit: &TranslationUnit,
        flags: &[String],
        out_dir: &Path,
    ) -> Result<PathBuf, ExecutionError> {
        let source = out_dir.join(SOURCE_NAME);
        let artifact = out_dir.join(ARTIFACT_NAME);
        fs::write(&source, unit.source()).map_err(|err| ExecutionError::CompileFailed {
            diagnostics: format!("failed to write {}: {}", source.display(), err),
        })?;

        let mut cmd = self.command(&source, &artifact, flags);
        debug!("compiling inline unit: {:?}", cmd);

        let output = run_with_timeout(&mut cmd, self.timeout).map_err(|err| {
            ExecutionError::CompileFailed {
                diagnostics: format!("failed to run {}: {}", self.compiler.display(), err),
            }
        })?;

        match output {
            CompilerRun::TimedOut { diagnostics } => Err(ExecutionError::compile_failed(
                diagnostics,
                || format!("compiler timed out after {:?}", self.timeout),
            )),
            CompilerRun::Finished {
                status,
                diagnostics,
            } if !status.success() => Err(ExecutionError::compile_failed(diagnostics, || {
                format!("{} exited with {}", self.compiler.display(), status)
            })),
            CompilerRun::Finished { diagnostics, .. } if !artifact.exists() => {
                Err(ExecutionError::compile_failed(diagnostics, || {
                    format!(
                        "compiler succeeded but produced no artifact at {}",
                        artifact.display()
                    )
                }))
            }
            CompilerRun::Finished { diagnostics, .. } => {
                if !diagnostics.trim().is_empty() {
                    debug!("compiler output:\n{}", diagnostics);
                }
                Ok(artifact)
            }
        }
    }
}

enum CompilerRun {
    Finished {
        status: ExitStatus,
        diagnostics: String,
    },
    TimedOut {
        diagnostics: String,
    },
}

/// Run `cmd`, collecting stdout and stderr, killing it once `timeout` elapses.
///
/// The compiler runs in its own process group so the kill also reaches the
/// processes it spawned (`cc1`, `as`, `ld`), which hold the output pipes.
fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
) -> std::io::Result<CompilerRun> {
    process::isolate(cmd);
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // drain both pipes while waiting
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            process::kill_tree(&mut child);
            child.wait()?;
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // output still open past the deadline belongs to a stray descendant
    let limit = match status {
        Some(_) => deadline
            .saturating_duration_since(Instant::now())
            .max(DRAIN_GRACE),
        None => DRAIN_GRACE,
    };
    let mut diagnostics = collect_output(stderr, limit);
    let out = collect_output(stdout, limit);
    if !out.trim().is_empty() {
        if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
            diagnostics.push('\n');
        }
        diagnostics.push_str(&out);
    }

    Ok(match status {
        Some(status) => CompilerRun::Finished {
            status,
            diagnostics,
        },
        None => {
            let note = format!("compiler timed out after {:?}", timeout);
            CompilerRun::TimedOut {
                diagnostics: if diagnostics.trim().is_empty() {
                    note
                } else {
                    format!("{}\n{}", diagnostics.trim_end(), note)
                },
            }
        }
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn collect_output(
    rx: Option<mpsc::Receiver<String>>,
    limit: Duration,
) -> String {
    match rx.map(|rx| rx.recv_timeout(limit)) {
        Some(Ok(text)) => text,
        Some(Err(_)) => {
            warn!("compiler output still open after {:?}; abandoning it", limit);
            String::new()
        }
        None => String::new(),
    }
}

#[cfg(unix)]
mod process {
    use std::os::raw::c_int;
    use std::os::unix::process::CommandExt;
    use std::process::{Child, Command};

    use tracing::warn;

    extern "C" {
        fn kill(pid: c_int, sig: c_int) -> c_int;
    }

    const SIGKILL: c_int = 9;

    /// Start the child as leader of a new process group.
    pub(super) fn isolate(cmd: &mut Command) {
        cmd.process_group(0);
    }

    /// Kill the child's whole process group.
    pub(super) fn kill_tree(child: &mut Child) {
        let Ok(pid) = c_int::try_from(child.id()) else {
            let _ = child.kill();
            return;
        };
        // SAFETY: plain syscall; a negative pid addresses the group led by the child.
        let rc = unsafe { kill(-pid, SIGKILL) };
        if rc != 0 {
            if let Err(err) = child.kill() {
                warn!("failed to kill timed-out compiler: {}", err);
            }
        }
    }
}

#[cfg(not(unix))]
mod process {
    use std::process::{Child, Command};

    use tracing::warn;

    pub(super) fn isolate(_cmd: &mut Command) {}

    pub(super) fn kill_tree(child: &mut Child) {
        if let Err(err) = child.kill() {
            warn!("failed to kill timed-out compiler: {}", err);
        }
    }
}
