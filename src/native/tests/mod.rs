//! Inline execution unit tests
//!
//! Executor paths are driven through a recording toolchain double, so nothing
//! here needs a real C compiler.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use proptest::prelude::*;
use tempfile::TempDir;

use crate::native::diagnostic::{parse_diagnostics, Severity};
use crate::native::error::ExecutionError;
use crate::native::executor::InlineExecutor;
use crate::native::toolchain::{NativeToolchain, SystemToolchain};
use crate::native::unit::{InlineUnit, TranslationUnit, ENTRY_PREFIX};
use crate::util::config::InlineConfig;

enum Outcome {
    Diagnostics(&'static str),
    NotALibrary,
}

struct RecordingToolchain {
    available: bool,
    outcome: Outcome,
    availability_checks: AtomicUsize,
    compiles: AtomicUsize,
    last_flags: Mutex<Vec<String>>,
    last_source: Mutex<Option<String>>,
    last_out_dir: Mutex<Option<PathBuf>>,
}

impl RecordingToolchain {
    fn new(
        available: bool,
        outcome: Outcome,
    ) -> Self {
        Self {
            available,
            outcome,
            availability_checks: AtomicUsize::new(0),
            compiles: AtomicUsize::new(0),
            last_flags: Mutex::new(Vec::new()),
            last_source: Mutex::new(None),
            last_out_dir: Mutex::new(None),
        }
    }
}

impl NativeToolchain for RecordingToolchain {
    fn is_available(&self) -> bool {
        self.availability_checks.fetch_add(1, Ordering::SeqCst);
        self.available
    }

    fn compile(
        &self,
        unit: &TranslationUnit,
        flags: &[String],
        out_dir: &Path,
    ) -> Result<PathBuf, ExecutionError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        *self.last_flags.lock().unwrap() = flags.to_vec();
        *self.last_source.lock().unwrap() = Some(unit.source().to_string());
        *self.last_out_dir.lock().unwrap() = Some(out_dir.to_path_buf());
        match self.outcome {
            Outcome::Diagnostics(text) => Err(ExecutionError::compile_failed(text, || {
                "compiler failed".to_string()
            })),
            Outcome::NotALibrary => {
                let path = out_dir.join("unit.so");
                fs::write(&path, b"definitely not a shared object").unwrap();
                Ok(path)
            }
        }
    }
}

const STDIO: &str = "#include <stdio.h>";
const PRINT_FOO: &str = r#"printf("FOO was defined to be %d\n", FOO);"#;

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_unit_accessors() {
        let unit = InlineUnit::new(STDIO, PRINT_FOO, ["-DFOO=14"]);
        assert_eq!(unit.preamble(), STDIO);
        assert_eq!(unit.body(), PRINT_FOO);
        assert_eq!(unit.flags(), &["-DFOO=14".to_string()]);
    }

    #[test]
    fn test_synthesized_layout() {
        let unit = InlineUnit::new(STDIO, PRINT_FOO, Vec::<String>::new());
        let tu = unit.synthesize();
        let source = tu.source();

        assert!(tu.entry().starts_with(ENTRY_PREFIX));
        let preamble_at = source.find(STDIO).unwrap();
        let entry_at = source.find(&format!("void {}(void) {{", tu.entry())).unwrap();
        let body_at = source.find(PRINT_FOO).unwrap();
        assert!(preamble_at < entry_at && entry_at < body_at);
        assert!(source.contains("#line 1 \"<preamble>\""));
        assert!(source.contains("#line 1 \"<body>\""));
        assert!(source.trim_end().ends_with('}'));
    }

    #[test]
    fn test_entry_symbols_are_unique() {
        let unit = InlineUnit::new("", "", Vec::<String>::new());
        let a = unit.synthesize();
        let b = unit.synthesize();
        assert_ne!(a.entry(), b.entry());
    }

    #[test]
    fn test_accepted_flags() {
        for flags in [
            vec!["-DFOO=14"],
            vec!["-DFOO"],
            vec!["-D", "BAR=1"],
            vec!["-UNDEBUG"],
            vec!["-O2", "-Wall", "-I/usr/local/include", "-std=c99"],
        ] {
            let unit = InlineUnit::new("", "", flags.clone());
            assert!(unit.validate_flags().is_ok(), "rejected {:?}", flags);
        }
    }

    #[test]
    fn test_rejected_flags() {
        for flags in [
            vec!["-o", "/tmp/out.so"],
            vec!["-o/tmp/out.so"],
            vec!["-c"],
            vec!["-E"],
            vec!["-S"],
            vec!["-shared"],
            vec!["-MD"],
            vec!["-xc++"],
            vec!["-fsyntax-only"],
            vec![""],
            vec!["-D1FOO=2"],
            vec!["-D=3"],
            vec!["-D"],
            vec!["-U", "not-a-name"],
        ] {
            let unit = InlineUnit::new("", "", flags.clone());
            let err = unit.validate_flags().unwrap_err();
            assert!(err.is_compile_failure(), "accepted {:?}", flags);
            assert!(err.diagnostics().unwrap().contains("bad flag"));
        }
    }

    proptest! {
        #[test]
        fn prop_macro_definitions_accepted(
            name in "[A-Za-z_][A-Za-z0-9_]{0,16}",
            value in "[0-9]{1,8}",
        ) {
            let unit = InlineUnit::new("", "", [format!("-D{}={}", name, value)]);
            prop_assert!(unit.validate_flags().is_ok());
        }

        #[test]
        fn prop_body_embedded_verbatim(body in "[ -~]{0,64}") {
            let unit = InlineUnit::new("int x;", body.clone(), Vec::<String>::new());
            let tu = unit.synthesize();
            let marker = "#line 1 \"<body>\"\n";
            let body_start = tu.source().find(marker).unwrap() + marker.len();
            prop_assert!(tu.source()[body_start..].starts_with(&body));
        }
    }
}

#[cfg(test)]
mod diagnostic_tests {
    use super::*;

    #[test]
    fn test_parse_gcc_style() {
        let output = "\
<body>: In function '__cinline_entry_1_0':
<body>:1:43: error: 'FOO' undeclared (first use in this function)
<body>:1:43: note: each undeclared identifier is reported only once
<preamble>:3:5: warning: unused variable 'x' [-Wunused-variable]
";
        let diags = parse_diagnostics(output);
        assert_eq!(diags.len(), 3);
        assert_eq!(diags[0].file, "<body>");
        assert_eq!(diags[0].line, 1);
        assert_eq!(diags[0].column, Some(43));
        assert!(diags[0].is_error());
        assert!(diags[0].message.contains("'FOO' undeclared"));
        assert_eq!(diags[1].severity, Severity::Note);
        assert_eq!(diags[2].severity, Severity::Warning);
        assert_eq!(diags[2].file, "<preamble>");
    }

    #[test]
    fn test_parse_fatal_and_columnless() {
        let diags = parse_diagnostics(
            "<preamble>:1:10: fatal error: nope.h: No such file or directory\nunit.c:7: error: oops\n",
        );
        assert_eq!(diags.len(), 2);
        assert!(diags[0].is_error());
        assert_eq!(diags[1].column, None);
        assert_eq!(diags[1].to_string(), "unit.c:7: error: oops");
    }

    #[test]
    fn test_unrecognised_lines_skipped() {
        assert!(parse_diagnostics("collect2: error: ld returned 1 exit status\n  | ^~~\n").is_empty());
    }

    #[test]
    fn test_compile_failed_never_empty() {
        let err = ExecutionError::compile_failed("  \n", || "cc exited with 1".to_string());
        assert_eq!(err.diagnostics(), Some("cc exited with 1"));
    }
}

#[cfg(test)]
mod executor_tests {
    use super::*;

    #[test]
    fn test_unsupported_fails_fast() {
        let toolchain = RecordingToolchain::new(false, Outcome::NotALibrary);
        let executor = InlineExecutor::with_toolchain(&toolchain);
        let unit = InlineUnit::new(STDIO, PRINT_FOO, ["-DFOO=14"]);

        assert_eq!(executor.run(&unit), Err(ExecutionError::Unsupported));
        assert_eq!(executor.run(&unit), Err(ExecutionError::Unsupported));
        assert_eq!(toolchain.compiles.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_availability_is_memoized() {
        let toolchain = RecordingToolchain::new(false, Outcome::NotALibrary);
        let executor = InlineExecutor::with_toolchain(&toolchain);
        let first = executor.is_supported();
        for _ in 0..5 {
            assert_eq!(executor.is_supported(), first);
        }
        assert!(toolchain.availability_checks.load(Ordering::SeqCst) <= 1);
    }

    #[cfg(all(unix, feature = "native"))]
    #[test]
    fn test_compile_failure_surfaces_diagnostics() {
        let toolchain = RecordingToolchain::new(
            true,
            Outcome::Diagnostics("<body>:1:43: error: 'FOO' undeclared"),
        );
        let executor = InlineExecutor::with_toolchain(&toolchain);
        let err = executor
            .run(&InlineUnit::new(STDIO, PRINT_FOO, Vec::<String>::new()))
            .unwrap_err();

        assert!(err.is_compile_failure());
        assert!(err.diagnostics().unwrap().contains("FOO"));
        assert_eq!(err.parsed_diagnostics().len(), 1);
        assert_eq!(toolchain.compiles.load(Ordering::SeqCst), 1);
    }

    #[cfg(all(unix, feature = "native"))]
    #[test]
    fn test_bad_flag_rejected_before_compiling() {
        let toolchain = RecordingToolchain::new(true, Outcome::NotALibrary);
        let executor = InlineExecutor::with_toolchain(&toolchain);
        let err = executor
            .run(&InlineUnit::new(STDIO, PRINT_FOO, ["-o", "elsewhere.so"]))
            .unwrap_err();

        assert!(err.is_compile_failure());
        assert_eq!(toolchain.compiles.load(Ordering::SeqCst), 0);
    }

    #[cfg(all(unix, feature = "native"))]
    #[test]
    fn test_unloadable_artifact_is_load_failure() {
        let toolchain = RecordingToolchain::new(true, Outcome::NotALibrary);
        let executor = InlineExecutor::with_toolchain(&toolchain);
        let err = executor
            .run(&InlineUnit::new(STDIO, "", Vec::<String>::new()))
            .unwrap_err();

        assert!(matches!(err, ExecutionError::LoadFailed { .. }), "{:?}", err);
    }

    #[cfg(all(unix, feature = "native"))]
    #[test]
    fn test_flags_forwarded_per_call_only() {
        let toolchain = RecordingToolchain::new(true, Outcome::Diagnostics("error: stop"));
        let executor = InlineExecutor::with_toolchain(&toolchain);

        let _ = executor.run(&InlineUnit::new(STDIO, PRINT_FOO, ["-DFOO=14"]));
        assert_eq!(*toolchain.last_flags.lock().unwrap(), vec!["-DFOO=14"]);

        let _ = executor.run(&InlineUnit::new(STDIO, PRINT_FOO, Vec::<String>::new()));
        assert!(toolchain.last_flags.lock().unwrap().is_empty());
        let source = toolchain.last_source.lock().unwrap().clone().unwrap();
        assert!(!source.contains("FOO=14"));
    }

    #[cfg(all(unix, feature = "native"))]
    #[test]
    fn test_build_dir_removed_after_failure() {
        let work = TempDir::new().unwrap();
        let toolchain = RecordingToolchain::new(true, Outcome::NotALibrary);
        let executor = InlineExecutor::with_toolchain(&toolchain).with_work_dir(work.path());

        assert!(executor
            .run(&InlineUnit::new(STDIO, "", Vec::<String>::new()))
            .is_err());

        let out_dir = toolchain.last_out_dir.lock().unwrap().clone().unwrap();
        assert!(out_dir.starts_with(work.path()));
        assert!(!out_dir.exists());
        assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_system_command_line() {
        let config = InlineConfig {
            compiler: PathBuf::from("ccache"),
            compiler_args: vec!["clang".to_string()],
            extra_flags: vec!["-O1".to_string()],
            ..InlineConfig::default()
        };
        let toolchain = SystemToolchain::from_config(&config);
        let cmd = toolchain.command(
            Path::new("/build/unit.c"),
            Path::new("/build/unit.so"),
            &["-DFOO=14".to_string()],
        );

        assert_eq!(cmd.get_program(), "ccache");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "clang");
        let pos = |needle: &str| args.iter().position(|a| a == needle).unwrap();
        assert!(args.contains(&"-shared".to_string()));
        assert!(args.contains(&"-fPIC".to_string()));
        assert!(pos("-O1") < pos("-DFOO=14"));
        assert_eq!(args[pos("-o") + 1], "/build/unit.so");
        assert_eq!(args.last().unwrap(), "/build/unit.c");
    }

    #[test]
    fn test_missing_compiler_is_unavailable() {
        let config = InlineConfig {
            compiler: PathBuf::from("/nonexistent/cinline-test-cc"),
            ..InlineConfig::default()
        };
        let executor = InlineExecutor::from_config(&config);
        assert!(!executor.is_supported());
        assert_eq!(
            executor.run(&InlineUnit::new("", "", Vec::<String>::new())),
            Err(ExecutionError::Unsupported)
        );
    }

    /// Toolchain whose "compiler" is `sh <script>`; the script ignores the
    /// compiler arguments appended after it.
    #[cfg(unix)]
    fn script_toolchain(
        dir: &Path,
        script: &str,
        timeout_secs: u64,
    ) -> SystemToolchain {
        let path = dir.join("fake-cc.sh");
        fs::write(&path, script).unwrap();
        SystemToolchain::from_config(&InlineConfig {
            compiler: PathBuf::from("sh"),
            compiler_args: vec![path.to_string_lossy().into_owned()],
            compile_timeout_secs: timeout_secs,
            ..InlineConfig::default()
        })
    }

    #[cfg(unix)]
    #[test]
    fn test_compile_timeout_kills_compiler_children() {
        let scratch = TempDir::new().unwrap();
        let toolchain = script_toolchain(scratch.path(), "sleep 8 &\nwait\n", 1);
        let out_dir = TempDir::new().unwrap();
        let unit = InlineUnit::new("", "", Vec::<String>::new()).synthesize();

        let started = std::time::Instant::now();
        let err = toolchain.compile(&unit, &[], out_dir.path()).unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_compile_failure(), "{:?}", err);
        assert!(err.diagnostics().unwrap().contains("timed out"));
        assert!(
            elapsed < std::time::Duration::from_secs(4),
            "compile took {:?} under a 1s timeout",
            elapsed
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_compile_timeout_keeps_compiler_output() {
        let scratch = TempDir::new().unwrap();
        let toolchain = script_toolchain(
            scratch.path(),
            "echo 'still compiling' >&2\nsleep 8\n",
            1,
        );
        let out_dir = TempDir::new().unwrap();
        let unit = InlineUnit::new("", "", Vec::<String>::new()).synthesize();

        let err = toolchain.compile(&unit, &[], out_dir.path()).unwrap_err();
        let diagnostics = err.diagnostics().unwrap();
        assert!(diagnostics.contains("still compiling"), "{}", diagnostics);
        assert!(diagnostics.contains("timed out"), "{}", diagnostics);
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_artifact_is_compile_failure() {
        let scratch = TempDir::new().unwrap();
        let toolchain = script_toolchain(scratch.path(), "exit 0\n", 5);
        let out_dir = TempDir::new().unwrap();
        let unit = InlineUnit::new("", "", Vec::<String>::new()).synthesize();

        let err = toolchain.compile(&unit, &[], out_dir.path()).unwrap_err();
        assert!(err.is_compile_failure(), "{:?}", err);
        assert!(err.diagnostics().unwrap().contains("no artifact"));
    }

    #[cfg(unix)]
    #[test]
    fn test_compiler_args_reach_availability_check() {
        let scratch = TempDir::new().unwrap();
        let available = script_toolchain(scratch.path(), "exit 0\n", 5);
        assert!(available.is_available());

        let broken = script_toolchain(scratch.path(), "exit 3\n", 5);
        assert!(!broken.is_available());
    }
}
