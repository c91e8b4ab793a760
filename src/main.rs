//! cinline - CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use cinline::util::config::InlineConfig;
use cinline::util::logger::{self, LogLevel};
use cinline::{ExecutionError, InlineExecutor, InlineUnit, NAME, VERSION};

/// Compile and run inline C snippets with the host toolchain
#[derive(Parser, Debug)]
#[command(name = "cinline")]
#[command(author = "cinline contributors")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report whether inline native execution is available
    Supported,

    /// Compile and run one inline unit
    Run {
        /// Top-level declarations (includes, prototypes)
        #[arg(long, value_name = "TEXT", conflicts_with = "preamble_file")]
        preamble: Option<String>,

        /// Read the preamble from a file
        #[arg(long, value_name = "FILE")]
        preamble_file: Option<PathBuf>,

        /// Statements to execute
        #[arg(long, value_name = "TEXT", conflicts_with = "body_file", required_unless_present = "body_file")]
        body: Option<String>,

        /// Read the body from a file
        #[arg(long, value_name = "FILE")]
        body_file: Option<PathBuf>,

        /// Define a macro for this compilation (NAME or NAME=VALUE)
        #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]")]
        defines: Vec<String>,

        /// Pass a raw compiler flag
        #[arg(long = "flag", value_name = "FLAG", allow_hyphen_values = true)]
        flags: Vec<String>,

        /// C compiler to use
        #[arg(long, value_name = "PATH")]
        cc: Option<PathBuf>,

        /// Compiler timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if args.verbose {
        logger::init_with_level(LogLevel::Debug);
        eprintln!("cinline version: {}", VERSION);
        eprintln!("Host: {}", std::env::consts::OS);
    } else {
        logger::init();
    }

    match args.command {
        Commands::Supported => {
            let config = InlineConfig::load().context("Failed to load configuration")?;
            let supported = InlineExecutor::from_config(&config).is_supported();
            println!("{}", if supported { "supported" } else { "unsupported" });
            return Ok(if supported {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Commands::Run {
            preamble,
            preamble_file,
            body,
            body_file,
            defines,
            flags,
            cc,
            timeout,
        } => {
            let mut config = InlineConfig::load().context("Failed to load configuration")?;
            if let Some(cc) = cc {
                config.compiler = cc;
                config.compiler_args.clear();
            }
            if let Some(timeout) = timeout {
                if timeout == 0 {
                    bail!("--timeout must be greater than zero");
                }
                config.compile_timeout_secs = timeout;
            }

            let preamble = text_arg(preamble, preamble_file)?.unwrap_or_default();
            let body = text_arg(body, body_file)?.context("No body given")?;
            let unit_flags = defines
                .into_iter()
                .map(|d| format!("-D{}", d))
                .chain(flags);
            let unit = InlineUnit::new(preamble, body, unit_flags);

            match InlineExecutor::from_config(&config).run(&unit) {
                Ok(()) => {}
                Err(ExecutionError::CompileFailed { diagnostics }) => {
                    eprintln!("{}", diagnostics.trim_end());
                    bail!("Compilation failed");
                }
                Err(err) => return Err(err).context("Failed to run inline unit"),
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn text_arg(
    inline: Option<String>,
    file: Option<PathBuf>,
) -> Result<Option<String>> {
    match (inline, file) {
        (Some(text), _) => Ok(Some(text)),
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {}", path.display()))
            .map(Some),
        (None, None) => Ok(None),
    }
}
