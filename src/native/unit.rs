//! Inline units and translation-unit synthesis.
//!
//! ```text
//! #line 1 "<preamble>"
//! <preamble>
//! void __cinline_entry_<n>(void) {
//! #line 1 "<body>"
//! <body>
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::ExecutionError;

/// Prefix of every generated entry-point symbol.
pub const ENTRY_PREFIX: &str = "__cinline_entry_";

static NEXT_ENTRY: AtomicU64 = AtomicU64::new(0);

static MACRO_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("macro name pattern is valid"));

/// Preamble, body and per-call compiler flags.
///
/// Fields are private; a unit cannot change after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineUnit {
    preamble: String,
    body: String,
    flags: Vec<String>,
}

impl InlineUnit {
    pub fn new(
        preamble: impl Into<String>,
        body: impl Into<String>,
        flags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            preamble: preamble.into(),
            body: body.into(),
            flags: flags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Reject flags that would change the compiler's mode or output.
    pub fn validate_flags(&self) -> Result<(), ExecutionError> {
        let mut iter = self.flags.iter();
        while let Some(flag) = iter.next() {
            check_flag(flag)?;
            // `-D NAME` / `-U NAME` with a separate argument
            if flag == "-D" || flag == "-U" {
                match iter.next() {
                    Some(arg) => check_macro_arg(flag, arg)?,
                    None => return Err(bad_flag(flag, "missing macro name")),
                }
            }
        }
        Ok(())
    }

    /// Synthesize the source text with a fresh, process-unique entry symbol.
    pub fn synthesize(&self) -> TranslationUnit {
        let n = NEXT_ENTRY.fetch_add(1, Ordering::Relaxed);
        let entry = format!("{}{}_{}", ENTRY_PREFIX, std::process::id(), n);
        TranslationUnit::assemble(&self.preamble, &self.body, entry)
    }
}

/// Generated C source and the name of its entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    source: String,
    entry: String,
}

impl TranslationUnit {
    fn assemble(
        preamble: &str,
        body: &str,
        entry: String,
    ) -> Self {
        let mut source = String::with_capacity(preamble.len() + body.len() + 128);
        source.push_str("#line 1 \"<preamble>\"\n");
        source.push_str(preamble);
        if !preamble.ends_with('\n') {
            source.push('\n');
        }
        source.push_str(&format!("void {}(void) {{\n", entry));
        source.push_str("#line 1 \"<body>\"\n");
        source.push_str(body);
        if !body.ends_with('\n') {
            source.push('\n');
        }
        source.push_str("}\n");
        Self { source, entry }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }
}

const REJECTED_FLAGS: &[&str] = &["-o", "-c", "-S", "-E", "-shared", "-x", "-fsyntax-only"];

fn check_flag(flag: &str) -> Result<(), ExecutionError> {
    if flag.is_empty() {
        return Err(bad_flag(flag, "empty flag"));
    }
    if REJECTED_FLAGS.contains(&flag)
        || (flag.starts_with("-o") && flag.len() > 2)
        || (flag.starts_with("-x") && flag.len() > 2)
        || flag.starts_with("-M")
    {
        return Err(bad_flag(flag, "flag controls compiler output and is not allowed"));
    }
    if let Some(rest) = flag.strip_prefix("-D").or_else(|| flag.strip_prefix("-U")) {
        if !rest.is_empty() {
            check_macro_arg(&flag[..2], rest)?;
        }
    }
    Ok(())
}

fn check_macro_arg(
    flag: &str,
    arg: &str,
) -> Result<(), ExecutionError> {
    let name = match flag {
        "-D" => arg.split_once('=').map(|(name, _)| name).unwrap_or(arg),
        _ => arg,
    };
    if MACRO_NAME.is_match(name) {
        Ok(())
    } else {
        Err(bad_flag(
            &format!("{}{}", flag, arg),
            "macro name is not a valid identifier",
        ))
    }
}

fn bad_flag(
    flag: &str,
    reason: &str,
) -> ExecutionError {
    ExecutionError::CompileFailed {
        diagnostics: format!("error: bad flag '{}': {}", flag, reason),
    }
}
