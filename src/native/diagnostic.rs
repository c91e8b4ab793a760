//! Structured view over GCC/Clang diagnostic output.
//!
//! Only lines of the form `file:line:col: severity: message` are recognised;
//! notes of other shapes (include stacks, caret lines) are skipped.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static DIAGNOSTIC_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<file>[^:\n]+):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?:fatal )?(?P<sev>error|warning|note):\s*(?P<msg>.*)$")
        .expect("diagnostic pattern is valid")
});

/// Severity of a compiler message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// One compiler message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// File the compiler attributed the message to (`<body>` or `<preamble>`
    /// for inline code).
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        match self.column {
            Some(col) => write!(
                f,
                "{}:{}:{}: {}: {}",
                self.file, self.line, col, severity, self.message
            ),
            None => write!(
                f,
                "{}:{}: {}: {}",
                self.file, self.line, severity, self.message
            ),
        }
    }
}

/// Extract the recognisable messages from raw compiler output.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| {
            let caps = DIAGNOSTIC_LINE.captures(line.trim_end())?;
            let severity = match &caps["sev"] {
                "error" => Severity::Error,
                "warning" => Severity::Warning,
                _ => Severity::Note,
            };
            Some(Diagnostic {
                file: caps["file"].to_string(),
                line: caps["line"].parse().ok()?,
                column: caps.name("col").and_then(|c| c.as_str().parse().ok()),
                severity,
                message: caps["msg"].trim().to_string(),
            })
        })
        .collect()
}
