//! # Diagnostics
//!
//! The data model for compiler diagnostics and the human-readable renderer.
//!
//! ## Rendering
//!
//! A diagnostic renders as its severity tag, the message and then one or more
//! location lines:
//!
//! ```text
//! [ERROR]: expected ')'
//!   at: model.mlir:3:14		( pkg/model.mlir:3:14 )
//! ```
//!
//! Long build sandbox prefixes (anything up to and including `.runfiles/`)
//! are trimmed from the extended path.

use std::fmt::Write;

const RUNFILES: &str = ".runfiles/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Note,
    Warning,
    Error,
    Remark,
    Unknown,
}

impl Severity {
    pub fn tag(self) -> &'static str {
        match self {
            Severity::Note => "[NOTE]",
            Severity::Warning => "[WARNING]",
            Severity::Error => "[ERROR]",
            Severity::Remark => "[REMARK]",
            Severity::Unknown => "[UNKNOWN]",
        }
    }
}

/// Where a diagnostic points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Unknown,
    FileLineCol {
        file: String,
        line: u32,
        col: u32,
    },
    Name {
        name: String,
        child: Box<Location>,
    },
    CallSite {
        caller: Box<Location>,
        callee: Box<Location>,
    },
    /// An engine-private location; only its fallback is printable.
    Opaque {
        fallback: Box<Location>,
    },
}

impl Location {
    pub fn file(file: impl Into<String>, line: u32, col: u32) -> Self {
        Location::FileLineCol { file: file.into(), line, col }
    }

    pub fn name(name: impl Into<String>, child: Location) -> Self {
        Location::Name { name: name.into(), child: Box::new(child) }
    }

    pub fn call_site(caller: Location, callee: Location) -> Self {
        Location::CallSite { caller: Box::new(caller), callee: Box::new(callee) }
    }

    pub fn opaque(fallback: Location) -> Self {
        Location::Opaque { fallback: Box::new(fallback) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Location,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>, location: Location) -> Self {
        Self { severity, message: message.into(), location }
    }

    pub fn error(message: impl Into<String>, location: Location) -> Self {
        Self::new(Severity::Error, message, location)
    }

    pub fn warning(message: impl Into<String>, location: Location) -> Self {
        Self::new(Severity::Warning, message, location)
    }

    pub fn note(message: impl Into<String>, location: Location) -> Self {
        Self::new(Severity::Note, message, location)
    }
}

/// Appends the multi-line rendering of `loc` to `out`.
pub fn render_location(loc: &Location, out: &mut String) {
    match loc {
        Location::Unknown => out.push_str("  [unknown location]\n"),
        Location::FileLineCol { file, line, col } => {
            let suffix = format!(":{}:{}", line, col);
            match file.rfind(['/', '\\']) {
                Some(slash) => {
                    let basename = &file[slash + 1..];
                    let extended = match file.rfind(RUNFILES) {
                        Some(pos) => &file[pos + RUNFILES.len()..],
                        None => file.as_str(),
                    };
                    let _ = write!(
                        out,
                        "  at: {}{}\t\t( {}{} )",
                        basename, suffix, extended, suffix
                    );
                }
                None => {
                    let _ = write!(out, "  at: {}{}", file, suffix);
                }
            }
            out.push('\n');
        }
        Location::Name { name, child } => {
            let _ = writeln!(out, "  @'{}':", name);
            if **child != Location::Unknown {
                out.push_str("(...\n");
                render_location(child, out);
                out.push_str(")\n");
            }
        }
        Location::CallSite { caller, callee } => {
            render_location(caller, out);
            render_location(callee, out);
        }
        Location::Opaque { fallback } => render_location(fallback, out),
    }
}

/// Renders `diagnostics` after an optional prefix, separated by blank lines.
pub fn render(prefix: Option<&str>, diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();
    let mut first = true;
    if let Some(prefix) = prefix {
        out.push_str(prefix);
        first = false;
    }
    for d in diagnostics {
        if !first {
            out.push_str("\n\n");
        }
        first = false;
        let _ = writeln!(out, "{}: {}", d.severity.tag(), d.message);
        render_location(&d.location, &mut out);
    }
    out
}
