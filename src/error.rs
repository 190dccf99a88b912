use std::fmt;
use thiserror::Error;

use crate::source::SourcePos;

/// Fatal conditions that abort assembly outright (§7: "Fatal").
///
/// Everything short of this (warnings, errors) is recoverable: assembly
/// continues to the next line and the condition is recorded as a
/// [`Diagnostic`] instead of unwinding the call stack.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open source file {path}: {source}")]
    OpenSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open include file {path}: {source}")]
    OpenInclude {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("include files nested too deeply (max {max})")]
    IncludeTooDeep { max: usize },

    #[error("cannot write object file: {0}")]
    ObjectWrite(#[source] std::io::Error),

    #[error("cannot write listing file: {0}")]
    ListingWrite(#[source] std::io::Error),

    #[error("-b and -o/-c are mutually exclusive")]
    ConflictingOutputOptions,

    #[error("unknown CPU type {0}")]
    UnknownCpu(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Severity of a non-fatal condition (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// One recoverable diagnostic, tied to the source position active when it
/// was raised. Pass-1 diagnostics are suppressed from the listing unless
/// `cl_ListP1` (§4.9/§7) is set; that decision is made by the listing
/// writer, not here.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub pos: SourcePos,
    pub pass: u8,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        };
        write!(f, "{}:{}: {}: {}", self.pos.file, self.pos.line, tag, self.message)
    }
}
