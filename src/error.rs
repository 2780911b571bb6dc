//! The driver's error taxonomy.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias for
//! `std::result::Result<T, DriverError>`. `DriverError` is a tagged enum, not
//! an exception hierarchy: callers match on `.kind()`-shaped variants rather
//! than downcasting.

use std::{fmt, path::PathBuf};

use crate::ident::ModuleIdent;

pub type Result<T, E = DriverError> = std::result::Result<T, E>;

/// The taxonomy from the error handling design: one variant per kind, never a
/// generic catch-all `String` error except where a tool's own message is
/// being passed through verbatim.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("path buffer overflow: pushing {component:?} onto {current}")]
    PathOverflow { current: String, component: String },

    #[error("module not found: {ident}")]
    ModuleNotFound { ident: ModuleIdent },

    /// A directory has neither a language source nor a README marker.
    /// Raised by source discovery, which has no module identifier in scope;
    /// the resolver catches this specific variant and re-raises it as
    /// [`DriverError::ModuleNotFound`] with the identifier attached, while
    /// letting every other discovery error (conflict, bad tag, I/O) pass
    /// through unchanged.
    #[error("no language sources or README marker in {dir}")]
    NoModuleSources { dir: PathBuf },

    #[error("conflicting sources for {base} in {dir}: {}", conflicts.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    Conflict { dir: PathBuf, base: String, conflicts: Vec<PathBuf> },

    #[error("bad tag predicate {predicate:?} in {path}: {reason}")]
    BadTag { path: PathBuf, predicate: String, reason: &'static str },

    #[error("import cycle: {}", path.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(" -> "))]
    Cycle { path: Vec<ModuleIdent> },

    /// Internal only. Must never escape the scheduler; see `Scheduler::run`.
    #[error("would block")]
    WouldBlock,

    #[error("{tool} failed for {artifact}")]
    ToolFailure { tool: String, artifact: String, log: String },

    #[error("unknown architecture: {0}")]
    UnknownArchitecture(String),

    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("interrupted")]
    Interrupted,

    #[error("{message}")]
    Other { message: String },
}

impl DriverError {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn other(message: impl fmt::Display) -> Self {
        Self::Other { message: message.to_string() }
    }

    /// The process exit code this error should map to at the CLI boundary.
    ///
    /// `ModuleNotFound` and `UnknownArchitecture` get dedicated codes per the
    /// CLI contract; everything else is a generic failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ModuleNotFound { .. } | Self::NoModuleSources { .. } => 2,
            Self::UnknownArchitecture(_) => 3,
            Self::Interrupted => 130,
            _ => 1,
        }
    }

    /// A short tag used in the `error: <kind>: <context>` rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathOverflow { .. } => "path overflow",
            Self::ModuleNotFound { .. } => "not found",
            Self::NoModuleSources { .. } => "not found",
            Self::Conflict { .. } => "conflict",
            Self::BadTag { .. } => "bad tag",
            Self::Cycle { .. } => "cycle",
            Self::WouldBlock => "would block",
            Self::ToolFailure { .. } => "tool failure",
            Self::UnknownArchitecture(_) => "unknown architecture",
            Self::Io { .. } => "io",
            Self::Interrupted => "interrupted",
            Self::Other { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(
            DriverError::ModuleNotFound { ident: ModuleIdent::parse("net::dns").unwrap() }
                .exit_code(),
            2
        );
        assert_eq!(DriverError::UnknownArchitecture("foo".into()).exit_code(), 3);
        assert_eq!(DriverError::WouldBlock.exit_code(), 1);
    }
}
