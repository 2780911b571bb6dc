//! Module identifiers: ordered sequences of name components, e.g. `net::dns`.

use std::fmt;

use crate::error::{DriverError, Result};

/// Serialized identifiers (including `::` separators) may not exceed this.
pub const MAX_IDENT_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdent {
    components: Vec<String>,
}

impl ModuleIdent {
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() > MAX_IDENT_LEN {
            return Err(DriverError::other(format!("identifier too long: {s}")));
        }
        let components: Vec<String> = s.split("::").map(|c| c.to_string()).collect();
        if components.iter().any(|c| c.is_empty()) {
            return Err(DriverError::other(format!("empty path component in identifier: {s}")));
        }
        Ok(Self { components })
    }

    pub fn from_components(components: Vec<String>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The identifier minus its last segment, or the empty identifier at the
    /// root.
    pub fn namespace(&self) -> Self {
        let mut components = self.components.clone();
        components.pop();
        Self { components }
    }

    pub fn last(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The path obtained by joining components with the platform separator,
    /// relative to some search-path root. Goes through [`crate::pathbuf::PathBuffer`]
    /// rather than a plain `PathBuf` collect so identifier components get the
    /// same normalization (and overflow checking) as any other path this
    /// driver builds.
    pub fn to_relative_path(&self) -> std::path::PathBuf {
        let buf = crate::pathbuf::PathBuffer::init(self.components.iter())
            .expect("module identifiers are bounded by MAX_IDENT_LEN, well under MAX_PATH");
        buf.as_path().to_path_buf()
    }
}

impl fmt::Display for ModuleIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("::"))
    }
}
