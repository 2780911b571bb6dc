//! Environment-variable-driven configuration: cache root resolution, tool
//! overrides, and shell-split extra flags.

use std::{fmt, path::PathBuf, sync::Arc};

use crate::error::{DriverError, Result};

/// Names of the environment variables this crate consults. Kept as named
/// constants so the help text and the parser can never drift apart.
pub mod env_vars {
    pub const CACHE: &str = "HARECACHE";
    pub const PATH: &str = "HAREPATH";
    pub const HAREC: &str = "HAREC";
    pub const QBE: &str = "QBE";
    pub const AR: &str = "AR";
    pub const AS: &str = "AS";
    pub const LD: &str = "LD";
    pub const CC: &str = "CC";
    pub const HARECFLAGS: &str = "HARECFLAGS";
    pub const QBEFLAGS: &str = "QBEFLAGS";
    pub const ASFLAGS: &str = "ASFLAGS";
    pub const LDFLAGS: &str = "LDFLAGS";
    pub const LDLINKFLAGS: &str = "LDLINKFLAGS";
    pub const NO_COLOR: &str = "NO_COLOR";
    pub const TD_PREFIX: &str = "HARE_TD_";
}

#[derive(Debug, Clone)]
pub struct ToolNames {
    pub harec: String,
    pub qbe: String,
    pub ar: String,
    pub r#as: String,
    pub ld: String,
    pub cc: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            harec: "harec".into(),
            qbe: "qbe".into(),
            ar: "ar".into(),
            r#as: "as".into(),
            ld: "ld".into(),
            cc: "cc".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolFlags {
    pub harec: Vec<String>,
    pub qbe: Vec<String>,
    pub r#as: Vec<String>,
    pub ld: Vec<String>,
    pub ldlink: Vec<String>,
}

/// Shared, injectable lookup used both by [`EnvConfig::from_getter`]'s own
/// fixed-name reads and by [`EnvConfig::td_var`]'s dynamically-named ones, so
/// a test's hermetic map (or the real process environment) is consulted
/// uniformly everywhere this crate reads an environment variable.
type Getter = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct EnvConfig {
    pub cache_root: PathBuf,
    pub search_path_var: String,
    pub tools: ToolNames,
    pub flags: ToolFlags,
    pub no_color: bool,
    get: Getter,
}

impl fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvConfig")
            .field("cache_root", &self.cache_root)
            .field("search_path_var", &self.search_path_var)
            .field("tools", &self.tools)
            .field("flags", &self.flags)
            .field("no_color", &self.no_color)
            .finish_non_exhaustive()
    }
}

impl EnvConfig {
    /// Resolve configuration from the process environment, using `dirs` for
    /// the XDG cache fallback and `home` for the final fallback.
    pub fn from_env() -> Result<Self> {
        Self::from_getter(|name| std::env::var(name).ok())
    }

    pub fn from_getter(get: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Result<Self> {
        let get: Getter = Arc::new(get);
        let cache_root = match get(env_vars::CACHE) {
            Some(v) if !v.is_empty() => PathBuf::from(v),
            _ => dirs::cache_dir()
                .or_else(home::home_dir)
                .map(|d| d.join("hare"))
                .ok_or_else(|| DriverError::other("cannot determine cache directory"))?,
        };

        let tools = ToolNames {
            harec: get(env_vars::HAREC).unwrap_or_else(|| "harec".into()),
            qbe: get(env_vars::QBE).unwrap_or_else(|| "qbe".into()),
            ar: get(env_vars::AR).unwrap_or_else(|| "ar".into()),
            r#as: get(env_vars::AS).unwrap_or_else(|| "as".into()),
            ld: get(env_vars::LD).unwrap_or_else(|| "ld".into()),
            cc: get(env_vars::CC).unwrap_or_else(|| "cc".into()),
        };

        let split = |name: &str| -> Result<Vec<String>> {
            match get(name) {
                Some(v) if !v.is_empty() => shell_words::split(&v)
                    .map_err(|e| DriverError::other(format!("{name}: {e}"))),
                _ => Ok(Vec::new()),
            }
        };

        let flags = ToolFlags {
            harec: split(env_vars::HARECFLAGS)?,
            qbe: split(env_vars::QBEFLAGS)?,
            r#as: split(env_vars::ASFLAGS)?,
            ld: split(env_vars::LDFLAGS)?,
            ldlink: split(env_vars::LDLINKFLAGS)?,
        };

        let no_color = get(env_vars::NO_COLOR).is_some();
        let search_path_var = get(env_vars::PATH).unwrap_or_default();

        Ok(Self { cache_root, search_path_var, tools, flags, no_color, get })
    }

    /// Read a `HARE_TD_<module::ident>` variable, used by the fingerprint
    /// computation for `SSA` tasks. Routed through the same injectable
    /// getter as every fixed-name lookup in [`Self::from_getter`], so tests
    /// can exercise `HARE_TD_*` behavior hermetically instead of reaching
    /// into the real process environment.
    pub fn td_var(&self, module: &crate::ident::ModuleIdent) -> Option<String> {
        let name = format!("{}{}", env_vars::TD_PREFIX, module.to_string().replace("::", "_"));
        (self.get)(&name).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        let cfg = EnvConfig::from_getter(|_| None).unwrap();
        assert_eq!(cfg.tools.harec, "harec");
        assert!(cfg.flags.harec.is_empty());
        assert!(!cfg.no_color);
    }

    #[test]
    fn overrides_are_honored() {
        let mut env = HashMap::new();
        env.insert("HAREC".to_string(), "/opt/harec".to_string());
        env.insert("HARECFLAGS".to_string(), "-v -D foo=1".to_string());
        env.insert("NO_COLOR".to_string(), "1".to_string());
        let cfg = EnvConfig::from_getter(move |k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.tools.harec, "/opt/harec");
        assert_eq!(cfg.flags.harec, vec!["-v", "-D", "foo=1"]);
        assert!(cfg.no_color);
    }

    #[test]
    fn quoted_flags_are_split_posix_style() {
        let mut env = HashMap::new();
        env.insert("LDFLAGS".to_string(), "-L /usr/lib -Wl,'a b'".to_string());
        let cfg = EnvConfig::from_getter(move |k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.flags.ld, vec!["-L", "/usr/lib", "-Wl,a b"]);
    }

    #[test]
    fn td_var_reads_through_the_injected_getter() {
        let mut env = HashMap::new();
        env.insert("HARE_TD_foo_bar".to_string(), "deadbeef".to_string());
        let cfg = EnvConfig::from_getter(move |k| env.get(k).cloned()).unwrap();
        let module = crate::ident::ModuleIdent::parse("foo::bar").unwrap();
        assert_eq!(cfg.td_var(&module).as_deref(), Some("deadbeef"));
    }

    #[test]
    fn td_var_is_none_when_unset_or_empty() {
        let mut env = HashMap::new();
        env.insert("HARE_TD_foo".to_string(), String::new());
        let cfg = EnvConfig::from_getter(move |k| env.get(k).cloned()).unwrap();
        let set_but_empty = crate::ident::ModuleIdent::parse("foo").unwrap();
        let never_set = crate::ident::ModuleIdent::parse("other").unwrap();
        assert_eq!(cfg.td_var(&set_but_empty), None);
        assert_eq!(cfg.td_var(&never_set), None);
    }
}
