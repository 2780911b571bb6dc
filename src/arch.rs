//! The architecture/platform registry: the fixed table of target
//! architectures the driver knows how to build for, and the default flags
//! each stage invokes its tool with on that architecture.

use once_cell::sync::Lazy;

use crate::context::{Arch, Platform};

struct Entry {
    name: &'static str,
    backend_name: &'static str,
    s_defaults: &'static [&'static str],
}

/// Known architectures, keyed by the name passed to `-a`/`--arch`. The
/// backend name is the QBE target triple the `S` stage passes to `-t`;
/// `s_defaults` covers flags the assembler needs to select the matching
/// instruction set when it cannot infer it from the `.s` file alone.
static TABLE: &[Entry] = &[
    Entry { name: "x86_64", backend_name: "amd64_sysv", s_defaults: &[] },
    Entry { name: "aarch64", backend_name: "arm64", s_defaults: &[] },
    Entry { name: "riscv64", backend_name: "rv64", s_defaults: &["-march=rv64gc"] },
];

static NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| TABLE.iter().map(|e| e.name).collect());

/// Looks up `name` (e.g. `"x86_64"`) in the architecture table, returning the
/// `Arch` descriptor and its default per-stage flags. `None` means the name
/// is not one this driver knows how to target at all, which the caller
/// should report as "unknown architecture" (§7).
pub fn lookup(name: &str) -> Option<(Arch, Platform)> {
    let entry = TABLE.iter().find(|e| e.name == name)?;
    let arch = Arch { name: entry.name.to_string(), backend_name: entry.backend_name.to_string() };
    let platform = Platform {
        ssa_defaults: Vec::new(),
        s_defaults: entry.s_defaults.iter().map(|s| s.to_string()).collect(),
        o_defaults: Vec::new(),
        bin_defaults: Vec::new(),
    };
    Some((arch, platform))
}

/// The architecture this driver targets when none is given explicitly,
/// detected from the host's `std::env::consts::ARCH` where recognized, else
/// falling back to `x86_64`.
pub fn host_default() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "aarch64",
        "riscv64" => "riscv64",
        _ => "x86_64",
    }
}

pub fn known_names() -> &'static [&'static str] {
    &NAMES
}
