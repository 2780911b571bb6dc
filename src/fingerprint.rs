//! Content hash computation for cache keys: a running hasher fed the ordered
//! pieces that identify a task's inputs — the tool command, its static
//! flags, stage-specific elements, and input identities.
//!
//! A separator byte follows every element so that no two distinct input
//! sequences can collide by having an element's encoding span a boundary
//! (e.g. `["ab", "c"]` vs `["a", "bc"]`).

use sha2::{Digest, Sha256};

use crate::{ident::ModuleIdent, stage::Stage};

const SEP: u8 = 0x00;

pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self { hasher: Sha256::new() }
    }

    pub fn write(&mut self, piece: impl AsRef<[u8]>) -> &mut Self {
        self.hasher.update(piece.as_ref());
        self.hasher.update([SEP]);
        self
    }

    pub fn write_path(&mut self, path: &std::path::Path) -> &mut Self {
        self.write(path.to_string_lossy().as_bytes())
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Content hash of an arbitrary byte slice; used both for the toolchain
/// version digest and for the `TD` sidecar content address.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Parameters that vary per task, fed to [`compute`] in the exact order
/// mandated by §4.4.
pub struct FingerprintInputs<'a> {
    pub tool_command: &'a str,
    pub static_flags: &'a [String],
    pub arch_name: &'a str,
    pub toolchain_version_digest: &'a str,
    /// `(dependency identifier, HARE_TD_<ident> value)` pairs, only for SSA.
    pub td_env: &'a [(ModuleIdent, Option<String>)],
    pub libs: &'a [String],
    pub input_paths: &'a [std::path::PathBuf],
}

pub fn compute(stage: Stage, inputs: &FingerprintInputs<'_>) -> String {
    let mut b = FingerprintBuilder::new();
    b.write(inputs.tool_command);
    for flag in inputs.static_flags {
        b.write(flag);
    }

    match stage {
        Stage::Ssa => {
            b.write(inputs.arch_name);
            b.write(inputs.toolchain_version_digest);
            for (module, value) in inputs.td_env {
                if let Some(v) = value {
                    b.write(format!("HARE_TD_{}={}", module, v));
                }
            }
        }
        Stage::S => {
            b.write(inputs.arch_name);
        }
        Stage::Bin => {
            for lib in inputs.libs {
                b.write(lib);
            }
        }
        Stage::O => {}
    }

    for path in inputs.input_paths {
        b.write_path(path);
    }

    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> (Vec<String>, Vec<(ModuleIdent, Option<String>)>, Vec<String>, Vec<std::path::PathBuf>) {
        (vec!["-N".into(), "foo".into()], vec![], vec![], vec!["a.ha".into(), "b.ha".into()])
    }

    #[test]
    fn deterministic_across_calls() {
        let (flags, td, libs, paths) = sample_inputs();
        let inputs = FingerprintInputs {
            tool_command: "harec",
            static_flags: &flags,
            arch_name: "x86_64",
            toolchain_version_digest: "deadbeef",
            td_env: &td,
            libs: &libs,
            input_paths: &paths,
        };
        let a = compute(Stage::Ssa, &inputs);
        let b = compute(Stage::Ssa, &inputs);
        assert_eq!(a, b);
    }

    #[test]
    fn distinguishes_adjacent_concatenation() {
        // ["ab", "c"] must hash differently from ["a", "bc"] thanks to the
        // separator byte.
        let mut h1 = FingerprintBuilder::new();
        h1.write("ab").write("c");
        let mut h2 = FingerprintBuilder::new();
        h2.write("a").write("bc");
        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn stage_affects_hash() {
        let (flags, td, libs, paths) = sample_inputs();
        let inputs = FingerprintInputs {
            tool_command: "harec",
            static_flags: &flags,
            arch_name: "x86_64",
            toolchain_version_digest: "deadbeef",
            td_env: &td,
            libs: &libs,
            input_paths: &paths,
        };
        let ssa = compute(Stage::Ssa, &inputs);
        let s = compute(Stage::S, &inputs);
        assert_ne!(ssa, s);
    }

    proptest::proptest! {
        #[test]
        fn hash_determinism_holds_for_arbitrary_flag_lists(
            flags in proptest::collection::vec("[a-zA-Z0-9_-]{1,8}", 0..5)
        ) {
            let td = vec![];
            let libs = vec![];
            let paths = vec![];
            let inputs = FingerprintInputs {
                tool_command: "harec",
                static_flags: &flags,
                arch_name: "x86_64",
                toolchain_version_digest: "deadbeef",
                td_env: &td,
                libs: &libs,
                input_paths: &paths,
            };
            let a = compute(Stage::Ssa, &inputs);
            let b = compute(Stage::Ssa, &inputs);
            proptest::prop_assert_eq!(a, b);
        }
    }
}
