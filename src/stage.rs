//! The fixed five-stage enumeration and the per-stage file extension it
//! produces.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Frontend output: textual SSA plus, as a side-effect, a TD file. Never
    /// materialized as its own task.
    Ssa,
    /// Backend output: assembly.
    S,
    /// Assembler output: object file.
    O,
    /// Linker output: the final artifact.
    Bin,
}

impl Stage {
    /// Scan-order rank: all SSA tasks sort before all S, before all O,
    /// before BIN.
    pub fn scan_rank(self) -> u8 {
        match self {
            Stage::Ssa => 0,
            Stage::S => 1,
            Stage::O => 2,
            Stage::Bin => 3,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Stage::Ssa => "ssa",
            Stage::S => "s",
            Stage::O => "o",
            Stage::Bin => "bin",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Ssa => "SSA",
            Stage::S => "S",
            Stage::O => "O",
            Stage::Bin => "BIN",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_rank_orders_ssa_first() {
        assert!(Stage::Ssa.scan_rank() < Stage::S.scan_rank());
        assert!(Stage::S.scan_rank() < Stage::O.scan_rank());
        assert!(Stage::O.scan_rank() < Stage::Bin.scan_rank());
    }
}
