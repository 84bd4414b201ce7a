//! Autonomous Optimization Selector.
//!
//! Picks an optimization-pass schedule per region and records measured
//! outcomes:
//! 1. **Fingerprint:** A stable identity for a region's contents (`Dna`).
//! 2. **Database:** Persistent `(DNA, SetOpts, compileTime, ExecTime)`
//!    records keyed by fingerprint.
//! 3. **Solver:** The pluggable schedule-selection policy.

/// Outcome database and its text persistence.
pub mod database;
/// Solver trait and the default politic-driven solver.
pub mod solver;

pub use database::{Data, Database};
pub use solver::{AosSolver, PoliticSolver};

use crate::common::OiInstList;
use crate::isa::{decode, disasm};

/// Stable identity of a region's contents: entry address plus the ordered
/// decoded opcode stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dna(String);

impl Dna {
    /// Fingerprints a region.
    pub fn of_region(entry: u32, region: &OiInstList) -> Self {
        let mut s = format!("{entry:x}");
        for &(_, word) in region {
            s.push('.');
            s.push_str(disasm::mnemonic(decode(word).opcode));
        }
        Dna(s)
    }

    /// Wraps an already-computed fingerprint string.
    pub fn from_string(s: String) -> Self {
        Dna(s)
    }

    /// The fingerprint as a database key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Dna {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
