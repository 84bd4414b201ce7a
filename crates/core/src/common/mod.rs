//! Common types shared across the translator.
//!
//! This module groups the pieces every other component builds on:
//! 1. **Errors:** The library-wide error enum and `Result` alias.
//! 2. **Registers:** The unified guest register bank (integer, FP, and the
//!    synthetic condition/scratch slots).
//! 3. **Memory:** The guest data-memory buffer with offset translation.

/// Shift/division/sign-extension helpers with agreed edge-case behavior.
pub mod bits;
/// Library-wide error type and `Result` alias.
pub mod error;
/// Guest data memory with offset translation and unaligned accessors.
pub mod mem;
/// Unified guest register bank.
pub mod reg;

pub use error::{Error, Result};
pub use mem::GuestMemory;
pub use reg::RegisterBank;

/// An OI region: ordered `(guest_pc, raw_word)` pairs forming a compilation
/// unit. Straight-line runs are contiguous in steps of 4; segments may be
/// discontinuous where the recorded tail followed a branch.
pub type OiInstList = Vec<(u32, u32)>;

/// Per-region branch targets: `guest_pc -> [taken, fallthrough]`, where 0
/// means "none".
pub type BranchTargets = std::collections::HashMap<u32, [u32; 2]>;
