//! Error definitions for the translator.
//!
//! This module defines the error handling surface for the library. It
//! provides:
//! 1. **Fatal model errors:** Conditions that indicate the translated code
//!    would be incorrect (unknown opcode during lifting, invalid pass code,
//!    unsupported syscall). Drivers must not continue past these.
//! 2. **Recoverable errors:** Backend failures the pipeline absorbs by
//!    falling back to interpretation.
//! 3. **I/O and format errors:** Binary loading and database persistence.

use thiserror::Error;

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the translator.
#[derive(Debug, Error)]
pub enum Error {
    /// An opcode with no lowering rule was found while lifting a region.
    ///
    /// Fatal: skipping the instruction would make the lifted function
    /// incorrect. Carries the guest PC and the mnemonic for the diagnostic.
    #[error("no lowering rule for instruction at {pc:#x} ({mnemonic})")]
    UnsupportedInst {
        /// Guest address of the offending instruction.
        pc: u32,
        /// Printable mnemonic of the offending instruction.
        mnemonic: String,
    },

    /// An optimization pass code outside the known enumeration was requested.
    ///
    /// Fatal: indicates a configuration or database bug.
    #[error("invalid optimization pass code {0}")]
    InvalidPass(u16),

    /// The JIT backend failed to produce an entry point for a region.
    ///
    /// Recoverable: the region is dropped and interpretation continues.
    #[error("backend failed to compile region {entry:#x}: {reason}")]
    Backend {
        /// Entry address of the region that failed to compile.
        entry: u32,
        /// Backend-specific failure description.
        reason: String,
    },

    /// A guest system call with no host emulation was requested.
    ///
    /// Fatal to the guest program (exit status 2 at the driver level).
    #[error("syscall {0} not implemented")]
    UnsupportedSyscall(u32),

    /// The guest program counter left the loaded code image.
    #[error("fetch from {0:#x} is outside the loaded code image")]
    BadFetch(u32),

    /// The guest binary could not be parsed or loaded.
    #[error("failed to load guest binary: {0}")]
    Loader(String),

    /// An AOS database file could not be parsed.
    #[error("malformed AOS database record near line {line}: {reason}")]
    Database {
        /// 1-based line number of the offending input.
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// Host I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
