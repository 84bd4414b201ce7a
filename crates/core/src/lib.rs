//! OI dynamic binary translator library.
//!
//! This crate implements an adaptive translation pipeline for the OI guest
//! ISA (a MIPS-like 32-bit fixed-width encoding) with the following:
//! 1. **Machine:** Guest architectural state (registers, data memory, code
//!    buffer), a sequential interpreter, and the Linux syscall bridge.
//! 2. **Region formation:** NET (*Next Executing Tail*) hotness tracking and
//!    region recording driven by observed branches.
//! 3. **IR:** An arena-based intermediate representation, the region lifter,
//!    and a configurable scalar/loop optimizer.
//! 4. **Pipeline:** A manager owning region storage and the code cache,
//!    background compilation workers, and guest-PC dispatch.
//! 5. **AOS:** An optimization-selection oracle with a persistent outcome
//!    database keyed by region fingerprints.

/// Common types (errors, the guest register bank, guest memory).
pub mod common;
/// Translator configuration (defaults, enums, nested sections).
pub mod config;
/// OI instruction set: decoded form, decoder, predicates, mnemonics.
pub mod isa;
/// Guest machine state, interpreter, syscall bridge, and binary loader.
pub mod machine;
/// Region formation (NET).
pub mod rft;
/// Intermediate representation, region lifter, optimizer, and backend.
pub mod ir;
/// Autonomous Optimization Selector: solver trait and outcome database.
pub mod aos;
/// Region manager: region tables, code cache, and compilation pipeline.
pub mod manager;
/// Top-level simulator driving interpretation, formation, and dispatch.
pub mod sim;
/// Translation statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Guest machine: registers, memory, PC, and single-step execution.
pub use crate::machine::Machine;
/// Pipeline manager; owns region state, workers, and the code cache.
pub use crate::manager::Manager;
/// Top-level simulator; owns the machine, the formation unit, and the manager.
pub use crate::sim::Simulator;
