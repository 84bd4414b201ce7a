//! Optimization passes.
//!
//! Passes mutate one function at a time. Dead instructions are dropped from
//! their blocks; the arena entry stays behind unreferenced, so value ids are
//! never invalidated by a pass.

/// Dead-code elimination (`dce`/`die`/`adce`).
pub mod dce;
/// Block-local value numbering (`gvn`).
pub mod gvn;
/// Constant folding, identities, and reassociation.
pub mod instcombine;
/// Loop analysis and loop passes.
pub mod loops;
/// Register promotion, dead-store elimination, and load forwarding.
pub mod mem2reg;
/// Control-flow graph cleanup.
pub mod simplify_cfg;
