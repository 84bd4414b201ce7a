//! Region formation.
//!
//! Watches interpreted branches, counts hotness, and records hot execution
//! tails into regions handed to the manager. The unit implemented here is
//! NET (*Next Executing Tail*).

/// NET region formation.
pub mod net;

pub use net::Net;
