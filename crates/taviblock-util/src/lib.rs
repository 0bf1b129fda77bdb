//! Shared utilities for taviblockd
//!
//! This crate provides:
//! - ID types (SessionId, ClientId)
//! - Clock abstraction (wall clock injected as a dependency, monotonic
//!   instants for cadence and throttling)
//! - Rate limiting helpers
//! - Default paths for the socket, data directory, and hosts file

mod ids;
mod paths;
mod rate_limit;
mod time;

pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
