//! Control channel abstractions for coordinator and worker messaging.
//!
//! The coordination protocol depends only on the [`ControlChannel`] contract: an
//! append-only, partition-ordered broadcast log. The transport's delivery mechanics,
//! retries and backoff live behind this seam.

mod base;
pub mod memory;

pub use base::*;
