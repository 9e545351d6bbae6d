//! Storage commit abstractions for the target table.
//!
//! The coordination layer hands merged data-file lists to a [`TableCommitter`] and
//! relies on it being atomic. Everything else about the storage engine lives behind
//! this seam.

mod base;
pub mod memory;

pub use base::*;
