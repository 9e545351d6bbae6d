//! Tracing setup shared by binaries and tests.

pub mod tracing;
