pub mod channel;
pub mod concurrency;
pub mod connector;
pub mod error;
pub mod events;
mod macros;
pub mod table;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
