#![cfg(feature = "test-utils")]

mod agent_test;
mod connector_test;
mod coordinator_test;
