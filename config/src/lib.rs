//! Shared configuration types for the table sink connector.
//!
//! The structs in this crate are deserialized from the deployment environment and
//! validated before a connector is started. They are kept free of runtime concerns
//! so that every workspace member can depend on them.

pub mod shared;
