use thiserror::Error;

/// Errors raised when validating connector configuration.
///
/// Validation happens once, before any worker is started, so every variant points at a
/// value the operator has to fix rather than a runtime condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("the table identifier must not be empty")]
    MissingTable,
    #[error("the table identifier '{0}' contains an empty segment")]
    MalformedTable(String),
    #[error("at least one source topic must be configured")]
    MissingTopics,
    #[error("the control channel name must not be empty")]
    MissingControlChannel,
    #[error("the control group id must not be empty")]
    MissingControlGroup,
    #[error("the control channel needs at least one partition")]
    NoControlPartitions,
    #[error("the commit interval must be greater than zero")]
    ZeroCommitInterval,
    #[error("the commit timeout must be greater than zero")]
    ZeroCommitTimeout,
}
