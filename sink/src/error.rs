//! Error types and result definitions for sink operations.
//!
//! Provides a kind-classified error system with captured diagnostic metadata for the
//! commit coordination protocol. The [`SinkError`] type supports single errors, errors
//! with additional detail, and multiple aggregated errors for joined worker failures.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for sink operations using [`SinkError`] as the error type.
pub type SinkResult<T> = Result<T, SinkError>;

/// Detailed payload stored for single [`SinkError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for sink operations.
///
/// [`SinkError`] can represent a single classified error or multiple aggregated errors.
/// Aggregation is used when joining several workers, so that no failure is lost when
/// more than one worker goes down at the same time.
#[derive(Debug, Clone)]
pub struct SinkError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, mainly from joined workers.
    Many {
        errors: Vec<SinkError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur during sink operations.
///
/// Error kinds are what callers dispatch on: the coordinator decides retry-next-cycle
/// versus fatal by inspecting the kind of a failed table commit, and the channel
/// adapter decides skip-and-log by matching on [`ErrorKind::MalformedEnvelope`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Envelope & codec errors
    MalformedEnvelope,
    SerializationError,

    // Control channel errors
    ChannelIo,

    // Storage commit errors
    CommitConflict,
    StorageIo,

    // Configuration & state errors
    ConfigError,
    InvalidState,

    // Worker lifecycle errors
    CoordinatorPanic,
    CoordinatorCancelled,
    AgentPanic,
    AgentCancelled,

    // Unknown / Uncategorized
    Unknown,
}

impl SinkError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    ///
    /// For single errors, returns a vector with one element. For multiple errors,
    /// returns a flattened vector of all error kinds.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified
    /// instance.
    ///
    /// Has no effect when called on aggregated errors because aggregates forward the
    /// first contained error as their source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Creates a [`SinkError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        SinkError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl From<(ErrorKind, &'static str)> for SinkError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> Self {
        SinkError::from_components(kind, Cow::Borrowed(description), None)
    }
}

impl From<(ErrorKind, String)> for SinkError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, String)) -> Self {
        SinkError::from_components(kind, Cow::Owned(description), None)
    }
}

impl From<(ErrorKind, &'static str, String)> for SinkError {
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> Self {
        SinkError::from_components(kind, Cow::Borrowed(description), Some(Cow::Owned(detail)))
    }
}

impl From<Vec<SinkError>> for SinkError {
    #[track_caller]
    fn from(errors: Vec<SinkError>) -> Self {
        SinkError {
            repr: ErrorRepr::Many {
                errors,
                location: Location::caller(),
            },
        }
    }
}

impl PartialEq for SinkError {
    /// Compares errors by their stable identifying components only.
    fn eq(&self, other: &SinkError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  detail: {detail}")?;
                }
                if payload.backtrace.status() == BacktraceStatus::Captured {
                    write!(f, "\n  backtrace:\n{}", payload.backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    for (line_index, line) in rendered.lines().enumerate() {
                        if line_index == 0 {
                            write!(f, "\n  {}. {}", index + 1, line)?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for SinkError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            // For aggregated errors, we forward the first contained error as the source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}
