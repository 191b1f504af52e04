//! Error types and error handling strategy for streamsched.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Transient OS conditions (`EINTR`, `EBADF`) never reach this type; the
//!   multiplexer retries them internally
//! - Task logic failures are not errors at all: a task reports them by
//!   returning [`Step::Finish`](crate::Step::Finish)
//! - Errors are classified by recoverability so steady-state callers know
//!   whether to retry on the next event
//!
//! # Error Categories
//!
//! - **Resources**: thread spawn failure, unique-id exhaustion
//! - **I/O**: OS errors surfaced by the multiplexer or socket setup
//! - **Lifecycle**: operations on a scheduler that has shut down, or on an
//!   event context that has no descriptor
//! - **Configuration**: invalid builder, env, or file settings

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Resources ===
    /// A worker or event thread could not be spawned.
    ThreadSpawn,
    /// No unique context id is free.
    IdSpaceExhausted,

    // === I/O ===
    /// An OS-level I/O error.
    Io,

    // === Lifecycle ===
    /// The scheduler has been shut down.
    ShutDown,
    /// The operation needs a bound descriptor.
    NotBound,
    /// The component is already running.
    AlreadyStarted,

    // === Configuration ===
    /// Configuration is invalid.
    InvalidConfig,
}

impl ErrorKind {
    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::IdSpaceExhausted | Self::Io => Recoverability::Transient,
            Self::ThreadSpawn
            | Self::ShutDown
            | Self::NotBound
            | Self::AlreadyStarted
            | Self::InvalidConfig => Recoverability::Permanent,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }

    const fn describe(self) -> &'static str {
        match self {
            Self::ThreadSpawn => "failed to spawn thread",
            Self::IdSpaceExhausted => "context id space exhausted",
            Self::Io => "I/O error",
            Self::ShutDown => "scheduler shut down",
            Self::NotBound => "event context has no descriptor",
            Self::AlreadyStarted => "already started",
            Self::InvalidConfig => "invalid configuration",
        }
    }
}

/// Classification of error recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
}

/// The main error type for streamsched operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates a thread spawn error.
    #[must_use]
    pub fn thread_spawn(name: &str, source: std::io::Error) -> Self {
        Self::new(ErrorKind::ThreadSpawn)
            .with_message(format!("thread {name}"))
            .with_source(source)
    }

    /// Creates an id exhaustion error.
    #[must_use]
    pub fn id_space_exhausted(live: usize) -> Self {
        Self::new(ErrorKind::IdSpaceExhausted)
            .with_message(format!("{live} contexts registered"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.describe())?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io).with_source(err)
    }
}

impl From<BuildError> for Error {
    fn from(err: BuildError) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_source(err)
    }
}

/// A specialized Result type for streamsched operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Configuration validation failures from the builder, env overrides, or a
/// config file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A field value failed validation.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// The field that failed validation.
        field: &'static str,
        /// Why the value is invalid.
        reason: String,
    },

    /// A custom validation error with arbitrary message.
    #[error("{message}")]
    Custom {
        /// The error message.
        message: String,
    },
}

impl BuildError {
    /// Creates an `InvalidValue` error.
    #[must_use]
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Creates a `Custom` error.
    #[must_use]
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}
