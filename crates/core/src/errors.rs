//! Error types and handling
//!
//! Domain-specific error types for the clawker core. Engine, configuration
//! and loop errors are separate enums aggregated into [`ClawkerError`] so
//! callers can match on the area that failed without string inspection.

use thiserror::Error;

/// Top-level error for clawker core operations
#[derive(Error, Debug)]
pub enum ClawkerError {
    /// The operation was cancelled through its cancellation handle
    #[error("operation cancelled")]
    Cancelled,

    /// Container engine errors
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Ralph loop errors
    #[error(transparent)]
    Loop(#[from] LoopError),

    /// Filesystem and other I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the engine layer
#[derive(Error, Debug)]
pub enum EngineError {
    /// The daemon could not be reached
    #[error("container engine unavailable: {message} (is the daemon running?)")]
    Unavailable { message: String },

    /// A managed resource lookup came up empty
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// A create collided with an existing resource
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    /// The container is not in the running state required by the operation
    #[error("container not running: {name}")]
    NotRunning { name: String },

    /// An image reference could not be resolved or built
    #[error("image unavailable: {reference}: {message}")]
    ImageUnavailable { reference: String, message: String },

    /// Dockerfile rendering or the engine-side build failed
    #[error("image build failed: {message}")]
    BuildFailed { message: String },

    /// Opening the hijacked attach stream failed
    #[error("attach failed: {message}")]
    AttachFailed { message: String },

    /// Any other engine API failure
    #[error("engine error: {message}")]
    Api { message: String },
}

impl EngineError {
    /// Map a raw bollard error onto the engine taxonomy.
    ///
    /// `kind` and `name` describe the resource the caller was addressing and
    /// are used for 404/409 responses, which carry no useful body.
    pub fn from_bollard(err: bollard::errors::Error, kind: &'static str, name: &str) -> Self {
        use bollard::errors::Error as B;
        match err {
            B::DockerResponseServerError {
                status_code: 404, ..
            } => EngineError::NotFound {
                kind,
                name: name.to_string(),
            },
            B::DockerResponseServerError {
                status_code: 409,
                message,
            } => {
                if message.contains("is not running") {
                    EngineError::NotRunning {
                        name: name.to_string(),
                    }
                } else {
                    EngineError::AlreadyExists {
                        kind,
                        name: name.to_string(),
                    }
                }
            }
            B::IOError { .. } | B::RequestTimeoutError => EngineError::Unavailable {
                message: err.to_string(),
            },
            other => EngineError::Api {
                message: other.to_string(),
            },
        }
    }
}

/// Errors produced while loading or validating a project configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A field failed validation; `field` is the dotted path into the document
    #[error("invalid configuration: {field}: {message}")]
    Invalid { field: String, message: String },

    /// The configuration file was not found
    #[error("configuration file not found: {path}")]
    NotFound { path: String },

    /// The configuration file could not be parsed
    #[error("failed to parse configuration: {message}")]
    Parse { message: String },

    /// The configuration file could not be read
    #[error("failed to read configuration: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Errors produced by the Ralph loop engine
#[derive(Error, Debug)]
pub enum LoopError {
    /// A single agent invocation exceeded its per-loop timeout
    #[error("agent invocation timed out after {minutes} minutes (loop {loop_count})")]
    AgentTimeout { loop_count: u32, minutes: u64 },

    /// The circuit breaker refuses further invocations
    #[error("circuit breaker tripped: {reason}")]
    CircuitTripped { reason: String },

    /// Session or circuit state on disk could not be decoded
    #[error("failed to parse persisted loop state: {message}")]
    Parse { message: String },
}

/// Convenience type alias for Results with ClawkerError
pub type Result<T> = std::result::Result<T, ClawkerError>;
