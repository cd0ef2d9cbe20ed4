//! Error types for the migration library.
//!
//! [`MigrateError`] covers the fatal and kind-level failures that stop
//! progress at their scope. Record-level and batch-level failures are data
//! (see [`crate::transform::TransformFailure`] and
//! [`crate::loader::BatchFailure`]) so a single bad document or chunk never
//! aborts a run.

use thiserror::Error;

/// Exit code: completed with zero issues.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code: invalid configuration.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code: the run completed but reported issues.
pub const EXIT_COMPLETED_WITH_ISSUES: u8 = 2;
/// Exit code: source store unreachable or unreadable.
pub const EXIT_SOURCE_ERROR: u8 = 3;
/// Exit code: destination unreachable or failed outside a batch.
pub const EXIT_TARGET_ERROR: u8 = 4;
/// Exit code: intermediate artifact missing or corrupt.
pub const EXIT_ARTIFACT_ERROR: u8 = 5;
/// Exit code: run cancelled.
pub const EXIT_CANCELLED: u8 = 6;
/// Exit code: filesystem error.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source document store error
    #[error("Source error: {0}")]
    Source(String),

    /// Destination database query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Intermediate artifact is corrupt or unreadable
    #[error("Artifact error ({name}): {message}")]
    Artifact { name: String, message: String },

    /// Intermediate artifact required by a later phase does not exist
    #[error("Required artifact missing: {0} (run the earlier phase first)")]
    ArtifactMissing(String),

    /// Unknown entity kind name
    #[error("Unknown entity kind '{0}'")]
    UnknownKind(String),

    /// A transformed record could not be converted for writing
    #[error("Transform error: {0}")]
    Transform(String),

    /// Loading failed for an entity kind outside of batch handling
    #[error("Load failed for {kind}: {message}")]
    Load { kind: String, message: String },

    /// Post-load validation could not be performed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A database interaction exceeded the configured timeout
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// State file error
    #[error("State file error: {0}")]
    State(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since last run - cannot resume. Remove the state file to start fresh.")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Source error
    pub fn source(message: impl Into<String>) -> Self {
        MigrateError::Source(message.into())
    }

    /// Create an Artifact error
    pub fn artifact(name: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Artifact {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a Load error
    pub fn load(kind: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Load {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a Timeout error
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        MigrateError::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::UnknownKind(_)
            | MigrateError::ConfigChanged => EXIT_CONFIG_ERROR,
            MigrateError::Source(_) => EXIT_SOURCE_ERROR,
            MigrateError::Target(_)
            | MigrateError::Pool { .. }
            | MigrateError::Load { .. }
            | MigrateError::Validation(_)
            | MigrateError::Timeout { .. } => EXIT_TARGET_ERROR,
            MigrateError::Artifact { .. }
            | MigrateError::ArtifactMissing(_)
            | MigrateError::Transform(_)
            | MigrateError::State(_)
            | MigrateError::Json(_) => EXIT_ARTIFACT_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Run `fut` under a deadline, converting expiry into [`MigrateError::Timeout`].
pub async fn with_timeout<T, F>(
    limit: std::time::Duration,
    operation: impl Into<String>,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MigrateError::timeout(operation, limit.as_secs())),
    }
}
