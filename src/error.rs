//! Custom error types and result handling for comic-squash operations.
//!
//! All fallible library operations return a [`Result<T>`], a type alias for
//! `std::result::Result<T, Error>`. Failures of a single image conversion are
//! reported separately through [`ConversionFailure`] because they never abort
//! an archive on their own; the scheduler's failure policy decides what
//! happens to the member.
//!
use std::path::PathBuf;
use std::process::ExitStatus;

/// Type alias for Results with comic-squash errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all comic-squash operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    /// The worker pool was closed while waiting for a slot
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    ConfigBuilder(#[from] crate::config::ConversionConfigBuilderError),
    /// The input root is missing or unreadable. Fatal to the whole run.
    #[error("Cannot scan '{path:?}': {reason}")]
    Discovery { path: PathBuf, reason: String },
    /// One archive is corrupt, unsupported or password protected.
    #[error("Cannot extract '{path:?}': {reason}")]
    Extraction { path: PathBuf, reason: String },
    /// The output archive could not be written.
    #[error("Cannot write '{path:?}': {reason}")]
    Write { path: PathBuf, reason: String },
    /// A member failed to convert and the failure policy fails the archive.
    #[error("Member '{member}' could not be converted: {reason}")]
    Conversion { member: String, reason: String },
    /// A required external program is not installed
    #[error("Required program not found: {0}")]
    ToolNotFound(String),
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// Error for failed asynchronous tasks
    #[error("Asynchronous task failed: {0}")]
    AsyncTaskError(String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    pub(crate) fn extraction(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn discovery(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Discovery {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of a single image transcode.
///
/// This is the one failure mode every [`Codec`](crate::codec::Codec)
/// implementation reports, whatever the source format was.
#[derive(thiserror::Error, Debug)]
pub enum ConversionFailure {
    #[error("could not start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("codec exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
    #[error("codec produced an empty file")]
    EmptyOutput,
    #[error("scratch file error: {0}")]
    Scratch(#[from] std::io::Error),
    /// The conversion task itself panicked or was aborted
    #[error("conversion task failed: {0}")]
    Task(String),
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
