use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of a single triage operation. All of them are reported to the
/// user as a notice; none of them end the session.
#[derive(Debug, Error)]
pub enum SortError {
    #[error("No action to undo.")]
    NothingToUndo,

    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("File already in {0}.")]
    AlreadyAtDestination(String),

    #[error("Could not move {}: {source}", path.display())]
    MoveIoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to restore {}: {source}", path.display())]
    UndoIoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unrecognized extension filter '{0}'")]
    InvalidFilterPredicate(String),

    #[error("No image to move.")]
    NoSelection,

    #[error("Destination folder {0} is not configured yet.")]
    DestinationNotConfigured(usize),

    #[error("There is no destination folder {0} (use 1-5).")]
    UnknownSlot(usize),

    #[error("Cannot record {}: the path is not valid UTF-8.", .0.display())]
    UnsupportedPath(PathBuf),

    #[error("No log to export.")]
    NothingToExport,

    #[error("Failed to write log: {0}")]
    ExportFailed(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config directory found")]
    NoConfigDir,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("History file is not valid JSON: {0}")]
    History(#[from] serde_json::Error),

    #[error("Settings file is invalid or incomplete (missing '{0}')")]
    InvalidSettings(String),
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ConfigError::Io { path: path.into(), source }
    }
}
