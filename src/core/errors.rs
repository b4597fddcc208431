//! BKR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, BankerError>;

/// Top-level error type for the banker simulator.
///
/// An unsafe request is not an error (the caller blocks), and a detected
/// deadlock is reported as a run outcome rather than through this type.
#[derive(Debug, Error)]
pub enum BankerError {
    #[error("[BKR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[BKR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[BKR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[BKR-2001] unknown task index {index} (ledger has {count} tasks)")]
    UnknownTask { index: usize, count: usize },

    #[error("[BKR-2002] unknown resource {resource} (ledger has {count} resource kinds)")]
    UnknownResource { resource: String, count: usize },

    #[error(
        "[BKR-2003] {task} requested {requested} unit(s) of {resource} but may claim at most {remaining}"
    )]
    ClaimExceeded {
        task: String,
        resource: String,
        requested: u32,
        remaining: u32,
    },

    #[error("[BKR-2004] ledger invariant violation: {details}")]
    InvariantViolation { details: String },

    #[error("[BKR-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[BKR-3002] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[BKR-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[BKR-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl BankerError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "BKR-1001",
            Self::MissingConfig { .. } => "BKR-1002",
            Self::ConfigParse { .. } => "BKR-1003",
            Self::UnknownTask { .. } => "BKR-2001",
            Self::UnknownResource { .. } => "BKR-2002",
            Self::ClaimExceeded { .. } => "BKR-2003",
            Self::InvariantViolation { .. } => "BKR-2004",
            Self::Io { .. } => "BKR-3001",
            Self::Serialization { .. } => "BKR-3002",
            Self::ChannelClosed { .. } => "BKR-3003",
            Self::Runtime { .. } => "BKR-3900",
        }
    }

    /// Whether the error reveals a bug in the caller of the protocol.
    ///
    /// The ledger state is left untouched when these are returned, but the
    /// run that produced them must not continue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownTask { .. }
                | Self::UnknownResource { .. }
                | Self::ClaimExceeded { .. }
                | Self::InvariantViolation { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn invariant(details: impl Into<String>) -> Self {
        Self::InvariantViolation {
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for BankerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for BankerError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
