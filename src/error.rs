use std::path::PathBuf;

use thiserror::Error;

/// Every way an update run can go wrong.
///
/// Nothing here ever escapes [`crate::update::run`]: the orchestrator folds each
/// variant into an [`crate::update::Outcome`].
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("not connected to the network, cannot reach {host}")]
    NetworkUnavailable { host: String },

    #[error("cannot reach the backend for updates at {url}: {reason}")]
    BackendUnreachable { url: String, reason: String },

    #[error("release endpoint returned an unparseable descriptor")]
    MalformedResponse {
        #[source]
        source: serde_json::Error,
    },

    #[error("'{version}' is not a valid semantic version")]
    InvalidVersion { version: String },

    #[error("download from {url} did not complete: {reason}")]
    DownloadIncomplete { url: String, reason: String },

    #[error("failed to extract {}", .path.display())]
    ExtractionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to relocate update files at {}", .path.display())]
    Relocation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid release endpoint '{url}'")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid asset pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Whether the failure means the release backend could not be talked to at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable { .. } | Self::BackendUnreachable { .. }
        )
    }
}

pub type Result<T, E = UpdateError> = std::result::Result<T, E>;
