use thiserror::Error;

use crate::model::Timeframe;

/// Failures raised by a [`crate::source::DataSource`].
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("source has no data for the requested pair")]
    NotFound,

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl SourceError {
    /// `true` when the failure says nothing about the data itself and should
    /// count against connection health.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// A rendering-surface mutation was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("series handle {0} is no longer attached")]
    StaleHandle(u64),

    #[error("surface is not ready")]
    NotReady,

    #[error("surface rejected mutation: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(#[source] SourceError),

    #[error("no data available for {symbol} {timeframe}")]
    DataUnavailable { symbol: String, timeframe: Timeframe },

    #[error("rendering surface is not ready yet")]
    NotReady,

    #[error("no symbol/timeframe is bound")]
    NotBound,

    #[error("rendering surface is inconsistent: {0}")]
    SurfaceInconsistent(#[from] SurfaceError),
}

impl SyncError {
    /// Callers should retry shortly rather than show the error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady | Self::Transport(_))
    }
}
