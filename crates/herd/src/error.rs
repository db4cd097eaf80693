use reqwest::StatusCode;

use crate::stats::OutcomeClass;
use crate::transport::{TransportError, TransportErrorKind};

/// Errors surfaced by the session engine.
///
/// Everything except [`EngineError::SourceExhausted`] and
/// [`EngineError::Cancelled`] is recoverable: the session logs it, pauses
/// briefly and retries the state it was in.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("server returned status code {0}")]
    HttpStatus(StatusCode),

    #[error("manifest decode error: {0}")]
    ManifestDecode(String),

    #[error("redirect without usable Location: {0}")]
    RedirectResolution(String),

    #[error("invalid URL: {0}")]
    Url(String),

    #[error("no sources available")]
    SourceExhausted,

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Outcome class a failed download attempt is filed under in the
    /// latency table.
    pub fn outcome_class(&self) -> OutcomeClass {
        match self {
            EngineError::Transport(e) => match e.kind {
                TransportErrorKind::Timeout => OutcomeClass::Timeout,
                TransportErrorKind::PoolExhausted => OutcomeClass::ConnLimit,
                TransportErrorKind::ConnectionClosed => OutcomeClass::ConnClosed,
                TransportErrorKind::Other => OutcomeClass::Unknown,
            },
            EngineError::HttpStatus(_) => OutcomeClass::HttpStatus,
            _ => OutcomeClass::Unknown,
        }
    }
}
