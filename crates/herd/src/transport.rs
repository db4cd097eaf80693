//! HTTP transport abstraction.
//!
//! Sessions never talk to reqwest directly; they go through the
//! [`Transport`] trait so tests can substitute canned responses. The
//! production transport keeps redirect-following OFF: a 3xx is a
//! first-class state transition for the session engine, not something the
//! client library should swallow.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, StatusCode};

const DEFAULT_USER_AGENT: &str = concat!("herd/", env!("CARGO_PKG_VERSION"));

/// Classification a transport attaches to its failures. An explicit enum,
/// so callers never have to inspect error internals to file a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    PoolExhausted,
    ConnectionClosed,
    Other,
}

/// A transport-level failure with its classification.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::ConnectionClosed
        } else {
            TransportErrorKind::Other
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Body bytes as they arrive off the wire.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// One HTTP exchange as the engine sees it.
pub struct FetchResponse {
    pub status: StatusCode,
    /// `Location` header, present on redirects.
    pub location: Option<String>,
    pub body: BodyStream,
}

impl FetchResponse {
    /// Drain the body into memory. Used for manifests, which are small.
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        let mut body = self.body;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

/// Issues HTTP GETs for sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url`. Redirects are not followed; the response carries whatever
    /// status the server produced.
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError>;
}

/// Connection knobs for the production transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Overall per-request ceiling. Zero disables it, leaving the read
    /// timeout as the effective bound (rate-limited bodies can legitimately
    /// take minutes).
    pub request_timeout: Duration,

    /// Time to establish the initial connection.
    pub connect_timeout: Duration,

    /// Maximum time between received body chunks.
    pub read_timeout: Duration,

    pub pool_max_idle_per_host: usize,

    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 5,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Production transport over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none());

        if !config.request_timeout.is_zero() {
            builder = builder.timeout(config.request_timeout);
        }
        if !config.connect_timeout.is_zero() {
            builder = builder.connect_timeout(config.connect_timeout);
        }
        if !config.read_timeout.is_zero() {
            builder = builder.read_timeout(config.read_timeout);
        }

        let client = builder.build().map_err(TransportError::from)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed();

        Ok(FetchResponse {
            status,
            location,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn bytes_concatenates_chunks() {
        let response = FetchResponse {
            status: StatusCode::OK,
            location: None,
            body: stream::iter(vec![
                Ok(Bytes::from_static(b"#EXTM3U\n")),
                Ok(Bytes::from_static(b"#EXT-X-ENDLIST\n")),
            ])
            .boxed(),
        };
        let body = response.bytes().await.unwrap();
        assert_eq!(&body[..], b"#EXTM3U\n#EXT-X-ENDLIST\n");
    }

    #[tokio::test]
    async fn bytes_propagates_stream_errors() {
        let response = FetchResponse {
            status: StatusCode::OK,
            location: None,
            body: stream::iter(vec![
                Ok(Bytes::from_static(b"data")),
                Err(TransportError::new(
                    TransportErrorKind::ConnectionClosed,
                    "peer went away",
                )),
            ])
            .boxed(),
        };
        let err = response.bytes().await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::ConnectionClosed);
    }

    #[test]
    fn transport_builds_with_defaults() {
        let transport = HttpTransport::new(&TransportConfig::default());
        assert!(transport.is_ok());
    }
}
