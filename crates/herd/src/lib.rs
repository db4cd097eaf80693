//! # herd-engine
//!
//! Virtual-viewer session engine for load-testing HTTP streaming origins
//! and CDNs. Simulates fleets of viewers that fetch playlists, follow
//! master/variant and redirect indirections, pace segment downloads at
//! playback cadence, and feed one process-wide statistics registry.
//!
//! ## Components
//!
//! - Per-viewer session state machine (playlists and progressive files)
//! - Per-session byte-rate throttling
//! - Process-wide download admission gate
//! - Round-robin stream source dispatch
//! - Lock-free statistics registry for the status exporter

pub mod config;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod playlist;
pub mod session;
pub mod source;
pub mod stats;
pub mod transport;

pub use config::{RepeatMode, SessionConfig, TimeShift};
pub use error::EngineError;
pub use gate::{AdmissionGate, DownloadGate, GatePermit, OpenGate};
pub use limiter::RateLimiter;
pub use session::Session;
pub use source::SourceDispatcher;
pub use stats::{OutcomeClass, StatsRegistry, StatsSnapshot};
pub use transport::{
    FetchResponse, HttpTransport, Transport, TransportConfig, TransportError, TransportErrorKind,
};
