use std::time::Duration;

/// What a session does once a watch cycle ends with no URL left to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    /// Tear the session down after one full watch cycle.
    RunOnce,
    /// Pull the next source from the pool and keep watching until shutdown.
    #[default]
    RunForever,
}

/// Time-shift strategy applied to a freshly acquired playlist URL.
///
/// At most one strategy is ever active per configuration; the enum encodes
/// that directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeShift {
    /// Watch at the live edge.
    #[default]
    Live,
    /// Shift playback back by a random 1..=N seconds via an `offset`
    /// query parameter.
    Offset(u64),
    /// Watch a `start`/`end` window anchored at a random point inside the
    /// last N seconds.
    Window(u64),
}

/// Per-session behavior knobs. Immutable once the session is built.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Byte-rate ceiling applied while reading response bodies.
    /// Zero disables throttling.
    pub rate_limit_bytes_per_sec: u64,

    pub repeat: RepeatMode,

    pub time_shift: TimeShift,

    /// Simulated-playback seconds after which the viewer abandons the
    /// current stream and picks a new one. Zero keeps the viewer on the
    /// stream until it ends.
    pub stop_after_secs: u64,

    /// Pause before retrying a failed cycle.
    pub retry_pause: Duration,

    /// Pause before re-polling a live playlist that produced nothing new.
    pub idle_poll_pause: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rate_limit_bytes_per_sec: 0,
            repeat: RepeatMode::default(),
            time_shift: TimeShift::default(),
            stop_after_secs: 0,
            retry_pause: Duration::from_secs(1),
            idle_poll_pause: Duration::from_millis(200),
        }
    }
}
