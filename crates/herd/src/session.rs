//! The virtual-viewer session state machine.
//!
//! Each session simulates one viewer: pull a stream URL from the pool,
//! fetch and re-fetch its playlist, download segments at playback cadence,
//! then loop or terminate. Sessions run as independent tasks and share
//! only the admission gate and the stats registry.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{RepeatMode, SessionConfig};
use crate::error::EngineError;
use crate::gate::AdmissionGate;
use crate::limiter::RateLimiter;
use crate::playlist::{self, Manifest, Segment, SegmentRef};
use crate::source::SourceDispatcher;
use crate::stats::StatsRegistry;
use crate::transport::{FetchResponse, Transport};

/// Releases a session's online-counter contribution when dropped, so the
/// decrement happens on every exit path, cancellation included.
struct OnlineGuard {
    stats: Arc<StatsRegistry>,
}

impl OnlineGuard {
    fn enter(stats: &Arc<StatsRegistry>) -> Self {
        stats.adjust_online(1);
        Self {
            stats: Arc::clone(stats),
        }
    }
}

impl Drop for OnlineGuard {
    fn drop(&mut self) {
        self.stats.adjust_online(-1);
    }
}

/// How a plain-file transfer ended.
enum FileTransfer {
    /// 3xx observed; the session URL was rewritten, nothing downloaded.
    Redirected,
    /// Body read to completion; byte count.
    Complete(u64),
}

/// One simulated viewer.
pub struct Session {
    id: String,
    config: SessionConfig,
    current_url: String,
    /// Dedup high-water mark: the last segment URL handed to the download
    /// loop. Survives playlist re-polls and redirects.
    last_segment_url: String,
    /// Simulated playback accumulated since the current source was acquired.
    played_ms: i64,
    limiter: RateLimiter,
    transport: Arc<dyn Transport>,
    gate: Arc<dyn AdmissionGate>,
    dispatcher: Arc<SourceDispatcher>,
    stats: Arc<StatsRegistry>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        gate: Arc<dyn AdmissionGate>,
        dispatcher: Arc<SourceDispatcher>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_bytes_per_sec);
        Self {
            id: id.into(),
            config,
            current_url: String::new(),
            last_segment_url: String::new(),
            played_ms: 0,
            limiter,
            transport,
            gate,
            dispatcher,
            stats,
        }
    }

    /// Drive the session until it terminates or `cancel` fires.
    ///
    /// Errors never escape: anything recoverable is logged and retried
    /// after a pause. The session only ends on cancellation, source-pool
    /// exhaustion, or a completed cycle in run-once mode.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(id = %self.id, "session started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if self.current_url.is_empty() {
                match self.acquire_source() {
                    Ok(()) => {}
                    Err(EngineError::SourceExhausted) => {
                        error!(id = %self.id, "source pool exhausted, session over");
                        break;
                    }
                    Err(e) => {
                        warn!(id = %self.id, error = %e, "source not usable, retrying");
                        if Self::pause(&cancel, self.config.retry_pause).await.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }
            match self.cycle(&cancel).await {
                Ok(()) => {
                    if self.current_url.is_empty() && self.config.repeat == RepeatMode::RunOnce {
                        info!(id = %self.id, "watch cycle complete");
                        break;
                    }
                }
                Err(EngineError::Cancelled) => break,
                Err(e) => {
                    warn!(id = %self.id, url = %self.current_url, error = %e, "cycle failed, retrying");
                    if Self::pause(&cancel, self.config.retry_pause).await.is_err() {
                        break;
                    }
                }
            }
        }
        info!(id = %self.id, "session stopped");
    }

    /// Pull the next URL from the pool and time-shift it when configured.
    fn acquire_source(&mut self) -> Result<(), EngineError> {
        let url = self.dispatcher.next()?;
        self.current_url = if playlist::is_playlist_url(&url) {
            playlist::apply_time_shift(&url, self.config.time_shift)?
        } else {
            url
        };
        self.played_ms = 0;
        debug!(id = %self.id, url = %self.current_url, "acquired source");
        Ok(())
    }

    /// One pass of the state machine against the current URL.
    async fn cycle(&mut self, cancel: &CancellationToken) -> Result<(), EngineError> {
        if playlist::is_playlist_url(&self.current_url) {
            self.cycle_playlist(cancel).await
        } else {
            self.download_file(cancel).await
        }
    }

    async fn cycle_playlist(&mut self, cancel: &CancellationToken) -> Result<(), EngineError> {
        let response = self.fetch(&self.current_url, cancel).await?;
        if response.status.is_redirection() {
            return self.follow_redirect(response);
        }
        if response.status != StatusCode::OK {
            return Err(EngineError::HttpStatus(response.status));
        }
        let body = Self::drain(response, cancel).await?;
        match playlist::parse_manifest(&body)? {
            Manifest::Master(variants) => self.select_variant(variants),
            Manifest::Media { segments, closed } => {
                self.stream_media(segments, closed, cancel).await
            }
        }
    }

    /// 3xx: adopt the redirect target. Dedup state is left alone, the
    /// target is expected to serve the same stream.
    fn follow_redirect(&mut self, response: FetchResponse) -> Result<(), EngineError> {
        let status = response.status;
        let location = response.location.ok_or_else(|| {
            EngineError::RedirectResolution(format!(
                "{status} without Location for {}",
                self.current_url
            ))
        })?;
        self.current_url = playlist::resolve_reference(&self.current_url, &location)?;
        debug!(id = %self.id, url = %self.current_url, "redirected");
        Ok(())
    }

    /// Master playlists always resolve to their first listed variant.
    fn select_variant(&mut self, variants: Vec<String>) -> Result<(), EngineError> {
        let first = variants.into_iter().next().ok_or_else(|| {
            EngineError::ManifestDecode(format!(
                "master playlist {} lists no variants",
                self.current_url
            ))
        })?;
        self.current_url = playlist::resolve_reference(&self.current_url, &first)?;
        debug!(id = %self.id, url = %self.current_url, "selected variant");
        Ok(())
    }

    /// Resolve this poll's segment list and keep only what lies past the
    /// dedup high-water mark. A repeated URL mid-scan discards the whole
    /// accumulated prefix, duplicate included; what follows it is the tail
    /// a live poll appended since last time.
    fn fresh_segments(&self, listed: Vec<SegmentRef>) -> Vec<Segment> {
        let mut fresh = Vec::with_capacity(listed.len());
        for entry in listed {
            let url = match playlist::resolve_reference(&self.current_url, &entry.uri) {
                Ok(url) => url,
                Err(e) => {
                    error!(id = %self.id, uri = %entry.uri, error = %e, "segment reference did not resolve");
                    break;
                }
            };
            if url == self.last_segment_url {
                fresh.clear();
                continue;
            }
            fresh.push(Segment {
                url,
                duration_ms: entry.duration_ms,
            });
        }
        fresh
    }

    /// Consume one poll of a media playlist: download the new segments at
    /// playback cadence, then decide whether to re-poll, hop, or finish.
    async fn stream_media(
        &mut self,
        listed: Vec<SegmentRef>,
        closed: bool,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let _online = OnlineGuard::enter(&self.stats);

        let segments = self.fresh_segments(listed);
        if segments.is_empty() {
            // Nothing new since the last poll; don't hammer the origin.
            Self::pause(cancel, self.config.idle_poll_pause).await?;
        }

        for segment in segments {
            self.last_segment_url = segment.url.clone();

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                permit = self.gate.admit() => permit,
            };
            let started = Instant::now();
            let outcome = self.download_segment(&segment.url, cancel).await;
            drop(permit);
            let elapsed_ms = started.elapsed().as_millis() as i64;

            self.stats.record_attempt();
            match outcome {
                Ok(bytes) => {
                    self.stats.record_success(elapsed_ms as u64);
                    debug!(id = %self.id, url = %segment.url, bytes, elapsed_ms, "segment downloaded");
                    if segment.duration_ms > 0 && elapsed_ms < segment.duration_ms {
                        // Consume at playback speed, not line speed.
                        let lag = Duration::from_millis((segment.duration_ms - elapsed_ms) as u64);
                        Self::pause(cancel, lag).await?;
                    }
                }
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    self.stats.record_failure(e.outcome_class(), elapsed_ms as u64);
                    warn!(id = %self.id, url = %segment.url, error = %e, "segment download failed");
                }
            }
            if segment.duration_ms > 0 {
                self.played_ms += segment.duration_ms;
            }
        }

        if self.config.stop_after_secs > 0
            && self.played_ms / 1_000 > self.config.stop_after_secs as i64
        {
            info!(id = %self.id, played_ms = self.played_ms, "viewer hopping to a new stream");
            self.current_url.clear();
            self.played_ms = 0;
            return Ok(());
        }

        if closed {
            // Finished stream; the next iteration pulls a fresh source.
            debug!(id = %self.id, url = %self.current_url, "stream finished");
            self.current_url.clear();
        }
        Ok(())
    }

    /// Gate-guarded download of one segment, streamed through the rate
    /// limiter. Returns the byte count.
    async fn download_segment(
        &mut self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, EngineError> {
        let response = self.fetch(url, cancel).await?;
        if !response.status.is_success() {
            return Err(EngineError::HttpStatus(response.status));
        }
        self.read_throttled(response, cancel).await
    }

    /// Plain progressive file: gate-guarded, rate-limited read to
    /// completion. No pacing, no online-counter contribution.
    async fn download_file(&mut self, cancel: &CancellationToken) -> Result<(), EngineError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            permit = self.gate.admit() => permit,
        };
        let started = Instant::now();
        let outcome = self.transfer_file(cancel).await;
        drop(permit);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(FileTransfer::Redirected) => Ok(()),
            Ok(FileTransfer::Complete(bytes)) => {
                self.stats.record_attempt();
                self.stats.record_success(elapsed_ms);
                info!(id = %self.id, url = %self.current_url, bytes, elapsed_ms, "file downloaded");
                self.current_url.clear();
                Ok(())
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                self.stats.record_attempt();
                self.stats.record_failure(e.outcome_class(), elapsed_ms);
                Err(e)
            }
        }
    }

    async fn transfer_file(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<FileTransfer, EngineError> {
        let response = self.fetch(&self.current_url, cancel).await?;
        if response.status.is_redirection() {
            self.follow_redirect(response)?;
            return Ok(FileTransfer::Redirected);
        }
        if !response.status.is_success() {
            return Err(EngineError::HttpStatus(response.status));
        }
        let bytes = self.read_throttled(response, cancel).await?;
        Ok(FileTransfer::Complete(bytes))
    }

    /// Read a body to completion through the rate limiter.
    async fn read_throttled(
        &mut self,
        response: FetchResponse,
        cancel: &CancellationToken,
    ) -> Result<u64, EngineError> {
        let mut body = response.body;
        let mut total = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            total += chunk.len() as u64;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = self.limiter.consume(chunk.len()) => {}
            }
        }
        Ok(total)
    }

    async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = self.transport.fetch(url) => Ok(result?),
        }
    }

    async fn drain(
        response: FetchResponse,
        cancel: &CancellationToken,
    ) -> Result<bytes::Bytes, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = response.bytes() => Ok(result?),
        }
    }

    /// Cancellable sleep.
    async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<(), EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
