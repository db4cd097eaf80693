//! Playlist parsing and stream URL helpers.
//!
//! Wraps `m3u8-rs` into the minimal manifest model the session engine
//! drives on: a master document is a list of variant references, a media
//! document is a list of timed segments plus the end-of-stream flag.

use chrono::{DateTime, TimeDelta, Utc};
use rand::RngExt;
use url::Url;

use crate::config::TimeShift;
use crate::error::EngineError;

/// Query parameters that mark a URL as already time-shifted.
const TIME_SHIFT_PARAMS: [&str; 3] = ["offset", "start", "end"];

/// Timestamp format for `start`/`end` window parameters.
const WINDOW_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A segment reference as listed in a media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// Reference as written in the manifest, usually relative.
    pub uri: String,
    /// Nominal playback duration in milliseconds, -1 when unknown.
    pub duration_ms: i64,
}

/// A resolved, downloadable segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Absolute URL.
    pub url: String,
    /// Nominal playback duration in milliseconds, -1 when unknown.
    pub duration_ms: i64,
}

/// A parsed streaming manifest.
#[derive(Debug, Clone)]
pub enum Manifest {
    /// Alternative renditions, in document order.
    Master(Vec<String>),
    /// Timed segments. `closed` means no further content will ever be
    /// appended (finished/VOD); open manifests must be re-polled.
    Media {
        segments: Vec<SegmentRef>,
        closed: bool,
    },
}

/// Parse a manifest body.
pub fn parse_manifest(body: &[u8]) -> Result<Manifest, EngineError> {
    match m3u8_rs::parse_playlist_res(body) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => Ok(Manifest::Master(
            master.variants.into_iter().map(|v| v.uri).collect(),
        )),
        Ok(m3u8_rs::Playlist::MediaPlaylist(media)) => {
            let segments = media
                .segments
                .into_iter()
                .map(|segment| SegmentRef {
                    duration_ms: if segment.duration > 0.0 {
                        (f64::from(segment.duration) * 1000.0) as i64
                    } else {
                        -1
                    },
                    uri: segment.uri,
                })
                .collect();
            Ok(Manifest::Media {
                segments,
                closed: media.end_list,
            })
        }
        Err(e) => Err(EngineError::ManifestDecode(format!(
            "failed to parse playlist: {e}"
        ))),
    }
}

/// Recognizes segmented-manifest addresses by their path extension.
pub fn is_playlist_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().ends_with(".m3u8"),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .is_some_and(|path| path.ends_with(".m3u8")),
    }
}

/// Resolve a manifest-carried reference against the URL the document was
/// fetched from. Relative references replace the final path segment; the
/// base's query string never carries over into the result.
pub fn resolve_reference(base: &str, reference: &str) -> Result<String, EngineError> {
    let base = Url::parse(base).map_err(|e| EngineError::Url(format!("{base}: {e}")))?;
    let resolved = base
        .join(reference)
        .map_err(|e| EngineError::Url(format!("{reference}: {e}")))?;
    Ok(resolved.to_string())
}

/// Append the configured time-shift parameters to a freshly acquired
/// playlist URL. URLs that already carry a recognized time-shift parameter
/// pass through untouched.
pub fn apply_time_shift(url: &str, shift: TimeShift) -> Result<String, EngineError> {
    apply_time_shift_at(url, shift, Utc::now())
}

/// Clock-injected worker behind [`apply_time_shift`].
fn apply_time_shift_at(
    url: &str,
    shift: TimeShift,
    now: DateTime<Utc>,
) -> Result<String, EngineError> {
    if matches!(shift, TimeShift::Live) {
        return Ok(url.to_owned());
    }
    let mut parsed = Url::parse(url).map_err(|e| EngineError::Url(format!("{url}: {e}")))?;
    if parsed
        .query_pairs()
        .any(|(name, _)| TIME_SHIFT_PARAMS.contains(&name.as_ref()))
    {
        return Ok(url.to_owned());
    }

    match shift {
        TimeShift::Live => unreachable!("handled above"),
        TimeShift::Offset(max_secs) => {
            let offset = rand::rng().random_range(1..=max_secs.max(1));
            parsed
                .query_pairs_mut()
                .append_pair("offset", &offset.to_string());
        }
        TimeShift::Window(window_secs) => {
            let back = rand::rng().random_range(0..=window_secs) as i64;
            let start = now - TimeDelta::seconds(back);
            let end = (start + TimeDelta::minutes(15)).min(now);
            parsed
                .query_pairs_mut()
                .append_pair("start", &start.format(WINDOW_TIME_FORMAT).to_string())
                .append_pair("end", &end.format(WINDOW_TIME_FORMAT).to_string());
        }
    }
    Ok(parsed.to_string())
}
