//! Stream source dispatch.
//!
//! Sessions that need something to watch pull the next URL from a shared
//! pool, round-robin with wraparound.

use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use crate::error::EngineError;

/// Hands out stream URLs to sessions. Safe for concurrent callers; the
/// cursor is a single atomic, so no two sessions block each other.
#[derive(Debug)]
pub struct SourceDispatcher {
    sources: Vec<String>,
    cursor: AtomicUsize,
}

impl SourceDispatcher {
    pub fn new(sources: Vec<String>) -> Self {
        Self {
            sources,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next URL in round-robin order. Fails only when the pool is empty.
    pub fn next(&self) -> Result<String, EngineError> {
        if self.sources.is_empty() {
            return Err(EngineError::SourceExhausted);
        }
        let index = self.cursor.fetch_add(1, Relaxed) % self.sources.len();
        Ok(self.sources[index].clone())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_wraps_around() {
        let dispatcher = SourceDispatcher::new(vec![
            "http://origin/a.m3u8".to_owned(),
            "http://origin/b.m3u8".to_owned(),
            "http://origin/c.m3u8".to_owned(),
        ]);

        let picks: Vec<String> = (0..7).map(|_| dispatcher.next().unwrap()).collect();
        assert_eq!(picks[0], "http://origin/a.m3u8");
        assert_eq!(picks[1], "http://origin/b.m3u8");
        assert_eq!(picks[2], "http://origin/c.m3u8");
        assert_eq!(picks[3], "http://origin/a.m3u8");
        assert_eq!(picks[6], "http://origin/a.m3u8");
    }

    #[test]
    fn empty_pool_is_exhausted() {
        let dispatcher = SourceDispatcher::new(Vec::new());
        assert!(matches!(
            dispatcher.next(),
            Err(EngineError::SourceExhausted)
        ));
    }
}
