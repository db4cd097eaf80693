//! Admission control for concurrent downloads.
//!
//! All sessions funnel their segment and file downloads through one gate,
//! bounding how many requests are in flight process-wide no matter how many
//! viewers are simulated.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Held while a guarded download is in flight. Admission returns to the
/// gate when the permit drops.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Bounds how many downloads may run concurrently across all sessions.
#[async_trait]
pub trait AdmissionGate: Send + Sync {
    /// Wait until the gate has capacity for one more download.
    async fn admit(&self) -> GatePermit;
}

/// Production gate: a counting semaphore with fixed capacity.
#[derive(Debug)]
pub struct DownloadGate {
    slots: Arc<Semaphore>,
}

impl DownloadGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[async_trait]
impl AdmissionGate for DownloadGate {
    async fn admit(&self) -> GatePermit {
        // The gate owns the semaphore and never closes it.
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .expect("gate semaphore closed");
        GatePermit {
            _permit: Some(permit),
        }
    }
}

/// Gate that admits everything immediately.
#[derive(Debug, Default)]
pub struct OpenGate;

#[async_trait]
impl AdmissionGate for OpenGate {
    async fn admit(&self) -> GatePermit {
        GatePermit { _permit: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_admits_more_than_capacity() {
        let gate = Arc::new(DownloadGate::new(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..24 {
            let gate = Arc::clone(&gate);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let permit = gate.admit().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.available(), 3);
    }

    #[tokio::test]
    async fn permit_drop_releases_slot() {
        let gate = DownloadGate::new(1);
        let permit = gate.admit().await;
        assert_eq!(gate.available(), 0);
        drop(permit);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn open_gate_is_unbounded() {
        let gate = OpenGate;
        let _a = gate.admit().await;
        let _b = gate.admit().await;
        let _c = gate.admit().await;
    }
}
