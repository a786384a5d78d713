// =============================================================================
// tracker.rs - WHO STILL OWES US A SHUTDOWN
// =============================================================================
//
// Every ticker that is successfully added takes out one unit of work. The
// unit is handed back when that ticker's loop exits, however it exits. The
// caller can then wait for the count to reach zero before tearing down.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Counts outstanding scheduling loops.
#[derive(Debug, Clone)]
pub struct WorkTracker {
    outstanding: Arc<watch::Sender<usize>>,
}

/// One unit of outstanding work. Dropping it releases the unit.
#[derive(Debug)]
pub struct WorkUnit {
    outstanding: Arc<watch::Sender<usize>>,
}

impl WorkTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0usize);
        Self {
            outstanding: Arc::new(tx),
        }
    }

    /// Take out a unit of work.
    pub fn begin(&self) -> WorkUnit {
        self.outstanding.send_modify(|n| *n += 1);
        WorkUnit {
            outstanding: Arc::clone(&self.outstanding),
        }
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Wait until every unit has been released.
    pub async fn wait(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender lives in `self`, so the channel can't close under us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Like [`WorkTracker::wait`], but gives up after `timeout`. Returns
    /// whether everything drained in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for WorkTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkUnit {
    fn drop(&mut self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_idle() {
        let tracker = WorkTracker::new();
        assert!(tracker.wait_timeout(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_wait_blocks_until_units_released() {
        let tracker = WorkTracker::new();
        let first = tracker.begin();
        let second = tracker.begin();
        assert_eq!(tracker.outstanding(), 2);

        drop(first);
        assert!(!tracker.wait_timeout(Duration::from_millis(30)).await);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(second);
        });
        assert!(tracker.wait_timeout(Duration::from_secs(2)).await);
        assert_eq!(tracker.outstanding(), 0);
        handle.await.unwrap();
    }
}
