use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Spawns upload work, optionally bounded, and keeps track of what is running.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    semaphore: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
}

impl UploadQueue {
    /// `max_concurrency == 0` means unbounded.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: (max_concurrency > 0).then(|| Arc::new(Semaphore::new(max_concurrency))),
            tracker: TaskTracker::new(),
        }
    }

    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        self.tracker.spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        tracing::warn!("upload queue closed; dropping task");
                        return;
                    }
                },
                None => None,
            };
            fut.await;
        });
    }

    /// Number of spawned tasks that have not finished.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every task spawned so far, including follow-up work, finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn limit_bounds_concurrent_tasks() {
        let queue = UploadQueue::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            queue.spawn(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        queue.wait_idle().await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.running(), 0);
    }

    #[tokio::test]
    async fn zero_means_unbounded() {
        let queue = UploadQueue::new(0);
        let started = Arc::new(tokio::sync::Barrier::new(4));
        for _ in 0..3 {
            let started = Arc::clone(&started);
            queue.spawn(async move {
                started.wait().await;
            });
        }
        // Only completes if all three tasks run at the same time.
        started.wait().await;
        queue.wait_idle().await;
    }
}
