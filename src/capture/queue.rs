use std::{future::Future, sync::Arc};

use tokio::sync::Mutex;
use tracing::debug;

use crate::core::errors::CaptureFailure;

/// Single-slot FIFO gate in front of the camera.
///
/// Waiters are served in arrival order (tokio's mutex is fair). Once an
/// operation holds the slot it runs on its own task, so it still finishes and
/// releases the slot when the caller stops waiting for the result.
/// Operations must not enqueue further work themselves.
#[derive(Clone, Default)]
pub struct CaptureQueue {
    slot: Arc<Mutex<()>>,
}

impl CaptureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue<F, Fut, T>(&self, op: F) -> Result<T, CaptureFailure>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CaptureFailure>> + Send + 'static,
        T: Send + 'static,
    {
        let lease = self.slot.clone().lock_owned().await;
        debug!("capture slot acquired");
        let handle = tokio::spawn(async move {
            let result = op().await;
            drop(lease);
            result
        });
        match handle.await {
            Ok(result) => result,
            Err(err) => Err(CaptureFailure::Aborted(err.to_string())),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use tokio::{sync::Notify, time::sleep};

    use crate::core::errors::{CaptureError, CaptureFailure};

    use super::CaptureQueue;

    #[tokio::test]
    async fn operations_never_overlap_and_finish_in_arrival_order() {
        let queue = CaptureQueue::new();
        let spans: Arc<Mutex<Vec<(usize, Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());

        // Hold the slot so every later caller is waiting when it opens.
        let holder = {
            let queue = queue.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(move || async move {
                        gate.notified().await;
                        Ok(())
                    })
                    .await
            })
        };
        while !queue.is_busy() {
            tokio::task::yield_now().await;
        }

        let mut handles = Vec::new();
        for id in 0..5 {
            let queue = queue.clone();
            let spans = spans.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(move || async move {
                        let start = Instant::now();
                        sleep(Duration::from_millis(10)).await;
                        spans
                            .lock()
                            .expect("spans lock")
                            .push((id, start, Instant::now()));
                        Ok(())
                    })
                    .await
            }));
            sleep(Duration::from_millis(5)).await;
        }

        gate.notify_one();
        holder.await.expect("holder task").expect("holder op");
        for handle in handles {
            handle.await.expect("task").expect("op");
        }

        let spans = spans.lock().expect("spans lock").clone();
        let order: Vec<usize> = spans.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        for pair in spans.windows(2) {
            assert!(pair[0].2 <= pair[1].1, "operations overlapped");
        }
    }

    #[tokio::test]
    async fn failure_reaches_only_its_caller_and_releases_the_slot() {
        let queue = CaptureQueue::new();
        let failed: Result<(), _> = queue
            .enqueue(|| async {
                Err(CaptureFailure::TriggerFailed(CaptureError::ProtocolMismatch(
                    "boom".to_string(),
                )))
            })
            .await;
        assert!(matches!(failed, Err(CaptureFailure::TriggerFailed(_))));
        assert!(!queue.is_busy());

        let next = queue.enqueue(|| async { Ok(7) }).await.expect("next op runs");
        assert_eq!(next, 7);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cut_the_running_operation_short() {
        let queue = CaptureQueue::new();
        let finished = Arc::new(Notify::new());

        let waiter = {
            let queue = queue.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(move || async move {
                        sleep(Duration::from_millis(30)).await;
                        finished.notify_one();
                        Ok(())
                    })
                    .await
            })
        };
        while !queue.is_busy() {
            tokio::task::yield_now().await;
        }
        waiter.abort();

        tokio::time::timeout(Duration::from_secs(2), finished.notified())
            .await
            .expect("operation should run to completion");
        let after = queue.enqueue(|| async { Ok("free") }).await.expect("slot released");
        assert_eq!(after, "free");
    }

    async fn faulty_step() -> Result<(), CaptureFailure> {
        panic!("camera driver bug")
    }

    #[tokio::test]
    async fn panicking_operation_is_reported_as_aborted() {
        let queue = CaptureQueue::new();
        let result = queue.enqueue(faulty_step).await;
        assert!(matches!(result, Err(CaptureFailure::Aborted(_))));
        assert!(!queue.is_busy());
    }
}
