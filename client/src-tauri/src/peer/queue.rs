//! Per-peer serialized signaling queue.
//!
//! Spec translation note: "a per-peer serialized signaling queue is the
//! core concurrency primitive; express it as a per-peer actor/mailbox or
//! as a `Mutex<()>` acquired around each signaling operation (the mutex
//! must be async-fair)". `tokio::sync::Mutex` is FIFO-fair, so a single
//! `Mutex<()>` held for the duration of each operation gives exactly the
//! "at most one running, successors await regardless of predecessor
//! success" semantics this component needs.

use std::future::Future;

use tokio::sync::Mutex;
use tracing::warn;

/// Serializes async operations for a single peer. Operations that error
/// are logged and do not prevent subsequent operations from running.
#[derive(Default)]
pub struct SignalingQueue {
    lock: Mutex<()>,
}

impl SignalingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` with exclusive access to this peer's signaling state.
    /// Errors are logged; the queue is never poisoned by a failing op.
    pub async fn enqueue<F, Fut, E>(&self, peer_id: &str, op: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let _guard = self.lock.lock().await;
        if let Err(e) = op().await {
            warn!(peer = peer_id, error = %e, "signaling operation failed");
        }
    }

    /// Like [`Self::enqueue`] but returns the operation's result to the
    /// caller instead of only logging it — used where the caller needs to
    /// react (e.g. falling through to a nuclear recreate).
    pub async fn enqueue_returning<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _guard = self.lock.lock().await;
        op().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn operations_run_sequentially() {
        let queue = Arc::new(SignalingQueue::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = vec![];
        for i in 0..5 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue("peer-a", || async {
                        order.lock().unwrap().push(i);
                        Ok::<(), std::convert::Infallible>(())
                    })
                    .await;
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(order.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn a_failing_op_does_not_block_the_next() {
        let queue = SignalingQueue::new();
        let ran = Arc::new(AtomicU32::new(0));

        queue
            .enqueue("peer-a", || async { Err::<(), &str>("boom") })
            .await;

        let ran_clone = ran.clone();
        queue
            .enqueue("peer-a", || async move {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &str>(())
            })
            .await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
