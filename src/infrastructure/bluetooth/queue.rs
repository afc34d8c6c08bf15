//! FIFO queue serializing scan start and stop requests.
//!
//! There is a single radio per process, so every scanner shares
//! [`OperationQueue::shared`] unless given its own queue. Operations run
//! one at a time, in the order they first reached the queue.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct OperationQueue {
    // tokio's mutex hands out the lock in request order
    turn: Arc<Mutex<()>>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide queue guarding the radio.
    pub fn shared() -> Self {
        static SHARED: OnceLock<OperationQueue> = OnceLock::new();
        SHARED.get_or_init(OperationQueue::new).clone()
    }

    /// Wait for every earlier operation to finish, then run `operation`.
    pub async fn run<F, T>(&self, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let _turn = self.turn.lock().await;
        operation.await
    }

    pub fn same_queue(&self, other: &OperationQueue) -> bool {
        Arc::ptr_eq(&self.turn, &other.turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn operations_run_in_submission_order() {
        let queue = OperationQueue::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (i, delay) in [30u64, 10, 20].into_iter().enumerate() {
            let queue = queue.clone();
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                queue
                    .run(async {
                        log.lock().unwrap().push(format!("start {}", i));
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        log.lock().unwrap().push(format!("end {}", i));
                    })
                    .await
            }));
            // Let the task reach the queue before submitting the next one
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
        );
    }

    #[tokio::test]
    async fn failed_operation_releases_the_queue() {
        let queue = OperationQueue::new();
        let failed: Result<(), &str> = queue.run(async { Err("radio off") }).await;
        assert!(failed.is_err());
        assert_eq!(queue.run(async { 5 }).await, 5);
    }

    #[test]
    fn shared_queue_is_process_wide() {
        assert!(OperationQueue::shared().same_queue(&OperationQueue::shared()));
        assert!(!OperationQueue::new().same_queue(&OperationQueue::shared()));
    }
}
