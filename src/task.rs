//! Background task handle shared by the capture and motion loops
//!
//! Each loop receives a shutdown `watch::Receiver<bool>` and checks it at
//! every iteration boundary and inside every sleep.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Running background loop: shutdown signal plus join handle
pub struct BackgroundTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn a loop, handing it a fresh shutdown receiver
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(f(rx));
        Self { shutdown, handle }
    }

    /// Signal the loop and wait for it to finish
    pub async fn stop(self) {
        // Receiver already gone means the loop has exited on its own
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Background task panicked or was aborted");
        }
    }

    /// Whether the spawned loop has already returned
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Whether shutdown has been requested (or the sender is gone)
pub fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

/// Sleep for `delay` unless shutdown is requested first.
///
/// Returns `false` when the caller should exit its loop.
pub async fn sleep_or_shutdown(rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if is_shutdown(rx) {
        return false;
    }
    tokio::select! {
        biased;
        _ = rx.changed() => false,
        _ = tokio::time::sleep(delay) => !is_shutdown(rx),
    }
}

/// Resolve once shutdown is requested
pub async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    while !is_shutdown(rx) {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(sleep_or_shutdown(&mut rx, Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let sleeper = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let keep_going = sleep_or_shutdown(&mut rx, Duration::from_secs(60)).await;
            (keep_going, started.elapsed())
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        let (keep_going, elapsed) = sleeper.await.unwrap();
        assert!(!keep_going);
        assert!(elapsed < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_stop_joins_loop() {
        let task = BackgroundTask::spawn(|mut rx| async move {
            wait_shutdown(&mut rx).await;
        });
        task.stop().await;
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        assert!(is_shutdown(&rx));
    }
}
