//! Background poll task registry
//!
//! One poll loop per key; spawning a new loop under an existing key aborts
//! the old one, and cancelling a key aborts its loop. Keys are
//! `{subject_id}:{request_type}` so unrelated subjects never interfere.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinHandle;

#[derive(Default)]
pub struct PollerRegistry {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a poll loop under `key`, replacing any loop already running
    /// under the same key
    pub fn spawn<F>(&self, key: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(previous) = tasks.insert(key.to_string(), handle) {
            if !previous.is_finished() {
                tracing::debug!(key, "replacing an active poll loop");
            }
            previous.abort();
        }
    }

    /// Abort the poll loop under `key`. Returns whether one was running.
    pub fn cancel(&self, key: &str) -> bool {
        match self.tasks.lock().unwrap().remove(key) {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                was_running
            }
            None => false,
        }
    }

    /// Abort every registered loop, used at shutdown
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for (key, handle) in tasks.drain() {
            tracing::debug!(key, "aborting poll loop");
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_aborts_a_running_loop() {
        let registry = PollerRegistry::new();
        let ticks = Arc::new(AtomicU32::new(0));

        let counter = ticks.clone();
        registry.spawn("scene-1:scene", async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.cancel("scene-1:scene"));
        let after_cancel = ticks.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
        // Cancelling again is a no-op
        assert!(!registry.cancel("scene-1:scene"));
    }

    #[tokio::test]
    async fn spawning_under_the_same_key_replaces_the_loop() {
        let registry = PollerRegistry::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let counter = first.clone();
        registry.spawn("scene-1:scene", async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        tokio::time::sleep(Duration::from_millis(15)).await;

        let counter = second.clone();
        registry.spawn("scene-1:scene", async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let first_after_replace = first.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(first.load(Ordering::SeqCst), first_after_replace);
        assert!(second.load(Ordering::SeqCst) > 0);
        registry.shutdown();
    }
}
