//! Per-Repo Serializer (§4.1): keyed mutual exclusion so that at most one
//! operation touches a given mirror at a time, while different repos proceed
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

/// A guarded map from repo name to a per-repo lock. The map itself is guarded
/// by its own mutex so "find-or-insert the per-repo lock" is atomic — a naive
/// check-then-set would race two first-touches of the same repo.
#[derive(Default)]
pub struct PerRepoSerializer {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PerRepoSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, repo: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(repo.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    async fn tracked_repo_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Runs `action` with exclusive access to `repo`. Waiters on the same repo
    /// are served FIFO by `tokio::sync::Mutex`; other repos are unaffected.
    /// The lock is released on every exit path of `action`, including panics,
    /// because it is held by an RAII guard.
    pub async fn with_exclusive<F, Fut, T>(&self, repo: &str, action: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let repo_lock = self.lock_for(repo).await;
        let result = {
            let _guard = repo_lock.lock().await;
            action().await
        };
        self.remove_if_unheld(repo, &repo_lock).await;
        result
    }

    /// Drops `repo`'s map entry once this call was its only remaining holder,
    /// so entries live only while some caller still references the lock
    /// (§3's serializer-state lifecycle), rather than accumulating forever.
    async fn remove_if_unheld(&self, repo: &str, repo_lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // Strong count 2 == this local clone plus the map's own entry: no
        // other caller is holding or waiting on this repo's lock.
        if Arc::strong_count(repo_lock) == 2 {
            locks.remove(repo);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_same_repo() {
        let serializer = Arc::new(PerRepoSerializer::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let serializer = serializer.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            tasks.push(tokio::spawn(async move {
                serializer
                    .with_exclusive("repo-a", || async {
                        let cur = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(cur, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        counter.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_repos_run_concurrently() {
        let serializer = Arc::new(PerRepoSerializer::new());
        let start = std::time::Instant::now();
        let a = {
            let serializer = serializer.clone();
            tokio::spawn(async move {
                serializer
                    .with_exclusive("repo-a", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    })
                    .await;
            })
        };
        let b = {
            let serializer = serializer.clone();
            tokio::spawn(async move {
                serializer
                    .with_exclusive("repo-b", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    })
                    .await;
            })
        };
        a.await.unwrap();
        b.await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(95));
    }

    #[tokio::test]
    async fn entry_is_removed_once_uncontended() {
        let serializer = PerRepoSerializer::new();
        serializer.with_exclusive("repo-a", || async {}).await;
        assert_eq!(serializer.tracked_repo_count().await, 0);
    }
}
