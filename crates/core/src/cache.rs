//! Session-scoped directory listing cache
//!
//! Readers see a complete listing or nothing. Concurrent fetches of the same
//! uncached directory collapse into one backend call through a registry of
//! pending fetches keyed by [`PathReference`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::Result;
use crate::path::{AttributedList, Path, PathReference};

type Outcome = Option<Result<Arc<AttributedList>>>;

struct Pending {
    id: u64,
    outcome: watch::Receiver<Outcome>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PathReference, Arc<AttributedList>>,
    pending: HashMap<PathReference, Pending>,
}

/// In-memory cache of directory listings
#[derive(Default)]
pub struct PathCache {
    state: Mutex<CacheState>,
    next_id: AtomicU64,
}

enum Role {
    Leader(u64, watch::Sender<Outcome>),
    Waiter(watch::Receiver<Outcome>),
}

/// Drops the pending registration if the leader is canceled mid-fetch
struct PendingGuard<'a> {
    cache: &'a PathCache,
    reference: &'a PathReference,
    id: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.remove_pending(self.reference, self.id);
        }
    }
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &PathReference) -> Option<Arc<AttributedList>> {
        self.state.lock().entries.get(reference).cloned()
    }

    pub fn contains(&self, reference: &PathReference) -> bool {
        self.state.lock().entries.contains_key(reference)
    }

    /// Replace the listing for `reference` atomically
    pub fn put(&self, reference: PathReference, list: AttributedList) {
        tracing::debug!(directory = %reference, entries = list.len(), "Cache listing");
        self.state.lock().entries.insert(reference, Arc::new(list));
    }

    /// Forget the listing for `reference`
    ///
    /// A fetch already in flight for it keeps answering its own waiters but
    /// will not store its result.
    pub fn invalidate(&self, reference: &PathReference) {
        let mut state = self.state.lock();
        state.entries.remove(reference);
        state.pending.remove(reference);
        tracing::debug!(directory = %reference, "Invalidate cached listing");
    }

    /// Invalidate after a structural change (create, delete, rename) of `path`
    pub fn invalidate_structure(&self, path: &Path) {
        self.invalidate(&path.reference());
        if let Some(parent) = path.parent() {
            self.invalidate(&parent.reference());
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached listing, or the result of `fetch` shared by every concurrent caller
    ///
    /// Failures are handed to all waiting callers and never stored.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        reference: &PathReference,
        fetch: F,
    ) -> Result<Arc<AttributedList>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AttributedList>>,
    {
        let mut fetch = Some(fetch);
        loop {
            match self.role(reference) {
                Ok(list) => return Ok(list),
                Err(Role::Waiter(mut outcome)) => {
                    let shared = outcome.wait_for(Option::is_some).await.map(|o| o.clone());
                    match shared {
                        Ok(Some(result)) => return result,
                        // Leader went away without an outcome, take over
                        _ => continue,
                    }
                }
                Err(Role::Leader(id, sender)) => {
                    let mut guard = PendingGuard {
                        cache: self,
                        reference,
                        id,
                        armed: true,
                    };
                    let Some(fetch) = fetch.take() else {
                        continue;
                    };
                    tracing::debug!(directory = %reference, "Fetch listing");
                    let result = fetch().await.map(Arc::new);
                    {
                        let mut state = self.state.lock();
                        let current = state.pending.get(reference).map(|p| p.id);
                        if current == Some(id) {
                            state.pending.remove(reference);
                            if let Ok(list) = &result {
                                state.entries.insert(reference.clone(), list.clone());
                            }
                        }
                    }
                    guard.armed = false;
                    sender.send_replace(Some(result.clone()));
                    return result;
                }
            }
        }
    }

    fn role(&self, reference: &PathReference) -> std::result::Result<Arc<AttributedList>, Role> {
        let mut state = self.state.lock();
        if let Some(list) = state.entries.get(reference) {
            return Ok(list.clone());
        }
        if let Some(pending) = state.pending.get(reference) {
            return Err(Role::Waiter(pending.outcome.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, outcome) = watch::channel(None);
        state
            .pending
            .insert(reference.clone(), Pending { id, outcome });
        Err(Role::Leader(id, sender))
    }

    fn remove_pending(&self, reference: &PathReference, id: u64) {
        let mut state = self.state.lock();
        if state.pending.get(reference).map(|p| p.id) == Some(id) {
            state.pending.remove(reference);
        }
    }
}

impl std::fmt::Debug for PathCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PathCache")
            .field("entries", &state.entries.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Category, Error};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn listing(names: &[&str]) -> AttributedList {
        names.iter().map(|n| Path::file(format!("/dir/{n}"))).collect()
    }

    #[tokio::test]
    async fn test_fetch_is_cached() {
        let cache = PathCache::new();
        let key = PathReference::new("/dir");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let list = cache
                .get_or_fetch(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(listing(&["a", "b"]))
                })
                .await
                .unwrap();
            assert_eq!(list.len(), 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&key));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = PathCache::new();
        let key = PathReference::new("/dir");

        let result = cache
            .get_or_fetch(&key, || async { Err(Error::connection("reset")) })
            .await;
        assert_eq!(result.unwrap_err().category(), Category::Connection);
        assert!(!cache.contains(&key));

        let list = cache
            .get_or_fetch(&key, || async { Ok(listing(&["a"])) })
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_collapsed() {
        let cache = Arc::new(PathCache::new());
        let key = PathReference::new("/dir");
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = key.clone();
            let calls = calls.clone();
            let release = release.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(listing(&["a", "b", "c"]))
                    })
                    .await
            }));
        }

        // Let every task register before the single fetch completes
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_one();

        for handle in handles {
            let list = handle.await.unwrap().unwrap();
            assert_eq!(list.len(), 3);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_failure() {
        let cache = Arc::new(PathCache::new());
        let key = PathReference::new("/dir");
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let key = key.clone();
            let calls = calls.clone();
            let release = release.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Err(Error::access_denied("/dir"))
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_one();

        for handle in handles {
            let e = handle.await.unwrap().unwrap_err();
            assert_eq!(e.category(), Category::AccessDenied);
            assert_eq!(e.detail(), "/dir");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_discards_stale_result() {
        let cache = Arc::new(PathCache::new());
        let key = PathReference::new("/dir");
        let release = Arc::new(Notify::new());

        let stale = {
            let cache = cache.clone();
            let key = key.clone();
            let release = release.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, || async move {
                        release.notified().await;
                        Ok(listing(&["old"]))
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.invalidate(&key);
        release.notify_one();
        let old = stale.await.unwrap().unwrap();
        assert!(old.find_by_name("old").is_some());

        let fresh = cache
            .get_or_fetch(&key, || async { Ok(listing(&["new"])) })
            .await
            .unwrap();
        assert!(fresh.find_by_name("new").is_some());
        assert!(fresh.find_by_name("old").is_none());
    }

    #[tokio::test]
    async fn test_canceled_leader_hands_over() {
        let cache = Arc::new(PathCache::new());
        let key = PathReference::new("/dir");

        let leader = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, || async {
                        std::future::pending::<()>().await;
                        Ok(listing(&["never"]))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, || async { Ok(listing(&["retry"])) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();

        let list = waiter.await.unwrap().unwrap();
        assert!(list.find_by_name("retry").is_some());
    }

    #[test]
    fn test_invalidate_structure_drops_parent() {
        let cache = PathCache::new();
        cache.put(PathReference::new("/dir"), listing(&["a"]));
        cache.put(PathReference::new("/dir/sub"), AttributedList::empty());
        cache.put(PathReference::new("/other"), AttributedList::empty());

        cache.invalidate_structure(&Path::directory("/dir/sub"));
        assert!(!cache.contains(&PathReference::new("/dir")));
        assert!(!cache.contains(&PathReference::new("/dir/sub")));
        assert!(cache.contains(&PathReference::new("/other")));

        cache.clear();
        assert!(cache.is_empty());
    }
}
