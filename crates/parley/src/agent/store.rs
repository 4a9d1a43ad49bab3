//! In-memory thread store with per-thread locking and idle eviction.
//!
//! Threads live in a sharded [`DashMap`], so lookups for unrelated ids never
//! contend on a global lock. Each thread sits behind its own async mutex;
//! checking a thread out yields a [`ThreadGuard`] that holds that mutex for
//! the whole `handle` call, which serializes rounds on the same thread.
//!
//! A slot also carries a lease count. Leases are taken under the shard lock
//! and eviction runs under the same lock, so a thread that somebody is
//! waiting on or working with is never evicted out from under them.

use crate::Message;
use crate::agent::thread::Thread;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Default idle time after which a thread is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

struct Slot {
    thread: Arc<Mutex<Thread>>,
    leases: AtomicUsize,
    last_active_ms: AtomicI64,
}

impl Slot {
    fn new(thread: Thread) -> Self {
        Self {
            thread: Arc::new(Mutex::new(thread)),
            leases: AtomicUsize::new(0),
            last_active_ms: AtomicI64::new(now_ms()),
        }
    }

    fn touch(&self) {
        self.last_active_ms.store(now_ms(), Ordering::SeqCst);
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Keeps a slot's lease count raised; released on drop, including when a
/// checkout is cancelled while waiting for the lock.
struct Lease(Arc<Slot>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.touch();
        self.0.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive access to one thread for the duration of a `handle` call.
pub struct ThreadGuard {
    thread: OwnedMutexGuard<Thread>,
    created: bool,
    // Dropped after `thread`, so the lock is released before the lease.
    lease: Lease,
}

impl ThreadGuard {
    pub fn id(&self) -> &str {
        &self.thread.id
    }

    /// Whether this checkout created the thread.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn messages(&self) -> &[Message] {
        &self.thread.messages
    }

    /// Replace the stored history with `messages` (one committed round).
    pub fn save(&mut self, messages: Vec<Message>) {
        self.thread.messages = messages;
        self.thread.touch();
        self.lease.0.touch();
    }
}

/// Concurrent map of thread id to thread.
pub struct ThreadStore {
    slots: DashMap<String, Arc<Slot>>,
    idle_timeout: Duration,
}

impl Default for ThreadStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl std::fmt::Debug for ThreadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStore")
            .field("threads", &self.slots.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl ThreadStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// The id a checkout of `id` will use: the trimmed id, or a fresh UUID
    /// when it is absent or blank.
    pub fn resolve_id(id: Option<&str>) -> String {
        match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        }
    }

    /// Check out the thread for `id`, creating it if needed.
    ///
    /// Waits while another caller holds the same thread.
    pub async fn get_or_create(&self, id: Option<&str>) -> ThreadGuard {
        self.checkout(&Self::resolve_id(id)).await
    }

    /// Check out the thread with exactly this id, creating it if needed.
    pub async fn checkout(&self, id: &str) -> ThreadGuard {
        let (slot, created) = match self.slots.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                let slot = entry.get().clone();
                slot.leases.fetch_add(1, Ordering::SeqCst);
                (slot, false)
            }
            Entry::Vacant(entry) => {
                let slot = Arc::new(Slot::new(Thread::new(id)));
                slot.leases.fetch_add(1, Ordering::SeqCst);
                entry.insert(slot.clone());
                (slot, true)
            }
        };
        if created {
            debug!("Created thread {id}");
        }

        let lease = Lease(slot.clone());
        let thread = slot.thread.clone().lock_owned().await;
        slot.touch();
        ThreadGuard {
            thread,
            created,
            lease,
        }
    }

    /// Copy of a stored thread, waiting for any in-flight round to finish.
    pub async fn snapshot(&self, id: &str) -> Option<Thread> {
        let slot = self.slots.get(id).map(|s| s.value().clone())?;
        let thread = slot.thread.lock().await;
        Some(thread.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Drop a thread immediately. A caller already holding it keeps working
    /// on its own copy; the next checkout starts fresh.
    pub fn remove(&self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Evict threads idle longer than the idle timeout. Returns how many were
    /// removed.
    pub fn evict_idle(&self) -> usize {
        let timeout_ms = i64::try_from(self.idle_timeout.as_millis()).unwrap_or(i64::MAX);
        self.evict_inactive_since(now_ms().saturating_sub(timeout_ms))
    }

    /// Evict unleased threads whose last activity is before `cutoff_ms`
    /// (milliseconds since the Unix epoch).
    pub fn evict_inactive_since(&self, cutoff_ms: i64) -> usize {
        let mut evicted = 0;
        self.slots.retain(|id, slot| {
            let idle = slot.last_active_ms.load(Ordering::SeqCst) < cutoff_ms;
            let leased = slot.leases.load(Ordering::SeqCst) > 0;
            let evict = idle && !leased;
            if evict {
                debug!("Evicting idle thread {id}");
                evicted += 1;
            }
            !evict
        });
        if evicted > 0 {
            info!("Evicted {evicted} idle thread(s), {} remaining", self.slots.len());
        }
        evicted
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until the store
    /// is dropped.
    pub fn spawn_eviction(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Thread store dropped, stopping eviction");
                    break;
                };
                store.evict_idle();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_with_fresh_id_when_absent() {
        let store = ThreadStore::default();
        let a = store.get_or_create(None).await;
        let b = store.get_or_create(Some("   ")).await;
        assert!(a.created());
        assert!(Uuid::parse_str(a.id()).is_ok());
        assert_ne!(a.id(), b.id());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn reuses_existing_thread() {
        let store = ThreadStore::default();
        {
            let mut guard = store.get_or_create(Some("t-1")).await;
            guard.save(vec![Message::user("hi")]);
        }
        let guard = store.get_or_create(Some("t-1")).await;
        assert!(!guard.created());
        assert_eq!(guard.messages().len(), 1);
    }

    #[tokio::test]
    async fn same_thread_is_serialized() {
        let store = Arc::new(ThreadStore::default());
        let first = store.checkout("t-1").await;

        let s = store.clone();
        let waiter = tokio::spawn(async move {
            let mut guard = s.checkout("t-1").await;
            let mut messages = guard.messages().to_vec();
            messages.push(Message::user("second"));
            guard.save(messages);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let mut first = first;
        first.save(vec![Message::user("first")]);
        drop(first);
        waiter.await.unwrap();

        let thread = store.snapshot("t-1").await.unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[0].text(), "first");
    }

    #[tokio::test]
    async fn different_threads_do_not_block() {
        let store = ThreadStore::default();
        let _a = store.checkout("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), store.checkout("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn evicts_only_idle_unleased_threads() {
        let store = ThreadStore::new(Duration::from_millis(10));
        drop(store.checkout("idle").await);
        let held = store.checkout("held").await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.evict_idle(), 1);
        assert!(!store.contains("idle"));
        assert!(store.contains("held"));

        drop(held);
        assert_eq!(store.evict_inactive_since(now_ms() + 1), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn background_eviction_sweeps_and_stops_with_store() {
        let store = Arc::new(ThreadStore::new(Duration::from_millis(10)));
        drop(store.checkout("idle").await);

        let task = store.spawn_eviction(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.contains("idle"));
        assert!(!task.is_finished());

        drop(store);
        let stopped = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(stopped.is_ok(), "eviction task outlived the store");
    }

    #[tokio::test]
    async fn checkout_without_save_keeps_last_active_at() {
        let store = ThreadStore::default();
        let before = {
            let mut guard = store.checkout("t").await;
            guard.save(vec![Message::user("hi")]);
            guard.thread().last_active_at
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(store.checkout("t").await);
        let thread = store.snapshot("t").await.unwrap();
        assert_eq!(thread.last_active_at, before);
    }

    #[tokio::test]
    async fn remove_and_snapshot() {
        let store = ThreadStore::default();
        drop(store.checkout("t").await);
        assert!(store.snapshot("t").await.is_some());
        assert!(store.remove("t"));
        assert!(store.snapshot("t").await.is_none());
        assert!(!store.remove("t"));
    }
}
