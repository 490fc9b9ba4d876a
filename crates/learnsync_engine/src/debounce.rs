//! Debounce and throttle primitives.
//!
//! Timers are tokio tasks. Every scheduled fire carries the generation it
//! was scheduled under; `call`, `cancel` and `flush` bump the generation, so
//! a timer that wakes late never fires stale arguments.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Future returned by a debounced callback.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A shareable async callback.
pub type Callback<A> = Arc<dyn Fn(A) -> BoxFuture + Send + Sync>;

/// Wraps an async closure as a [`Callback`].
pub fn callback<A, F, Fut>(f: F) -> Callback<A>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

struct DebounceSlot<A> {
    pending: Option<A>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl<A> DebounceSlot<A> {
    /// Invalidates any scheduled fire and returns the pending arguments.
    fn reset(&mut self) -> Option<A> {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.pending.take()
    }
}

/// Delays a callback until calls stop arriving for `delay`.
///
/// Only the most recent arguments are delivered. A zero delay runs the
/// callback inside `call`.
pub struct Debouncer<A> {
    delay: Duration,
    callback: Callback<A>,
    slot: Arc<Mutex<DebounceSlot<A>>>,
}

impl<A: Send + 'static> Debouncer<A> {
    /// Creates a debouncer.
    pub fn new(delay: Duration, callback: Callback<A>) -> Self {
        Self {
            delay,
            callback,
            slot: Arc::new(Mutex::new(DebounceSlot {
                pending: None,
                generation: 0,
                timer: None,
            })),
        }
    }

    /// The settle delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replaces the pending arguments and restarts the timer.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn call(&self, args: A) {
        if self.delay.is_zero() {
            self.slot.lock().reset();
            (self.callback)(args).await;
            return;
        }

        let mut slot = self.slot.lock();
        slot.reset();
        slot.pending = Some(args);
        let generation = slot.generation;

        let shared = Arc::clone(&self.slot);
        let callback = Arc::clone(&self.callback);
        let delay = self.delay;
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let args = {
                let mut slot = shared.lock();
                if slot.generation != generation {
                    return;
                }
                slot.timer = None;
                slot.pending.take()
            };
            if let Some(args) = args {
                callback(args).await;
            }
        }));
    }

    /// Discards the pending arguments. Returns true if there were any.
    pub fn cancel(&self) -> bool {
        self.slot.lock().reset().is_some()
    }

    /// Fires now with the pending arguments, if any, and waits for the
    /// callback. Returns true if it fired.
    pub async fn flush(&self) -> bool {
        let args = self.slot.lock().reset();
        match args {
            Some(args) => {
                (self.callback)(args).await;
                true
            }
            None => false,
        }
    }

    /// Returns true while arguments are waiting for the timer.
    pub fn pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }
}

impl<A> Drop for Debouncer<A> {
    fn drop(&mut self) {
        if let Some(timer) = self.slot.lock().timer.take() {
            timer.abort();
        }
    }
}

struct ThrottleState<A> {
    cooling: bool,
    trailing: Option<A>,
    timer: Option<JoinHandle<()>>,
}

/// Runs a callback at most once per `limit`.
///
/// The first call fires at once and starts a cooldown. Calls during the
/// cooldown replace a single trailing slot, which fires when the cooldown
/// ends and starts the next one.
pub struct Throttler<A> {
    limit: Duration,
    callback: Callback<A>,
    state: Arc<Mutex<ThrottleState<A>>>,
}

impl<A: Send + 'static> Throttler<A> {
    /// Creates a throttler.
    pub fn new(limit: Duration, callback: Callback<A>) -> Self {
        Self {
            limit,
            callback,
            state: Arc::new(Mutex::new(ThrottleState {
                cooling: false,
                trailing: None,
                timer: None,
            })),
        }
    }

    /// Fires now if idle, otherwise stores `args` as the trailing call.
    pub async fn call(&self, args: A) {
        {
            let mut state = self.state.lock();
            if state.cooling {
                state.trailing = Some(args);
                return;
            }
            state.cooling = true;
            state.timer = Some(self.spawn_cooldown());
        }
        (self.callback)(args).await;
    }

    fn spawn_cooldown(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.state);
        let callback = Arc::clone(&self.callback);
        let limit = self.limit;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(limit).await;
                let trailing = {
                    let mut state = shared.lock();
                    let trailing = state.trailing.take();
                    if trailing.is_none() {
                        state.cooling = false;
                        state.timer = None;
                    }
                    trailing
                };
                match trailing {
                    Some(args) => callback(args).await,
                    None => return,
                }
            }
        })
    }

    /// Drops the trailing call. Returns true if there was one.
    pub fn cancel(&self) -> bool {
        self.state.lock().trailing.take().is_some()
    }

    /// Returns true while a trailing call is waiting.
    pub fn pending(&self) -> bool {
        self.state.lock().trailing.is_some()
    }
}

impl<A> Drop for Throttler<A> {
    fn drop(&mut self) {
        if let Some(timer) = self.state.lock().timer.take() {
            timer.abort();
        }
    }
}

/// Named debounce slots.
///
/// Each key owns an independent [`Debouncer`]; settling one key never
/// affects another.
pub struct DebounceManager<A> {
    slots: Mutex<HashMap<String, Arc<Debouncer<A>>>>,
}

impl<A: Send + 'static> DebounceManager<A> {
    /// Creates a manager with no slots.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a slot. An existing slot under `key` is kept as is and
    /// false is returned.
    pub fn register(&self, key: impl Into<String>, delay: Duration, callback: Callback<A>) -> bool {
        let mut slots = self.slots.lock();
        let key = key.into();
        if slots.contains_key(&key) {
            return false;
        }
        debug!(key = %key, ?delay, "debounce slot registered");
        slots.insert(key, Arc::new(Debouncer::new(delay, callback)));
        true
    }

    /// Returns true if `key` has a slot.
    pub fn is_registered(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns true if no slot is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Drops slots with nothing pending. Returns how many were dropped.
    ///
    /// A slot still referenced by an in-flight `execute` or `flush` is kept.
    pub fn prune_idle(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| slot.pending() || Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    fn slot(&self, key: &str) -> SyncResult<Arc<Debouncer<A>>> {
        self.slots
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::UnknownSlot(key.to_string()))
    }

    /// Feeds `args` to the slot under `key`.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownSlot`] if `key` was never registered.
    pub async fn execute(&self, key: &str, args: A) -> SyncResult<()> {
        self.slot(key)?.call(args).await;
        Ok(())
    }

    /// Fires one slot now. Returns true if it had pending arguments.
    pub async fn flush(&self, key: &str) -> SyncResult<bool> {
        Ok(self.slot(key)?.flush().await)
    }

    /// Discards one slot's pending arguments.
    pub fn cancel(&self, key: &str) -> SyncResult<bool> {
        Ok(self.slot(key)?.cancel())
    }

    /// Fires every pending slot, in key order. Returns how many fired.
    pub async fn flush_all(&self) -> usize {
        let mut fired = 0;
        for key in self.pending_keys() {
            if let Ok(slot) = self.slot(&key) {
                if slot.flush().await {
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Discards every pending slot. Returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.cancel())
            .count()
    }

    /// Returns true if any slot is waiting to fire.
    pub fn has_pending(&self) -> bool {
        self.slots.lock().values().any(|slot| slot.pending())
    }

    /// Keys of the slots waiting to fire, sorted.
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.pending())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl<A: Send + 'static> Default for DebounceManager<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Callback<String>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = callback(move |value: String| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().push(value) }
        });
        (seen, cb)
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_delivers_last_value_once() {
        let (seen, cb) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(2000), cb);

        debouncer.call("v1".into()).await;
        sleep(Duration::from_millis(500)).await;
        debouncer.call("v2".into()).await;
        sleep(Duration::from_millis(500)).await;
        debouncer.call("v3".into()).await;
        assert!(debouncer.pending());

        sleep(Duration::from_millis(1999)).await;
        assert!(seen.lock().is_empty());

        sleep(Duration::from_millis(2)).await;
        assert_eq!(*seen.lock(), vec!["v3".to_string()]);
        assert!(!debouncer.pending());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_fire_discards() {
        let (seen, cb) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(100), cb);

        debouncer.call("draft".into()).await;
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        sleep(Duration::from_secs(1)).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_fires_immediately_once() {
        let (seen, cb) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(100), cb);

        debouncer.call("now".into()).await;
        assert!(debouncer.flush().await);
        assert_eq!(*seen.lock(), vec!["now".to_string()]);

        assert!(!debouncer.flush().await);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_fires_inline() {
        let (seen, cb) = recorder();
        let debouncer = Debouncer::new(Duration::ZERO, cb);

        debouncer.call("done".into()).await;
        assert_eq!(*seen.lock(), vec!["done".to_string()]);
        assert!(!debouncer.pending());
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_fires_leading_and_one_trailing() {
        let (seen, cb) = recorder();
        let throttler = Throttler::new(Duration::from_millis(1000), cb);

        throttler.call("a".into()).await;
        assert_eq!(*seen.lock(), vec!["a".to_string()]);

        throttler.call("b".into()).await;
        throttler.call("c".into()).await;
        assert!(throttler.pending());

        sleep(Duration::from_millis(1001)).await;
        assert_eq!(*seen.lock(), vec!["a".to_string(), "c".to_string()]);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(seen.lock().len(), 2);

        throttler.call("d".into()).await;
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_cancel_drops_trailing() {
        let (seen, cb) = recorder();
        let throttler = Throttler::new(Duration::from_millis(1000), cb);

        throttler.call("a".into()).await;
        throttler.call("b".into()).await;
        assert!(throttler.cancel());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(*seen.lock(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn manager_slots_are_independent() {
        let (seen, cb) = recorder();
        let manager = DebounceManager::new();
        assert!(manager.register("code:1", Duration::from_millis(2000), cb.clone()));
        assert!(manager.register("profile", Duration::from_millis(1000), cb.clone()));
        assert!(!manager.register("profile", Duration::from_millis(5), cb));

        manager.execute("code:1", "print(1)".into()).await.unwrap();
        manager.execute("profile", "Ada".into()).await.unwrap();
        assert_eq!(manager.pending_keys(), vec!["code:1", "profile"]);

        sleep(Duration::from_millis(1001)).await;
        assert_eq!(*seen.lock(), vec!["Ada".to_string()]);
        assert_eq!(manager.pending_keys(), vec!["code:1"]);

        assert_eq!(manager.flush_all().await, 1);
        assert!(!manager.has_pending());
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manager_prunes_idle_slots() {
        let (seen, cb) = recorder();
        let manager = DebounceManager::new();
        manager.register("code:1", Duration::from_millis(100), cb.clone());
        manager.register("code:2", Duration::from_millis(100), cb);
        manager.execute("code:1", "a".into()).await.unwrap();
        manager.execute("code:2", "b".into()).await.unwrap();
        sleep(Duration::from_millis(101)).await;
        manager.execute("code:2", "c".into()).await.unwrap();

        assert_eq!(manager.prune_idle(), 1);
        assert!(!manager.is_registered("code:1"));
        assert_eq!(manager.len(), 1);

        sleep(Duration::from_millis(101)).await;
        let mut delivered = seen.lock().clone();
        delivered.sort();
        assert_eq!(delivered, vec!["a", "b", "c"]);
        assert_eq!(manager.prune_idle(), 1);
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manager_unknown_slot_and_cancel_all() {
        let (seen, cb) = recorder();
        let manager = DebounceManager::new();

        assert!(matches!(
            manager.execute("missing", "x".into()).await,
            Err(SyncError::UnknownSlot(_))
        ));

        manager.register("notes:1", Duration::from_millis(50), cb.clone());
        manager.register("notes:2", Duration::from_millis(50), cb);
        manager.execute("notes:1", "a".into()).await.unwrap();
        manager.execute("notes:2", "b".into()).await.unwrap();

        assert_eq!(manager.cancel_all(), 2);
        sleep(Duration::from_secs(1)).await;
        assert!(seen.lock().is_empty());
    }
}
