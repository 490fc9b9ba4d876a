//! Online/offline state and transition callbacks.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Online,
    Offline,
}

struct Shared {
    state: watch::Sender<bool>,
    listeners: Mutex<Vec<(u64, Transition, Listener)>>,
    next_id: Mutex<u64>,
}

/// Tracks network reachability and notifies on transitions.
///
/// The platform feeds raw signals through [`ConnectivityMonitor::set_online`].
/// Callbacks run once per real transition; a signal that does not change
/// the state is ignored. Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    shared: Arc<Shared>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with a known initial state.
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            shared: Arc::new(Shared {
                state,
                listeners: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
            }),
        }
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.shared.state.borrow()
    }

    /// Records a reachability signal. Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.shared.state.send_if_modified(|state| {
            if *state == online {
                return false;
            }
            *state = online;
            true
        });
        if !changed {
            return false;
        }

        let transition = if online {
            info!("connectivity restored");
            Transition::Online
        } else {
            info!("connectivity lost");
            Transition::Offline
        };

        let listeners: Vec<Listener> = self
            .shared
            .listeners
            .lock()
            .iter()
            .filter(|(_, kind, _)| *kind == transition)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                warn!(?transition, "connectivity callback panicked");
            }
        }
        true
    }

    /// Runs `callback` on every offline to online transition.
    pub fn on_online<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Transition::Online, Arc::new(callback))
    }

    /// Runs `callback` on every online to offline transition.
    pub fn on_offline<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Transition::Offline, Arc::new(callback))
    }

    fn subscribe(&self, kind: Transition, listener: Listener) -> Subscription {
        let id = {
            let mut next = self.shared.next_id.lock();
            *next += 1;
            *next
        };
        self.shared.listeners.lock().push((id, kind, listener));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
            active: true,
        }
    }

    /// Number of registered callbacks.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    /// A receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.shared.state.subscribe()
    }

    /// Waits until online. Returns false if `timeout` elapses first.
    pub async fn wait_for_online(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.watch();
        let online = async move { rx.wait_for(|online| *online).await.is_ok() };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, online).await.unwrap_or(false),
            None => online.await,
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Handle to a registered connectivity callback.
///
/// Dropping the handle unsubscribes; call [`Subscription::detach`] to keep
/// the callback for the monitor's lifetime.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
    active: bool,
}

impl Subscription {
    /// Removes the callback.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keeps the callback registered after the handle is gone.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().retain(|(id, _, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter() -> (Arc<AtomicU32>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicU32::new(0));
        let handle = Arc::clone(&count);
        (count, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fires_once_per_transition() {
        let monitor = ConnectivityMonitor::new(false);
        let (online, on_cb) = counter();
        let (offline, off_cb) = counter();
        let _a = monitor.on_online(on_cb);
        let _b = monitor.on_offline(off_cb);

        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.is_online());

        assert_eq!(online.load(Ordering::SeqCst), 1);
        assert_eq!(offline.load(Ordering::SeqCst), 0);

        monitor.set_online(false);
        monitor.set_online(true);
        assert_eq!(online.load(Ordering::SeqCst), 2);
        assert_eq!(offline.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_callback_is_contained() {
        let monitor = ConnectivityMonitor::new(false);
        let _bad = monitor.on_online(|| panic!("listener bug"));
        let (count, cb) = counter();
        let _good = monitor.on_online(cb);

        assert!(monitor.set_online(true));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_and_drop_remove_callbacks() {
        let monitor = ConnectivityMonitor::new(true);
        let (count, cb) = counter();
        let kept = monitor.on_offline(cb);
        let dropped = monitor.on_offline(|| {});
        let removed = monitor.on_offline(|| {});
        assert_eq!(monitor.listener_count(), 3);

        drop(dropped);
        removed.unsubscribe();
        assert_eq!(monitor.listener_count(), 1);

        kept.detach();
        assert_eq!(monitor.listener_count(), 1);
        monitor.set_online(false);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_online_times_out() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.wait_for_online(Some(Duration::from_secs(5))).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_online_wakes_on_transition() {
        let monitor = ConnectivityMonitor::new(false);
        let signal = monitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            signal.set_online(true);
        });

        assert!(monitor.wait_for_online(Some(Duration::from_secs(5))).await);
        assert!(monitor.wait_for_online(None).await);
    }
}
