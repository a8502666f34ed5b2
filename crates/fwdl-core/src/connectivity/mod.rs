//! Network reachability tracking.
//!
//! `ConnectivityWatcher` holds a binary reachable/unreachable state fed either
//! by a periodic `ReachabilityProbe` or by explicit `report` calls (platform
//! hooks, tests). Transitions are broadcast as `ConnectivityEvent`s:
//! `Lost` once per reachable -> unreachable edge, `Available` once per
//! unreachable -> reachable edge and only after a preceding loss, so startup
//! never produces a resume storm. Tasks read the current state through a
//! cheap `NetworkStatus` handle.

mod probe;

pub use probe::{ReachabilityProbe, TcpProbe};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Available,
    Lost,
}

/// Read-only view of reachability shared with tasks.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    rx: watch::Receiver<bool>,
}

impl NetworkStatus {
    /// Status that always reports reachable (no watcher wired in).
    pub fn always_online() -> Self {
        let (_tx, rx) = watch::channel(true);
        Self { rx }
    }

    pub fn is_reachable(&self) -> bool {
        *self.rx.borrow()
    }
}

pub struct ConnectivityWatcher {
    reachable: watch::Sender<bool>,
    /// Set on a Lost edge, consumed by the next Available edge.
    was_lost: AtomicBool,
    running: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityWatcher {
    /// Watcher driven only by `report`.
    pub fn manual(initially_reachable: bool) -> Arc<Self> {
        Arc::new(Self::build(initially_reachable, None, Duration::from_secs(1)))
    }

    /// Watcher that polls `probe` every `interval` once started.
    pub fn with_probe(
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
        initially_reachable: bool,
    ) -> Arc<Self> {
        Arc::new(Self::build(initially_reachable, Some(probe), interval))
    }

    fn build(
        initially_reachable: bool,
        probe: Option<Arc<dyn ReachabilityProbe>>,
        interval: Duration,
    ) -> Self {
        let (reachable, _) = watch::channel(initially_reachable);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            reachable,
            was_lost: AtomicBool::new(!initially_reachable),
            running: AtomicBool::new(false),
            events,
            probe,
            interval,
            poller: Mutex::new(None),
        }
    }

    /// Begins observing. Idempotent. With a probe, spawns the poll loop on
    /// the current tokio runtime.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(probe) = self.probe.clone() {
            let handle = tokio::spawn(poll_loop(Arc::downgrade(self), probe, self.interval));
            *self.poller.lock() = Some(handle);
        }
        tracing::debug!(reachable = self.is_reachable(), "connectivity watcher started");
    }

    /// Stops observing. Idempotent. Reports received while stopped are ignored.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
        tracing::debug!("connectivity watcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_reachable(&self) -> bool {
        *self.reachable.borrow()
    }

    pub fn status(&self) -> NetworkStatus {
        NetworkStatus {
            rx: self.reachable.subscribe(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Feeds one observation. Emits at most one event per edge.
    pub fn report(&self, reachable: bool) {
        if !self.is_running() {
            return;
        }
        let changed = self.reachable.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });

        if reachable {
            // Only a recovery from a real loss counts.
            if self.was_lost.swap(false, Ordering::SeqCst) {
                tracing::info!("network available");
                let _ = self.events.send(ConnectivityEvent::Available);
            }
        } else if changed {
            self.was_lost.store(true, Ordering::SeqCst);
            tracing::info!("network lost");
            let _ = self.events.send(ConnectivityEvent::Lost);
        }
    }
}

impl Drop for ConnectivityWatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

async fn poll_loop(
    watcher: Weak<ConnectivityWatcher>,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let p = probe.clone();
        let reachable = tokio::task::spawn_blocking(move || p.is_reachable())
            .await
            .unwrap_or(false);
        match watcher.upgrade() {
            Some(w) => w.report(reachable),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::broadcast::error::TryRecvError;

    #[tokio::test]
    async fn available_only_after_loss() {
        let w = ConnectivityWatcher::manual(true);
        w.start();
        let mut rx = w.subscribe();

        w.report(true);
        w.report(true);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        w.report(false);
        w.report(false);
        assert_eq!(rx.try_recv(), Ok(ConnectivityEvent::Lost));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(!w.is_reachable());

        w.report(true);
        w.report(true);
        assert_eq!(rx.try_recv(), Ok(ConnectivityEvent::Available));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(w.is_reachable());
    }

    #[tokio::test]
    async fn initially_offline_counts_as_lost() {
        let w = ConnectivityWatcher::manual(false);
        w.start();
        let mut rx = w.subscribe();
        w.report(true);
        assert_eq!(rx.try_recv(), Ok(ConnectivityEvent::Available));
    }

    #[tokio::test]
    async fn reports_ignored_while_stopped() {
        let w = ConnectivityWatcher::manual(true);
        let mut rx = w.subscribe();
        w.report(false);
        assert!(w.is_reachable());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        w.start();
        w.start();
        w.stop();
        w.stop();
        w.report(false);
        assert!(w.is_reachable());
    }

    #[tokio::test]
    async fn status_handle_follows_reports() {
        let w = ConnectivityWatcher::manual(true);
        w.start();
        let status = w.status();
        assert!(status.is_reachable());
        w.report(false);
        assert!(!status.is_reachable());
        assert!(NetworkStatus::always_online().is_reachable());
    }

    struct Flip {
        calls: AtomicUsize,
    }

    impl ReachabilityProbe for Flip {
        fn is_reachable(&self) -> bool {
            // true, false, true, ...
            self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0
        }
    }

    #[tokio::test]
    async fn probe_loop_drives_events() {
        let probe = Arc::new(Flip {
            calls: AtomicUsize::new(0),
        });
        let w = ConnectivityWatcher::with_probe(probe, Duration::from_millis(10), true);
        let mut rx = w.subscribe();
        w.start();

        let lost = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lost, ConnectivityEvent::Lost);
        let back = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back, ConnectivityEvent::Available);
        w.stop();
    }
}
