//! Reachability monitor
//!
//! The single owner of "are we online". Status flips to offline at once on
//! a passive offline signal; it flips to online only through an active
//! probe round (see [`ReachabilityMonitor::check_now`]).

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::time::{Instant, MissedTickBehavior};

use super::probe::{HttpProbe, Probe};
use crate::config::MonitorConfig;
use crate::models::{NetworkSignal, ReachabilityEvent, ReachabilityState};

/// Callback for verified status transitions
pub type Listener = Arc<dyn Fn(ReachabilityEvent) + Send + Sync>;

/// Callback run once per offline -> online transition
pub type ReconnectCallback = Arc<dyn Fn() + Send + Sync>;

struct MonitorState {
    reachability: ReachabilityState,
    /// Last passive signal from the platform
    passive_online: bool,
    last_probe_at: Option<Instant>,
}

struct MonitorInner {
    config: MonitorConfig,
    probe: Arc<dyn Probe>,
    state: Mutex<MonitorState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    /// Keyed so re-registering replaces rather than duplicates
    reconnect: Mutex<Vec<(String, ReconnectCallback)>>,
    next_listener_id: AtomicU64,
}

/// Handle returned by [`ReachabilityMonitor::add_listener`]
pub struct ListenerHandle {
    id: u64,
    monitor: Weak<MonitorInner>,
}

impl ListenerHandle {
    /// Stop receiving events
    pub fn unsubscribe(self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner.listeners.lock().unwrap().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Process-wide reachability service
///
/// Cheap to clone; clones share state. Create one at startup and pass it
/// to the components that need it.
#[derive(Clone)]
pub struct ReachabilityMonitor {
    inner: Arc<MonitorInner>,
}

impl ReachabilityMonitor {
    /// Create a monitor
    ///
    /// `initially_online` is the platform's passive signal at startup; it is
    /// trusted until the first probe round.
    pub fn new(config: MonitorConfig, probe: Arc<dyn Probe>, initially_online: bool) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                probe,
                state: Mutex::new(MonitorState {
                    reachability: ReachabilityState::new(initially_online),
                    passive_online: initially_online,
                    last_probe_at: None,
                }),
                listeners: Mutex::new(Vec::new()),
                reconnect: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a monitor probing over HTTP
    pub fn with_http_probe(config: MonitorConfig, initially_online: bool) -> Self {
        let probe = Arc::new(HttpProbe::new(config.probe_timeout()));
        Self::new(config, probe, initially_online)
    }

    /// Last verified status; never blocks on the network
    pub fn is_online(&self) -> bool {
        self.inner.state.lock().unwrap().reachability.is_online
    }

    /// Snapshot of the full reachability state
    pub fn state(&self) -> ReachabilityState {
        self.inner.state.lock().unwrap().reachability.clone()
    }

    /// Run an active probe round and return the verified status
    ///
    /// Short-circuits to offline if the passive signal says offline.
    /// Otherwise probes each endpoint in order until one answers. If every
    /// endpoint fails, the passive signal decides: probes can fail for
    /// reasons unrelated to connectivity.
    pub async fn check_now(&self) -> bool {
        let passive = {
            let mut state = self.inner.state.lock().unwrap();
            state.last_probe_at = Some(Instant::now());
            state.passive_online
        };

        if !passive {
            self.apply_status(false);
            return false;
        }

        let timeout = self.inner.config.probe_timeout();
        for endpoint in &self.inner.config.probe_endpoints {
            match tokio::time::timeout(timeout, self.inner.probe.probe(endpoint)).await {
                Ok(Ok(())) => {
                    debug!("Probe succeeded: {}", endpoint);
                    let still_online = {
                        let mut state = self.inner.state.lock().unwrap();
                        state.reachability.consecutive_probe_failures = 0;
                        state.passive_online
                    };
                    // An offline signal that arrived mid-probe wins
                    self.apply_status(still_online);
                    return still_online;
                }
                Ok(Err(e)) => debug!("Probe failed for {}: {}", endpoint, e),
                Err(_) => debug!(
                    "Probe timed out for {} after {}ms",
                    endpoint,
                    timeout.as_millis()
                ),
            }
        }

        let (fallback, failures) = {
            let mut state = self.inner.state.lock().unwrap();
            state.reachability.consecutive_probe_failures += 1;
            (state.passive_online, state.reachability.consecutive_probe_failures)
        };
        if !self.inner.config.probe_endpoints.is_empty() {
            warn!(
                "All {} probe endpoints failed ({} rounds in a row), using passive signal: {}",
                self.inner.config.probe_endpoints.len(),
                failures,
                if fallback { "online" } else { "offline" }
            );
        }
        self.apply_status(fallback);
        fallback
    }

    /// Feed a passive signal from the platform
    ///
    /// Offline takes effect immediately. Online waits for the settle delay
    /// and then probes; returns the resulting verified status.
    pub async fn handle_signal(&self, signal: NetworkSignal) -> bool {
        match signal {
            NetworkSignal::Offline => {
                self.inner.state.lock().unwrap().passive_online = false;
                self.apply_status(false);
                false
            }
            NetworkSignal::Online => {
                self.inner.state.lock().unwrap().passive_online = true;
                tokio::time::sleep(self.inner.config.settle_delay()).await;

                let still_online = self.inner.state.lock().unwrap().passive_online;
                if still_online {
                    self.check_now().await
                } else {
                    false
                }
            }
        }
    }

    /// Polling-triggered probe, skipped if the last probe was too recent
    pub async fn poll_once(&self) -> bool {
        let recently_probed = {
            let state = self.inner.state.lock().unwrap();
            state
                .last_probe_at
                .is_some_and(|at| at.elapsed() < self.inner.config.min_probe_interval())
        };

        if recently_probed {
            return self.is_online();
        }
        self.check_now().await
    }

    /// Re-verify status forever at the configured polling period
    pub async fn run_polling(&self) {
        let mut ticker = tokio::time::interval(self.inner.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Reachability polling started (every {}ms)",
            self.inner.config.poll_interval().as_millis()
        );
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// Override the status (tests and manual toggles)
    pub fn manually_set_status(&self, online: bool) {
        self.inner.state.lock().unwrap().passive_online = online;
        self.apply_status(online);
    }

    /// Register a callback for every verified transition
    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(ReachabilityEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        ListenerHandle {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    /// Register a reconnect callback under `key`
    ///
    /// A second registration with the same key replaces the first, so a
    /// transition never runs the same reconnect work twice.
    pub fn on_reconnect<F>(&self, key: &str, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut reconnect = self.inner.reconnect.lock().unwrap();
        let callback: ReconnectCallback = Arc::new(callback);
        match reconnect.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = callback,
            None => reconnect.push((key.to_string(), callback)),
        }
    }

    /// Remove the reconnect callback registered under `key`
    pub fn remove_reconnect(&self, key: &str) {
        self.inner.reconnect.lock().unwrap().retain(|(k, _)| k != key);
    }

    /// Record a verified status and notify on transitions
    fn apply_status(&self, online: bool) {
        let now = Utc::now();
        {
            let mut state = self.inner.state.lock().unwrap();
            state.reachability.last_verified_at = now;
            if state.reachability.is_online == online {
                return;
            }
            state.reachability.is_online = online;
            if !online {
                state.reachability.last_offline_at = Some(now);
            }
        }

        if online {
            info!("Network: online (verified)");
        } else {
            warn!("Network: offline");
        }

        // Callbacks run without any lock held so they may call back into us
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        let event = ReachabilityEvent {
            is_online: online,
            at: now,
        };
        for listener in listeners {
            listener(event);
        }

        if online {
            let callbacks: Vec<ReconnectCallback> = self
                .inner
                .reconnect
                .lock()
                .unwrap()
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect();
            for callback in callbacks {
                callback();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Probe whose endpoints succeed unless listed as failing
    #[derive(Default)]
    struct FakeProbe {
        failing: Mutex<HashSet<String>>,
        hang: Mutex<HashSet<String>>,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn failing(endpoints: &[&str]) -> Self {
            let probe = Self::default();
            probe
                .failing
                .lock()
                .unwrap()
                .extend(endpoints.iter().map(|s| s.to_string()));
            probe
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl Probe for FakeProbe {
        async fn probe(&self, endpoint: &str) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hang = self.hang.lock().unwrap().contains(endpoint);
            if hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.lock().unwrap().contains(endpoint) {
                return Err(ProbeError::Request {
                    message: "refused".into(),
                });
            }
            Ok(())
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            probe_endpoints: vec!["https://a.test".into(), "https://b.test".into()],
            probe_timeout_ms: 5_000,
            poll_interval_ms: 20_000,
            min_probe_interval_ms: 5_000,
            settle_delay_ms: 1_000,
        }
    }

    fn monitor_with(probe: Arc<FakeProbe>, online: bool) -> ReachabilityMonitor {
        ReachabilityMonitor::new(config(), probe, online)
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_signal_short_circuits_without_probing() {
        let probe = Arc::new(FakeProbe::default());
        let monitor = monitor_with(probe.clone(), true);

        assert!(!monitor.handle_signal(NetworkSignal::Offline).await);
        assert!(!monitor.is_online());
        assert!(!monitor.check_now().await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert!(monitor.state().last_offline_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_successful_endpoint_marks_online() {
        let probe = Arc::new(FakeProbe::failing(&["https://a.test"]));
        let monitor = monitor_with(probe.clone(), true);
        monitor.manually_set_status(false);
        monitor.inner.state.lock().unwrap().passive_online = true;

        assert!(monitor.check_now().await);
        assert!(monitor.is_online());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_probes_failing_falls_back_to_passive_signal() {
        let probe = Arc::new(FakeProbe::failing(&["https://a.test", "https://b.test"]));
        let monitor = monitor_with(probe, true);

        assert!(monitor.check_now().await);
        assert!(monitor.is_online());
        assert_eq!(monitor.state().consecutive_probe_failures, 1);

        assert!(monitor.check_now().await);
        assert_eq!(monitor.state().consecutive_probe_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out_and_next_endpoint_is_tried() {
        let probe = Arc::new(FakeProbe::default());
        probe.hang.lock().unwrap().insert("https://a.test".into());
        let monitor = monitor_with(probe.clone(), true);

        assert!(monitor.check_now().await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.state().consecutive_probe_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_signal_waits_settle_delay_then_probes() {
        let probe = Arc::new(FakeProbe::default());
        let monitor = monitor_with(probe.clone(), false);

        let task = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.handle_signal(NetworkSignal::Online).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert!(!monitor.is_online());

        assert!(task.await.unwrap());
        assert!(monitor.is_online());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listeners_fire_only_on_transitions() {
        let probe = Arc::new(FakeProbe::default());
        let monitor = monitor_with(probe, false);
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = events.clone();
        let handle = monitor.add_listener(move |event| sink.lock().unwrap().push(event.is_online));

        monitor.manually_set_status(true);
        monitor.check_now().await;
        monitor.check_now().await;
        monitor.handle_signal(NetworkSignal::Offline).await;

        assert_eq!(*events.lock().unwrap(), vec![true, false]);

        handle.unsubscribe();
        monitor.manually_set_status(true);
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_runs_once_per_transition_despite_reregistration() {
        let probe = Arc::new(FakeProbe::default());
        let monitor = monitor_with(probe, false);
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            monitor.on_reconnect("drain", move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        monitor.manually_set_status(true);
        monitor.manually_set_status(true);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        monitor.manually_set_status(false);
        monitor.manually_set_status(true);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        monitor.remove_reconnect("drain");
        monitor.manually_set_status(false);
        monitor.manually_set_status(true);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_once_respects_min_probe_interval() {
        let probe = Arc::new(FakeProbe::default());
        let monitor = monitor_with(probe.clone(), true);

        monitor.poll_once().await;
        monitor.poll_once().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        monitor.poll_once().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resets_failure_count() {
        let probe = Arc::new(FakeProbe::failing(&["https://a.test", "https://b.test"]));
        let monitor = monitor_with(probe.clone(), true);

        monitor.check_now().await;
        assert_eq!(monitor.state().consecutive_probe_failures, 1);

        probe.heal();
        monitor.check_now().await;
        assert_eq!(monitor.state().consecutive_probe_failures, 0);
    }
}
