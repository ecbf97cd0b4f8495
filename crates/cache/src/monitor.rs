//! Memory pressure monitor
//!
//! Periodically samples available memory on a dedicated background thread,
//! classifies it into a [`PressureLevel`] and fans the result out:
//!
//! - subscribers hear about every level change,
//! - at High or above, subscribers get a low-memory warning and every
//!   attached [`Reclaimable`] is asked to shrink,
//! - at Critical, subscribers also get a critical-memory error and every
//!   reclaimable is forced to release what it holds.
//!
//! One monitor is meant to exist per process. It is constructed once at
//! startup and handed to the components that need it (usually as an
//! `Arc<MemoryPressureMonitor>`); nothing here is global.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::host::{MemorySource, SampleError};
use crate::pressure::{PressureLevel, PressureThresholds};

/// Receives pressure notifications
///
/// Callbacks run on the monitor's background thread and must return
/// quickly. Anything that needs to touch UI-owned state should hand the
/// event off, for example through [`ChannelSubscriber`].
///
/// A reading fed back into the same monitor from inside a callback
/// ([`MemoryPressureMonitor::simulate_memory_state`] or
/// [`MemoryPressureMonitor::sample_now`]) is classified and returned but
/// not dispatched.
pub trait PressureSubscriber: Send + Sync {
    /// The classified level changed since the previous sample
    fn on_pressure_level_changed(&self, level: PressureLevel);

    /// A sample classified as High or Critical
    fn on_low_memory_warning(&self) {}

    /// A sample classified as Critical
    fn on_critical_memory_error(&self) {}
}

/// Something that can give memory back when the monitor asks
pub trait Reclaimable: Send + Sync {
    /// Shrink in response to High or Critical pressure
    fn on_memory_pressure(&self);

    /// Release as much as possible in response to Critical pressure
    fn reclaim(&self) {
        self.on_memory_pressure();
    }

    /// Name used in log events
    fn name(&self) -> &str {
        "reclaimable"
    }
}

/// A pressure notification as a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureEvent {
    /// The classified level changed
    LevelChanged(PressureLevel),
    /// A sample classified as High or Critical
    LowMemoryWarning,
    /// A sample classified as Critical
    CriticalMemoryError,
}

/// Subscriber that forwards every notification into a channel
///
/// The receiving end is drained by whoever owns the state that must react,
/// so the monitor thread never calls into that code directly.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stockroom_cache::{ChannelSubscriber, MemoryPressureMonitor, PressureEvent, PressureLevel};
///
/// let monitor = MemoryPressureMonitor::simulated();
/// let (subscriber, events) = ChannelSubscriber::new();
/// monitor.subscribe(Arc::new(subscriber));
///
/// monitor.simulate_memory_state(20 * 1024 * 1024);
///
/// assert_eq!(events.try_recv(), Ok(PressureEvent::LevelChanged(PressureLevel::High)));
/// assert_eq!(events.try_recv(), Ok(PressureEvent::LowMemoryWarning));
/// ```
pub struct ChannelSubscriber {
    sender: Sender<PressureEvent>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiver its events arrive on
    pub fn new() -> (Self, Receiver<PressureEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: PressureEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.sender.send(event);
    }
}

impl PressureSubscriber for ChannelSubscriber {
    fn on_pressure_level_changed(&self, level: PressureLevel) {
        self.forward(PressureEvent::LevelChanged(level));
    }

    fn on_low_memory_warning(&self) {
        self.forward(PressureEvent::LowMemoryWarning);
    }

    fn on_critical_memory_error(&self) {
        self.forward(PressureEvent::CriticalMemoryError);
    }
}

/// Handle returned by [`MemoryPressureMonitor::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Errors that can occur while starting the monitor
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The sampling thread could not be spawned
    #[error("failed to spawn monitor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// State shared between the monitor handle and its sampling thread
struct MonitorShared {
    source: Arc<dyn MemorySource>,
    thresholds: PressureThresholds,
    sample_interval: Duration,

    /// Last level reported to subscribers
    level: Mutex<PressureLevel>,

    /// Serializes ticks so transitions are delivered in order
    tick: Mutex<()>,

    /// Thread currently dispatching a tick, for detecting nested readings
    tick_owner: Mutex<Option<ThreadId>>,

    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn PressureSubscriber>)>>,
    reclaimables: RwLock<Vec<Arc<dyn Reclaimable>>>,
    next_subscription: AtomicU64,

    reclamation_triggered: AtomicBool,
    reclamation_count: AtomicU64,
}

/// Stop request for one sampling thread, paired with `wake` so a sleeping
/// thread exits at once
///
/// Every start gets a fresh signal, so restarting never revives a thread
/// that was already told to stop.
#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn request(&self) {
        *lock(&self.stopped) = true;
        self.wake.notify_all();
    }

    fn is_requested(&self) -> bool {
        *lock(&self.stopped)
    }

    /// Sleep for `timeout` or until stopped; returns true if stopped
    fn wait(&self, timeout: Duration) -> bool {
        let stopped = lock(&self.stopped);
        let (stopped, _) = self
            .wake
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

/// A live sampling thread and its stop signal
struct SamplerRun {
    thread: JoinHandle<()>,
    stop: Arc<StopSignal>,
}

/// Clears the tick owner when a dispatch finishes, even by panic
struct TickOwner<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for TickOwner<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MonitorShared {
    fn subscribers(&self) -> Vec<Arc<dyn PressureSubscriber>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect()
    }

    fn reclaimables(&self) -> Vec<Arc<dyn Reclaimable>> {
        self.reclaimables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sample the source once
    ///
    /// On failure the last known level is kept and nothing is dispatched.
    fn sample(&self) -> Result<PressureLevel, SampleError> {
        let available = self.source.available_bytes()?;
        Ok(self.process(available))
    }

    /// Classify a reading and dispatch notifications
    fn process(&self, available: u64) -> PressureLevel {
        let current = thread::current().id();
        let level = self.thresholds.classify(available);
        if *lock(&self.tick_owner) == Some(current) {
            debug!(level = %level, available, "nested reading from a callback not dispatched");
            return level;
        }

        let _tick = lock(&self.tick);
        *lock(&self.tick_owner) = Some(current);
        let _owner = TickOwner(&self.tick_owner);

        let previous = {
            let mut current = lock(&self.level);
            std::mem::replace(&mut *current, level)
        };

        // Snapshot so callbacks run without holding our locks
        let subscribers = self.subscribers();

        if previous != level {
            if level.needs_eviction() {
                warn!(from = %previous, to = %level, available, "memory pressure rising");
            } else {
                info!(from = %previous, to = %level, available, "memory pressure changed");
            }
            for subscriber in &subscribers {
                subscriber.on_pressure_level_changed(level);
            }
        } else {
            debug!(level = %level, available, "memory pressure sampled");
        }

        if level.needs_eviction() {
            for subscriber in &subscribers {
                subscriber.on_low_memory_warning();
            }
            for reclaimable in self.reclaimables() {
                debug!(target_name = reclaimable.name(), "shrinking under memory pressure");
                reclaimable.on_memory_pressure();
            }
        }

        if level.is_critical() {
            for subscriber in &subscribers {
                subscriber.on_critical_memory_error();
            }
            self.force_reclamation();
        }

        level
    }

    fn force_reclamation(&self) {
        let reclaimables = self.reclaimables();
        for reclaimable in &reclaimables {
            reclaimable.reclaim();
        }
        self.reclamation_triggered.store(true, Ordering::Release);
        let count = self.reclamation_count.fetch_add(1, Ordering::AcqRel) + 1;
        warn!(
            targets = reclaimables.len(),
            count, "forced reclamation under critical memory pressure"
        );
    }

    fn run(self: Arc<Self>, stop: Arc<StopSignal>) {
        info!(interval_ms = self.sample_interval.as_millis() as u64, "memory pressure monitor started");

        loop {
            if stop.is_requested() {
                break;
            }

            if let Err(e) = self.sample() {
                let level = *lock(&self.level);
                warn!(error = %e, level = %level, "memory sample failed; holding last level");
            }

            if stop.wait(self.sample_interval) {
                break;
            }
        }

        info!("memory pressure monitor stopped");
    }
}

/// Process-wide memory pressure monitor
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stockroom_cache::{MemoryPressureMonitor, PressureLevel, SearchCache};
/// use stockroom_core::FilterState;
///
/// let monitor = MemoryPressureMonitor::simulated();
/// let cache: Arc<SearchCache<u32>> = Arc::new(SearchCache::new(10));
/// monitor.attach_reclaimable(cache.clone());
///
/// for size in 1..=4 {
///     cache.put(&FilterState::new().with_sizes([size]), vec![size]);
/// }
///
/// // 20 MB available is High pressure under the default thresholds
/// assert_eq!(monitor.simulate_memory_state(20 * 1024 * 1024), PressureLevel::High);
/// assert!(cache.size() < 4);
/// ```
pub struct MemoryPressureMonitor {
    shared: Arc<MonitorShared>,
    run: Mutex<Option<SamplerRun>>,
}

impl MemoryPressureMonitor {
    /// Create a monitor sampling `source` with the given thresholds and tick
    pub fn new(
        source: Arc<dyn MemorySource>,
        thresholds: PressureThresholds,
        sample_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                source,
                thresholds,
                sample_interval,
                level: Mutex::new(PressureLevel::Low),
                tick: Mutex::new(()),
                tick_owner: Mutex::new(None),
                subscribers: RwLock::new(Vec::new()),
                reclaimables: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                reclamation_triggered: AtomicBool::new(false),
                reclamation_count: AtomicU64::new(0),
            }),
            run: Mutex::new(None),
        }
    }

    /// Create a monitor using the thresholds and tick from `config`
    pub fn from_config(config: &CacheConfig, source: Arc<dyn MemorySource>) -> Self {
        Self::new(source, config.thresholds(), config.sample_interval())
    }

    /// Create a monitor with default settings whose source always reports
    /// plenty of memory; readings are injected with
    /// [`simulate_memory_state`](Self::simulate_memory_state)
    pub fn simulated() -> Self {
        Self::from_config(
            &CacheConfig::default(),
            Arc::new(crate::host::SimulatedMemorySource::default()),
        )
    }

    /// Start periodic sampling on a background thread
    ///
    /// Returns `true` if the monitor is running afterwards. Starting an
    /// already running monitor does nothing and returns `true`.
    pub fn start_monitoring(&self) -> bool {
        match self.try_start_monitoring() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "memory pressure monitor failed to start");
                false
            }
        }
    }

    /// Start periodic sampling, reporting why it could not start
    pub fn try_start_monitoring(&self) -> Result<(), MonitorError> {
        let mut run = lock(&self.run);

        if let Some(existing) = run.as_ref() {
            if !existing.thread.is_finished() {
                return Ok(());
            }
        }
        if let Some(finished) = run.take() {
            let _ = finished.thread.join();
        }

        let stop = Arc::new(StopSignal::default());
        let shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("stockroom-pressure-monitor".to_string())
            .spawn(move || shared.run(thread_stop))?;

        *run = Some(SamplerRun { thread, stop });
        Ok(())
    }

    /// Stop periodic sampling
    ///
    /// Wakes the sampling thread and waits for it to exit, so no callback
    /// fires after this returns. Safe to call in any state, including when
    /// the monitor was never started. When called from a subscriber callback
    /// (i.e. on the sampling thread itself) it only signals the thread.
    pub fn stop_monitoring(&self) {
        let run = lock(&self.run).take();
        if let Some(SamplerRun { thread, stop }) = run {
            stop.request();
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!("memory pressure monitor thread panicked");
            }
        }
    }

    /// Whether the sampling thread is alive
    pub fn is_monitoring(&self) -> bool {
        lock(&self.run)
            .as_ref()
            .is_some_and(|run| !run.thread.is_finished())
    }

    /// Sample the configured source once on the calling thread
    pub fn sample_now(&self) -> Result<PressureLevel, SampleError> {
        self.shared.sample()
    }

    /// Process an injected available-memory reading as if it had been
    /// sampled, dispatching notifications on the calling thread
    pub fn simulate_memory_state(&self, available_bytes: u64) -> PressureLevel {
        self.shared.process(available_bytes)
    }

    /// Register a subscriber for pressure notifications
    pub fn subscribe(&self, subscriber: Arc<dyn PressureSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(
            self.shared
                .next_subscription
                .fetch_add(1, Ordering::Relaxed),
        );
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
        id
    }

    /// Remove a subscriber; returns `false` if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .shared
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Attach something the monitor shrinks under pressure
    pub fn attach_reclaimable(&self, reclaimable: Arc<dyn Reclaimable>) {
        self.shared
            .reclaimables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reclaimable);
    }

    /// The last level reported to subscribers
    pub fn current_level(&self) -> PressureLevel {
        *lock(&self.shared.level)
    }

    /// Whether a forced reclamation pass has run since creation or the last
    /// [`reset_reclamation_flag`](Self::reset_reclamation_flag)
    pub fn has_triggered_reclamation(&self) -> bool {
        self.shared.reclamation_triggered.load(Ordering::Acquire)
    }

    /// Total number of forced reclamation passes
    pub fn reclamation_count(&self) -> u64 {
        self.shared.reclamation_count.load(Ordering::Acquire)
    }

    /// Clear the reclamation flag
    pub fn reset_reclamation_flag(&self) {
        self.shared
            .reclamation_triggered
            .store(false, Ordering::Release);
    }

    /// The configured band boundaries
    pub fn thresholds(&self) -> PressureThresholds {
        self.shared.thresholds
    }

    /// The configured sampling interval
    pub fn sample_interval(&self) -> Duration {
        self.shared.sample_interval
    }
}

impl Drop for MemoryPressureMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SimulatedMemorySource;
    use crate::search::SearchCache;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{OnceLock, Weak};
    use std::time::Instant;
    use stockroom_core::FilterState;

    const MB: u64 = 1024 * 1024;

    #[derive(Default)]
    struct Recorder {
        levels: Mutex<Vec<PressureLevel>>,
        warnings: AtomicUsize,
        criticals: AtomicUsize,
    }

    impl PressureSubscriber for Recorder {
        fn on_pressure_level_changed(&self, level: PressureLevel) {
            self.levels.lock().unwrap().push(level);
        }

        fn on_low_memory_warning(&self) {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }

        fn on_critical_memory_error(&self) {
            self.criticals.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Shrinks {
        shrinks: AtomicUsize,
        reclaims: AtomicUsize,
    }

    impl Reclaimable for Shrinks {
        fn on_memory_pressure(&self) {
            self.shrinks.fetch_add(1, Ordering::SeqCst);
        }

        fn reclaim(&self) {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn monitor_with(source: Arc<SimulatedMemorySource>, interval: Duration) -> MemoryPressureMonitor {
        MemoryPressureMonitor::new(source, PressureThresholds::default(), interval)
    }

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_transitions_reported_once() {
        let monitor = MemoryPressureMonitor::simulated();
        let recorder = Arc::new(Recorder::default());
        monitor.subscribe(recorder.clone());

        monitor.simulate_memory_state(500 * MB);
        monitor.simulate_memory_state(100 * MB);
        monitor.simulate_memory_state(90 * MB);
        monitor.simulate_memory_state(20 * MB);
        monitor.simulate_memory_state(500 * MB);

        assert_eq!(
            *recorder.levels.lock().unwrap(),
            vec![PressureLevel::Moderate, PressureLevel::High, PressureLevel::Low]
        );
        assert_eq!(monitor.current_level(), PressureLevel::Low);
    }

    #[test]
    fn test_every_subscriber_receives_transitions() {
        let monitor = MemoryPressureMonitor::simulated();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        monitor.subscribe(first.clone());
        monitor.subscribe(second.clone());

        monitor.simulate_memory_state(5 * MB);

        for recorder in [&first, &second] {
            assert_eq!(*recorder.levels.lock().unwrap(), vec![PressureLevel::Critical]);
            assert_eq!(recorder.warnings.load(Ordering::SeqCst), 1);
            assert_eq!(recorder.criticals.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_warning_fires_on_every_high_sample() {
        let monitor = MemoryPressureMonitor::simulated();
        let recorder = Arc::new(Recorder::default());
        let target = Arc::new(Shrinks::default());
        monitor.subscribe(recorder.clone());
        monitor.attach_reclaimable(target.clone());

        monitor.simulate_memory_state(20 * MB);
        monitor.simulate_memory_state(15 * MB);

        assert_eq!(recorder.levels.lock().unwrap().len(), 1);
        assert_eq!(recorder.warnings.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.criticals.load(Ordering::SeqCst), 0);
        assert_eq!(target.shrinks.load(Ordering::SeqCst), 2);
        assert_eq!(target.reclaims.load(Ordering::SeqCst), 0);
        assert!(!monitor.has_triggered_reclamation());
    }

    #[test]
    fn test_critical_forces_reclamation() {
        let monitor = MemoryPressureMonitor::simulated();
        let target = Arc::new(Shrinks::default());
        monitor.attach_reclaimable(target.clone());

        assert!(!monitor.has_triggered_reclamation());
        assert_eq!(monitor.simulate_memory_state(MB), PressureLevel::Critical);

        assert!(monitor.has_triggered_reclamation());
        assert_eq!(monitor.reclamation_count(), 1);
        assert_eq!(target.shrinks.load(Ordering::SeqCst), 1);
        assert_eq!(target.reclaims.load(Ordering::SeqCst), 1);

        monitor.reset_reclamation_flag();
        assert!(!monitor.has_triggered_reclamation());
        assert_eq!(monitor.reclamation_count(), 1);
    }

    #[test]
    fn test_low_and_moderate_do_not_shrink() {
        let monitor = MemoryPressureMonitor::simulated();
        let target = Arc::new(Shrinks::default());
        monitor.attach_reclaimable(target.clone());

        monitor.simulate_memory_state(500 * MB);
        monitor.simulate_memory_state(60 * MB);

        assert_eq!(target.shrinks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_high_pressure_shrinks_attached_cache() {
        let monitor = MemoryPressureMonitor::simulated();
        let cache: Arc<SearchCache<u32>> = Arc::new(SearchCache::new(8));
        monitor.attach_reclaimable(cache.clone());

        for size in 1..=8 {
            cache.put(&FilterState::new().with_sizes([size]), vec![size]);
        }

        monitor.simulate_memory_state(20 * MB);
        assert_eq!(cache.size(), 4);

        monitor.simulate_memory_state(MB);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let monitor = MemoryPressureMonitor::simulated();
        let recorder = Arc::new(Recorder::default());
        let id = monitor.subscribe(recorder.clone());
        assert_eq!(monitor.subscriber_count(), 1);

        assert!(monitor.unsubscribe(id));
        assert!(!monitor.unsubscribe(id));

        monitor.simulate_memory_state(20 * MB);
        assert!(recorder.levels.lock().unwrap().is_empty());
    }

    #[test]
    fn test_channel_subscriber() {
        let monitor = MemoryPressureMonitor::simulated();
        let (subscriber, events) = ChannelSubscriber::new();
        monitor.subscribe(Arc::new(subscriber));

        monitor.simulate_memory_state(MB);

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                PressureEvent::LevelChanged(PressureLevel::Critical),
                PressureEvent::LowMemoryWarning,
                PressureEvent::CriticalMemoryError,
            ]
        );
    }

    #[test]
    fn test_channel_subscriber_survives_dropped_receiver() {
        let monitor = MemoryPressureMonitor::simulated();
        let (subscriber, events) = ChannelSubscriber::new();
        monitor.subscribe(Arc::new(subscriber));
        drop(events);

        assert_eq!(monitor.simulate_memory_state(MB), PressureLevel::Critical);
    }

    #[test]
    fn test_sample_failure_holds_level() {
        let source = Arc::new(SimulatedMemorySource::new(20 * MB));
        let monitor = monitor_with(source.clone(), Duration::from_millis(10));

        assert_eq!(monitor.sample_now().unwrap(), PressureLevel::High);

        source.set_unavailable();
        assert!(monitor.sample_now().is_err());
        assert_eq!(monitor.current_level(), PressureLevel::High);
    }

    #[test]
    fn test_stop_without_start() {
        let monitor = MemoryPressureMonitor::simulated();
        monitor.stop_monitoring();
        monitor.stop_monitoring();
        assert!(!monitor.is_monitoring());
    }

    #[test]
    fn test_start_is_idempotent() {
        let monitor = monitor_with(
            Arc::new(SimulatedMemorySource::default()),
            Duration::from_millis(10),
        );

        assert!(monitor.start_monitoring());
        assert!(monitor.start_monitoring());
        assert!(monitor.is_monitoring());

        monitor.stop_monitoring();
        assert!(wait_until(|| !monitor.is_monitoring()));
    }

    #[test]
    fn test_background_sampling_dispatches() {
        let source = Arc::new(SimulatedMemorySource::new(500 * MB));
        let monitor = monitor_with(source.clone(), Duration::from_millis(5));
        let recorder = Arc::new(Recorder::default());
        monitor.subscribe(recorder.clone());

        assert!(monitor.start_monitoring());
        source.set_available(20 * MB);

        assert!(wait_until(|| monitor.current_level() == PressureLevel::High));
        assert!(wait_until(|| recorder.warnings.load(Ordering::SeqCst) > 0));

        monitor.stop_monitoring();
        assert!(wait_until(|| !monitor.is_monitoring()));
        assert_eq!(*recorder.levels.lock().unwrap(), vec![PressureLevel::High]);
    }

    #[test]
    fn test_stop_is_prompt_with_long_interval() {
        let monitor = monitor_with(
            Arc::new(SimulatedMemorySource::default()),
            Duration::from_secs(3600),
        );
        assert!(monitor.start_monitoring());
        assert!(wait_until(|| monitor.is_monitoring()));

        let started = Instant::now();
        monitor.stop_monitoring();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!monitor.is_monitoring());
    }

    #[test]
    fn test_no_callbacks_after_stop() {
        let source = Arc::new(SimulatedMemorySource::new(20 * MB));
        let monitor = monitor_with(source.clone(), Duration::from_millis(2));
        let recorder = Arc::new(Recorder::default());
        monitor.subscribe(recorder.clone());

        assert!(monitor.start_monitoring());
        assert!(wait_until(|| recorder.warnings.load(Ordering::SeqCst) > 0));
        monitor.stop_monitoring();

        let after_stop = recorder.warnings.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(recorder.warnings.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_restart_after_stop() {
        let monitor = monitor_with(
            Arc::new(SimulatedMemorySource::default()),
            Duration::from_millis(5),
        );

        assert!(monitor.start_monitoring());
        monitor.stop_monitoring();
        assert!(!monitor.is_monitoring());

        assert!(monitor.start_monitoring());
        assert!(monitor.is_monitoring());
        monitor.stop_monitoring();
    }

    /// Stops the monitor from inside its first warning callback
    #[derive(Default)]
    struct StopOnFirstWarning {
        monitor: OnceLock<Weak<MemoryPressureMonitor>>,
        stopped: AtomicBool,
        warned_on: Mutex<Vec<ThreadId>>,
    }

    impl PressureSubscriber for StopOnFirstWarning {
        fn on_pressure_level_changed(&self, _level: PressureLevel) {}

        fn on_low_memory_warning(&self) {
            self.warned_on.lock().unwrap().push(thread::current().id());
            if !self.stopped.swap(true, Ordering::SeqCst) {
                if let Some(monitor) = self.monitor.get().and_then(Weak::upgrade) {
                    monitor.stop_monitoring();
                }
            }
        }
    }

    #[test]
    fn test_restart_after_stop_from_callback_runs_one_sampler() {
        let source = Arc::new(SimulatedMemorySource::new(20 * MB));
        let monitor = Arc::new(monitor_with(source, Duration::from_millis(5)));
        let subscriber = Arc::new(StopOnFirstWarning::default());
        let _ = subscriber.monitor.set(Arc::downgrade(&monitor));
        monitor.subscribe(subscriber.clone());

        assert!(monitor.start_monitoring());
        assert!(wait_until(|| subscriber.stopped.load(Ordering::SeqCst)));

        assert!(monitor.start_monitoring());
        assert!(wait_until(|| subscriber.warned_on.lock().unwrap().len() >= 10));
        monitor.stop_monitoring();

        let warned_on = subscriber.warned_on.lock().unwrap();
        let restarted: HashSet<ThreadId> = warned_on[1..].iter().copied().collect();
        assert_eq!(restarted.len(), 1);
        assert!(!restarted.contains(&warned_on[0]));
    }

    /// Feeds a reading back into the monitor on every transition
    #[derive(Default)]
    struct Echo {
        monitor: OnceLock<Weak<MemoryPressureMonitor>>,
        nested: Mutex<Vec<PressureLevel>>,
    }

    impl PressureSubscriber for Echo {
        fn on_pressure_level_changed(&self, _level: PressureLevel) {
            if let Some(monitor) = self.monitor.get().and_then(Weak::upgrade) {
                let level = monitor.simulate_memory_state(500 * MB);
                self.nested.lock().unwrap().push(level);
            }
        }
    }

    #[test]
    fn test_nested_reading_from_callback_is_not_dispatched() {
        let monitor = Arc::new(MemoryPressureMonitor::simulated());
        let echo = Arc::new(Echo::default());
        let _ = echo.monitor.set(Arc::downgrade(&monitor));
        monitor.subscribe(echo.clone());

        assert_eq!(monitor.simulate_memory_state(20 * MB), PressureLevel::High);

        assert_eq!(*echo.nested.lock().unwrap(), vec![PressureLevel::Low]);
        assert_eq!(monitor.current_level(), PressureLevel::High);
    }

    #[test]
    fn test_sampling_continues_through_failures() {
        let source = Arc::new(SimulatedMemorySource::new(500 * MB));
        source.set_unavailable();
        let monitor = monitor_with(source.clone(), Duration::from_millis(5));

        assert!(monitor.start_monitoring());
        thread::sleep(Duration::from_millis(20));
        assert!(monitor.is_monitoring());
        assert_eq!(monitor.current_level(), PressureLevel::Low);

        source.set_available(MB);
        assert!(wait_until(|| monitor.has_triggered_reclamation()));

        monitor.stop_monitoring();
        assert!(!monitor.is_monitoring());
    }
}
