//! Background prefetching around moving targets.
//!
//! The scheduler owns one worker thread that repeatedly runs a round of the
//! current [`PrefetchMode`] against a shared [`TileCache`]. Target rounds
//! grow each target's radius adaptively: the fewer samples a round had to
//! fetch relative to the provider's batch capacity, the faster the radius
//! grows.

use crate::cache::TileCache;
use crate::config::SchedulerConfig;
use crate::geo::Position;
use crate::tile::GapRecord;
use crate::{Result, TerraError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the scheduler does on each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrefetchMode {
    /// Sleep.
    #[default]
    Idle,
    /// Grow the first target.
    SingleTarget,
    /// Grow every target in turn.
    MultiTarget,
    /// Fill gaps of resident tiles, one provider batch per iteration.
    DrainGaps,
}

/// Lifecycle of the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No worker thread.
    Stopped,
    /// Worker thread is iterating.
    Running,
    /// Stop was requested; waiting for the current iteration to finish.
    Stopping,
}

/// A point whose surroundings are prefetched in growing circles.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchTarget {
    /// Center latitude.
    pub lat: f64,
    /// Center longitude.
    pub lon: f64,
    /// Radius of the next round in meters.
    pub radius: f64,
    /// Radius of the last completed round in meters.
    pub previous_radius: f64,
    /// Radius at which growth stops, in meters.
    pub max_radius: f64,
}

impl PrefetchTarget {
    /// Target with a 1 m starting radius growing up to 100 km.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self::with_radius(lat, lon, 1.0, 100_000.0)
    }

    /// Target with explicit starting and maximum radius.
    pub fn with_radius(lat: f64, lon: f64, radius: f64, max_radius: f64) -> Self {
        Self {
            lat,
            lon,
            radius,
            previous_radius: 0.0,
            max_radius,
        }
    }

    /// Move the center and restart growth from `radius`.
    pub fn move_to(&mut self, lat: f64, lon: f64, radius: f64) {
        self.lat = lat;
        self.lon = lon;
        self.radius = radius.min(self.max_radius);
        self.previous_radius = 0.0;
    }

    /// Whether a round at the maximum radius has completed.
    pub fn is_exhausted(&self) -> bool {
        self.radius >= self.max_radius && self.previous_radius >= self.max_radius
    }

    /// Wrap into a shared handle.
    pub fn into_handle(self) -> TargetHandle {
        Arc::new(Mutex::new(self))
    }
}

/// Shared, movable prefetch target.
pub type TargetHandle = Arc<Mutex<PrefetchTarget>>;

/// Counters of the work done by a scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Iterations that did work.
    pub rounds: u64,
    /// Samples requested from the provider.
    pub points_requested: u64,
    /// Iterations that failed.
    pub errors: u64,
}

/// Outcome of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Worked(usize),
    Idle,
}

/// Run one adaptive round for `target`. Returns the number of samples requested.
///
/// The cache lock is held only while planning and while applying; the
/// provider request runs unlocked so foreground queries are not stalled by
/// rate limiting.
fn prefetch_round(cache: &Mutex<TileCache>, target: &TargetHandle) -> Result<usize> {
    let (lat, lon, radius) = {
        let t = target.lock();
        (t.lat, t.lon, t.radius)
    };

    let (ids, candidates, orchestrator, precision) = {
        let mut cache = cache.lock();
        let (ids, candidates) = cache.radius_candidates(lat, lon, radius)?;
        (ids, candidates, Arc::clone(cache.orchestrator()), cache.precision())
    };

    let requested = candidates.len();
    if requested > 0 {
        let response = orchestrator.request_raw(&candidates)?;
        cache.lock().apply_samples(&ids, &response.samples)?;
        if !response.status.is_ok() {
            let provider = orchestrator.provider();
            return Err(TerraError::provider(provider.id(), response.status, response.error));
        }
    }

    let capacity = orchestrator.capacity();
    let mut efficiency = capacity as f64 / requested as f64;
    if requested == 0 || !efficiency.is_finite() {
        efficiency = 1.0;
    }
    let growth = efficiency.sqrt();

    let mut t = target.lock();
    t.previous_radius = t.radius;
    t.radius = (t.radius + precision * growth).min(t.max_radius);
    debug!(lat, lon, requested, radius = t.radius, growth, "prefetch round");
    Ok(requested)
}

/// Fill one provider batch of gaps of resident tiles, fetching outside the
/// cache lock. Returns `None` when there are no gaps.
fn drain_round(cache: &Mutex<TileCache>) -> Result<Option<usize>> {
    let (gaps, orchestrator) = {
        let cache = cache.lock();
        let orchestrator = Arc::clone(cache.orchestrator());
        (cache.report_gaps(orchestrator.capacity()), orchestrator)
    };
    if gaps.is_empty() {
        return Ok(None);
    }

    let positions: Vec<Position> = gaps.iter().map(GapRecord::position).collect();
    let response = orchestrator.request_raw(&positions)?;
    cache.lock().apply_gap_results(&gaps, &response.samples)?;
    if !response.status.is_ok() {
        let provider = orchestrator.provider();
        return Err(TerraError::provider(provider.id(), response.status, response.error));
    }
    Ok(Some(gaps.len()))
}

struct Shared {
    cache: Arc<Mutex<TileCache>>,
    mode: Mutex<PrefetchMode>,
    targets: Mutex<Vec<TargetHandle>>,
    state: Mutex<SchedulerState>,
    stop_requested: Mutex<bool>,
    wake: Condvar,
    stats: Mutex<SchedulerStats>,
    idle_interval: Duration,
}

impl Shared {
    fn iterate(&self) -> Result<Progress> {
        let mode = *self.mode.lock();
        match mode {
            PrefetchMode::Idle => Ok(Progress::Idle),
            PrefetchMode::SingleTarget => {
                let target = self.targets.lock().first().cloned().ok_or(TerraError::NoPrefetchTarget)?;
                if target.lock().is_exhausted() {
                    return Ok(Progress::Idle);
                }
                prefetch_round(&self.cache, &target).map(Progress::Worked)
            }
            PrefetchMode::MultiTarget => {
                let targets: Vec<TargetHandle> = self.targets.lock().clone();
                let mut requested = 0;
                let mut worked = false;
                for target in &targets {
                    if target.lock().is_exhausted() {
                        continue;
                    }
                    requested += prefetch_round(&self.cache, target)?;
                    worked = true;
                }
                Ok(if worked { Progress::Worked(requested) } else { Progress::Idle })
            }
            PrefetchMode::DrainGaps => Ok(match drain_round(&self.cache)? {
                Some(requested) => Progress::Worked(requested),
                None => Progress::Idle,
            }),
        }
    }

    fn record(&self, outcome: &Result<Progress>) {
        let mut stats = self.stats.lock();
        match outcome {
            Ok(Progress::Worked(n)) => {
                stats.rounds += 1;
                stats.points_requested += *n as u64;
            }
            Ok(Progress::Idle) => {}
            Err(_) => stats.errors += 1,
        }
    }

    /// Sleep for the idle interval unless a stop is requested first.
    fn idle(&self) {
        let mut stop = self.stop_requested.lock();
        if !*stop {
            self.wake.wait_for(&mut stop, self.idle_interval);
        }
    }

    fn should_stop(&self) -> bool {
        *self.stop_requested.lock()
    }

    fn run(&self) {
        info!(mode = ?*self.mode.lock(), "prefetch scheduler started");
        while !self.should_stop() {
            let outcome = self.iterate();
            self.record(&outcome);
            match outcome {
                Ok(Progress::Worked(_)) => {}
                Ok(Progress::Idle) => self.idle(),
                Err(e) => {
                    warn!(error = %e, "prefetch iteration failed");
                    self.idle();
                }
            }
        }
        info!("prefetch scheduler stopped");
    }
}

/// Background prefetcher over a shared tile cache.
pub struct PrefetchScheduler {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    default_radius: f64,
    default_max_radius: f64,
}

impl PrefetchScheduler {
    /// Create a stopped scheduler in [`PrefetchMode::Idle`].
    pub fn new(cache: Arc<Mutex<TileCache>>, config: &SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                mode: Mutex::new(PrefetchMode::Idle),
                targets: Mutex::new(Vec::new()),
                state: Mutex::new(SchedulerState::Stopped),
                stop_requested: Mutex::new(false),
                wake: Condvar::new(),
                stats: Mutex::new(SchedulerStats::default()),
                idle_interval: config.idle_interval(),
            }),
            handle: None,
            default_radius: config.initial_radius_m,
            default_max_radius: config.max_radius_m,
        }
    }

    /// A new target handle using the configured radii.
    pub fn create_target(&self, lat: f64, lon: f64) -> TargetHandle {
        PrefetchTarget::with_radius(lat, lon, self.default_radius, self.default_max_radius).into_handle()
    }

    /// Current mode.
    pub fn mode(&self) -> PrefetchMode {
        *self.shared.mode.lock()
    }

    /// Switch mode. Takes effect on the next iteration.
    pub fn set_mode(&self, mode: PrefetchMode) {
        *self.shared.mode.lock() = mode;
    }

    /// Replace the first target (the one used by [`PrefetchMode::SingleTarget`]).
    pub fn set_target(&self, target: TargetHandle) {
        let mut targets = self.shared.targets.lock();
        match targets.first_mut() {
            Some(first) => *first = target,
            None => targets.push(target),
        }
    }

    /// Append a target.
    pub fn add_target(&self, target: TargetHandle) {
        self.shared.targets.lock().push(target);
    }

    /// Remove a target by identity. Returns whether it was present.
    pub fn remove_target(&self, target: &TargetHandle) -> bool {
        let mut targets = self.shared.targets.lock();
        let before = targets.len();
        targets.retain(|t| !Arc::ptr_eq(t, target));
        targets.len() != before
    }

    /// Replace all targets.
    pub fn set_targets(&self, targets: Vec<TargetHandle>) {
        *self.shared.targets.lock() = targets;
    }

    /// Number of targets.
    pub fn target_count(&self) -> usize {
        self.shared.targets.lock().len()
    }

    /// Lifecycle state.
    pub fn state(&self) -> SchedulerState {
        *self.shared.state.lock()
    }

    /// Work counters.
    pub fn stats(&self) -> SchedulerStats {
        *self.shared.stats.lock()
    }

    /// Run one adaptive round for `target` on the calling thread.
    pub fn prefetch_target(&self, target: &TargetHandle) -> Result<usize> {
        prefetch_round(&self.shared.cache, target)
    }

    /// Fill one provider batch of gaps of resident tiles on the calling thread.
    ///
    /// Returns the number of samples requested.
    pub fn drain_gaps(&self) -> Result<usize> {
        Ok(drain_round(&self.shared.cache)?.unwrap_or(0))
    }

    /// Run one iteration of the current mode on the calling thread.
    ///
    /// Returns the number of samples requested.
    pub fn run_once(&self) -> Result<usize> {
        let outcome = self.shared.iterate();
        self.shared.record(&outcome);
        match outcome? {
            Progress::Worked(n) => Ok(n),
            Progress::Idle => Ok(0),
        }
    }

    /// Start the worker thread.
    pub fn start(&mut self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if *state != SchedulerState::Stopped {
                return Err(TerraError::SchedulerState(*state));
            }
            *state = SchedulerState::Running;
        }
        *self.shared.stop_requested.lock() = false;

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("terracache-prefetch".to_string())
            .spawn(move || shared.run());
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                *self.shared.state.lock() = SchedulerState::Stopped;
                Err(e.into())
            }
        }
    }

    /// Stop the worker thread and wait for it to exit.
    ///
    /// The current iteration is finished first. Stopping a stopped scheduler
    /// is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        *self.shared.state.lock() = SchedulerState::Stopping;
        *self.shared.stop_requested.lock() = true;
        self.shared.wake.notify_all();

        let joined = handle.join();
        *self.shared.state.lock() = SchedulerState::Stopped;
        joined.map_err(|_| TerraError::SchedulerPanicked)
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "prefetch scheduler did not shut down cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::orchestrator::RequestOrchestrator;
    use crate::addressing::cell_id_for;
    use crate::provider::mock::MockProvider;
    use crate::provider::{ElevationProvider, ProviderConfig, ProviderResponse};
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Weak;
    use std::time::Instant;

    fn ridge(lat: f64, lon: f64) -> f64 {
        2000.0 - (lat - 47.085).abs() * 1e4 - (lon - 12.675).abs() * 1e4
    }

    fn shared_cache() -> (Arc<Mutex<TileCache>>, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new(100, 1000, ridge));
        let orchestrator = Arc::new(RequestOrchestrator::new(provider.clone()));
        let config = CacheConfig {
            precision_m: 500.0,
            ..Default::default()
        };
        let cache = TileCache::new(orchestrator, Arc::new(MemoryStorage::new()), &config).unwrap();
        (Arc::new(Mutex::new(cache)), provider)
    }

    /// Records whether the cache was locked while a request was in flight.
    struct LockWatchingProvider {
        inner: MockProvider,
        cache: Mutex<Weak<Mutex<TileCache>>>,
        locked_during_request: AtomicBool,
    }

    impl ElevationProvider for LockWatchingProvider {
        fn config(&self) -> &ProviderConfig {
            self.inner.config()
        }

        fn request(&self, positions: &[Position], user_agent: &str) -> Result<ProviderResponse> {
            let cache = self.cache.lock().upgrade();
            if let Some(cache) = cache {
                if cache.try_lock().is_none() {
                    self.locked_during_request.store(true, Ordering::SeqCst);
                }
            }
            self.inner.request(positions, user_agent)
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            idle_interval_ms: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_adaptive_radius_monotonic_and_bounded() {
        let (cache, _) = shared_cache();
        let scheduler = PrefetchScheduler::new(cache, &fast_config());
        let target = PrefetchTarget::with_radius(47.085, 12.675, 1.0, 2500.0).into_handle();

        let mut last = target.lock().radius;
        for _ in 0..30 {
            scheduler.prefetch_target(&target).unwrap();
            let t = target.lock();
            assert!(t.radius >= last);
            assert!(t.radius <= t.max_radius);
            assert_eq!(t.previous_radius, last);
            last = t.radius;
        }
        assert_eq!(last, 2500.0);
    }

    #[test]
    fn test_growth_is_precision_when_nothing_requested() {
        let (cache, provider) = shared_cache();
        let scheduler = PrefetchScheduler::new(cache, &fast_config());
        // Far from any sample: a 1 m circle between grid points
        let target = PrefetchTarget::with_radius(47.0812, 12.6712, 1.0, 100.0).into_handle();

        assert_eq!(scheduler.prefetch_target(&target).unwrap(), 0);
        assert_eq!(provider.request_count(), 0);
        // 1 + 500 * sqrt(1.0), clamped to the maximum
        assert_eq!(target.lock().radius, 100.0);
    }

    #[test]
    fn test_single_target_without_target_fails() {
        let (cache, _) = shared_cache();
        let scheduler = PrefetchScheduler::new(cache, &fast_config());
        scheduler.set_mode(PrefetchMode::SingleTarget);
        assert!(matches!(scheduler.run_once(), Err(TerraError::NoPrefetchTarget)));
        assert_eq!(scheduler.stats().errors, 1);
    }

    #[test]
    fn test_target_management() {
        let (cache, _) = shared_cache();
        let scheduler = PrefetchScheduler::new(cache, &fast_config());
        let a = scheduler.create_target(47.085, 12.675);
        let b = scheduler.create_target(47.095, 12.685);
        assert_eq!(a.lock().radius, 1.0);
        assert_eq!(a.lock().max_radius, 100_000.0);

        scheduler.set_target(a.clone());
        scheduler.set_target(b.clone());
        assert_eq!(scheduler.target_count(), 1);
        scheduler.add_target(a.clone());
        assert_eq!(scheduler.target_count(), 2);
        assert!(scheduler.remove_target(&b));
        assert!(!scheduler.remove_target(&b));
        scheduler.set_targets(vec![a.clone(), b.clone()]);
        assert_eq!(scheduler.target_count(), 2);
    }

    #[test]
    fn test_multi_target_skips_exhausted() {
        let (cache, provider) = shared_cache();
        let scheduler = PrefetchScheduler::new(cache, &fast_config());
        let mut done = PrefetchTarget::with_radius(47.085, 12.675, 50.0, 50.0);
        done.previous_radius = 50.0;
        scheduler.set_targets(vec![done.into_handle()]);
        scheduler.set_mode(PrefetchMode::MultiTarget);

        assert_eq!(scheduler.run_once().unwrap(), 0);
        assert_eq!(provider.request_count(), 0);
    }

    #[test]
    fn test_drain_gaps() {
        let (cache, provider) = shared_cache();
        cache.lock().load_tile(cell_id_for(47.085, 12.675, 100)).unwrap();
        let scheduler = PrefetchScheduler::new(cache.clone(), &fast_config());
        scheduler.set_mode(PrefetchMode::DrainGaps);

        assert_eq!(scheduler.run_once().unwrap(), 12);
        assert_eq!(scheduler.run_once().unwrap(), 0);
        assert_eq!(provider.request_count(), 1);
        assert_eq!(cache.lock().size(), 12);
    }

    #[test]
    fn test_rounds_fetch_without_holding_the_cache() {
        let provider = Arc::new(LockWatchingProvider {
            inner: MockProvider::new(100, 1000, ridge),
            cache: Mutex::new(Weak::new()),
            locked_during_request: AtomicBool::new(false),
        });
        let orchestrator = Arc::new(RequestOrchestrator::new(provider.clone()));
        let config = CacheConfig {
            precision_m: 500.0,
            ..Default::default()
        };
        let cache = TileCache::new(orchestrator, Arc::new(MemoryStorage::new()), &config).unwrap();
        let cache = Arc::new(Mutex::new(cache));
        *provider.cache.lock() = Arc::downgrade(&cache);
        let scheduler = PrefetchScheduler::new(cache.clone(), &fast_config());

        let target = PrefetchTarget::with_radius(47.085, 12.675, 300.0, 300.0).into_handle();
        assert_eq!(scheduler.prefetch_target(&target).unwrap(), 2);

        cache.lock().load_tile(cell_id_for(47.095, 12.685, 100)).unwrap();
        assert_eq!(scheduler.drain_gaps().unwrap(), 12);

        assert_eq!(provider.inner.request_count(), 2);
        assert!(!provider.locked_during_request.load(Ordering::SeqCst));
        // The round's samples were written back
        let (_, remaining) = cache.lock().radius_candidates(47.085, 12.675, 300.0).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_lifecycle() {
        let (cache, provider) = shared_cache();
        let mut scheduler = PrefetchScheduler::new(cache, &fast_config());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        let target = PrefetchTarget::with_radius(47.085, 12.675, 1.0, 1500.0).into_handle();
        scheduler.set_target(target.clone());
        scheduler.set_mode(PrefetchMode::SingleTarget);

        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(matches!(
            scheduler.start(),
            Err(TerraError::SchedulerState(SchedulerState::Running))
        ));

        let deadline = Instant::now() + Duration::from_secs(10);
        while !target.lock().is_exhausted() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        scheduler.stop().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(target.lock().is_exhausted());
        assert!(scheduler.stats().rounds > 0);
        assert!(provider.request_count() > 0);

        // Restart after a stop
        scheduler.set_mode(PrefetchMode::Idle);
        scheduler.start().unwrap();
        scheduler.stop().unwrap();
        scheduler.stop().unwrap();
    }
}
