//! Queue observability through an injected recorder.
//!
//! The queue never talks to a metrics backend directly: it is handed a
//! [`Recorder`] at construction and creates one typed handle per metric slot.
//! [`MetricsRecorder`] forwards to the `metrics` facade crate so any installed
//! exporter picks the values up; [`NullRecorder`] discards everything and is
//! the default.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency.
pub mod names {
    /// Time spent in the atomic enqueue pipeline.
    pub const PUSH_SECONDS: &str = "redq_push_duration_seconds";
    /// Time spent blocked on the ready-list pop.
    pub const IDLE_SECONDS: &str = "redq_idle_duration_seconds";
    /// Time spent submitting a document to the handler pool.
    pub const EXECUTE_WAIT_SECONDS: &str = "redq_execute_wait_duration_seconds";
    /// Time spent restoring an unlocked in-flight document to the ready list.
    pub const RESTORE_BLOCKED_SECONDS: &str = "redq_restore_blocked_duration_seconds";
    /// Length of the ready list, refreshed at most every 15 seconds.
    pub const READY_LENGTH: &str = "redq_ready_length";
    /// Documents that could not be encoded or decoded.
    pub const SERIALIZATION_ERRORS: &str = "redq_serialization_errors_total";
}

/// Sink for the queue's metric observations.
pub trait Recorder: Send + Sync {
    /// Record one timed observation, in seconds.
    fn record_duration(&self, name: &'static str, seconds: f64);

    /// Add to a monotonic counter.
    fn increment_counter(&self, name: &'static str, value: u64);

    /// Set a gauge to an absolute value.
    fn record_gauge(&self, name: &'static str, value: f64);
}

/// Recorder backed by the `metrics` facade crate.
pub struct MetricsRecorder;

impl Recorder for MetricsRecorder {
    fn record_duration(&self, name: &'static str, seconds: f64) {
        metrics::histogram!(name).record(seconds);
    }

    fn increment_counter(&self, name: &'static str, value: u64) {
        metrics::counter!(name).increment(value);
    }

    fn record_gauge(&self, name: &'static str, value: f64) {
        metrics::gauge!(name).set(value);
    }
}

/// Recorder that drops every observation.
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn record_duration(&self, _name: &'static str, _seconds: f64) {}
    fn increment_counter(&self, _name: &'static str, _value: u64) {}
    fn record_gauge(&self, _name: &'static str, _value: f64) {}
}

/// Handle for one named duration metric.
#[derive(Clone)]
pub struct TimerHandle {
    name: &'static str,
    recorder: Arc<dyn Recorder>,
}

impl TimerHandle {
    fn new(name: &'static str, recorder: Arc<dyn Recorder>) -> Self {
        Self { name, recorder }
    }

    /// Start timing; the elapsed duration is recorded when the guard drops.
    pub fn start(&self) -> TimerGuard {
        TimerGuard {
            name: self.name,
            recorder: Arc::clone(&self.recorder),
            started: Instant::now(),
        }
    }
}

/// Records the elapsed time since [`TimerHandle::start`] on drop.
pub struct TimerGuard {
    name: &'static str,
    recorder: Arc<dyn Recorder>,
    started: Instant,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.recorder
            .record_duration(self.name, self.started.elapsed().as_secs_f64());
    }
}

/// Handle for one named counter.
#[derive(Clone)]
pub struct CounterHandle {
    name: &'static str,
    recorder: Arc<dyn Recorder>,
}

impl CounterHandle {
    fn new(name: &'static str, recorder: Arc<dyn Recorder>) -> Self {
        Self { name, recorder }
    }

    pub fn increment(&self, value: u64) {
        self.recorder.increment_counter(self.name, value);
    }
}

/// Gauge whose refreshes are rate-limited to a minimum interval.
///
/// The ready-list length is loaded with an extra store round-trip, so the
/// scan loop only reloads it when at least the configured interval has passed
/// since the previous refresh.
pub struct CachedGauge {
    name: &'static str,
    recorder: Arc<dyn Recorder>,
    min_interval: Duration,
    last_refresh: Mutex<Option<Instant>>,
}

impl CachedGauge {
    fn new(name: &'static str, recorder: Arc<dyn Recorder>, min_interval: Duration) -> Self {
        Self {
            name,
            recorder,
            min_interval,
            last_refresh: Mutex::new(None),
        }
    }

    /// Whether enough time has passed for another refresh. A `true` answer
    /// marks the refresh as taken.
    pub fn refresh_due(&self) -> bool {
        let mut last = self.last_refresh.lock().expect("gauge clock poisoned");
        match *last {
            Some(at) if at.elapsed() < self.min_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    pub fn set(&self, value: f64) {
        self.recorder.record_gauge(self.name, value);
    }
}

/// The typed metric handles of one queue instance.
pub(crate) struct QueueMetrics {
    pub(crate) push: TimerHandle,
    pub(crate) idle: TimerHandle,
    pub(crate) execute_wait: TimerHandle,
    pub(crate) restore_blocked: TimerHandle,
    pub(crate) serialization_errors: CounterHandle,
    pub(crate) ready_length: CachedGauge,
}

const READY_LENGTH_REFRESH: Duration = Duration::from_secs(15);

impl QueueMetrics {
    pub(crate) fn new(recorder: Arc<dyn Recorder>) -> Self {
        Self {
            push: TimerHandle::new(names::PUSH_SECONDS, Arc::clone(&recorder)),
            idle: TimerHandle::new(names::IDLE_SECONDS, Arc::clone(&recorder)),
            execute_wait: TimerHandle::new(names::EXECUTE_WAIT_SECONDS, Arc::clone(&recorder)),
            restore_blocked: TimerHandle::new(
                names::RESTORE_BLOCKED_SECONDS,
                Arc::clone(&recorder),
            ),
            serialization_errors: CounterHandle::new(
                names::SERIALIZATION_ERRORS,
                Arc::clone(&recorder),
            ),
            ready_length: CachedGauge::new(names::READY_LENGTH, recorder, READY_LENGTH_REFRESH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingRecorder {
        durations: AtomicU64,
        counts: AtomicU64,
        gauges: AtomicU64,
    }

    impl Recorder for CountingRecorder {
        fn record_duration(&self, _name: &'static str, _seconds: f64) {
            self.durations.fetch_add(1, Ordering::SeqCst);
        }

        fn increment_counter(&self, _name: &'static str, value: u64) {
            self.counts.fetch_add(value, Ordering::SeqCst);
        }

        fn record_gauge(&self, _name: &'static str, _value: f64) {
            self.gauges.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn timer_guard_records_on_drop() {
        let recorder = Arc::new(CountingRecorder::default());
        let timer = TimerHandle::new("test_timer", recorder.clone());
        {
            let _guard = timer.start();
        }
        assert_eq!(recorder.durations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn counter_increments() {
        let recorder = Arc::new(CountingRecorder::default());
        let counter = CounterHandle::new("test_counter", recorder.clone());
        counter.increment(3);
        assert_eq!(recorder.counts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cached_gauge_rate_limits_refreshes() {
        let recorder = Arc::new(CountingRecorder::default());
        let gauge = CachedGauge::new("test_gauge", recorder.clone(), Duration::from_secs(60));
        assert!(gauge.refresh_due());
        gauge.set(3.0);
        assert!(!gauge.refresh_due());
        assert_eq!(recorder.gauges.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cached_gauge_immediate_interval() {
        let recorder = Arc::new(CountingRecorder::default());
        let gauge = CachedGauge::new("test_gauge", recorder, Duration::from_secs(0));
        assert!(gauge.refresh_due());
        assert!(gauge.refresh_due());
    }
}
