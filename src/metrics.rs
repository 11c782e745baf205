//! # Rolling Metrics Store
//!
//! Process-wide telemetry shared by every relay session:
//!
//! - the most recent round-trip latencies (oldest evicted first)
//! - the most recent error timestamps (oldest evicted first)
//! - the most recent error message
//! - when the last downstream message arrived, and how many have arrived
//!
//! Sessions only append. The health aggregator reads a consistent
//! [`MetricsReading`] taken under a single lock, so a reader never observes a
//! half-applied update.
//!
//! The store is passed around explicitly as `Arc<RollingMetrics>`; there is no
//! global instance.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Samples kept in each rolling window.
pub const WINDOW_CAPACITY: usize = 100;

/// Errors older than this no longer count toward `errors_past_minute`.
pub const ERROR_HORIZON: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RollingMetrics {
    inner: Mutex<Windows>,
}

#[derive(Debug)]
struct Windows {
    capacity: usize,
    latencies_ms: VecDeque<f64>,
    error_times: VecDeque<Instant>,
    last_error: Option<String>,
    last_message_at: Option<Instant>,
    messages_received: u64,
}

/// A point-in-time view of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsReading {
    pub latency_ms_avg: f64,
    pub latency_ms_max: f64,
    pub errors_past_minute: usize,
    pub last_error: Option<String>,
    pub last_message_at: Option<Instant>,
    pub messages_received: u64,
}

impl Default for RollingMetrics {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY)
    }
}

impl RollingMetrics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Windows {
                capacity,
                latencies_ms: VecDeque::with_capacity(capacity),
                error_times: VecDeque::with_capacity(capacity),
                last_error: None,
                last_message_at: None,
                messages_received: 0,
            }),
        }
    }

    /// Record one round trip: prediction arrival to upstream delivery.
    pub fn record_latency(&self, latency: Duration) {
        self.record_latency_ms(latency.as_secs_f64() * 1000.0);
    }

    pub fn record_latency_ms(&self, latency_ms: f64) {
        let mut windows = self.inner.lock();
        let capacity = windows.capacity;
        push_bounded(&mut windows.latencies_ms, latency_ms, capacity);
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.record_error_at(Instant::now(), message);
    }

    pub fn record_error_at(&self, at: Instant, message: impl Into<String>) {
        let mut windows = self.inner.lock();
        let capacity = windows.capacity;
        push_bounded(&mut windows.error_times, at, capacity);
        windows.last_error = Some(message.into());
    }

    /// Note that a downstream message arrived.
    pub fn record_message(&self) {
        self.record_message_at(Instant::now());
    }

    pub fn record_message_at(&self, at: Instant) {
        let mut windows = self.inner.lock();
        windows.last_message_at = Some(at);
        windows.messages_received += 1;
    }

    /// Everything the health snapshot needs, evaluated against `now`.
    pub fn reading_at(&self, now: Instant) -> MetricsReading {
        let windows = self.inner.lock();

        let latency_ms_avg = if windows.latencies_ms.is_empty() {
            0.0
        } else {
            windows.latencies_ms.iter().sum::<f64>() / windows.latencies_ms.len() as f64
        };
        let latency_ms_max = windows.latencies_ms.iter().copied().fold(0.0, f64::max);

        // An error exactly ERROR_HORIZON old has already aged out.
        let errors_past_minute = windows
            .error_times
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < ERROR_HORIZON)
            .count();

        MetricsReading {
            latency_ms_avg,
            latency_ms_max,
            errors_past_minute,
            last_error: windows.last_error.clone(),
            last_message_at: windows.last_message_at,
            messages_received: windows.messages_received,
        }
    }
}

#[cfg(test)]
impl RollingMetrics {
    pub(crate) fn reading(&self) -> MetricsReading {
        self.reading_at(Instant::now())
    }

    pub(crate) fn latency_samples(&self) -> usize {
        self.inner.lock().latencies_ms.len()
    }

    pub(crate) fn error_samples(&self) -> usize {
        self.inner.lock().error_times.len()
    }
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, capacity: usize) {
    if window.len() == capacity {
        window.pop_front();
    }
    window.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_store_reads_zero() {
        let metrics = RollingMetrics::default();
        let reading = metrics.reading();
        assert_eq!(reading.latency_ms_avg, 0.0);
        assert_eq!(reading.latency_ms_max, 0.0);
        assert_eq!(reading.errors_past_minute, 0);
        assert!(reading.last_error.is_none());
        assert!(reading.last_message_at.is_none());
        assert_eq!(reading.messages_received, 0);
    }

    #[test]
    fn test_latency_average_and_max() {
        let metrics = RollingMetrics::default();
        for ms in [10.0, 20.0, 60.0] {
            metrics.record_latency_ms(ms);
        }
        let reading = metrics.reading();
        assert!((reading.latency_ms_avg - 30.0).abs() < 1e-9);
        assert_eq!(reading.latency_ms_max, 60.0);
    }

    #[test]
    fn test_latency_window_evicts_oldest() {
        let metrics = RollingMetrics::default();
        // A huge first sample, then 100 small ones push it out
        metrics.record_latency_ms(10_000.0);
        for _ in 0..WINDOW_CAPACITY {
            metrics.record_latency_ms(5.0);
        }

        assert_eq!(metrics.latency_samples(), WINDOW_CAPACITY);
        let reading = metrics.reading();
        assert_eq!(reading.latency_ms_max, 5.0);
        assert!((reading.latency_ms_avg - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_window_is_bounded() {
        let metrics = RollingMetrics::default();
        let now = Instant::now();
        for i in 0..(WINDOW_CAPACITY + 1) {
            metrics.record_error_at(now, format!("error {}", i));
        }
        assert_eq!(metrics.error_samples(), WINDOW_CAPACITY);

        let reading = metrics.reading_at(now);
        assert_eq!(reading.errors_past_minute, WINDOW_CAPACITY);
        assert_eq!(reading.last_error.as_deref(), Some("error 100"));
    }

    #[test]
    fn test_errors_at_horizon_are_excluded() {
        let metrics = RollingMetrics::default();
        let start = Instant::now();
        metrics.record_error_at(start, "old");
        metrics.record_error_at(start + Duration::from_secs(1), "newer");

        let reading = metrics.reading_at(start + Duration::from_millis(59_999));
        assert_eq!(reading.errors_past_minute, 2);

        // The first error is now exactly 60 s old
        let reading = metrics.reading_at(start + ERROR_HORIZON);
        assert_eq!(reading.errors_past_minute, 1);

        let reading = metrics.reading_at(start + Duration::from_secs(61));
        assert_eq!(reading.errors_past_minute, 0);
        assert_eq!(reading.last_error.as_deref(), Some("newer"));
    }

    #[test]
    fn test_message_arrivals() {
        let metrics = RollingMetrics::default();
        let at = Instant::now();
        metrics.record_message_at(at);
        metrics.record_message_at(at + Duration::from_millis(40));

        let reading = metrics.reading();
        assert_eq!(reading.messages_received, 2);
        assert_eq!(reading.last_message_at, Some(at + Duration::from_millis(40)));
    }

    #[test]
    fn test_concurrent_writers_never_exceed_capacity() {
        let metrics = Arc::new(RollingMetrics::default());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        metrics.record_latency_ms((worker * 1000 + i) as f64);
                        metrics.record_error(format!("worker {}", worker));
                        metrics.record_message();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.latency_samples(), WINDOW_CAPACITY);
        assert_eq!(metrics.error_samples(), WINDOW_CAPACITY);
        assert_eq!(metrics.reading().messages_received, 4000);
    }
}
