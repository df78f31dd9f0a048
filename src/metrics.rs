//! Per-channel sliding-window metrics and circuit-breaker state.
//!
//! Grounded on the same `Arc<RwLock<HashMap<..>>>` shape as the channel
//! manager's failed-key table, generalized from a single global counter to
//! one windowed record set per channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
struct WindowSample {
    timestamp: SystemTime,
    success: bool,
    latency_ms: u64,
    input_tokens: i64,
    output_tokens: i64,
    cache_tokens: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelMetricsSnapshot {
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_tokens: i64,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
    pub consecutive_failures: u32,
    pub circuit_broken: bool,
    pub last_success_at: Option<SystemTime>,
    pub last_failure_at: Option<SystemTime>,
}

struct ChannelMetrics {
    window: VecDeque<WindowSample>,
    request_count: u64,
    success_count: u64,
    failure_count: u64,
    input_tokens: i64,
    output_tokens: i64,
    cache_tokens: i64,
    consecutive_failures: u32,
    circuit_broken: bool,
    last_success_at: Option<SystemTime>,
    last_failure_at: Option<SystemTime>,
}

impl Default for ChannelMetrics {
    fn default() -> Self {
        Self {
            window: VecDeque::new(),
            request_count: 0,
            success_count: 0,
            failure_count: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_tokens: 0,
            consecutive_failures: 0,
            circuit_broken: false,
            last_success_at: None,
            last_failure_at: None,
        }
    }
}

const WINDOW_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

pub struct MetricsManager {
    window_size: usize,
    failure_threshold: f64,
    channels: RwLock<HashMap<String, ChannelMetrics>>,
}

impl MetricsManager {
    pub fn new(window_size: usize, failure_threshold: f64) -> Arc<Self> {
        Arc::new(Self {
            window_size: window_size.max(3),
            failure_threshold,
            channels: RwLock::new(HashMap::new()),
        })
    }

    pub fn record_result(
        &self,
        channel_id: &str,
        success: bool,
        latency_ms: u64,
        input_tokens: i64,
        output_tokens: i64,
        cache_tokens: i64,
    ) -> bool {
        let mut channels = self.channels.write().unwrap();
        let metrics = channels.entry(channel_id.to_string()).or_default();

        let now = SystemTime::now();
        metrics.window.push_back(WindowSample {
            timestamp: now,
            success,
            latency_ms,
            input_tokens,
            output_tokens,
            cache_tokens,
        });
        while metrics.window.len() > self.window_size {
            metrics.window.pop_front();
        }

        metrics.request_count += 1;
        metrics.input_tokens += input_tokens;
        metrics.output_tokens += output_tokens;
        metrics.cache_tokens += cache_tokens;

        if success {
            metrics.success_count += 1;
            metrics.consecutive_failures = 0;
            metrics.last_success_at = Some(now);
        } else {
            metrics.failure_count += 1;
            metrics.consecutive_failures += 1;
            metrics.last_failure_at = Some(now);
        }

        if Self::failure_rate_high(&metrics.window, self.failure_threshold) {
            metrics.circuit_broken = true;
        }

        metrics.circuit_broken
    }

    /// Failure rate over the window is high when at least 3 samples are
    /// present and the failure ratio meets or exceeds `threshold`.
    /// `consecutiveFailures` alone never trips the breaker — window policy
    /// only, per how this codebase's tests pin the behaviour.
    fn failure_rate_high(window: &VecDeque<WindowSample>, threshold: f64) -> bool {
        if window.len() < 3 {
            return false;
        }
        let failures = window.iter().filter(|s| !s.success).count();
        (failures as f64 / window.len() as f64) >= threshold
    }

    pub fn is_failure_rate_high(&self, channel_id: &str) -> bool {
        let channels = self.channels.read().unwrap();
        channels
            .get(channel_id)
            .map(|m| Self::failure_rate_high(&m.window, self.failure_threshold))
            .unwrap_or(false)
    }

    pub fn is_circuit_broken(&self, channel_id: &str) -> bool {
        self.channels
            .read()
            .unwrap()
            .get(channel_id)
            .map(|m| m.circuit_broken)
            .unwrap_or(false)
    }

    /// Clears the breaker flag without touching history. Breakers never
    /// auto re-close; this is the only way a channel becomes schedulable
    /// again once tripped.
    pub fn reset_circuit(&self, channel_id: &str) {
        if let Some(metrics) = self.channels.write().unwrap().get_mut(channel_id) {
            metrics.circuit_broken = false;
        }
    }

    pub fn snapshot(&self, channel_id: &str) -> ChannelMetricsSnapshot {
        let channels = self.channels.read().unwrap();
        let Some(metrics) = channels.get(channel_id) else {
            return ChannelMetricsSnapshot::default();
        };

        let window_len = metrics.window.len();
        let window_successes = metrics.window.iter().filter(|s| s.success).count();
        let window_cache_hits = metrics.window.iter().filter(|s| s.cache_tokens > 0).count();
        let avg_latency_ms = if window_len == 0 {
            0.0
        } else {
            metrics.window.iter().map(|s| s.latency_ms).sum::<u64>() as f64 / window_len as f64
        };

        ChannelMetricsSnapshot {
            request_count: metrics.request_count,
            success_count: metrics.success_count,
            failure_count: metrics.failure_count,
            input_tokens: metrics.input_tokens,
            output_tokens: metrics.output_tokens,
            cache_tokens: metrics.cache_tokens,
            success_rate: if window_len == 0 {
                0.0
            } else {
                window_successes as f64 / window_len as f64
            },
            cache_hit_rate: if window_len == 0 {
                0.0
            } else {
                window_cache_hits as f64 / window_len as f64
            },
            avg_latency_ms,
            consecutive_failures: metrics.consecutive_failures,
            circuit_broken: metrics.circuit_broken,
            last_success_at: metrics.last_success_at,
            last_failure_at: metrics.last_failure_at,
        }
    }

    /// Age sweep: drop window samples older than 24h. Intended to run
    /// periodically (default every 5 minutes) alongside the other
    /// per-manager sweepers.
    pub fn sweep_aged_samples(&self) {
        let now = SystemTime::now();
        let mut channels = self.channels.write().unwrap();
        for metrics in channels.values_mut() {
            metrics
                .window
                .retain(|s| now.duration_since(s.timestamp).unwrap_or_default() < WINDOW_MAX_AGE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_trips_on_failure_rate_and_resets_without_clearing_history() {
        let metrics = MetricsManager::new(10, 0.5);
        for i in 0..9 {
            let success = i >= 5; // 5 failures, 4 successes
            metrics.record_result("c1", success, 10, 1, 1, 0);
        }
        assert!(metrics.is_failure_rate_high("c1"));
        assert!(metrics.is_circuit_broken("c1"));

        metrics.reset_circuit("c1");
        assert!(!metrics.is_circuit_broken("c1"));
        let snap = metrics.snapshot("c1");
        assert_eq!(snap.request_count, 9);
    }

    #[test]
    fn success_clears_consecutive_failures() {
        let metrics = MetricsManager::new(10, 0.5);
        metrics.record_result("c1", false, 10, 0, 0, 0);
        metrics.record_result("c1", false, 10, 0, 0, 0);
        assert_eq!(metrics.snapshot("c1").consecutive_failures, 2);
        metrics.record_result("c1", true, 10, 1, 1, 0);
        assert_eq!(metrics.snapshot("c1").consecutive_failures, 0);
    }

    #[test]
    fn fewer_than_three_samples_never_trips_breaker() {
        let metrics = MetricsManager::new(10, 0.5);
        metrics.record_result("c1", false, 10, 0, 0, 0);
        metrics.record_result("c1", false, 10, 0, 0, 0);
        assert!(!metrics.is_circuit_broken("c1"));
    }
}
