use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Counters for driver and pool lifecycle transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleMetrics {
    pub registrations: u64,
    pub registration_failures: u64,
    pub unloads: u64,
    pub bootstrap_loaded: u64,
    pub bootstrap_failures: u64,
    pub pools_created: u64,
    pub pools_closed: u64,
}

#[derive(Debug, Clone)]
pub struct ProbeMetrics {
    pub test_count: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub total_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub latency_samples: Vec<Duration>,
}

impl Default for ProbeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeMetrics {
    pub fn new() -> Self {
        Self {
            test_count: 0,
            failures: 0,
            timeouts: 0,
            total_latency: Duration::ZERO,
            min_latency: Duration::MAX,
            max_latency: Duration::ZERO,
            latency_samples: Vec::new(),
        }
    }

    pub fn record(&mut self, latency: Duration, outcome: ProbeOutcome) {
        self.test_count += 1;
        match outcome {
            ProbeOutcome::Success => {}
            ProbeOutcome::Failure => self.failures += 1,
            ProbeOutcome::Timeout => {
                self.failures += 1;
                self.timeouts += 1;
            }
        }
        self.total_latency += latency;
        if latency < self.min_latency {
            self.min_latency = latency;
        }
        if latency > self.max_latency {
            self.max_latency = latency;
        }
        self.latency_samples.push(latency);
        if self.latency_samples.len() > 1000 {
            self.latency_samples.remove(0);
        }
    }

    pub fn average_latency(&self) -> Duration {
        if self.test_count == 0 {
            return Duration::ZERO;
        }
        self.total_latency / self.test_count as u32
    }

    pub fn percentile(&self, p: f64) -> Duration {
        if self.latency_samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted = self.latency_samples.clone();
        sorted.sort();
        let index = ((sorted.len() - 1) as f64 * p / 100.0) as usize;
        sorted[index]
    }

    pub fn p95(&self) -> Duration {
        self.percentile(95.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
    Timeout,
}

pub struct Metrics {
    lifecycle: Arc<Mutex<LifecycleMetrics>>,
    probe: Arc<Mutex<ProbeMetrics>>,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            lifecycle: Arc::new(Mutex::new(LifecycleMetrics::default())),
            probe: Arc::new(Mutex::new(ProbeMetrics::new())),
            start_time: Instant::now(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut LifecycleMetrics)) {
        if let Ok(mut m) = self.lifecycle.lock() {
            f(&mut m);
        }
    }

    pub fn record_registration(&self, success: bool) {
        self.update(|m| {
            if success {
                m.registrations += 1;
            } else {
                m.registration_failures += 1;
            }
        });
    }

    pub fn record_unload(&self) {
        self.update(|m| m.unloads += 1);
    }

    pub fn record_bootstrap(&self, loaded: usize, failed: usize) {
        self.update(|m| {
            m.bootstrap_loaded += loaded as u64;
            m.bootstrap_failures += failed as u64;
        });
    }

    pub fn record_pool_created(&self) {
        self.update(|m| m.pools_created += 1);
    }

    pub fn record_pool_closed(&self) {
        self.update(|m| m.pools_closed += 1);
    }

    pub fn record_connection_test(&self, latency: Duration, outcome: ProbeOutcome) {
        if let Ok(mut probe) = self.probe.lock() {
            probe.record(latency, outcome);
        }
    }

    pub fn get_lifecycle_metrics(&self) -> LifecycleMetrics {
        self.lifecycle
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_probe_metrics(&self) -> ProbeMetrics {
        self.probe
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|_| ProbeMetrics::new())
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_counters() {
        let metrics = Metrics::new();
        metrics.record_registration(true);
        metrics.record_registration(true);
        metrics.record_registration(false);
        metrics.record_unload();
        metrics.record_bootstrap(3, 1);
        metrics.record_pool_created();
        metrics.record_pool_closed();

        let m = metrics.get_lifecycle_metrics();
        assert_eq!(m.registrations, 2);
        assert_eq!(m.registration_failures, 1);
        assert_eq!(m.unloads, 1);
        assert_eq!(m.bootstrap_loaded, 3);
        assert_eq!(m.bootstrap_failures, 1);
        assert_eq!(m.pools_created, 1);
        assert_eq!(m.pools_closed, 1);
    }

    #[test]
    fn test_probe_metrics_outcomes() {
        let metrics = Metrics::new();
        metrics.record_connection_test(Duration::from_millis(10), ProbeOutcome::Success);
        metrics.record_connection_test(Duration::from_millis(30), ProbeOutcome::Failure);
        metrics.record_connection_test(Duration::from_millis(5000), ProbeOutcome::Timeout);

        let p = metrics.get_probe_metrics();
        assert_eq!(p.test_count, 3);
        assert_eq!(p.failures, 2);
        assert_eq!(p.timeouts, 1);
        assert_eq!(p.min_latency, Duration::from_millis(10));
        assert_eq!(p.max_latency, Duration::from_millis(5000));
        assert_eq!(p.p95(), Duration::from_millis(30));
    }

    #[test]
    fn test_probe_metrics_empty() {
        let p = ProbeMetrics::new();
        assert_eq!(p.average_latency(), Duration::ZERO);
        assert_eq!(p.percentile(50.0), Duration::ZERO);
    }

    #[test]
    fn test_probe_sample_window_bounded() {
        let mut p = ProbeMetrics::new();
        for i in 0..1100 {
            p.record(Duration::from_millis(i), ProbeOutcome::Success);
        }
        assert_eq!(p.latency_samples.len(), 1000);
        assert_eq!(p.test_count, 1100);
    }
}
