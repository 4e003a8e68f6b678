/// Metrics for embed extraction
///
/// Tracks per-site outcomes: live hits, snapshot fallbacks, failures, retries

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SiteMetrics {
    pub site: String,
    pub episodes_resolved: u64,
    pub live_successes: u64,
    pub snapshot_fallbacks: u64,
    pub failures: u64,
    pub retry_count: u64,
    pub timeout_count: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SiteMetrics {
    pub fn new(site: String) -> Self {
        Self {
            site,
            episodes_resolved: 0,
            live_successes: 0,
            snapshot_fallbacks: 0,
            failures: 0,
            retry_count: 0,
            timeout_count: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
        }
    }

    /// Share of episodes that came back live, in percent
    pub fn success_rate(&self) -> f64 {
        if self.episodes_resolved == 0 {
            0.0
        } else {
            (self.live_successes as f64 / self.episodes_resolved as f64) * 100.0
        }
    }

    pub fn record_live(&mut self) {
        self.episodes_resolved += 1;
        self.live_successes += 1;
        self.last_success = Some(Utc::now());
    }

    pub fn record_snapshot(&mut self, error: String) {
        self.episodes_resolved += 1;
        self.snapshot_fallbacks += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error);
    }

    pub fn record_failure(&mut self, error: String) {
        self.episodes_resolved += 1;
        self.failures += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error);
    }

    pub fn record_retry(&mut self, timed_out: bool) {
        self.retry_count += 1;
        if timed_out {
            self.timeout_count += 1;
        }
    }
}

/// Shared by every job of the process
#[derive(Default)]
pub struct MetricsTracker {
    metrics: Mutex<HashMap<String, SiteMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SiteMetrics>> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<F: FnOnce(&mut SiteMetrics)>(&self, site: &str, f: F) -> SiteMetrics {
        let mut metrics = self.lock();
        let entry = metrics
            .entry(site.to_string())
            .or_insert_with(|| SiteMetrics::new(site.to_string()));
        f(entry);
        entry.clone()
    }

    pub fn record_live(&self, site: &str) {
        let m = self.update(site, SiteMetrics::record_live);
        log::info!(
            "[{}] Live success - Success rate: {:.2}%",
            site,
            m.success_rate()
        );
    }

    pub fn record_snapshot(&self, site: &str, error: &str) {
        let m = self.update(site, |m| m.record_snapshot(error.to_string()));
        log::warn!(
            "[{}] Served from snapshot - Total fallbacks: {}",
            site,
            m.snapshot_fallbacks
        );
    }

    pub fn record_failure(&self, site: &str, error: &str) {
        let m = self.update(site, |m| m.record_failure(error.to_string()));
        log::warn!(
            "[{}] Failure - Error: {} - Success rate: {:.2}%",
            site,
            error,
            m.success_rate()
        );
    }

    pub fn record_retry(&self, site: &str, timed_out: bool) {
        let m = self.update(site, |m| m.record_retry(timed_out));
        log::debug!("[{}] Retry attempt - Total retries: {}", site, m.retry_count);
    }

    pub fn get_metrics(&self, site: &str) -> Option<SiteMetrics> {
        self.lock().get(site).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<SiteMetrics> {
        let mut all: Vec<SiteMetrics> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.site.cmp(&b.site));
        all
    }
}
