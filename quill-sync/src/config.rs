//! Coordinator configuration.
//!
//! Every tunable lives here, constructed once at startup and passed to the
//! coordinator, instead of being read from the environment at call sites.

use std::time::Duration;

use crate::sanitize::SanitizeLimits;

/// Configuration for the synchronization coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sanitized markdown byte length above which content is never saved
    /// inline; only a rate-limited oversize notice goes to the store.
    pub oversize_threshold_bytes: usize,
    /// Minimum byte-size change between consecutive oversize notices.
    pub oversize_report_delta_bytes: usize,
    /// Minimum interval between consecutive oversize notices for one
    /// document when the size stayed within the delta.
    pub oversize_report_interval: Duration,
    /// Throttling window for transient-error logging, keyed by
    /// (document, phase).
    pub error_log_interval: Duration,
    /// Length guards for the corruption sanitizer.
    pub limits: SanitizeLimits,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            oversize_threshold_bytes: 900 * 1024, // 921_600
            oversize_report_delta_bytes: 8 * 1024,
            oversize_report_interval: Duration::from_secs(15),
            error_log_interval: Duration::from_secs(30),
            limits: SanitizeLimits::default(),
        }
    }
}

impl SyncConfig {
    /// Config for testing: tiny throttle windows so rate-limit paths can be
    /// exercised without sleeping through production intervals.
    pub fn for_testing() -> Self {
        Self {
            oversize_report_interval: Duration::from_millis(50),
            error_log_interval: Duration::from_millis(50),
            ..Self::default()
        }
    }
}
