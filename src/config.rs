use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::ProcessingGuarantee;

/// Timing knobs of the job coordination service.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Period of the recovery/GC scan over persisted job records.
    pub scan_period: Duration,
    /// Delay before retrying a start or scale-up that could not proceed.
    pub retry_delay: Duration,
    /// Debounce delay between a data member joining and the scale-up check.
    pub scale_up_delay: Duration,
    /// How long a departed member is remembered for shutdown reconciliation.
    pub removed_member_retention: Duration,
    /// Bounded wait for each remote cluster-metadata request.
    pub metadata_timeout: Duration,
    /// Results older than this are garbage collected.
    pub job_result_ttl: Duration,
    /// Upper bound on retained job results, newest are kept.
    pub max_job_results: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_period: Duration::from_secs(5),
            retry_delay: Duration::from_secs(2),
            scale_up_delay: Duration::from_secs(10),
            removed_member_retention: Duration::from_secs(60 * 60),
            metadata_timeout: Duration::from_secs(5),
            job_result_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            max_job_results: 1000,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_scan_period(mut self, period: Duration) -> Self {
        self.scan_period = period;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_scale_up_delay(mut self, delay: Duration) -> Self {
        self.scale_up_delay = delay;
        self
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    pub fn with_job_result_retention(mut self, ttl: Duration, max_results: usize) -> Self {
        self.job_result_ttl = ttl;
        self.max_job_results = max_results;
        self
    }
}

/// Per-job options, submitted together with the task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Optional unique name. Two active jobs may not share a name.
    pub name: Option<String>,
    /// Require a quorum of data members before the job may run.
    pub split_brain_protection: bool,
    /// Restart automatically on topology changes and scale up when members join.
    pub auto_scaling: bool,
    pub processing_guarantee: ProcessingGuarantee,
    /// Checkpoint interval; ignored without a processing guarantee.
    pub snapshot_interval_ms: u64,
    /// Give up after this many retryable deploy failures in a row.
    /// `None` retries forever.
    pub max_deploy_attempts: Option<u32>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: None,
            split_brain_protection: false,
            auto_scaling: true,
            processing_guarantee: ProcessingGuarantee::None,
            snapshot_interval_ms: 10_000,
            max_deploy_attempts: None,
        }
    }
}

impl JobConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_split_brain_protection(mut self, enabled: bool) -> Self {
        self.split_brain_protection = enabled;
        self
    }

    pub fn with_auto_scaling(mut self, enabled: bool) -> Self {
        self.auto_scaling = enabled;
        self
    }

    pub fn with_processing_guarantee(mut self, guarantee: ProcessingGuarantee) -> Self {
        self.processing_guarantee = guarantee;
        self
    }

    pub fn with_snapshot_interval_ms(mut self, interval_ms: u64) -> Self {
        self.snapshot_interval_ms = interval_ms;
        self
    }

    pub fn with_max_deploy_attempts(mut self, attempts: u32) -> Self {
        self.max_deploy_attempts = Some(attempts);
        self
    }

    /// Snapshots run only with a guarantee and a non-zero interval.
    pub fn snapshot_interval(&self) -> Option<Duration> {
        if self.processing_guarantee == ProcessingGuarantee::None || self.snapshot_interval_ms == 0
        {
            None
        } else {
            Some(Duration::from_millis(self.snapshot_interval_ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_config_default() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.scan_period, Duration::from_secs(5));
        assert_eq!(cfg.retry_delay, Duration::from_secs(2));
        assert_eq!(cfg.scale_up_delay, Duration::from_secs(10));
        assert_eq!(cfg.removed_member_retention, Duration::from_secs(3600));
        assert_eq!(cfg.max_job_results, 1000);
    }

    #[test]
    fn coordinator_config_builders() {
        let cfg = CoordinatorConfig::default()
            .with_scan_period(Duration::from_millis(50))
            .with_retry_delay(Duration::from_millis(20))
            .with_scale_up_delay(Duration::from_millis(30))
            .with_metadata_timeout(Duration::from_millis(40))
            .with_job_result_retention(Duration::from_secs(1), 3);
        assert_eq!(cfg.scan_period, Duration::from_millis(50));
        assert_eq!(cfg.retry_delay, Duration::from_millis(20));
        assert_eq!(cfg.scale_up_delay, Duration::from_millis(30));
        assert_eq!(cfg.metadata_timeout, Duration::from_millis(40));
        assert_eq!(cfg.job_result_ttl, Duration::from_secs(1));
        assert_eq!(cfg.max_job_results, 3);
    }

    #[test]
    fn job_config_default() {
        let cfg = JobConfig::default();
        assert!(cfg.name.is_none());
        assert!(!cfg.split_brain_protection);
        assert!(cfg.auto_scaling);
        assert_eq!(cfg.processing_guarantee, ProcessingGuarantee::None);
        assert!(cfg.max_deploy_attempts.is_none());
    }

    #[test]
    fn snapshot_interval_requires_guarantee() {
        let cfg = JobConfig::default().with_snapshot_interval_ms(100);
        assert!(cfg.snapshot_interval().is_none());

        let cfg = cfg.with_processing_guarantee(ProcessingGuarantee::ExactlyOnce);
        assert_eq!(cfg.snapshot_interval(), Some(Duration::from_millis(100)));

        let cfg = cfg.with_snapshot_interval_ms(0);
        assert!(cfg.snapshot_interval().is_none());
    }

    #[test]
    fn job_config_serde_roundtrip_keeps_name() {
        let cfg = JobConfig::named("etl").with_split_brain_protection(true);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: JobConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
