//! Durable job storage.
//!
//! The repository is the single source of truth across coordinator
//! failover. Every mutating operation is atomic and safe to retry:
//! inserts are insert-if-absent, deletes are delete-if-present and
//! execution-record writes never move backwards.

pub mod memory;

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::job::{ExecutionId, JobExecutionRecord, JobId, JobRecord, JobResult};

pub use memory::InMemoryJobRepository;

pub trait JobRepository: Send + Sync {
    /// Generate an id for a new submission.
    fn new_job_id(&self) -> JobId;

    /// Store a job record unless one already exists. Returns true if stored.
    fn put_new_job_record(&self, record: JobRecord) -> bool;

    fn job_record(&self, job_id: JobId) -> Option<JobRecord>;

    fn job_records(&self) -> Vec<JobRecord>;

    fn execution_record(&self, job_id: JobId) -> Option<JobExecutionRecord>;

    /// Store an execution record unless the stored one is newer.
    ///
    /// A record carrying an older execution id is rejected. The stored
    /// quorum size never decreases. Returns true if the write was applied.
    fn write_execution_record(&self, record: JobExecutionRecord) -> bool;

    /// Raise the stored quorum size of an existing execution record.
    fn update_quorum_size_if_smaller(&self, job_id: JobId, quorum_size: usize) -> bool;

    /// Mint a cluster-wide, strictly increasing execution id.
    fn new_execution_id(&self, job_id: JobId) -> ExecutionId;

    /// How many execution ids were minted for the job so far.
    fn execution_id_count(&self, job_id: JobId) -> u64;

    fn job_result(&self, job_id: JobId) -> Option<JobResult>;

    fn job_results(&self) -> Vec<JobResult>;

    fn job_results_by_name(&self, name: &str) -> Vec<JobResult> {
        self.job_results()
            .into_iter()
            .filter(|r| r.job_name == name)
            .collect()
    }

    /// Ids of every job with a record or a result.
    fn all_job_ids(&self) -> Vec<JobId>;

    /// Write the job result, then delete the job and execution records.
    ///
    /// Idempotent: if a result already exists it is returned unchanged.
    fn complete_job(
        &self,
        record: &JobRecord,
        coordinator: Uuid,
        completion_time: DateTime<Utc>,
        failure: Option<ExecutionError>,
    ) -> JobResult;

    /// Delete a job's record and execution record if present.
    fn delete_job(&self, job_id: JobId) -> bool;

    /// Garbage-collect orphaned execution records and old results.
    /// Returns how many entries were removed.
    fn cleanup(&self, now: DateTime<Utc>, result_ttl: Duration, max_results: usize) -> usize;
}
