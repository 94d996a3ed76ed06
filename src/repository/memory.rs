use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::job::{ExecutionId, JobExecutionRecord, JobId, JobRecord, JobResult};
use crate::repository::JobRepository;

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<JobId, JobRecord>,
    execution_records: HashMap<JobId, JobExecutionRecord>,
    results: HashMap<JobId, JobResult>,
    execution_counts: HashMap<JobId, u64>,
    last_execution_id: u64,
}

/// Repository kept in process memory.
///
/// Shared between coordinator instances through an `Arc` it behaves like the
/// replicated store a real cluster would use: a freshly elected coordinator
/// sees everything its predecessor persisted.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    tables: Mutex<Tables>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a result directly, bypassing completion. Used to seed state.
    pub fn put_job_result(&self, result: JobResult) {
        self.tables().results.insert(result.job_id, result);
    }
}

impl JobRepository for InMemoryJobRepository {
    fn new_job_id(&self) -> JobId {
        let tables = self.tables();
        loop {
            let id = JobId::new_random();
            if !tables.records.contains_key(&id) && !tables.results.contains_key(&id) {
                return id;
            }
        }
    }

    fn put_new_job_record(&self, record: JobRecord) -> bool {
        let mut tables = self.tables();
        if tables.records.contains_key(&record.job_id) {
            return false;
        }
        tables.records.insert(record.job_id, record);
        true
    }

    fn job_record(&self, job_id: JobId) -> Option<JobRecord> {
        self.tables().records.get(&job_id).cloned()
    }

    fn job_records(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.tables().records.values().cloned().collect();
        records.sort_by_key(|r| r.creation_time);
        records
    }

    fn execution_record(&self, job_id: JobId) -> Option<JobExecutionRecord> {
        self.tables().execution_records.get(&job_id).cloned()
    }

    fn write_execution_record(&self, mut record: JobExecutionRecord) -> bool {
        let mut tables = self.tables();
        if let Some(stored) = tables.execution_records.get(&record.job_id) {
            if record.execution_id < stored.execution_id {
                tracing::debug!(
                    job_id = %record.job_id,
                    "Ignoring stale execution record write"
                );
                return false;
            }
            record.quorum_size = record.quorum_size.max(stored.quorum_size);
            if record.snapshot_id < stored.snapshot_id {
                record.snapshot_id = stored.snapshot_id;
            }
        }
        tables.execution_records.insert(record.job_id, record);
        true
    }

    fn update_quorum_size_if_smaller(&self, job_id: JobId, quorum_size: usize) -> bool {
        let mut tables = self.tables();
        match tables.execution_records.get_mut(&job_id) {
            Some(record) if record.quorum_size < quorum_size => {
                record.quorum_size = quorum_size;
                true
            }
            _ => false,
        }
    }

    fn new_execution_id(&self, job_id: JobId) -> ExecutionId {
        let mut tables = self.tables();
        tables.last_execution_id += 1;
        let id = tables.last_execution_id;
        *tables.execution_counts.entry(job_id).or_insert(0) += 1;
        ExecutionId::new(id)
    }

    fn execution_id_count(&self, job_id: JobId) -> u64 {
        self.tables()
            .execution_counts
            .get(&job_id)
            .copied()
            .unwrap_or(0)
    }

    fn job_result(&self, job_id: JobId) -> Option<JobResult> {
        self.tables().results.get(&job_id).cloned()
    }

    fn job_results(&self) -> Vec<JobResult> {
        self.tables().results.values().cloned().collect()
    }

    fn all_job_ids(&self) -> Vec<JobId> {
        let tables = self.tables();
        let mut ids: Vec<JobId> = tables
            .records
            .keys()
            .chain(tables.results.keys())
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn complete_job(
        &self,
        record: &JobRecord,
        coordinator: Uuid,
        completion_time: DateTime<Utc>,
        failure: Option<ExecutionError>,
    ) -> JobResult {
        let mut tables = self.tables();
        let job_id = record.job_id;
        if let Some(existing) = tables.results.get(&job_id) {
            return existing.clone();
        }

        let result = JobResult {
            job_id,
            job_name: record.name_or_id(),
            coordinator,
            creation_time: record.creation_time,
            completion_time,
            failure,
        };
        // result first, records after
        tables.results.insert(job_id, result.clone());
        tables.records.remove(&job_id);
        tables.execution_records.remove(&job_id);
        tables.execution_counts.remove(&job_id);
        result
    }

    fn delete_job(&self, job_id: JobId) -> bool {
        let mut tables = self.tables();
        let removed = tables.records.remove(&job_id).is_some();
        tables.execution_records.remove(&job_id);
        tables.execution_counts.remove(&job_id);
        removed
    }

    fn cleanup(&self, now: DateTime<Utc>, result_ttl: Duration, max_results: usize) -> usize {
        let mut tables = self.tables();
        let Tables {
            records,
            execution_records,
            results,
            ..
        } = &mut *tables;

        let before = records.len() + execution_records.len() + results.len();
        // a record left behind by an interrupted completion
        records.retain(|job_id, _| !results.contains_key(job_id));
        execution_records.retain(|job_id, _| records.contains_key(job_id));

        let expiry = chrono::Duration::from_std(result_ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl));
        if let Some(expiry) = expiry {
            results.retain(|_, result| result.completion_time >= expiry);
        }

        if results.len() > max_results {
            let mut by_age: Vec<(JobId, DateTime<Utc>)> = results
                .values()
                .map(|r| (r.job_id, r.completion_time))
                .collect();
            by_age.sort_by_key(|(_, time)| std::cmp::Reverse(*time));
            for (job_id, _) in by_age.into_iter().skip(max_results) {
                results.remove(&job_id);
            }
        }

        let removed = before - (records.len() + execution_records.len() + results.len());
        if removed > 0 {
            tracing::debug!(removed, "Repository cleanup removed stale entries");
        }
        removed
    }
}
