//! Job submission: create the tracker row, spawn the runner, return the id.
//!
//! Submission is decoupled from execution: the caller gets the task id back
//! immediately and polls the tracker through the reader connection. Two jobs
//! against the *same* device must not run concurrently (sessions are not
//! shareable); serializing them is the caller's obligation, the queue itself
//! only dispatches.

use std::sync::Arc;

use uuid::Uuid;

use crate::device::SessionFactory;
use crate::error::{Error, Result};
use crate::storage::{repository, Database};

use super::runner::{run_job, JobContext};
use super::{JobOptions, JobType};

/// Dispatches sync jobs onto the tokio runtime.
#[derive(Clone)]
pub struct JobQueue {
    ctx: JobContext,
}

impl JobQueue {
    pub fn new(db: Database, sessions: Arc<dyn SessionFactory>) -> Self {
        Self {
            ctx: JobContext { db, sessions },
        }
    }

    /// Create a pending tracker row for `job_type` against `device_id` and
    /// spawn the job. Returns the opaque task id for status polling.
    pub async fn submit(
        &self,
        job_type: JobType,
        device_id: i64,
        owner: &str,
        options: JobOptions,
    ) -> Result<String> {
        let device = self
            .ctx
            .db
            .reader()
            .call(move |conn| repository::get_device(conn, device_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("device {device_id}")))?;

        let task_id = Uuid::new_v4().to_string();
        let message = format!("Queuing {} for {}...", job_type.label(), device.name);
        {
            let (task_id, owner, message) =
                (task_id.clone(), owner.to_string(), message.clone());
            self.ctx
                .db
                .writer()
                .call(move |conn| {
                    repository::insert_sync_job(
                        conn,
                        &task_id,
                        job_type,
                        &owner,
                        Some(device_id),
                        &message,
                    )
                })
                .await?;
        }

        log::info!(
            "Queued {} job {task_id} for device {} ({})",
            job_type.as_str(),
            device.name,
            device_id
        );
        tokio::spawn(run_job(
            self.ctx.clone(),
            task_id.clone(),
            job_type,
            device_id,
            options,
        ));

        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::FakeDevice;
    use crate::jobs::tracker::JobTracker;
    use crate::jobs::{JobRecord, JobStatus};
    use std::time::Duration;

    async fn wait_finished(db: &Database, task_id: &str) -> JobRecord {
        let tracker = JobTracker::new(db.clone(), task_id);
        for _ in 0..500 {
            if let Some(record) = tracker.load().await.unwrap() {
                if record.is_finished() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {task_id} did not finish");
    }

    #[tokio::test]
    async fn test_submit_returns_immediately_and_job_completes() {
        let db = Database::open_memory().await.unwrap();
        let device_id = db
            .writer()
            .call(|conn| {
                repository::insert_device(conn, "Front door", "192.0.2.10", 4370, false, false, 0)
            })
            .await
            .unwrap();

        let fake = FakeDevice::new().with_user(1, "John Doe", 0, "", "EMP001");
        let queue = JobQueue::new(db.clone(), Arc::new(fake));

        let task_id = queue
            .submit(JobType::SyncFromDevice, device_id, "admin", JobOptions::default())
            .await
            .unwrap();
        assert!(!task_id.is_empty());

        let record = wait_finished(&db, &task_id).await;
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.owner, "admin");
        assert_eq!(record.progress_percentage, 100);
    }

    #[tokio::test]
    async fn test_submit_unknown_device_fails_fast() {
        let db = Database::open_memory().await.unwrap();
        let queue = JobQueue::new(db, Arc::new(FakeDevice::new()));

        let result = queue
            .submit(JobType::SyncToDevice, 42, "admin", JobOptions::default())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_job_reaches_failed_through_polling() {
        let db = Database::open_memory().await.unwrap();
        let device_id = db
            .writer()
            .call(|conn| {
                repository::insert_device(conn, "Broken", "192.0.2.99", 4370, false, false, 0)
            })
            .await
            .unwrap();

        let fake = FakeDevice::new();
        fake.fail_connect(true);
        let queue = JobQueue::new(db.clone(), Arc::new(fake));

        let task_id = queue
            .submit(JobType::DownloadAttendance, device_id, "admin", JobOptions::default())
            .await
            .unwrap();

        let record = wait_finished(&db, &task_id).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.message.starts_with("Fatal error:"));
    }
}
