//! Persisted, pollable progress record for one background job.
//!
//! Every mutator runs as a single closure on the serialized writer
//! connection, so a poller reading through the reader connection never
//! observes a half-applied update. Terminal states are final: once a job is
//! completed, failed, or cancelled, further writes are no-ops.

use crate::error::Result;
use crate::storage::{repository, Database};

use super::JobRecord;

/// Handle to one `sync_jobs` row.
#[derive(Clone)]
pub struct JobTracker {
    db: Database,
    task_id: String,
}

impl JobTracker {
    pub fn new(db: Database, task_id: impl Into<String>) -> Self {
        Self {
            db,
            task_id: task_id.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// pending -> running, stamping `started_at`.
    pub async fn mark_running(&self) -> Result<()> {
        let task_id = self.task_id.clone();
        self.db
            .writer()
            .call(move |conn| repository::job_mark_running(conn, &task_id))
            .await?;
        Ok(())
    }

    /// Update counters and optionally the message. `total` is sticky: it is
    /// only overwritten when supplied. The percentage is recomputed only
    /// while the effective total is positive.
    pub async fn update_progress(
        &self,
        current: i64,
        total: Option<i64>,
        message: Option<&str>,
    ) -> Result<()> {
        let task_id = self.task_id.clone();
        let message = message.map(|s| s.to_string());
        self.db
            .writer()
            .call(move |conn| {
                repository::job_update_progress(conn, &task_id, current, total, message.as_deref())
            })
            .await?;
        Ok(())
    }

    /// Append one entry to the error list and bump the error counter.
    pub async fn add_error(&self, detail: impl Into<String>) -> Result<()> {
        let task_id = self.task_id.clone();
        let detail = detail.into();
        self.db
            .writer()
            .call(move |conn| repository::job_add_error(conn, &task_id, &detail))
            .await?;
        Ok(())
    }

    /// Store the final success/error counters.
    pub async fn set_result_counts(&self, success: i64, errors: i64) -> Result<()> {
        let task_id = self.task_id.clone();
        self.db
            .writer()
            .call(move |conn| repository::job_set_result_counts(conn, &task_id, success, errors))
            .await?;
        Ok(())
    }

    /// Terminal success: stamps `completed_at` and forces the bar to 100.
    pub async fn mark_completed(&self, message: impl Into<String>) -> Result<()> {
        let task_id = self.task_id.clone();
        let message = message.into();
        self.db
            .writer()
            .call(move |conn| repository::job_mark_completed(conn, &task_id, &message))
            .await?;
        Ok(())
    }

    /// Terminal failure: stamps `completed_at`; the percentage stays where
    /// it was.
    pub async fn mark_failed(&self, message: impl Into<String>) -> Result<()> {
        let task_id = self.task_id.clone();
        let message = message.into();
        self.db
            .writer()
            .call(move |conn| repository::job_mark_failed(conn, &task_id, &message))
            .await?;
        Ok(())
    }

    /// Current row state, as a poller would see it.
    pub async fn load(&self) -> Result<Option<JobRecord>> {
        let task_id = self.task_id.clone();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::get_sync_job(conn, &task_id))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, JobType};

    async fn tracker_with_job(task_id: &str) -> JobTracker {
        let db = Database::open_memory().await.unwrap();
        let id = task_id.to_string();
        db.writer()
            .call(move |conn| {
                repository::insert_sync_job(conn, &id, JobType::SyncToDevice, "admin", None, "")
            })
            .await
            .unwrap();
        JobTracker::new(db, task_id)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let tracker = tracker_with_job("t1").await;

        let record = tracker.load().await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert!(record.started_at.is_none());

        tracker.mark_running().await.unwrap();
        let record = tracker.load().await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert!(record.started_at.is_some());

        tracker.update_progress(3, Some(6), Some("working")).await.unwrap();
        let record = tracker.load().await.unwrap().unwrap();
        assert_eq!(record.progress_current, 3);
        assert_eq!(record.progress_total, 6);
        assert_eq!(record.progress_percentage, 50);
        assert_eq!(record.message, "working");

        tracker.mark_completed("all done").await.unwrap();
        let record = tracker.load().await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress_percentage, 100);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_total_is_sticky() {
        let tracker = tracker_with_job("t2").await;
        tracker.mark_running().await.unwrap();

        tracker.update_progress(0, Some(20), None).await.unwrap();
        tracker.update_progress(5, None, None).await.unwrap();

        let record = tracker.load().await.unwrap().unwrap();
        assert_eq!(record.progress_total, 20);
        assert_eq!(record.progress_percentage, 25);
    }

    #[tokio::test]
    async fn test_percentage_stays_zero_without_total() {
        let tracker = tracker_with_job("t3").await;
        tracker.mark_running().await.unwrap();

        tracker.update_progress(5, None, None).await.unwrap();
        let record = tracker.load().await.unwrap().unwrap();
        assert_eq!(record.progress_total, 0);
        assert_eq!(record.progress_percentage, 0);
    }

    #[tokio::test]
    async fn test_add_error_is_append_only() {
        let tracker = tracker_with_job("t4").await;
        tracker.mark_running().await.unwrap();

        for i in 0..5 {
            tracker.add_error(format!("error {i}")).await.unwrap();
            // Interleaved progress writes must not lose earlier entries.
            tracker.update_progress(i, Some(5), None).await.unwrap();
        }

        let record = tracker.load().await.unwrap().unwrap();
        assert_eq!(record.error_details.len(), 5);
        assert_eq!(record.error_count, 5);
        assert_eq!(record.error_details[0], "error 0");
        assert_eq!(record.error_details[4], "error 4");
    }

    #[tokio::test]
    async fn test_no_transition_out_of_terminal() {
        let tracker = tracker_with_job("t5").await;
        tracker.mark_running().await.unwrap();
        tracker.mark_failed("device unreachable").await.unwrap();

        tracker.mark_completed("nope").await.unwrap();
        tracker.update_progress(9, Some(9), Some("nope")).await.unwrap();
        tracker.add_error("late error").await.unwrap();

        let record = tracker.load().await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.message, "device unreachable");
        assert_eq!(record.progress_current, 0);
        assert!(record.error_details.is_empty());
    }

    #[tokio::test]
    async fn test_failed_does_not_force_percentage() {
        let tracker = tracker_with_job("t6").await;
        tracker.mark_running().await.unwrap();
        tracker.update_progress(3, Some(10), None).await.unwrap();
        tracker.mark_failed("boom").await.unwrap();

        let record = tracker.load().await.unwrap().unwrap();
        assert_eq!(record.progress_percentage, 30);
        assert_eq!(record.status, JobStatus::Failed);
    }
}
