//! Background job records and progress tracking.

pub mod queue;
pub mod runner;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The four synchronization job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobType {
    SyncToDevice,
    SyncFromDevice,
    DownloadAttendance,
    SyncFingerprints,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::SyncToDevice => "sync_to_device",
            JobType::SyncFromDevice => "sync_from_device",
            JobType::DownloadAttendance => "download_attendance",
            JobType::SyncFingerprints => "sync_fingerprints",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sync_to_device" => Some(JobType::SyncToDevice),
            "sync_from_device" => Some(JobType::SyncFromDevice),
            "download_attendance" => Some(JobType::DownloadAttendance),
            "sync_fingerprints" => Some(JobType::SyncFingerprints),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JobType::SyncToDevice => "Sync To Device",
            JobType::SyncFromDevice => "Sync From Device",
            JobType::DownloadAttendance => "Download Attendance",
            JobType::SyncFingerprints => "Sync Fingerprints",
        }
    }
}

/// Lifecycle status of a job. `Cancelled` is a defined terminal state but
/// nothing in this crate transitions a job into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Direction for a fingerprint-only sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintDirection {
    FromDevice,
    ToDevice,
    Both,
}

/// Options carried alongside a job submission. Not persisted; they travel
/// with the spawned task.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Clear the terminal's attendance log after a successful download.
    pub clear_after_download: bool,
    /// Direction for fingerprint-only sync (default: from device).
    pub fingerprint_direction: Option<FingerprintDirection>,
    /// Restrict fingerprint sync to one employee.
    pub employee_id: Option<i64>,
}

/// One persisted `sync_jobs` row.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub task_id: String,
    pub job_type: JobType,
    pub owner: String,
    pub device_id: Option<i64>,
    pub status: JobStatus,
    pub progress_current: i64,
    pub progress_total: i64,
    pub progress_percentage: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub message: String,
    pub error_details: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds from start until completion, or until now for a job still
    /// running. None if the job never started.
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// The payload a status poller receives.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub task_id: String,
    pub job_type: &'static str,
    pub status: JobStatus,
    pub progress_current: i64,
    pub progress_total: i64,
    pub progress_percentage: i64,
    pub message: String,
    pub success_count: i64,
    pub error_count: i64,
    /// First 10 errors only; the full list stays in the job row.
    pub error_details: Vec<String>,
    pub is_finished: bool,
    pub duration_seconds: Option<f64>,
    pub device_name: Option<String>,
}

impl JobStatusView {
    pub fn from_record(record: JobRecord, device_name: Option<String>) -> Self {
        let is_finished = record.is_finished();
        let duration_seconds = record.duration_seconds();
        Self {
            task_id: record.task_id,
            job_type: record.job_type.label(),
            status: record.status,
            progress_current: record.progress_current,
            progress_total: record.progress_total,
            progress_percentage: record.progress_percentage,
            message: record.message,
            success_count: record.success_count,
            error_count: record.error_count,
            error_details: record.error_details.into_iter().take(10).collect(),
            is_finished,
            duration_seconds,
            device_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_roundtrip() {
        for ty in [
            JobType::SyncToDevice,
            JobType::SyncFromDevice,
            JobType::DownloadAttendance,
            JobType::SyncFingerprints,
        ] {
            assert_eq!(JobType::from_str(ty.as_str()), Some(ty));
        }
        assert_eq!(JobType::from_str("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_view_truncates_errors() {
        let record = JobRecord {
            task_id: "t".into(),
            job_type: JobType::DownloadAttendance,
            owner: "admin".into(),
            device_id: Some(1),
            status: JobStatus::Completed,
            progress_current: 10,
            progress_total: 10,
            progress_percentage: 100,
            success_count: 10,
            error_count: 12,
            message: String::new(),
            error_details: (0..12).map(|i| format!("error {i}")).collect(),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        };
        let view = JobStatusView::from_record(record, Some("Front door".into()));
        assert_eq!(view.error_details.len(), 10);
        assert!(view.is_finished);
    }

    #[test]
    fn test_duration_none_when_never_started() {
        let record = JobRecord {
            task_id: "t".into(),
            job_type: JobType::SyncToDevice,
            owner: "admin".into(),
            device_id: None,
            status: JobStatus::Pending,
            progress_current: 0,
            progress_total: 0,
            progress_percentage: 0,
            success_count: 0,
            error_count: 0,
            message: String::new(),
            error_details: vec![],
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        assert!(record.duration_seconds().is_none());
    }
}
