pub mod device;
pub mod error;
pub mod jobs;
pub mod model;
pub mod report;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
pub use jobs::{FingerprintDirection, JobOptions, JobStatus, JobStatusView, JobType};
pub use model::{AttendanceEvent, Device, Employee, PunchType, VerifyMode};
pub use report::ReportFilter;
pub use storage::Database;

use std::sync::Arc;

use device::fake::FakeDevice;
use device::{DeviceIdentity, ProbeReport, SessionFactory, TemplateResult};
use jobs::queue::JobQueue;
use storage::repository;

/// app_config key selecting the session backend.
const BACKEND_CONFIG_KEY: &str = "device_backend";

/// Main entry point: the database plus the device-session seam.
pub struct ClockSync {
    db: Database,
    sessions: Arc<dyn SessionFactory>,
    queue: JobQueue,
}

impl ClockSync {
    pub fn new(db: Database, sessions: Arc<dyn SessionFactory>) -> Self {
        let queue = JobQueue::new(db.clone(), Arc::clone(&sessions));
        Self {
            db,
            sessions,
            queue,
        }
    }

    /// Construct with the backend named in `app_config` (`device_backend`,
    /// default `fake`). A real hardware client registers through
    /// [`ClockSync::new`]; selecting an unlinked backend is a configuration
    /// error rather than a silent fallback.
    pub async fn with_configured_backend(db: Database) -> Result<Self> {
        let backend = db
            .reader()
            .call(|conn| repository::get_config(conn, BACKEND_CONFIG_KEY))
            .await?
            .unwrap_or_else(|| "fake".to_string());

        match backend.as_str() {
            "fake" => Ok(Self::new(db, Arc::new(FakeDevice::new()))),
            other => Err(Error::Config(format!(
                "unknown device backend '{other}'; this build links only 'fake'"
            ))),
        }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Devices ────────────────────────────────────────────────────

    pub async fn add_device(
        &self,
        name: &str,
        host: &str,
        port: u16,
        force_udp: bool,
        omit_ping: bool,
        comm_password: u32,
    ) -> Result<Device> {
        let (name, host) = (name.to_string(), host.to_string());
        let device = self
            .db
            .writer()
            .call(move |conn| {
                let id = repository::insert_device(
                    conn,
                    &name,
                    &host,
                    port,
                    force_udp,
                    omit_ping,
                    comm_password,
                )?;
                repository::get_device(conn, id)
            })
            .await?
            .ok_or_else(|| Error::Other("device vanished after insert".into()))?;
        Ok(device)
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_devices(conn))
            .await?)
    }

    pub async fn get_device(&self, id: i64) -> Result<Device> {
        self.db
            .reader()
            .call(move |conn| repository::get_device(conn, id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("device {id}")))
    }

    pub async fn set_device_active(&self, id: i64, active: bool) -> Result<()> {
        self.db
            .writer()
            .call(move |conn| repository::set_device_active(conn, id, active))
            .await?;
        Ok(())
    }

    /// Connectivity test: open, immediately close, report elapsed time.
    pub async fn test_device(&self, id: i64) -> Result<ProbeReport> {
        let device = self.get_device(id).await?;
        Ok(device::probe(self.sessions.as_ref(), &device).await)
    }

    /// Query the terminal's identity block and persist serial/firmware.
    pub async fn device_info(&self, id: i64) -> Result<DeviceIdentity> {
        let device = self.get_device(id).await?;
        let mut session = self.sessions.open(&device).await?;
        let identity = session.identity().await;
        if let Err(e) = session.disconnect().await {
            log::warn!("Error disconnecting from {}: {e}", device.name);
        }
        let identity = identity?;

        let (serial, firmware) = (
            identity.serial_number.clone(),
            identity.firmware_version.clone(),
        );
        self.db
            .writer()
            .call(move |conn| repository::set_device_identity(conn, id, &serial, &firmware))
            .await?;
        Ok(identity)
    }

    // ── Employees ──────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn add_employee(
        &self,
        device_user_id: u16,
        employee_id: &str,
        first_name: &str,
        last_name: &str,
        department: &str,
        privilege: u8,
        password: &str,
    ) -> Result<i64> {
        let (employee_id, first_name, last_name, department, password) = (
            employee_id.to_string(),
            first_name.to_string(),
            last_name.to_string(),
            department.to_string(),
            password.to_string(),
        );
        Ok(self
            .db
            .writer()
            .call(move |conn| {
                repository::insert_employee(
                    conn,
                    device_user_id,
                    &employee_id,
                    &first_name,
                    &last_name,
                    &department,
                    privilege,
                    &password,
                )
            })
            .await?)
    }

    pub async fn list_employees(&self, active_only: bool) -> Result<Vec<Employee>> {
        Ok(self
            .db
            .reader()
            .call(move |conn| {
                if active_only {
                    repository::list_active_employees(conn)
                } else {
                    repository::list_all_employees(conn)
                }
            })
            .await?)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    pub async fn start_sync_to_device(&self, device_id: i64, owner: &str) -> Result<String> {
        self.queue
            .submit(JobType::SyncToDevice, device_id, owner, JobOptions::default())
            .await
    }

    pub async fn start_sync_from_device(&self, device_id: i64, owner: &str) -> Result<String> {
        self.queue
            .submit(JobType::SyncFromDevice, device_id, owner, JobOptions::default())
            .await
    }

    pub async fn start_download_attendance(
        &self,
        device_id: i64,
        owner: &str,
        clear_after_download: bool,
    ) -> Result<String> {
        self.queue
            .submit(
                JobType::DownloadAttendance,
                device_id,
                owner,
                JobOptions {
                    clear_after_download,
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn start_sync_fingerprints(
        &self,
        device_id: i64,
        owner: &str,
        direction: FingerprintDirection,
        employee_id: Option<i64>,
    ) -> Result<String> {
        self.queue
            .submit(
                JobType::SyncFingerprints,
                device_id,
                owner,
                JobOptions {
                    fingerprint_direction: Some(direction),
                    employee_id,
                    ..Default::default()
                },
            )
            .await
    }

    /// Status poll for one task. Callers may only read their own tasks
    /// unless privileged.
    pub async fn job_status(
        &self,
        task_id: &str,
        caller: &str,
        privileged: bool,
    ) -> Result<JobStatusView> {
        let id = task_id.to_string();
        let record = self
            .db
            .reader()
            .call(move |conn| repository::get_sync_job(conn, &id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

        if record.owner != caller && !privileged {
            return Err(Error::PermissionDenied(format!(
                "task {task_id} belongs to another user"
            )));
        }

        let device_name = match record.device_id {
            Some(device_id) => self
                .db
                .reader()
                .call(move |conn| repository::get_device(conn, device_id))
                .await?
                .map(|d| d.name),
            None => None,
        };
        Ok(JobStatusView::from_record(record, device_name))
    }

    pub async fn list_jobs(&self, owner: Option<&str>, limit: u32) -> Result<Vec<jobs::JobRecord>> {
        let owner = owner.map(|s| s.to_string());
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::list_sync_jobs(conn, owner.as_deref(), limit))
            .await?)
    }

    // ── Enrollment ─────────────────────────────────────────────────

    /// Put the terminal into capture mode for one employee's finger slot,
    /// deleting any template already in that slot. Returns true when an
    /// existing template was replaced. The capture itself happens on the
    /// physical unit; a later fingerprint sync picks the template up.
    pub async fn enroll_fingerprint(
        &self,
        employee_row_id: i64,
        device_id: i64,
        slot: u8,
    ) -> Result<bool> {
        let employee = self
            .db
            .reader()
            .call(move |conn| repository::get_employee(conn, employee_row_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("employee {employee_row_id}")))?;
        let device = self.get_device(device_id).await?;

        let mut session = self.sessions.open(&device).await?;
        let result = async {
            let uid = employee.device_user_id;
            let mut replaced = false;
            if let TemplateResult::Present(_) = session.get_template(uid, slot).await? {
                session.delete_template(uid, slot).await?;
                replaced = true;
            }
            session.start_enrollment(uid, slot).await?;
            Ok::<bool, Error>(replaced)
        }
        .await;
        if let Err(e) = session.disconnect().await {
            log::warn!("Error disconnecting from {}: {e}", device.name);
        }
        result
    }

    // ── Config ─────────────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.db
            .reader()
            .call(move |conn| repository::get_config(conn, &key))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.db
            .writer()
            .call(move |conn| repository::set_config(conn, &key, &value))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
