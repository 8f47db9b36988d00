//! The four synchronization job loops.
//!
//! Every job shares one shape: mark the tracker running, resolve the device,
//! open a single session for the whole job, run the job-specific loop with
//! per-item error isolation, stamp the device's last sync, and finalize the
//! tracker. Fatal errors (session open, missing device or tracker) abort the
//! job through [`run_job`]'s failure boundary; per-item errors are recorded
//! and the loop continues.

use std::sync::Arc;

use chrono::Utc;

use crate::device::{
    DeviceSession, DeviceUser, SessionFactory, TemplateResult, FINGER_SLOTS,
};
use crate::error::{Error, Result};
use crate::model::{Device, Employee};
use crate::storage::{repository, Database};
use crate::sync::recon;
use crate::sync::ItemOutcome;

use super::tracker::JobTracker;
use super::{FingerprintDirection, JobOptions, JobType};

/// Everything a spawned job needs: the database and the session seam.
#[derive(Clone)]
pub struct JobContext {
    pub db: Database,
    pub sessions: Arc<dyn SessionFactory>,
}

/// Background execution boundary. Nothing escapes: any error from the job
/// body is recorded on the tracker as a failure and swallowed here.
pub async fn run_job(
    ctx: JobContext,
    task_id: String,
    job_type: JobType,
    device_id: i64,
    options: JobOptions,
) {
    let tracker = JobTracker::new(ctx.db.clone(), task_id.clone());
    if let Err(e) = execute_job(&ctx, &tracker, job_type, device_id, &options).await {
        log::error!("Fatal error in {} job {task_id}: {e}", job_type.as_str());
        if let Err(mark_err) = tracker.mark_failed(format!("Fatal error: {e}")).await {
            log::error!("Could not record failure for job {task_id}: {mark_err}");
        }
    }
}

async fn execute_job(
    ctx: &JobContext,
    tracker: &JobTracker,
    job_type: JobType,
    device_id: i64,
    options: &JobOptions,
) -> Result<()> {
    if tracker.load().await?.is_none() {
        return Err(Error::NotFound(format!("sync job {}", tracker.task_id())));
    }
    tracker.mark_running().await?;

    let device = ctx
        .db
        .reader()
        .call(move |conn| repository::get_device(conn, device_id))
        .await?
        .ok_or_else(|| Error::NotFound(format!("device {device_id}")))?;

    match job_type {
        JobType::SyncToDevice => sync_employees_to_device(ctx, tracker, &device).await,
        JobType::SyncFromDevice => sync_employees_from_device(ctx, tracker, &device).await,
        JobType::DownloadAttendance => {
            download_attendance(ctx, tracker, &device, options.clear_after_download).await
        }
        JobType::SyncFingerprints => sync_fingerprints(ctx, tracker, &device, options).await,
    }
}

async fn stamp_last_sync(db: &Database, device_id: i64) -> Result<()> {
    let now = Utc::now();
    db.writer()
        .call(move |conn| repository::set_device_last_sync(conn, device_id, now))
        .await?;
    Ok(())
}

async fn disconnect_quietly(session: &mut dyn DeviceSession, device: &Device) {
    if let Err(e) = session.disconnect().await {
        log::warn!("Error disconnecting from {}: {e}", device.name);
    }
}

// ── Employees → device ─────────────────────────────────────────────

/// Upload the active roster and remove device users that no longer match an
/// active employee, cascading best-effort fingerprint deletion.
async fn sync_employees_to_device(
    ctx: &JobContext,
    tracker: &JobTracker,
    device: &Device,
) -> Result<()> {
    let employees = ctx
        .db
        .reader()
        .call(|conn| repository::list_active_employees(conn))
        .await?;
    let total = employees.len() as i64 + 10;

    tracker
        .update_progress(0, Some(total), Some("Connecting to device..."))
        .await?;
    let mut session = ctx.sessions.open(device).await?;

    let result = to_device_loop(ctx, tracker, device, session.as_mut(), &employees).await;
    disconnect_quietly(session.as_mut(), device).await;
    let (success_count, deleted_count, error_count) = result?;

    stamp_last_sync(&ctx.db, device.id).await?;
    tracker.set_result_counts(success_count, error_count).await?;

    let mut parts = Vec::new();
    if success_count > 0 {
        parts.push(format!("Synced {success_count} employees"));
    }
    if deleted_count > 0 {
        parts.push(format!("removed {deleted_count} obsolete users"));
    }
    if error_count > 0 {
        parts.push(format!("{error_count} errors"));
    }
    if parts.is_empty() {
        parts.push("no changes".to_string());
    }
    tracker
        .mark_completed(format!("Completed: {}", parts.join(", ")))
        .await
}

async fn to_device_loop(
    ctx: &JobContext,
    tracker: &JobTracker,
    device: &Device,
    session: &mut dyn DeviceSession,
    employees: &[Employee],
) -> Result<(i64, i64, i64)> {
    tracker
        .update_progress(5, None, Some("Connected. Fetching device users..."))
        .await?;
    let device_users = session.list_users().await?;
    tracker
        .update_progress(
            10,
            None,
            Some(&format!("Found {} users on device", device_users.len())),
        )
        .await?;

    let plan = recon::roster_diff(
        device_users.iter().map(|u| u.uid),
        employees.iter().map(|e| e.device_user_id),
    );

    let mut deleted_count: i64 = 0;
    for uid in &plan.to_delete {
        match recon::delete_device_user(session, *uid).await {
            ItemOutcome::Success => deleted_count += 1,
            ItemOutcome::Failed(msg) => tracker.add_error(msg).await?,
            ItemOutcome::Skipped(_) => {}
        }
    }
    if deleted_count > 0 {
        tracker
            .update_progress(
                10,
                None,
                Some(&format!("Removed {deleted_count} obsolete users")),
            )
            .await?;
    }

    let total_employees = employees.len();
    let mut success_count: i64 = 0;
    let mut error_count: i64 = 0;
    for (i, emp) in employees.iter().enumerate() {
        match recon::upload_employee(session, emp).await {
            ItemOutcome::Success => {
                let (emp_id, device_id) = (emp.id, device.id);
                ctx.db
                    .writer()
                    .call(move |conn| repository::mark_employee_synced(conn, emp_id, device_id))
                    .await?;
                success_count += 1;
                tracker
                    .update_progress(
                        10 + i as i64 + 1,
                        None,
                        Some(&format!(
                            "Synced {} ({}/{total_employees})",
                            emp.full_name(),
                            i + 1
                        )),
                    )
                    .await?;
            }
            ItemOutcome::Failed(msg) => {
                error_count += 1;
                log::error!("Error syncing employee {}: {msg}", emp.full_name());
                tracker.add_error(msg).await?;
            }
            ItemOutcome::Skipped(_) => {}
        }
    }

    Ok((success_count, deleted_count, error_count))
}

// ── Employees ← device ─────────────────────────────────────────────

/// Download every device user into the employee table, pulling all ten
/// fingerprint slots for each along the way.
async fn sync_employees_from_device(
    ctx: &JobContext,
    tracker: &JobTracker,
    device: &Device,
) -> Result<()> {
    tracker
        .update_progress(0, Some(100), Some("Connecting to device..."))
        .await?;
    let mut session = ctx.sessions.open(device).await?;

    let result = from_device_loop(ctx, tracker, device, session.as_mut()).await;
    disconnect_quietly(session.as_mut(), device).await;
    let counts = result?;

    stamp_last_sync(&ctx.db, device.id).await?;
    tracker
        .set_result_counts(counts.created, counts.errors)
        .await?;

    let mut parts = Vec::new();
    if counts.created > 0 {
        parts.push(format!("{} new employees", counts.created));
    }
    if counts.updated > 0 {
        parts.push(format!("{} updated", counts.updated));
    }
    if counts.fingerprints > 0 {
        parts.push(format!("{} fingerprints", counts.fingerprints));
    }
    if counts.errors > 0 {
        parts.push(format!("{} errors", counts.errors));
    }
    if parts.is_empty() {
        parts.push("no users on device".to_string());
    }
    tracker
        .mark_completed(format!("Downloaded: {}", parts.join(", ")))
        .await
}

#[derive(Default)]
struct FromDeviceCounts {
    created: i64,
    updated: i64,
    fingerprints: i64,
    errors: i64,
}

async fn from_device_loop(
    ctx: &JobContext,
    tracker: &JobTracker,
    device: &Device,
    session: &mut dyn DeviceSession,
) -> Result<FromDeviceCounts> {
    tracker
        .update_progress(10, None, Some("Fetching users from device..."))
        .await?;
    let users = session.list_users().await?;
    let total = users.len() as i64;
    tracker
        .update_progress(15, None, Some(&format!("Found {total} users")))
        .await?;

    let mut counts = FromDeviceCounts::default();
    for (i, user) in users.iter().enumerate() {
        match import_device_user(&ctx.db, device.id, user, session).await {
            Ok((created, downloaded)) => {
                if created {
                    counts.created += 1;
                } else {
                    counts.updated += 1;
                }
                counts.fingerprints += downloaded as i64;
            }
            Err(e) => {
                counts.errors += 1;
                log::error!("Error syncing device user {}: {e}", user.uid);
                tracker
                    .add_error(format!("User {}: {e}", user.uid))
                    .await?;
            }
        }

        let display_name = if user.name.is_empty() {
            format!("User {}", user.uid)
        } else {
            user.name.clone()
        };
        let progress = 15 + ((i as i64 + 1) * 85) / total.max(1);
        tracker
            .update_progress(
                progress,
                None,
                Some(&format!("Processed {display_name} ({}/{total})", i + 1)),
            )
            .await?;
    }

    Ok(counts)
}

/// Upsert one device user and pull whatever templates it has. Any error
/// here aborts only this user.
async fn import_device_user(
    db: &Database,
    device_id: i64,
    user: &DeviceUser,
    session: &mut dyn DeviceSession,
) -> Result<(bool, u32)> {
    let (first_name, last_name) = recon::split_device_name(&user.name, user.uid);
    let employee_id = recon::device_employee_id(&user.account_id, user.uid);
    let (uid, privilege, password) = (user.uid, user.privilege, user.password.clone());

    let (employee_row, created) = db
        .writer()
        .call(move |conn| {
            repository::upsert_employee_from_device(
                conn,
                uid,
                &employee_id,
                &first_name,
                &last_name,
                privilege,
                &password,
                device_id,
            )
        })
        .await?;

    let mut downloaded: u32 = 0;
    for slot in 0..FINGER_SLOTS {
        if let TemplateResult::Present(data) = session.get_template(uid, slot).await? {
            db.writer()
                .call(move |conn| {
                    repository::upsert_fingerprint(conn, employee_row, slot, &data, Some(device_id))
                })
                .await?;
            downloaded += 1;
        }
    }

    Ok((created, downloaded))
}

// ── Attendance ← device ────────────────────────────────────────────

/// Pull the punch log, upserting-or-skipping each record. Unmatched device
/// user ids still produce orphan rows. Clearing the terminal's log is a
/// separate explicit step and only runs after at least one new row landed.
async fn download_attendance(
    ctx: &JobContext,
    tracker: &JobTracker,
    device: &Device,
    clear_after: bool,
) -> Result<()> {
    tracker
        .update_progress(0, Some(100), Some("Connecting to device..."))
        .await?;
    let mut session = ctx.sessions.open(device).await?;

    let result = attendance_loop(ctx, tracker, device, session.as_mut(), clear_after).await;
    disconnect_quietly(session.as_mut(), device).await;
    let counts = result?;

    stamp_last_sync(&ctx.db, device.id).await?;
    tracker
        .set_result_counts(counts.inserted, counts.errors)
        .await?;

    let mut parts = Vec::new();
    if counts.inserted > 0 {
        parts.push(format!("{} new events", counts.inserted));
    }
    if counts.duplicates > 0 {
        parts.push(format!("{} duplicates skipped", counts.duplicates));
    }
    if counts.errors > 0 {
        parts.push(format!("{} errors", counts.errors));
    }
    if counts.cleared {
        parts.push("device log cleared".to_string());
    }
    if parts.is_empty() {
        parts.push("no records".to_string());
    }
    tracker
        .mark_completed(format!("Downloaded: {}", parts.join(", ")))
        .await
}

#[derive(Default)]
struct AttendanceCounts {
    inserted: i64,
    duplicates: i64,
    errors: i64,
    cleared: bool,
}

async fn attendance_loop(
    ctx: &JobContext,
    tracker: &JobTracker,
    device: &Device,
    session: &mut dyn DeviceSession,
    clear_after: bool,
) -> Result<AttendanceCounts> {
    tracker
        .update_progress(10, None, Some("Downloading attendance records..."))
        .await?;
    let records = session.list_attendance().await?;
    let total = records.len();
    tracker
        .update_progress(
            20,
            Some(20 + total as i64),
            Some(&format!("Found {total} records")),
        )
        .await?;

    let mut counts = AttendanceCounts::default();
    for (i, record) in records.iter().enumerate() {
        let device_id = device.id;
        let (uid, timestamp) = (record.uid, record.timestamp);
        let (punch_type, verify_mode) = (record.punch_type, record.verify_mode);

        let insert = ctx
            .db
            .writer()
            .call(move |conn| {
                // Orphan punches (no matching employee) are expected; the
                // row is inserted with a NULL employee.
                let employee = repository::get_employee_by_device_user_id(conn, uid)?;
                repository::insert_attendance_or_skip(
                    conn,
                    device_id,
                    employee.map(|e| e.id),
                    uid,
                    timestamp,
                    punch_type,
                    verify_mode,
                )
            })
            .await;

        match insert {
            Ok(true) => counts.inserted += 1,
            Ok(false) => counts.duplicates += 1,
            Err(e) => {
                counts.errors += 1;
                log::error!("Error importing attendance record: {e}");
                tracker.add_error(format!("Record {}: {e}", i + 1)).await?;
            }
        }

        // Batched updates bound write amplification on large punch logs.
        if (i + 1) % 10 == 0 || i + 1 == total {
            tracker
                .update_progress(
                    20 + i as i64 + 1,
                    None,
                    Some(&format!("Processed {}/{total} records", i + 1)),
                )
                .await?;
        }
    }

    if clear_after && counts.inserted > 0 {
        match session.clear_attendance().await {
            Ok(()) => counts.cleared = true,
            Err(e) => {
                counts.errors += 1;
                log::warn!("Failed to clear attendance on {}: {e}", device.name);
                tracker
                    .add_error(format!("Failed to clear device log: {e}"))
                    .await?;
            }
        }
    }

    Ok(counts)
}

// ── Fingerprints ↔ device ──────────────────────────────────────────

/// Bidirectional fingerprint sync over all active employees or one
/// specified employee.
async fn sync_fingerprints(
    ctx: &JobContext,
    tracker: &JobTracker,
    device: &Device,
    options: &JobOptions,
) -> Result<()> {
    let employees = match options.employee_id {
        Some(id) => {
            let employee = ctx
                .db
                .reader()
                .call(move |conn| repository::get_employee(conn, id))
                .await?
                .ok_or_else(|| Error::NotFound(format!("employee {id}")))?;
            vec![employee]
        }
        None => {
            ctx.db
                .reader()
                .call(|conn| repository::list_active_employees(conn))
                .await?
        }
    };
    let direction = options
        .fingerprint_direction
        .unwrap_or(FingerprintDirection::FromDevice);
    let total = employees.len() as i64;

    tracker
        .update_progress(0, Some(total), Some("Connecting to device..."))
        .await?;
    let mut session = ctx.sessions.open(device).await?;

    let result =
        fingerprint_loop(ctx, tracker, device, session.as_mut(), &employees, direction).await;
    disconnect_quietly(session.as_mut(), device).await;
    let counts = result?;

    stamp_last_sync(&ctx.db, device.id).await?;
    tracker
        .set_result_counts(counts.downloaded + counts.uploaded, counts.errors)
        .await?;

    let mut parts = Vec::new();
    if counts.downloaded > 0 {
        parts.push(format!("{} downloaded", counts.downloaded));
    }
    if counts.uploaded > 0 {
        parts.push(format!("{} uploaded", counts.uploaded));
    }
    if counts.without_prints > 0 {
        parts.push(format!(
            "{} employees without fingerprints",
            counts.without_prints
        ));
    }
    if counts.errors > 0 {
        parts.push(format!("{} errors", counts.errors));
    }
    if parts.is_empty() {
        parts.push("no fingerprints".to_string());
    }
    tracker
        .mark_completed(format!("Completed: {}", parts.join(", ")))
        .await
}

#[derive(Default)]
struct FingerprintCounts {
    downloaded: i64,
    uploaded: i64,
    without_prints: i64,
    errors: i64,
}

async fn fingerprint_loop(
    ctx: &JobContext,
    tracker: &JobTracker,
    device: &Device,
    session: &mut dyn DeviceSession,
    employees: &[Employee],
    direction: FingerprintDirection,
) -> Result<FingerprintCounts> {
    let total = employees.len();
    let mut counts = FingerprintCounts::default();

    for (i, emp) in employees.iter().enumerate() {
        if matches!(
            direction,
            FingerprintDirection::FromDevice | FingerprintDirection::Both
        ) {
            match download_employee_templates(&ctx.db, device.id, emp, session).await {
                Ok(n) => counts.downloaded += n as i64,
                Err(e) => {
                    counts.errors += 1;
                    tracker
                        .add_error(format!("{}: {e}", emp.full_name()))
                        .await?;
                }
            }
        }

        if matches!(
            direction,
            FingerprintDirection::ToDevice | FingerprintDirection::Both
        ) {
            let emp_id = emp.id;
            let prints = ctx
                .db
                .reader()
                .call(move |conn| repository::fingerprints_for_employee(conn, emp_id))
                .await?;
            if prints.is_empty() {
                counts.without_prints += 1;
            }
            for print in &prints {
                match session
                    .set_template(emp.device_user_id, print.finger_index, &print.template)
                    .await
                {
                    Ok(()) => counts.uploaded += 1,
                    Err(e) => {
                        counts.errors += 1;
                        tracker
                            .add_error(format!(
                                "{} finger {}: {e}",
                                emp.full_name(),
                                print.finger_index
                            ))
                            .await?;
                    }
                }
            }
        }

        tracker
            .update_progress(
                i as i64 + 1,
                None,
                Some(&format!("Processed {} ({}/{total})", emp.full_name(), i + 1)),
            )
            .await?;
    }

    Ok(counts)
}

async fn download_employee_templates(
    db: &Database,
    device_id: i64,
    emp: &Employee,
    session: &mut dyn DeviceSession,
) -> Result<u32> {
    let mut downloaded: u32 = 0;
    for slot in 0..FINGER_SLOTS {
        if let TemplateResult::Present(data) = session.get_template(emp.device_user_id, slot).await?
        {
            let emp_row = emp.id;
            db.writer()
                .call(move |conn| {
                    repository::upsert_fingerprint(conn, emp_row, slot, &data, Some(device_id))
                })
                .await?;
            downloaded += 1;
        }
    }
    Ok(downloaded)
}
