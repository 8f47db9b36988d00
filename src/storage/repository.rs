use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::jobs::{JobRecord, JobStatus, JobType};
use crate::model::{AttendanceEvent, Device, Employee, FingerprintTemplate, PunchType, VerifyMode};

const TERMINAL_GUARD: &str = "status NOT IN ('completed', 'failed', 'cancelled')";

/// SQLite text format for device-local punch timestamps. Lexicographic order
/// matches chronological order, which the range queries rely on.
const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_naive(ts: NaiveDateTime) -> String {
    ts.format(NAIVE_FORMAT).to_string()
}

pub fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, NAIVE_FORMAT).ok()
}

fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Accepts both RFC 3339 (our own writes) and SQLite's `datetime('now')`
/// output (column defaults), treating the latter as UTC.
fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, NAIVE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

// ── Devices ────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub fn insert_device(
    conn: &Connection,
    name: &str,
    host: &str,
    port: u16,
    force_udp: bool,
    omit_ping: bool,
    comm_password: u32,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO devices (name, host, port, force_udp, omit_ping, comm_password)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![name, host, port, force_udp as i32, omit_ping as i32, comm_password],
    )?;
    Ok(conn.last_insert_rowid())
}

const DEVICE_COLUMNS: &str = "id, name, host, port, force_udp, omit_ping, comm_password,
     serial_number, firmware_version, is_active, last_sync";

fn device_from_row(row: &Row<'_>) -> Result<Device, rusqlite::Error> {
    let last_sync: Option<String> = row.get(10)?;
    Ok(Device {
        id: row.get(0)?,
        name: row.get(1)?,
        host: row.get(2)?,
        port: row.get(3)?,
        force_udp: row.get::<_, i32>(4)? != 0,
        omit_ping: row.get::<_, i32>(5)? != 0,
        comm_password: row.get(6)?,
        serial_number: row.get(7)?,
        firmware_version: row.get(8)?,
        is_active: row.get::<_, i32>(9)? != 0,
        last_sync: last_sync.as_deref().and_then(parse_utc),
    })
}

pub fn get_device(conn: &Connection, id: i64) -> Result<Option<Device>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
        params![id],
        device_from_row,
    )
    .optional()
}

pub fn list_devices(conn: &Connection) -> Result<Vec<Device>, rusqlite::Error> {
    let mut stmt =
        conn.prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id"))?;
    let rows = stmt.query_map([], device_from_row)?;
    rows.collect()
}

pub fn set_device_last_sync(
    conn: &Connection,
    id: i64,
    at: DateTime<Utc>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE devices SET last_sync = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, format_utc(at)],
    )?;
    Ok(())
}

pub fn set_device_identity(
    conn: &Connection,
    id: i64,
    serial_number: &str,
    firmware_version: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE devices SET serial_number = ?2, firmware_version = ?3,
             updated_at = datetime('now')
         WHERE id = ?1",
        params![id, serial_number, firmware_version],
    )?;
    Ok(())
}

pub fn set_device_active(conn: &Connection, id: i64, active: bool) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE devices SET is_active = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, active as i32],
    )?;
    Ok(())
}

// ── Employees ──────────────────────────────────────────────────────

const EMPLOYEE_COLUMNS: &str = "id, device_user_id, employee_id, first_name, last_name,
     department, card_number, password, privilege, is_active, synced_to_device, device_id";

fn employee_from_row(row: &Row<'_>) -> Result<Employee, rusqlite::Error> {
    Ok(Employee {
        id: row.get(0)?,
        device_user_id: row.get(1)?,
        employee_id: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        department: row.get(5)?,
        card_number: row.get(6)?,
        password: row.get(7)?,
        privilege: row.get(8)?,
        is_active: row.get::<_, i32>(9)? != 0,
        synced_to_device: row.get::<_, i32>(10)? != 0,
        device_id: row.get(11)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn insert_employee(
    conn: &Connection,
    device_user_id: u16,
    employee_id: &str,
    first_name: &str,
    last_name: &str,
    department: &str,
    privilege: u8,
    password: &str,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO employees (device_user_id, employee_id, first_name, last_name,
             department, privilege, password)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![device_user_id, employee_id, first_name, last_name, department, privilege, password],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_employee(conn: &Connection, id: i64) -> Result<Option<Employee>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?1"),
        params![id],
        employee_from_row,
    )
    .optional()
}

pub fn get_employee_by_device_user_id(
    conn: &Connection,
    device_user_id: u16,
) -> Result<Option<Employee>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE device_user_id = ?1"),
        params![device_user_id],
        employee_from_row,
    )
    .optional()
}

pub fn list_active_employees(conn: &Connection) -> Result<Vec<Employee>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE is_active = 1 ORDER BY employee_id"
    ))?;
    let rows = stmt.query_map([], employee_from_row)?;
    rows.collect()
}

pub fn list_all_employees(conn: &Connection) -> Result<Vec<Employee>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees ORDER BY employee_id"
    ))?;
    let rows = stmt.query_map([], employee_from_row)?;
    rows.collect()
}

/// Stamp an employee as present on the device after a successful upload.
pub fn mark_employee_synced(
    conn: &Connection,
    id: i64,
    device_id: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE employees SET synced_to_device = 1, device_id = ?2,
             updated_at = datetime('now')
         WHERE id = ?1",
        params![id, device_id],
    )?;
    Ok(())
}

/// Create or update a local employee from a device user record, keyed by
/// `device_user_id`. Returns (row id, created).
#[allow(clippy::too_many_arguments)]
pub fn upsert_employee_from_device(
    conn: &Connection,
    device_user_id: u16,
    employee_id: &str,
    first_name: &str,
    last_name: &str,
    privilege: u8,
    password: &str,
    device_id: i64,
) -> Result<(i64, bool), rusqlite::Error> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM employees WHERE device_user_id = ?1",
            params![device_user_id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE employees SET employee_id = ?2, first_name = ?3, last_name = ?4,
                     privilege = ?5, password = ?6, synced_to_device = 1, device_id = ?7,
                     updated_at = datetime('now')
                 WHERE id = ?1",
                params![id, employee_id, first_name, last_name, privilege, password, device_id],
            )?;
            Ok((id, false))
        }
        None => {
            conn.execute(
                "INSERT INTO employees (device_user_id, employee_id, first_name, last_name,
                     privilege, password, synced_to_device, device_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
                params![device_user_id, employee_id, first_name, last_name, privilege, password, device_id],
            )?;
            Ok((conn.last_insert_rowid(), true))
        }
    }
}

// ── Fingerprints ───────────────────────────────────────────────────

pub fn upsert_fingerprint(
    conn: &Connection,
    employee_id: i64,
    finger_index: u8,
    template: &[u8],
    device_id: Option<i64>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO fingerprints (employee_id, finger_index, template, device_id)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(employee_id, finger_index) DO UPDATE SET
             template = excluded.template,
             device_id = excluded.device_id,
             updated_at = datetime('now')",
        params![employee_id, finger_index, template, device_id],
    )?;
    Ok(())
}

pub fn fingerprints_for_employee(
    conn: &Connection,
    employee_id: i64,
) -> Result<Vec<FingerprintTemplate>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, employee_id, finger_index, template, device_id
         FROM fingerprints WHERE employee_id = ?1 ORDER BY finger_index",
    )?;
    let rows = stmt.query_map(params![employee_id], |row| {
        Ok(FingerprintTemplate {
            id: row.get(0)?,
            employee_id: row.get(1)?,
            finger_index: row.get(2)?,
            template: row.get(3)?,
            device_id: row.get(4)?,
        })
    })?;
    rows.collect()
}

// ── Attendance ─────────────────────────────────────────────────────

/// Idempotent punch insert keyed on (device, device user, timestamp).
/// Returns true when a row was inserted, false when the triple already
/// existed (a device-reported duplicate).
pub fn insert_attendance_or_skip(
    conn: &Connection,
    device_id: i64,
    employee_id: Option<i64>,
    device_user_id: u16,
    timestamp: NaiveDateTime,
    punch_type: PunchType,
    verify_mode: VerifyMode,
) -> Result<bool, rusqlite::Error> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO attendance_events
             (device_id, employee_id, device_user_id, timestamp, punch_type, verify_mode, work_code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![
            device_id,
            employee_id,
            device_user_id,
            format_naive(timestamp),
            punch_type.code(),
            verify_mode.code(),
        ],
    )?;
    Ok(changed > 0)
}

fn event_from_row(row: &Row<'_>) -> Result<AttendanceEvent, rusqlite::Error> {
    let ts: String = row.get(4)?;
    Ok(AttendanceEvent {
        id: row.get(0)?,
        device_id: row.get(1)?,
        employee_id: row.get(2)?,
        device_user_id: row.get(3)?,
        timestamp: parse_naive(&ts).unwrap_or_default(),
        punch_type: PunchType::from_code(row.get(5)?),
        verify_mode: VerifyMode::from_code(row.get(6)?),
        work_code: row.get(7)?,
    })
}

/// Events with `start <= timestamp < end`, optionally filtered by employee
/// or device, ordered by timestamp.
pub fn events_between(
    conn: &Connection,
    start: NaiveDateTime,
    end: NaiveDateTime,
    employee_id: Option<i64>,
    device_id: Option<i64>,
) -> Result<Vec<AttendanceEvent>, rusqlite::Error> {
    let mut sql = String::from(
        "SELECT id, device_id, employee_id, device_user_id, timestamp,
                punch_type, verify_mode, work_code
         FROM attendance_events
         WHERE timestamp >= ?1 AND timestamp < ?2",
    );
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(format_naive(start)),
        Box::new(format_naive(end)),
    ];
    if let Some(emp) = employee_id {
        sql.push_str(&format!(" AND employee_id = ?{}", args.len() + 1));
        args.push(Box::new(emp));
    }
    if let Some(dev) = device_id {
        sql.push_str(&format!(" AND device_id = ?{}", args.len() + 1));
        args.push(Box::new(dev));
    }
    sql.push_str(" ORDER BY timestamp");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), event_from_row)?;
    rows.collect()
}

// ── Sync jobs ──────────────────────────────────────────────────────

pub fn insert_sync_job(
    conn: &Connection,
    task_id: &str,
    job_type: JobType,
    owner: &str,
    device_id: Option<i64>,
    message: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_jobs (task_id, job_type, owner, device_id, status, message, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)",
        params![task_id, job_type.as_str(), owner, device_id, message, format_utc(Utc::now())],
    )?;
    Ok(())
}

const JOB_COLUMNS: &str = "task_id, job_type, owner, device_id, status,
     progress_current, progress_total, progress_percentage,
     success_count, error_count, message, error_details,
     created_at, started_at, completed_at";

fn job_from_row(row: &Row<'_>) -> Result<JobRecord, rusqlite::Error> {
    let job_type: String = row.get(1)?;
    let status: String = row.get(4)?;
    let error_details: String = row.get(11)?;
    let created_at: String = row.get(12)?;
    let started_at: Option<String> = row.get(13)?;
    let completed_at: Option<String> = row.get(14)?;
    Ok(JobRecord {
        task_id: row.get(0)?,
        job_type: JobType::from_str(&job_type).unwrap_or(JobType::SyncToDevice),
        owner: row.get(2)?,
        device_id: row.get(3)?,
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Failed),
        progress_current: row.get(5)?,
        progress_total: row.get(6)?,
        progress_percentage: row.get(7)?,
        success_count: row.get(8)?,
        error_count: row.get(9)?,
        message: row.get(10)?,
        error_details: serde_json::from_str(&error_details).unwrap_or_default(),
        created_at: parse_utc(&created_at).unwrap_or_else(Utc::now),
        started_at: started_at.as_deref().and_then(parse_utc),
        completed_at: completed_at.as_deref().and_then(parse_utc),
    })
}

pub fn get_sync_job(conn: &Connection, task_id: &str) -> Result<Option<JobRecord>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE task_id = ?1"),
        params![task_id],
        job_from_row,
    )
    .optional()
}

pub fn list_sync_jobs(
    conn: &Connection,
    owner: Option<&str>,
    limit: u32,
) -> Result<Vec<JobRecord>, rusqlite::Error> {
    let rows = match owner {
        Some(owner) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM sync_jobs WHERE owner = ?1
                 ORDER BY created_at DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![owner, limit], job_from_row)?;
            rows.collect()
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM sync_jobs ORDER BY created_at DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], job_from_row)?;
            rows.collect()
        }
    };
    rows
}

/// pending -> running. Returns false if the job was not in `pending`.
pub fn job_mark_running(conn: &Connection, task_id: &str) -> Result<bool, rusqlite::Error> {
    let changed = conn.execute(
        "UPDATE sync_jobs SET status = 'running', started_at = ?2
         WHERE task_id = ?1 AND status = 'pending'",
        params![task_id, format_utc(Utc::now())],
    )?;
    Ok(changed > 0)
}

/// Update progress counters in one statement so a concurrent poller never
/// observes a torn update. Total is sticky; the percentage is recomputed
/// (integer floor) only when the effective total is positive.
pub fn job_update_progress(
    conn: &Connection,
    task_id: &str,
    current: i64,
    total: Option<i64>,
    message: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        &format!(
            "UPDATE sync_jobs SET
                 progress_current = ?2,
                 progress_total = COALESCE(?3, progress_total),
                 progress_percentage = CASE
                     WHEN COALESCE(?3, progress_total) > 0
                     THEN (?2 * 100) / COALESCE(?3, progress_total)
                     ELSE progress_percentage
                 END,
                 message = COALESCE(?4, message)
             WHERE task_id = ?1 AND {TERMINAL_GUARD}"
        ),
        params![task_id, current, total, message],
    )?;
    Ok(())
}

/// Append one error to the job's error list and bump the counter. The list
/// read and the combined write happen under the serialized writer, so the
/// list is append-only and entries are never lost.
pub fn job_add_error(conn: &Connection, task_id: &str, detail: &str) -> Result<(), rusqlite::Error> {
    let existing: Option<String> = conn
        .query_row(
            &format!("SELECT error_details FROM sync_jobs WHERE task_id = ?1 AND {TERMINAL_GUARD}"),
            params![task_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(existing) = existing else {
        return Ok(());
    };
    let mut details: Vec<String> = serde_json::from_str(&existing).unwrap_or_default();
    details.push(detail.to_string());
    let serialized = serde_json::to_string(&details).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        &format!(
            "UPDATE sync_jobs SET error_details = ?2, error_count = error_count + 1
             WHERE task_id = ?1 AND {TERMINAL_GUARD}"
        ),
        params![task_id, serialized],
    )?;
    Ok(())
}

pub fn job_set_result_counts(
    conn: &Connection,
    task_id: &str,
    success_count: i64,
    error_count: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        &format!(
            "UPDATE sync_jobs SET success_count = ?2, error_count = ?3
             WHERE task_id = ?1 AND {TERMINAL_GUARD}"
        ),
        params![task_id, success_count, error_count],
    )?;
    Ok(())
}

/// running/pending -> completed. Terminal; sets the bar to 100.
pub fn job_mark_completed(
    conn: &Connection,
    task_id: &str,
    message: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        &format!(
            "UPDATE sync_jobs SET status = 'completed', completed_at = ?2,
                 progress_percentage = 100, message = ?3
             WHERE task_id = ?1 AND {TERMINAL_GUARD}"
        ),
        params![task_id, format_utc(Utc::now()), message],
    )?;
    Ok(())
}

/// running/pending -> failed. Terminal; the percentage stays where it was.
pub fn job_mark_failed(
    conn: &Connection,
    task_id: &str,
    message: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        &format!(
            "UPDATE sync_jobs SET status = 'failed', completed_at = ?2, message = ?3
             WHERE task_id = ?1 AND {TERMINAL_GUARD}"
        ),
        params![task_id, format_utc(Utc::now()), message],
    )?;
    Ok(())
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}
