//! Attendance reports: the per-day pairing computation applied over ranges
//! of persisted events. Read-only; runs against the reader connection.

pub mod pairing;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::Result;
use crate::storage::{repository, Database};

use pairing::{pair_day, DaySummary};

/// One (date, employee-or-device-user) cell of a report.
#[derive(Debug, Clone, Serialize)]
pub struct EmployeeDaySummary {
    pub date: NaiveDate,
    pub device_user_id: u16,
    pub employee_id: Option<i64>,
    pub name: String,
    pub summary: DaySummary,
}

/// Monthly rollup per employee.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyRollup {
    pub device_user_id: u16,
    pub employee_id: Option<i64>,
    pub name: String,
    pub days_present: usize,
    pub total_events: usize,
    pub total_minutes: i64,
}

/// Filters shared by all report queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportFilter {
    pub employee_id: Option<i64>,
    pub device_id: Option<i64>,
}

/// Pair every calendar day in `[start, end)` independently, keyed by
/// (date, device user). Orphan punches are grouped under their device user
/// id and labelled `User <uid>`.
pub async fn range_summary(
    db: &Database,
    start: NaiveDate,
    end: NaiveDate,
    filter: ReportFilter,
) -> Result<Vec<EmployeeDaySummary>> {
    let events = load_events(db, start, end, filter).await?;

    let mut grouped: BTreeMap<(NaiveDate, u16), (Option<i64>, Vec<NaiveDateTime>)> =
        BTreeMap::new();
    for event in &events {
        let entry = grouped
            .entry((event.timestamp.date(), event.device_user_id))
            .or_default();
        if event.employee_id.is_some() {
            entry.0 = event.employee_id;
        }
        entry.1.push(event.timestamp);
    }

    let names = employee_names(db).await?;

    Ok(grouped
        .into_iter()
        .map(|((date, uid), (employee_id, timestamps))| EmployeeDaySummary {
            date,
            device_user_id: uid,
            employee_id,
            name: display_name(&names, uid),
            summary: pair_day(&timestamps),
        })
        .collect())
}

/// One day.
pub async fn daily_summary(
    db: &Database,
    date: NaiveDate,
    filter: ReportFilter,
) -> Result<Vec<EmployeeDaySummary>> {
    range_summary(db, date, date + Duration::days(1), filter).await
}

/// Seven days starting at `start`.
pub async fn weekly_summary(
    db: &Database,
    start: NaiveDate,
    filter: ReportFilter,
) -> Result<Vec<EmployeeDaySummary>> {
    range_summary(db, start, start + Duration::days(7), filter).await
}

/// Calendar-month rollup: days present, raw event count, and worked minutes
/// summed over the month's per-day pairings.
pub async fn monthly_summary(
    db: &Database,
    year: i32,
    month: u32,
    filter: ReportFilter,
) -> Result<Vec<MonthlyRollup>> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| crate::error::Error::Other(format!("invalid month {year}-{month}")))?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    };

    let days = range_summary(db, start, end, filter).await?;
    let events = load_events(db, start, end, filter).await?;

    let mut rollups: BTreeMap<u16, MonthlyRollup> = BTreeMap::new();
    let mut present: BTreeMap<u16, BTreeSet<NaiveDate>> = BTreeMap::new();

    for event in &events {
        let uid = event.device_user_id;
        let rollup = rollups.entry(uid).or_insert_with(|| MonthlyRollup {
            device_user_id: uid,
            employee_id: event.employee_id,
            name: String::new(),
            days_present: 0,
            total_events: 0,
            total_minutes: 0,
        });
        if event.employee_id.is_some() {
            rollup.employee_id = event.employee_id;
        }
        rollup.total_events += 1;
        present.entry(uid).or_default().insert(event.timestamp.date());
    }
    for day in &days {
        if let Some(rollup) = rollups.get_mut(&day.device_user_id) {
            rollup.total_minutes += day.summary.total_minutes;
        }
    }

    let names = employee_names(db).await?;
    let mut result: Vec<MonthlyRollup> = rollups
        .into_iter()
        .map(|(uid, mut rollup)| {
            rollup.days_present = present.get(&uid).map_or(0, BTreeSet::len);
            rollup.name = display_name(&names, uid);
            rollup
        })
        .collect();
    result.sort_by_key(|r| r.device_user_id);
    Ok(result)
}

async fn load_events(
    db: &Database,
    start: NaiveDate,
    end: NaiveDate,
    filter: ReportFilter,
) -> Result<Vec<crate::model::AttendanceEvent>> {
    let (start_ts, end_ts) = (
        start.and_hms_opt(0, 0, 0).unwrap(),
        end.and_hms_opt(0, 0, 0).unwrap(),
    );
    Ok(db
        .reader()
        .call(move |conn| {
            repository::events_between(conn, start_ts, end_ts, filter.employee_id, filter.device_id)
        })
        .await?)
}

async fn employee_names(db: &Database) -> Result<BTreeMap<u16, String>> {
    let employees = db
        .reader()
        .call(|conn| repository::list_all_employees(conn))
        .await?;
    Ok(employees
        .into_iter()
        .map(|e| (e.device_user_id, e.full_name()))
        .collect())
}

fn display_name(names: &BTreeMap<u16, String>, uid: u16) -> String {
    names
        .get(&uid)
        .cloned()
        .unwrap_or_else(|| format!("User {uid}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PunchType, VerifyMode};

    async fn seed(db: &Database) -> i64 {
        db.writer()
            .call(|conn| {
                let device_id =
                    repository::insert_device(conn, "D", "10.0.0.1", 4370, false, false, 0)?;
                repository::insert_employee(conn, 1, "EMP0001", "John", "Doe", "", 0, "")?;
                Ok::<_, rusqlite::Error>(device_id)
            })
            .await
            .unwrap()
    }

    async fn insert_punch(db: &Database, device_id: i64, uid: u16, date: NaiveDate, h: u32, m: u32) {
        let employee = if uid == 1 { Some(1) } else { None };
        db.writer()
            .call(move |conn| {
                repository::insert_attendance_or_skip(
                    conn,
                    device_id,
                    employee,
                    uid,
                    date.and_hms_opt(h, m, 0).unwrap(),
                    PunchType::CheckIn,
                    VerifyMode::Fingerprint,
                )
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_daily_summary_pairs_and_orphans() {
        let db = Database::open_memory().await.unwrap();
        let device_id = seed(&db).await;
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

        insert_punch(&db, device_id, 1, day, 9, 0).await;
        insert_punch(&db, device_id, 1, day, 17, 0).await;
        // Orphan punches under an unknown uid.
        insert_punch(&db, device_id, 42, day, 8, 0).await;
        insert_punch(&db, device_id, 42, day, 16, 0).await;
        // Outside the window; must never show up.
        insert_punch(&db, device_id, 1, day, 23, 30).await;

        let rows = daily_summary(&db, day, ReportFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 2);

        let john = rows.iter().find(|r| r.device_user_id == 1).unwrap();
        assert_eq!(john.name, "John Doe");
        assert_eq!(john.employee_id, Some(1));
        assert_eq!(john.summary.pairs.len(), 1);
        assert_eq!(john.summary.total_minutes, 480);
        assert_eq!(john.summary.events_in_window, 2);

        let orphan = rows.iter().find(|r| r.device_user_id == 42).unwrap();
        assert_eq!(orphan.name, "User 42");
        assert!(orphan.employee_id.is_none());
        assert_eq!(orphan.summary.total_minutes, 480);
    }

    #[tokio::test]
    async fn test_range_summary_keys_days_independently() {
        let db = Database::open_memory().await.unwrap();
        let device_id = seed(&db).await;
        let monday = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();

        insert_punch(&db, device_id, 1, monday, 9, 0).await;
        insert_punch(&db, device_id, 1, monday, 17, 0).await;
        insert_punch(&db, device_id, 1, tuesday, 10, 0).await;
        insert_punch(&db, device_id, 1, tuesday, 16, 0).await;

        let rows = weekly_summary(&db, monday, ReportFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, monday);
        assert_eq!(rows[0].summary.total_minutes, 480);
        assert_eq!(rows[1].date, tuesday);
        assert_eq!(rows[1].summary.total_minutes, 360);
    }

    #[tokio::test]
    async fn test_monthly_rollup() {
        let db = Database::open_memory().await.unwrap();
        let device_id = seed(&db).await;
        let d1 = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();

        insert_punch(&db, device_id, 1, d1, 9, 0).await;
        insert_punch(&db, device_id, 1, d1, 17, 0).await;
        insert_punch(&db, device_id, 1, d2, 9, 0).await;

        let rollups = monthly_summary(&db, 2025, 6, ReportFilter::default())
            .await
            .unwrap();
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].days_present, 2);
        assert_eq!(rollups[0].total_events, 3);
        assert_eq!(rollups[0].total_minutes, 480);
        assert_eq!(rollups[0].name, "John Doe");
    }

    #[tokio::test]
    async fn test_device_filter() {
        let db = Database::open_memory().await.unwrap();
        let device_id = seed(&db).await;
        let other_device = db
            .writer()
            .call(|conn| repository::insert_device(conn, "D2", "10.0.0.2", 4370, false, false, 0))
            .await
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

        insert_punch(&db, device_id, 1, day, 9, 0).await;
        insert_punch(&db, other_device, 1, day, 17, 0).await;

        let filter = ReportFilter {
            device_id: Some(other_device),
            ..Default::default()
        };
        let rows = daily_summary(&db, day, filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].summary.events_in_window, 1);
    }
}
