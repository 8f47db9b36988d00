//! Roster reconciliation between the employee table and a terminal.
//!
//! The planning half is pure set arithmetic; the application half issues the
//! per-item device operations and classifies each outcome.

use std::collections::BTreeSet;

use crate::device::{DeviceSession, FINGER_SLOTS};
use crate::model::Employee;

use super::ItemOutcome;

/// Operations needed to converge a terminal onto the active roster. The
/// upsert set is implicit: every active employee is uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterPlan {
    /// Device uids with no matching active employee, ascending.
    pub to_delete: Vec<u16>,
}

/// `to_delete = device uids − active employee uids`.
pub fn roster_diff(
    device_uids: impl IntoIterator<Item = u16>,
    active_uids: impl IntoIterator<Item = u16>,
) -> RosterPlan {
    let device: BTreeSet<u16> = device_uids.into_iter().collect();
    let active: BTreeSet<u16> = active_uids.into_iter().collect();
    RosterPlan {
        to_delete: device.difference(&active).copied().collect(),
    }
}

/// Derive first/last name from a device name: first whitespace token is the
/// first name, the remainder joined by spaces is the last name. An empty
/// device name synthesizes `User<uid>`.
pub fn split_device_name(name: &str, uid: u16) -> (String, String) {
    let mut tokens = name.split_whitespace();
    match tokens.next() {
        Some(first) => (first.to_string(), tokens.collect::<Vec<_>>().join(" ")),
        None => (format!("User{uid}"), String::new()),
    }
}

/// Employee id for a downloaded device user; blank ids synthesize
/// `EMP<uid zero-padded to 4 digits>`.
pub fn device_employee_id(account_id: &str, uid: u16) -> String {
    if account_id.trim().is_empty() {
        format!("EMP{uid:04}")
    } else {
        account_id.to_string()
    }
}

/// Delete one device user, then best-effort delete all 10 fingerprint
/// slots for that uid. Slot failures (usually an already-empty slot) are
/// swallowed per slot; a failed user deletion skips the slot cascade and
/// is reported.
pub async fn delete_device_user(session: &mut dyn DeviceSession, uid: u16) -> ItemOutcome {
    if let Err(e) = session.delete_user(uid).await {
        return ItemOutcome::Failed(format!("Failed to delete user {uid}: {e}"));
    }
    for slot in 0..FINGER_SLOTS {
        if let Err(e) = session.delete_template(uid, slot).await {
            log::debug!("Ignoring template delete failure for uid {uid} slot {slot}: {e}");
        }
    }
    ItemOutcome::Success
}

/// Upload one employee record to the terminal.
pub async fn upload_employee(
    session: &mut dyn DeviceSession,
    employee: &Employee,
) -> ItemOutcome {
    match session
        .set_user(
            employee.device_user_id,
            &employee.full_name(),
            employee.privilege,
            &employee.password,
            "0",
            &employee.employee_id,
        )
        .await
    {
        Ok(()) => ItemOutcome::Success,
        Err(e) => ItemOutcome::Failed(format!("{}: {e}", employee.full_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::FakeDevice;
    use crate::device::SessionFactory;
    use crate::model::Device;

    fn device() -> Device {
        Device {
            id: 1,
            name: "Test".into(),
            host: "127.0.0.1".into(),
            port: 4370,
            force_udp: false,
            omit_ping: false,
            comm_password: 0,
            serial_number: None,
            firmware_version: None,
            is_active: true,
            last_sync: None,
        }
    }

    fn employee(uid: u16, first: &str, last: &str) -> Employee {
        Employee {
            id: uid as i64,
            device_user_id: uid,
            employee_id: format!("EMP{uid:04}"),
            first_name: first.into(),
            last_name: last.into(),
            department: String::new(),
            card_number: String::new(),
            password: String::new(),
            privilege: 0,
            is_active: true,
            synced_to_device: false,
            device_id: None,
        }
    }

    #[test]
    fn test_roster_diff() {
        let plan = roster_diff([1, 2, 3, 9], [2, 3, 4]);
        assert_eq!(plan.to_delete, vec![1, 9]);
    }

    #[test]
    fn test_roster_diff_empty_device() {
        let plan = roster_diff([], [1, 2]);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn test_split_device_name() {
        assert_eq!(
            split_device_name("John Doe", 1),
            ("John".to_string(), "Doe".to_string())
        );
        assert_eq!(
            split_device_name("Ana Maria de Souza", 2),
            ("Ana".to_string(), "Maria de Souza".to_string())
        );
        assert_eq!(
            split_device_name("Cher", 3),
            ("Cher".to_string(), String::new())
        );
        assert_eq!(
            split_device_name("", 7),
            ("User7".to_string(), String::new())
        );
        assert_eq!(
            split_device_name("   ", 8),
            ("User8".to_string(), String::new())
        );
    }

    #[test]
    fn test_device_employee_id() {
        assert_eq!(device_employee_id("EMP001", 1), "EMP001");
        assert_eq!(device_employee_id("", 7), "EMP0007");
        assert_eq!(device_employee_id("  ", 123), "EMP0123");
    }

    #[tokio::test]
    async fn test_delete_cascades_all_slots_despite_failures() {
        // Only slots 0 and 5 hold templates; the other eight deletions fail
        // on the device and must be swallowed.
        let fake = FakeDevice::new()
            .with_user(4, "Alice Williams", 14, "", "EMP004")
            .with_template(4, 0, b"T0")
            .with_template(4, 5, b"T5");
        let mut session = fake.open(&device()).await.unwrap();

        let outcome = delete_device_user(session.as_mut(), 4).await;
        session.disconnect().await.unwrap();

        assert!(outcome.is_success());
        assert!(!fake.has_user(4));
        let attempts = fake.template_delete_attempts();
        assert_eq!(attempts.len(), 10);
        assert_eq!(
            attempts,
            (0..10).map(|slot| (4, slot)).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_delete_user_failure_skips_slot_cascade() {
        let fake = FakeDevice::new().with_user(4, "Alice", 0, "", "EMP004");
        fake.fail_delete_user_for(4);
        let mut session = fake.open(&device()).await.unwrap();

        let outcome = delete_device_user(session.as_mut(), 4).await;
        session.disconnect().await.unwrap();

        assert!(outcome.is_failed());
        assert!(fake.template_delete_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_upload_employee_outcomes() {
        let fake = FakeDevice::new();
        fake.fail_set_user_for(2);
        let mut session = fake.open(&device()).await.unwrap();

        let ok = upload_employee(session.as_mut(), &employee(1, "John", "Doe")).await;
        let failed = upload_employee(session.as_mut(), &employee(2, "Jane", "Smith")).await;
        session.disconnect().await.unwrap();

        assert!(ok.is_success());
        match failed {
            ItemOutcome::Failed(msg) => assert!(msg.starts_with("Jane Smith:")),
            other => panic!("expected failure, got {other:?}"),
        }
        let uploaded = fake.user(1).unwrap();
        assert_eq!(uploaded.name, "John Doe");
        assert_eq!(uploaded.account_id, "EMP0001");
    }
}
