use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// A registered clock terminal.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Force UDP transport instead of TCP.
    pub force_udp: bool,
    /// Skip the ICMP reachability check before connecting.
    pub omit_ping: bool,
    /// Communication password, 0 = none.
    pub comm_password: u32,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub is_active: bool,
    pub last_sync: Option<DateTime<Utc>>,
}

/// An employee mirrored between the database and one or more terminals.
///
/// `synced_to_device` flips to false on any local edit and back to true only
/// after a successful upload; it is advisory, not authoritative.
#[derive(Debug, Clone, Serialize)]
pub struct Employee {
    pub id: i64,
    /// Device-facing numeric id, 1-65535, unique across employees.
    pub device_user_id: u16,
    pub employee_id: String,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub card_number: String,
    /// Device keypad password, not a web credential.
    pub password: String,
    /// 0 = normal user, 14 = device admin.
    pub privilege: u8,
    pub is_active: bool,
    pub synced_to_device: bool,
    pub device_id: Option<i64>,
}

impl Employee {
    pub fn full_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

/// One stored fingerprint template. At most one per (employee, finger slot).
#[derive(Debug, Clone)]
pub struct FingerprintTemplate {
    pub id: i64,
    pub employee_id: i64,
    /// Finger slot 0-9.
    pub finger_index: u8,
    pub template: Vec<u8>,
    pub device_id: Option<i64>,
}

/// One punch row, append-only. `employee_id` is NULL for orphan punches
/// whose device user id has no matching employee.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEvent {
    pub id: i64,
    pub device_id: i64,
    pub employee_id: Option<i64>,
    pub device_user_id: u16,
    /// Device-local timestamp as reported by the terminal.
    pub timestamp: NaiveDateTime,
    pub punch_type: PunchType,
    pub verify_mode: VerifyMode,
    pub work_code: i64,
}

/// Punch type codes as the terminals report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PunchType {
    CheckIn,
    CheckOut,
    BreakOut,
    BreakIn,
    OvertimeIn,
    OvertimeOut,
}

impl PunchType {
    pub fn code(self) -> i64 {
        match self {
            PunchType::CheckIn => 0,
            PunchType::CheckOut => 1,
            PunchType::BreakOut => 2,
            PunchType::BreakIn => 3,
            PunchType::OvertimeIn => 4,
            PunchType::OvertimeOut => 5,
        }
    }

    /// Unknown codes fall back to `CheckIn`, matching how the terminals
    /// treat unconfigured punch-state keys.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => PunchType::CheckOut,
            2 => PunchType::BreakOut,
            3 => PunchType::BreakIn,
            4 => PunchType::OvertimeIn,
            5 => PunchType::OvertimeOut,
            _ => PunchType::CheckIn,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PunchType::CheckIn => "Check In",
            PunchType::CheckOut => "Check Out",
            PunchType::BreakOut => "Break Out",
            PunchType::BreakIn => "Break In",
            PunchType::OvertimeIn => "Overtime In",
            PunchType::OvertimeOut => "Overtime Out",
        }
    }
}

/// How the punch was verified at the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerifyMode {
    Password,
    Fingerprint,
    Card,
    Face,
    Iris,
    Other,
}

impl VerifyMode {
    pub fn code(self) -> i64 {
        match self {
            VerifyMode::Password => 0,
            VerifyMode::Fingerprint => 1,
            VerifyMode::Card => 2,
            VerifyMode::Face => 3,
            VerifyMode::Iris => 4,
            VerifyMode::Other => 15,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => VerifyMode::Password,
            1 => VerifyMode::Fingerprint,
            2 => VerifyMode::Card,
            3 => VerifyMode::Face,
            4 => VerifyMode::Iris,
            _ => VerifyMode::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VerifyMode::Password => "Password",
            VerifyMode::Fingerprint => "Fingerprint",
            VerifyMode::Card => "Card",
            VerifyMode::Face => "Face",
            VerifyMode::Iris => "Iris",
            VerifyMode::Other => "Others",
        }
    }
}
