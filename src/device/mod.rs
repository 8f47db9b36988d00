//! Device session layer.
//!
//! A [`DeviceSession`] is a stateful handle to one physical clock terminal,
//! opened through a [`SessionFactory`] and closed with `disconnect` on every
//! exit path. The wire protocol itself lives behind this trait: job code is
//! indifferent to whether the fake or a real hardware client is active.

pub mod fake;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

use crate::model::{Device, PunchType, VerifyMode};

/// Number of fingerprint slots per device user (one per finger).
pub const FINGER_SLOTS: u8 = 10;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Connection to {host}:{port} failed: {message}")]
    ConnectionFailed {
        host: String,
        port: u16,
        message: String,
    },

    #[error("Device communication error: {0}")]
    Communication(String),

    #[error("Device session is not connected")]
    NotConnected,

    #[error("Unsupported device backend: {0}")]
    UnsupportedBackend(String),
}

/// A user record as the terminal reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUser {
    pub uid: u16,
    pub name: String,
    pub privilege: u8,
    pub password: String,
    /// The terminal's free-form account id field (maps to our employee_id).
    pub account_id: String,
}

/// One punch as the terminal reports it.
#[derive(Debug, Clone)]
pub struct DevicePunch {
    pub uid: u16,
    pub timestamp: NaiveDateTime,
    pub punch_type: PunchType,
    pub verify_mode: VerifyMode,
}

/// Identity block returned by the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial_number: String,
    pub firmware_version: String,
    pub platform: String,
}

/// Result of a fingerprint template read. Both the real protocol and the
/// fake normalize into this before anything downstream sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateResult {
    Present(Vec<u8>),
    Absent,
}

impl TemplateResult {
    pub fn is_present(&self) -> bool {
        matches!(self, TemplateResult::Present(_))
    }
}

/// A stateful connection to one terminal.
///
/// All operations may fail with [`DeviceError`]. Callers own exactly one
/// session per job and must call [`disconnect`](DeviceSession::disconnect)
/// on both the success and the failure path.
#[async_trait]
pub trait DeviceSession: Send {
    async fn list_users(&mut self) -> Result<Vec<DeviceUser>, DeviceError>;

    async fn set_user(
        &mut self,
        uid: u16,
        name: &str,
        privilege: u8,
        password: &str,
        group_id: &str,
        account_id: &str,
    ) -> Result<(), DeviceError>;

    async fn delete_user(&mut self, uid: u16) -> Result<(), DeviceError>;

    async fn list_attendance(&mut self) -> Result<Vec<DevicePunch>, DeviceError>;

    async fn clear_attendance(&mut self) -> Result<(), DeviceError>;

    async fn identity(&mut self) -> Result<DeviceIdentity, DeviceError>;

    async fn get_template(&mut self, uid: u16, slot: u8) -> Result<TemplateResult, DeviceError>;

    async fn set_template(
        &mut self,
        uid: u16,
        slot: u8,
        template: &[u8],
    ) -> Result<(), DeviceError>;

    async fn delete_template(&mut self, uid: u16, slot: u8) -> Result<(), DeviceError>;

    /// Put the terminal into hardware capture mode for one finger slot.
    /// The capture itself happens out-of-band on the physical unit and only
    /// becomes observable through a later template download.
    async fn start_enrollment(&mut self, uid: u16, slot: u8) -> Result<(), DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;
}

/// Opens sessions for a device. The crate ships [`fake::FakeDevice`]; a real
/// hardware-protocol client plugs in through the same trait.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceSession>, DeviceError>;
}

/// Outcome of a connectivity probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub ok: bool,
    pub message: String,
    pub elapsed: Duration,
}

/// Test whether a device is reachable: open a session, immediately close it,
/// report success and elapsed time. Never mutates device state.
pub async fn probe(factory: &dyn SessionFactory, device: &Device) -> ProbeReport {
    let started = std::time::Instant::now();
    match factory.open(device).await {
        Ok(mut session) => {
            let result = session.disconnect().await;
            let elapsed = started.elapsed();
            match result {
                Ok(()) => ProbeReport {
                    ok: true,
                    message: "Connection successful".to_string(),
                    elapsed,
                },
                Err(e) => ProbeReport {
                    ok: false,
                    message: e.to_string(),
                    elapsed,
                },
            }
        }
        Err(e) => ProbeReport {
            ok: false,
            message: e.to_string(),
            elapsed: started.elapsed(),
        },
    }
}
