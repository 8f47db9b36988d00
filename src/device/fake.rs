//! Deterministic in-memory device for development and tests.
//!
//! A [`FakeDevice`] owns its state and hands out sessions that share it, so
//! a test can seed users, run a job through the normal [`SessionFactory`]
//! seam, and then assert on what the "hardware" looks like afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::model::Device;

use super::{
    DeviceError, DeviceIdentity, DevicePunch, DeviceSession, DeviceUser, SessionFactory,
    TemplateResult,
};

#[derive(Default)]
struct FakeState {
    users: Vec<DeviceUser>,
    templates: HashMap<(u16, u8), Vec<u8>>,
    punches: Vec<DevicePunch>,
    attendance_cleared: bool,
    fail_connect: bool,
    fail_set_user: HashSet<u16>,
    fail_delete_user: HashSet<u16>,
    template_delete_attempts: Vec<(u16, u8)>,
}

/// Factory + state store for the fake terminal. Construct one per test.
#[derive(Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    // ── Seeding ────────────────────────────────────────────────────

    pub fn with_user(
        self,
        uid: u16,
        name: &str,
        privilege: u8,
        password: &str,
        account_id: &str,
    ) -> Self {
        self.state.lock().unwrap().users.push(DeviceUser {
            uid,
            name: name.to_string(),
            privilege,
            password: password.to_string(),
            account_id: account_id.to_string(),
        });
        self
    }

    pub fn with_template(self, uid: u16, slot: u8, template: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .templates
            .insert((uid, slot), template.to_vec());
        self
    }

    pub fn with_punch(self, punch: DevicePunch) -> Self {
        self.state.lock().unwrap().punches.push(punch);
        self
    }

    // ── Failure injection ──────────────────────────────────────────

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().unwrap().fail_connect = fail;
    }

    /// Make `set_user` fail for one uid, leaving other uploads untouched.
    pub fn fail_set_user_for(&self, uid: u16) {
        self.state.lock().unwrap().fail_set_user.insert(uid);
    }

    pub fn fail_delete_user_for(&self, uid: u16) {
        self.state.lock().unwrap().fail_delete_user.insert(uid);
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn user_count(&self) -> usize {
        self.state.lock().unwrap().users.len()
    }

    pub fn has_user(&self, uid: u16) -> bool {
        self.state.lock().unwrap().users.iter().any(|u| u.uid == uid)
    }

    pub fn user(&self, uid: u16) -> Option<DeviceUser> {
        self.state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.uid == uid)
            .cloned()
    }

    pub fn template(&self, uid: u16, slot: u8) -> Option<Vec<u8>> {
        self.state.lock().unwrap().templates.get(&(uid, slot)).cloned()
    }

    pub fn punch_count(&self) -> usize {
        self.state.lock().unwrap().punches.len()
    }

    pub fn attendance_cleared(&self) -> bool {
        self.state.lock().unwrap().attendance_cleared
    }

    /// Every (uid, slot) a session tried to delete, in order.
    pub fn template_delete_attempts(&self) -> Vec<(u16, u8)> {
        self.state.lock().unwrap().template_delete_attempts.clone()
    }
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for FakeDevice {
    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceSession>, DeviceError> {
        if self.state.lock().unwrap().fail_connect {
            return Err(DeviceError::ConnectionFailed {
                host: device.host.clone(),
                port: device.port,
                message: "fake device refused connection".to_string(),
            });
        }
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            connected: true,
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    connected: bool,
}

impl FakeSession {
    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }
}

#[async_trait]
impl DeviceSession for FakeSession {
    async fn list_users(&mut self) -> Result<Vec<DeviceUser>, DeviceError> {
        self.ensure_connected()?;
        Ok(self.state.lock().unwrap().users.clone())
    }

    async fn set_user(
        &mut self,
        uid: u16,
        name: &str,
        privilege: u8,
        password: &str,
        _group_id: &str,
        account_id: &str,
    ) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().unwrap();
        if state.fail_set_user.contains(&uid) {
            return Err(DeviceError::Communication(format!(
                "set_user rejected for uid {uid}"
            )));
        }
        let user = DeviceUser {
            uid,
            name: name.to_string(),
            privilege,
            password: password.to_string(),
            account_id: account_id.to_string(),
        };
        match state.users.iter_mut().find(|u| u.uid == uid) {
            Some(existing) => *existing = user,
            None => state.users.push(user),
        }
        Ok(())
    }

    async fn delete_user(&mut self, uid: u16) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().unwrap();
        if state.fail_delete_user.contains(&uid) {
            return Err(DeviceError::Communication(format!(
                "delete_user rejected for uid {uid}"
            )));
        }
        state.users.retain(|u| u.uid != uid);
        Ok(())
    }

    async fn list_attendance(&mut self) -> Result<Vec<DevicePunch>, DeviceError> {
        self.ensure_connected()?;
        Ok(self.state.lock().unwrap().punches.clone())
    }

    async fn clear_attendance(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().unwrap();
        state.punches.clear();
        state.attendance_cleared = true;
        Ok(())
    }

    async fn identity(&mut self) -> Result<DeviceIdentity, DeviceError> {
        self.ensure_connected()?;
        Ok(DeviceIdentity {
            serial_number: "FAKE-K40-12345".to_string(),
            firmware_version: "Ver 6.60 Apr 28 2018".to_string(),
            platform: "ZEM560".to_string(),
        })
    }

    async fn get_template(&mut self, uid: u16, slot: u8) -> Result<TemplateResult, DeviceError> {
        self.ensure_connected()?;
        let state = self.state.lock().unwrap();
        Ok(match state.templates.get(&(uid, slot)) {
            Some(data) => TemplateResult::Present(data.clone()),
            None => TemplateResult::Absent,
        })
    }

    async fn set_template(
        &mut self,
        uid: u16,
        slot: u8,
        template: &[u8],
    ) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.state
            .lock()
            .unwrap()
            .templates
            .insert((uid, slot), template.to_vec());
        Ok(())
    }

    async fn delete_template(&mut self, uid: u16, slot: u8) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().unwrap();
        state.template_delete_attempts.push((uid, slot));
        if state.templates.remove(&(uid, slot)).is_none() {
            // Real terminals reject deletion of an empty slot.
            return Err(DeviceError::Communication(format!(
                "no template in slot {slot} for uid {uid}"
            )));
        }
        Ok(())
    }

    async fn start_enrollment(&mut self, uid: u16, slot: u8) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        // The fake stands in for the out-of-band capture by planting a
        // synthetic template immediately.
        self.state
            .lock()
            .unwrap()
            .templates
            .insert((uid, slot), format!("FAKE_TEMPLATE_U{uid}_F{slot}").into_bytes());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[tokio::test]
    async fn test_set_user_upserts() {
        let fake = FakeDevice::new().with_user(1, "John Doe", 0, "", "EMP001");
        let mut session = fake.open(&device()).await.unwrap();

        session.set_user(1, "John D", 14, "1234", "0", "EMP001").await.unwrap();
        session.set_user(2, "Jane Smith", 0, "", "0", "EMP002").await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(fake.user_count(), 2);
        let john = fake.user(1).unwrap();
        assert_eq!(john.name, "John D");
        assert_eq!(john.privilege, 14);
    }

    #[tokio::test]
    async fn test_operations_fail_after_disconnect() {
        let fake = FakeDevice::new();
        let mut session = fake.open(&device()).await.unwrap();
        session.disconnect().await.unwrap();
        assert!(matches!(
            session.list_users().await,
            Err(DeviceError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_delete_template_on_empty_slot_errors() {
        let fake = FakeDevice::new().with_template(1, 0, b"T");
        let mut session = fake.open(&device()).await.unwrap();

        assert!(session.delete_template(1, 0).await.is_ok());
        assert!(session.delete_template(1, 0).await.is_err());
        session.disconnect().await.unwrap();

        assert_eq!(fake.template_delete_attempts(), vec![(1, 0), (1, 0)]);
    }

    #[tokio::test]
    async fn test_enrollment_plants_template() {
        let fake = FakeDevice::new().with_user(3, "Bob Johnson", 0, "", "EMP003");
        let mut session = fake.open(&device()).await.unwrap();

        session.start_enrollment(3, 6).await.unwrap();
        let result = session.get_template(3, 6).await.unwrap();
        session.disconnect().await.unwrap();

        assert!(result.is_present());
        assert!(fake.template(3, 6).is_some());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let fake = FakeDevice::new().with_user(1, "John", 0, "", "EMP001");
        fake.fail_set_user_for(1);
        fake.fail_delete_user_for(1);

        let mut session = fake.open(&device()).await.unwrap();
        assert!(session.set_user(1, "X", 0, "", "0", "EMP001").await.is_err());
        assert!(session.delete_user(1).await.is_err());
        assert!(session.set_user(2, "Y", 0, "", "0", "EMP002").await.is_ok());
        session.disconnect().await.unwrap();

        assert!(fake.has_user(1));
    }

    #[tokio::test]
    async fn test_clear_attendance() {
        use crate::model::{PunchType, VerifyMode};
        let fake = FakeDevice::new().with_punch(DevicePunch {
            uid: 1,
            timestamp: chrono::NaiveDate::from_ymd_opt(2025, 6, 2)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            punch_type: PunchType::CheckIn,
            verify_mode: VerifyMode::Fingerprint,
        });

        let mut session = fake.open(&device()).await.unwrap();
        session.clear_attendance().await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(fake.punch_count(), 0);
        assert!(fake.attendance_cleared());
    }
}
