use adevice_sync::adb::{DeviceBridge, PushHandle};
use adevice_sync::error::SyncError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// In-memory stand-in for a device, implementing `DeviceBridge` the way the
/// real adapter does but against a `HashMap` instead of a shelled-out `adb`.
/// Failures are injected per-call-kind so a test can simulate an unauthorized
/// device, a missing timestamp, and so on.
#[derive(Default)]
pub struct FakeBridge {
    files: RefCell<HashMap<String, Vec<u8>>>,
    install_time: RefCell<String>,
    installed: RefCell<Vec<(Vec<PathBuf>, Option<String>)>>,
    pushes: RefCell<Vec<String>>,
    deletes: RefCell<Vec<String>>,
    force_stopped: RefCell<Vec<String>>,
    started: RefCell<Vec<String>>,
    fail_next_shell: RefCell<Option<SyncError>>,
    cancelled: RefCell<bool>,
}

impl FakeBridge {
    pub fn new() -> Self {
        FakeBridge::default()
    }

    pub fn with_device_file(self, remote_path: &str, contents: &[u8]) -> Self {
        self.files.borrow_mut().insert(remote_path.to_string(), contents.to_vec());
        self
    }

    pub fn with_install_time(self, timestamp: &str) -> Self {
        *self.install_time.borrow_mut() = timestamp.to_string();
        self
    }

    pub fn fail_next_shell_with(&self, error: SyncError) {
        *self.fail_next_shell.borrow_mut() = Some(error);
    }

    pub fn device_file(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(remote_path).cloned()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.borrow().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.borrow().clone()
    }

    pub fn force_stop_calls(&self) -> Vec<String> {
        self.force_stopped.borrow().clone()
    }

    pub fn start_calls(&self) -> Vec<String> {
        self.started.borrow().clone()
    }

    pub fn install_multiple_calls(&self) -> Vec<(Vec<PathBuf>, Option<String>)> {
        self.installed.borrow().clone()
    }

    pub fn cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    fn maybe_fail(&self) -> Result<(), SyncError> {
        if let Some(err) = self.fail_next_shell.borrow_mut().take() {
            return Err(err);
        }
        Ok(())
    }
}

impl DeviceBridge for FakeBridge {
    fn shell(&self, _args: &[String]) -> Result<String, SyncError> {
        self.maybe_fail()?;
        Ok(String::new())
    }

    fn push(&self, local: PathBuf, remote: String) -> PushHandle {
        let result = self.maybe_fail().map(|_| {
            let bytes = std::fs::read(&local).unwrap_or_default();
            self.files.borrow_mut().insert(remote.clone(), bytes);
            self.pushes.borrow_mut().push(remote);
            String::new()
        });
        PushHandle::ready(result)
    }

    fn push_string(&self, contents: Vec<u8>, remote: String) -> PushHandle {
        let result = self.maybe_fail().map(|_| {
            self.files.borrow_mut().insert(remote.clone(), contents);
            self.pushes.borrow_mut().push(remote);
            String::new()
        });
        PushHandle::ready(result)
    }

    fn pull(&self, remote: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(remote).cloned()
    }

    fn install(&self, _apk: &Path) -> Result<String, SyncError> {
        self.maybe_fail()?;
        Ok("Success".to_string())
    }

    fn install_multiple(
        &self,
        apks: &[PathBuf],
        parent_package: Option<&str>,
    ) -> Result<String, SyncError> {
        self.maybe_fail()?;
        self.installed.borrow_mut().push((apks.to_vec(), parent_package.map(str::to_string)));
        Ok("Success".to_string())
    }

    fn mkdir(&self, _dir: &str) -> Result<(), SyncError> {
        self.maybe_fail()
    }

    fn delete_multiple(&self, files: &[String]) -> Result<(), SyncError> {
        self.maybe_fail()?;
        for f in files {
            self.files.borrow_mut().remove(f);
            self.deletes.borrow_mut().push(f.clone());
        }
        Ok(())
    }

    fn force_stop(&self, package: &str) -> Result<(), SyncError> {
        self.maybe_fail()?;
        self.force_stopped.borrow_mut().push(package.to_string());
        Ok(())
    }

    fn start_app(&self, package: &str) -> Result<(), SyncError> {
        self.maybe_fail()?;
        self.started.borrow_mut().push(package.to_string());
        Ok(())
    }

    fn get_install_time(&self, _package: &str) -> Result<String, SyncError> {
        self.maybe_fail()?;
        Ok(self.install_time.borrow().clone())
    }

    fn cancel_pending(&self) {
        *self.cancelled.borrow_mut() = true;
    }

    fn begin_push_batch(&self) {
        *self.cancelled.borrow_mut() = false;
    }
}
