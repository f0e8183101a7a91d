//! Wraps invocations of the external device-bridge CLI (`adb`), classifies
//! its failures, and owns the fixed-size worker pool that backs parallel
//! pushes.
//!
//! Sequential operations (`shell`, `pull`, `install`, `install-multiple`,
//! `mkdir`, `force-stop`, `start`) run synchronously on the calling thread.
//! `push`/`push_string` submit to the pool and hand back a `PushHandle`.

use crate::error::SyncError;
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;

lazy_static! {
    static ref MULTIPLE_DEVICES_MATCHER: Regex =
        Regex::new(r"more than one (device and emulator|device|emulator)")
            .expect("regex does not compile");
}

pub trait DeviceBridge {
    fn shell(&self, args: &[String]) -> Result<String, SyncError>;
    fn push(&self, local: PathBuf, remote: String) -> PushHandle;
    fn push_string(&self, contents: Vec<u8>, remote: String) -> PushHandle;
    fn pull(&self, remote: &str) -> Option<Vec<u8>>;
    fn install(&self, apk: &Path) -> Result<String, SyncError>;
    fn install_multiple(
        &self,
        apks: &[PathBuf],
        parent_package: Option<&str>,
    ) -> Result<String, SyncError>;
    fn mkdir(&self, dir: &str) -> Result<(), SyncError>;
    fn delete_multiple(&self, files: &[String]) -> Result<(), SyncError>;
    fn force_stop(&self, package: &str) -> Result<(), SyncError>;
    fn start_app(&self, package: &str) -> Result<(), SyncError>;
    fn get_install_time(&self, package: &str) -> Result<String, SyncError>;

    /// Cancels any not-yet-started handle still queued in the pool. Already
    /// running pushes are allowed to complete (see §5: no guarantee of
    /// mid-transfer abort, the next run reconciles correctly anyway).
    fn cancel_pending(&self);

    /// Re-arms the pool for a fresh batch of pushes, clearing any
    /// cancellation left over from a prior batch.
    fn begin_push_batch(&self);
}

struct AdbConfig {
    adb_path: String,
    extra_args: Vec<String>,
    user_home_dir: String,
}

/// Raw, but already de-plumbed, result of a single adb invocation.
struct RawOutput {
    argv: Vec<String>,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

fn run_raw(config: &AdbConfig, args: &[String]) -> Result<RawOutput, SyncError> {
    let full_args: Vec<String> =
        config.extra_args.iter().cloned().chain(args.iter().cloned()).collect();
    let output = Command::new(&config.adb_path)
        .env_clear()
        .env("HOME", &config.user_home_dir)
        .args(&full_args)
        .output()
        .context("spawning adb")
        .map_err(|e| SyncError::Bridge {
            argv: full_args.clone(),
            exit_code: None,
            stdout: String::new(),
            stderr: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
    let exit_code = output.status.code();

    classify(full_args, exit_code, stdout, stderr)
}

/// Error classification precedes generic failure: device-not-found and
/// device-unauthorized are substring matches, multiple-devices is a regex
/// on stderr with a leading "error: " stripped, and only after those a
/// plain non-zero exit becomes a `BridgeError`.
fn classify(
    argv: Vec<String>,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
) -> Result<RawOutput, SyncError> {
    if stderr.contains("device not found") {
        return Err(SyncError::DeviceNotFound);
    }
    if stderr.contains("device unauthorized") {
        return Err(SyncError::DeviceUnauthorized);
    }
    if MULTIPLE_DEVICES_MATCHER.is_match(&stderr) {
        let message = stderr.strip_prefix("error: ").unwrap_or(&stderr).to_string();
        return Err(SyncError::MultipleDevices { message });
    }
    if exit_code != Some(0) {
        return Err(SyncError::Bridge { argv, exit_code, stdout, stderr });
    }
    Ok(RawOutput { argv, exit_code, stdout, stderr })
}

/// `install`/`install-multiple` may exit 0 while having failed; the literal
/// token `Success` must appear in one of the captured streams.
fn require_success(raw: RawOutput) -> Result<String, SyncError> {
    if raw.stdout.contains("Success") || raw.stderr.contains("Success") {
        Ok(raw.stdout)
    } else {
        Err(SyncError::Bridge {
            argv: raw.argv,
            exit_code: raw.exit_code,
            stdout: raw.stdout,
            stderr: raw.stderr,
        })
    }
}

type Task = Box<dyn FnOnce() -> Result<String, SyncError> + Send>;

struct Job {
    task: Task,
    result_tx: mpsc::SyncSender<Result<String, SyncError>>,
}

/// Fixed-size pool of worker threads pulling from a shared job queue, the
/// concurrency shape the original's `ThreadPoolExecutor` gives pushes:
/// bounded parallelism, a cooperative cancellation flag checked before a
/// queued job starts.
struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    cancelled: Arc<Mutex<bool>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let cancelled = Arc::new(Mutex::new(false));
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let receiver = Arc::clone(&receiver);
            let cancelled = Arc::clone(&cancelled);
            workers.push(thread::spawn(move || loop {
                let job = receiver.lock().unwrap().recv();
                match job {
                    Ok(job) => {
                        if *cancelled.lock().unwrap() {
                            continue;
                        }
                        let result = (job.task)();
                        let _ = job.result_tx.send(result);
                    }
                    Err(_) => break,
                }
            }));
        }
        WorkerPool { sender: Some(sender), cancelled, workers }
    }

    fn submit(&self, task: Task) -> PushHandle {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        self.sender
            .as_ref()
            .expect("pool not yet shut down")
            .send(Job { task, result_tx })
            .expect("worker pool threads gone");
        PushHandle { result_rx }
    }

    fn cancel_pending(&self) {
        *self.cancelled.lock().unwrap() = true;
    }

    /// Re-arms the pool for the next batch of pushes.
    fn reset(&self) {
        *self.cancelled.lock().unwrap() = false;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

pub struct PushHandle {
    result_rx: mpsc::Receiver<Result<String, SyncError>>,
}

impl PushHandle {
    /// Builds an already-resolved handle. Used by test doubles that don't
    /// run a real worker pool but still need to satisfy the `DeviceBridge`
    /// trait's push/push_string return type.
    pub fn ready(result: Result<String, SyncError>) -> Self {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let _ = result_tx.send(result);
        PushHandle { result_rx }
    }

    pub fn wait(self) -> Result<String, SyncError> {
        self.result_rx.recv().unwrap_or_else(|_| {
            Err(SyncError::Bridge {
                argv: vec![],
                exit_code: None,
                stdout: String::new(),
                stderr: "push was cancelled before it ran".to_string(),
            })
        })
    }
}

pub struct RealAdb {
    config: Arc<AdbConfig>,
    pool: WorkerPool,
    scratch: TempDir,
    file_counter: AtomicU64,
}

impl RealAdb {
    pub fn new(
        adb_path: String,
        extra_args: Vec<String>,
        user_home_dir: String,
        adb_jobs: usize,
    ) -> Result<Self> {
        let scratch = TempDir::new().context("creating scratch dir for push-string temp files")?;
        Ok(RealAdb {
            config: Arc::new(AdbConfig { adb_path, extra_args, user_home_dir }),
            pool: WorkerPool::new(adb_jobs),
            scratch,
            file_counter: AtomicU64::new(0),
        })
    }

}

impl DeviceBridge for RealAdb {
    fn shell(&self, args: &[String]) -> Result<String, SyncError> {
        let mut full = vec!["shell".to_string()];
        full.extend(args.iter().cloned());
        run_raw(&self.config, &full).map(|raw| raw.stdout)
    }

    fn push(&self, local: PathBuf, remote: String) -> PushHandle {
        let config = Arc::clone(&self.config);
        self.pool.submit(Box::new(move || {
            run_raw(&config, &["push".to_string(), local.display().to_string(), remote])
                .map(|raw| raw.stdout)
        }))
    }

    fn push_string(&self, contents: Vec<u8>, remote: String) -> PushHandle {
        let n = self.file_counter.fetch_add(1, Ordering::Relaxed);
        let local_path = self.scratch.path().join(format!("push-string-{n}"));
        if let Err(e) = std::fs::write(&local_path, &contents) {
            let (result_tx, result_rx) = mpsc::sync_channel(1);
            let _ = result_tx.send(Err(SyncError::Bridge {
                argv: vec![],
                exit_code: None,
                stdout: String::new(),
                stderr: format!("writing temp file for push_string: {e}"),
            }));
            return PushHandle { result_rx };
        }
        self.push(local_path, remote)
    }

    fn pull(&self, remote: &str) -> Option<Vec<u8>> {
        let local_path = self.scratch.path().join(format!(
            "pull-{}",
            self.file_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let result =
            run_raw(&self.config, &["pull".to_string(), remote.to_string(), local_path.display().to_string()]);
        match result {
            Ok(_) => std::fs::read(&local_path).ok(),
            Err(_) => None,
        }
    }

    fn install(&self, apk: &Path) -> Result<String, SyncError> {
        let raw = run_raw(&self.config, &["install".to_string(), "-r".to_string(), apk.display().to_string()])?;
        require_success(raw)
    }

    fn install_multiple(
        &self,
        apks: &[PathBuf],
        parent_package: Option<&str>,
    ) -> Result<String, SyncError> {
        let mut args = vec!["install-multiple".to_string(), "-r".to_string()];
        if let Some(pkg) = parent_package {
            args.push("-p".to_string());
            args.push(pkg.to_string());
        }
        args.extend(apks.iter().map(|p| p.display().to_string()));
        require_success(run_raw(&self.config, &args)?)
    }

    fn mkdir(&self, dir: &str) -> Result<(), SyncError> {
        match self.shell(&["mkdir".to_string(), "-p".to_string(), dir.to_string()]) {
            Ok(_) => Ok(()),
            // Tolerate a race on mid-level directory creation: this tool is
            // the sole writer, but `mkdir -p` racing itself across steps is
            // not a correctness failure.
            Err(SyncError::Bridge { stderr, .. }) if stderr.contains("File exists") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn delete_multiple(&self, files: &[String]) -> Result<(), SyncError> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["rm".to_string(), "-fr".to_string()];
        args.extend(files.iter().cloned());
        self.shell(&args).map(|_| ())
    }

    fn force_stop(&self, package: &str) -> Result<(), SyncError> {
        self.shell(&["am".to_string(), "force-stop".to_string(), package.to_string()]).map(|_| ())
    }

    fn start_app(&self, package: &str) -> Result<(), SyncError> {
        self.shell(&[
            "monkey".to_string(),
            "-p".to_string(),
            package.to_string(),
            "-c".to_string(),
            "android.intent.category.LAUNCHER".to_string(),
            "1".to_string(),
        ])
        .map(|_| ())
    }

    fn get_install_time(&self, package: &str) -> Result<String, SyncError> {
        let stdout = self.shell(&["dumpsys".to_string(), "package".to_string(), package.to_string()])?;
        parse_last_update_time(&stdout).ok_or_else(|| SyncError::Timestamp {
            message: "at least one non-incremental install must precede incremental installs"
                .to_string(),
        })
    }

    fn cancel_pending(&self) {
        self.pool.cancel_pending();
    }

    fn begin_push_batch(&self) {
        self.pool.reset();
    }
}

lazy_static! {
    static ref LAST_UPDATE_TIME_MATCHER: Regex =
        Regex::new(r"(?m)lastUpdateTime=(.*)$").expect("regex does not compile");
}

fn parse_last_update_time(dumpsys_output: &str) -> Option<String> {
    LAST_UPDATE_TIME_MATCHER.captures(dumpsys_output).map(|c| c[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_device_not_found() {
        let err = classify(vec![], Some(1), String::new(), "error: device not found".to_string())
            .unwrap_err();
        assert!(matches!(err, SyncError::DeviceNotFound));
    }

    #[test]
    fn classify_device_unauthorized() {
        let err =
            classify(vec![], Some(1), String::new(), "device unauthorized".to_string()).unwrap_err();
        assert!(matches!(err, SyncError::DeviceUnauthorized));
    }

    #[test]
    fn classify_multiple_devices_strips_error_prefix() {
        let err = classify(
            vec![],
            Some(1),
            String::new(),
            "error: more than one device".to_string(),
        )
        .unwrap_err();
        match err {
            SyncError::MultipleDevices { message } => assert_eq!(message, "more than one device"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn classify_generic_nonzero_exit_is_bridge_error() {
        let err = classify(vec!["adb".to_string()], Some(1), String::new(), "boom".to_string())
            .unwrap_err();
        assert!(matches!(err, SyncError::Bridge { .. }));
    }

    #[test]
    fn classify_success_passes_through() {
        let raw = classify(vec![], Some(0), "ok".to_string(), String::new()).unwrap();
        assert_eq!(raw.stdout, "ok");
    }

    #[test]
    fn require_success_checks_either_stream() {
        let raw = RawOutput {
            argv: vec![],
            exit_code: Some(0),
            stdout: String::new(),
            stderr: "Success".to_string(),
        };
        assert!(require_success(raw).is_ok());
    }

    #[test]
    fn require_success_fails_without_token() {
        let raw = RawOutput {
            argv: vec![],
            exit_code: Some(0),
            stdout: "done".to_string(),
            stderr: String::new(),
        };
        assert!(require_success(raw).is_err());
    }

    #[test]
    fn parses_last_update_time() {
        let dumpsys = "Package [com.example]\n    lastUpdateTime=1700000000000\n    other=x";
        assert_eq!(parse_last_update_time(dumpsys), Some("1700000000000".to_string()));
    }

    #[test]
    fn missing_last_update_time_is_none() {
        assert_eq!(parse_last_update_time("no such field here"), None);
    }
}
