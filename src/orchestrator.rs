//! Top-level state machine selecting between split install, full install and
//! incremental update, and enforcing ordering between dex sync, resource
//! sync, stub install, timestamp verification and optional app start.

use crate::adb::DeviceBridge;
use crate::dex::{self, DexLayout};
use crate::error::SyncError;
use crate::resources::{self, ResourceLayout};
use crate::timestamp;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const DEVICE_ROOT: &str = "/data/local/tmp/incrementaldeployment";

pub struct Config {
    pub execroot: PathBuf,
    pub stub_datafile: PathBuf,
    pub dexmanifest: PathBuf,
    pub resource_apk: PathBuf,
    pub apk: Option<PathBuf>,
    pub split_main_apk: Option<PathBuf>,
    pub split_apk: Vec<PathBuf>,
    pub output_marker: PathBuf,
    pub start_app: bool,
}

impl Config {
    fn resolve(&self, path: &Path) -> PathBuf {
        self.execroot.join(path)
    }
}

/// Second line (trimmed) of the stub data file names the application package.
fn read_package(stub_datafile: &Path) -> Result<String> {
    let contents = fs::read_to_string(stub_datafile)
        .with_context(|| format!("reading stub datafile {}", stub_datafile.display()))?;
    contents
        .lines()
        .nth(1)
        .map(|line| line.trim().to_string())
        .context("stub datafile has no second line")
}

pub fn run(bridge: &dyn DeviceBridge, config: &Config) -> Result<(), SyncError> {
    if let Some(split_main_apk) = config.split_main_apk.clone() {
        run_split_install(bridge, config, &split_main_apk)?;
    } else if let Some(apk) = config.apk.clone() {
        run_shared_body(bridge, config, true, Some(&apk))?;
    } else {
        timestamp_guard_then_run(bridge, config)?;
    }

    touch_marker(config).map_err(|e| SyncError::Bridge {
        argv: vec![],
        exit_code: None,
        stdout: String::new(),
        stderr: e.to_string(),
    })?;
    Ok(())
}

/// Applications the platform refuses as a single archive: install-multiple
/// the main apk, then each split apk with the main apk's package as parent.
/// No dex or resource path is exercised.
fn run_split_install(
    bridge: &dyn DeviceBridge,
    config: &Config,
    split_main_apk: &Path,
) -> Result<(), SyncError> {
    let main_apk = config.resolve(split_main_apk);
    bridge.install_multiple(std::slice::from_ref(&main_apk), None)?;

    let package = read_package(&config.resolve(&config.stub_datafile)).map_err(|e| {
        SyncError::Bridge { argv: vec![], exit_code: None, stdout: String::new(), stderr: e.to_string() }
    })?;
    for split_apk in &config.split_apk {
        let resolved = config.resolve(split_apk);
        bridge.install_multiple(std::slice::from_ref(&resolved), Some(&package))?;
    }
    Ok(())
}

fn timestamp_guard_then_run(bridge: &dyn DeviceBridge, config: &Config) -> Result<(), SyncError> {
    let package = read_package(&config.resolve(&config.stub_datafile)).map_err(|e| {
        SyncError::Bridge { argv: vec![], exit_code: None, stdout: String::new(), stderr: e.to_string() }
    })?;
    let timestamp_path = format!("{DEVICE_ROOT}/{package}/install_timestamp");
    timestamp::verify(bridge, &package, &timestamp_path)?;
    run_shared_body(bridge, config, false, None)
}

/// Shared body of the full-install and incremental paths: dex sync, then
/// resource sync, then the full-install-only stub install + timestamp
/// write, or the incremental-only force-stop.
fn run_shared_body(
    bridge: &dyn DeviceBridge,
    config: &Config,
    full_install: bool,
    stub_apk: Option<&Path>,
) -> Result<(), SyncError> {
    let package = read_package(&config.resolve(&config.stub_datafile)).map_err(|e| {
        SyncError::Bridge { argv: vec![], exit_code: None, stdout: String::new(), stderr: e.to_string() }
    })?;

    let scratch = TempDir::new().map_err(|e| SyncError::Bridge {
        argv: vec![],
        exit_code: None,
        stdout: String::new(),
        stderr: format!("creating run scratch dir: {e}"),
    })?;

    let dex_layout = DexLayout::for_package(DEVICE_ROOT, &package);
    let new_manifest = fs::read(config.resolve(&config.dexmanifest)).map_err(|e| SyncError::Bridge {
        argv: vec![],
        exit_code: None,
        stdout: String::new(),
        stderr: format!("reading dex manifest: {e}"),
    })?;
    dex::sync(bridge, &config.execroot, scratch.path(), &dex_layout, &new_manifest, full_install)?;

    let resource_layout = ResourceLayout::for_package(DEVICE_ROOT, &package);
    resources::sync(bridge, &config.resolve(&config.resource_apk), &resource_layout)?;

    if full_install {
        // Ordering is deliberate: the timestamp anchor is written only
        // after the stub install observably succeeded.
        let apk = stub_apk.expect("full_install implies a stub apk");
        bridge.install(&config.resolve(apk))?;
        let timestamp = bridge.get_install_time(&package)?;
        bridge
            .push_string(timestamp.into_bytes(), format!("{DEVICE_ROOT}/{package}/install_timestamp"))
            .wait()?;
    } else {
        // No fresh apk install occurred; force the next launch to reload
        // the updated dex set.
        bridge.force_stop(&package)?;
    }

    if config.start_app {
        bridge.start_app(&package)?;
    }
    Ok(())
}

fn touch_marker(config: &Config) -> Result<()> {
    fs::write(&config.output_marker, []).with_context(|| {
        format!("touching output marker {}", config.output_marker.display())
    })
}
