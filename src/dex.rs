//! Computes the diff between the device-resident dex manifest and a freshly
//! built one, then drives extraction, parallel push, deletion and the
//! crash-safe manifest rewrite described by the anchor-file protocol.

use crate::adb::DeviceBridge;
use crate::error::SyncError;
use crate::manifest::{self, Manifest, ManifestEntry};
use crate::progress;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub struct DexLayout {
    pub dex_dir: String,
    pub manifest_path: String,
}

impl DexLayout {
    pub fn for_package(device_root: &str, package: &str) -> Self {
        DexLayout {
            dex_dir: format!("{device_root}/{package}/dex"),
            manifest_path: format!("{device_root}/{package}/dex/manifest"),
        }
    }
}

/// Diff between an old and new manifest, keyed the way the reconciler needs:
/// entries to delete (present only in `old`) and entries to upload (new or
/// changed digest).
pub struct Diffs {
    pub to_delete: Vec<String>,
    pub to_upload: Vec<ManifestEntry>,
}

pub fn diff(old: &Manifest, new: &Manifest) -> Diffs {
    let old_keys: HashSet<&String> = old.keys().collect();
    let new_keys: HashSet<&String> = new.keys().collect();

    let to_delete = old_keys.difference(&new_keys).map(|k| (*k).clone()).collect();

    let mut to_upload = Vec::new();
    for key in new_keys.iter() {
        match old.get(*key) {
            Some(old_entry) if old_entry.sha256 == new[*key].sha256 => {}
            _ => to_upload.push(new[*key].clone()),
        }
    }
    Diffs { to_delete, to_upload }
}

/// Groups `to_upload` entries sourced from zip bundles by `input_file` so
/// each archive opens exactly once, and resolves standalone entries
/// directly against `execroot`. Returns `(local_path, remote_install_path)`
/// pairs ready to push.
fn stage_uploads(
    execroot: &Path,
    scratch: &Path,
    to_upload: &[ManifestEntry],
) -> Result<Vec<(PathBuf, String)>> {
    let mut pairs = Vec::with_capacity(to_upload.len());
    let mut bundles: HashMap<&str, Vec<&ManifestEntry>> = HashMap::new();

    for entry in to_upload {
        if entry.is_standalone() {
            pairs.push((execroot.join(&entry.input_file), entry.install_path.clone()));
        } else {
            bundles.entry(entry.input_file.as_str()).or_default().push(entry);
        }
    }

    for (input_file, entries) in bundles {
        let bundle_path = execroot.join(input_file);
        let file = fs::File::open(&bundle_path)
            .with_context(|| format!("opening dex bundle {}", bundle_path.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("reading zip bundle {}", bundle_path.display()))?;
        for entry in entries {
            let mut zip_entry = archive
                .by_name(&entry.zip_path)
                .with_context(|| format!("{} missing from {}", entry.zip_path, input_file))?;
            let local_path = scratch.join(entry.install_path.replace('/', "_"));
            let mut out = fs::File::create(&local_path)
                .with_context(|| format!("staging {}", local_path.display()))?;
            std::io::copy(&mut zip_entry, &mut out)?;
            pairs.push((local_path, entry.install_path.clone()));
        }
    }
    Ok(pairs)
}

/// Runs the full protocol of reconciling the device's dex set against a
/// freshly built manifest. `new_manifest_bytes` is pushed back verbatim as
/// the device-side anchor; it is never re-serialized from the parsed form.
pub fn sync(
    bridge: &dyn DeviceBridge,
    execroot: &Path,
    scratch: &Path,
    layout: &DexLayout,
    new_manifest_bytes: &[u8],
    full_install: bool,
) -> Result<(), SyncError> {
    bridge.mkdir(&layout.dex_dir)?;

    let old_manifest = if full_install {
        bridge.delete_multiple(&[format!("{}/*", layout.dex_dir)])?;
        Manifest::new()
    } else {
        match bridge.pull(&layout.manifest_path) {
            Some(bytes) => manifest::parse(&bytes).map_err(|e| SyncError::Bridge {
                argv: vec![],
                exit_code: None,
                stdout: String::new(),
                stderr: format!("parsing device manifest: {e}"),
            })?,
            None => {
                bridge.delete_multiple(&[format!("{}/*", layout.dex_dir)])?;
                Manifest::new()
            }
        }
    };

    let new_manifest = manifest::parse(new_manifest_bytes).map_err(|e| SyncError::Bridge {
        argv: vec![],
        exit_code: None,
        stdout: String::new(),
        stderr: format!("parsing new manifest: {e}"),
    })?;

    let diffs = diff(&old_manifest, &new_manifest);

    // Fast path: nothing changed. Must be observable — no rewrite, no deletes.
    if diffs.to_delete.is_empty() && diffs.to_upload.is_empty() {
        return Ok(());
    }

    // The device is explicitly marked dirty from here on; any crash forces
    // a full resync next run (I4).
    bridge.delete_multiple(&[layout.manifest_path.clone()])?;

    progress::update(&format!(
        "staging {} dex{} for upload",
        diffs.to_upload.len(),
        if diffs.to_upload.len() == 1 { "" } else { "es" }
    ));
    let pairs = stage_uploads(execroot, scratch, &diffs.to_upload).map_err(|e| SyncError::Bridge {
        argv: vec![],
        exit_code: None,
        stdout: String::new(),
        stderr: e.to_string(),
    })?;

    let remote_deletes: Vec<String> =
        diffs.to_delete.iter().map(|install_path| format!("{}/{install_path}", layout.dex_dir)).collect();
    bridge.delete_multiple(&remote_deletes)?;

    progress::update(&format!("pushing {} dex file(s)", pairs.len()));
    bridge.begin_push_batch();
    let handles: Vec<_> = pairs
        .into_iter()
        .map(|(local, remote_install_path)| {
            bridge.push(local, format!("{}/{remote_install_path}", layout.dex_dir))
        })
        .collect();

    let mut first_error = None;
    for handle in handles {
        if first_error.is_some() {
            // A prior push already failed: cancel whatever hasn't started,
            // but still drain this handle so its worker thread isn't
            // abandoned mid-send.
            bridge.cancel_pending();
        }
        if let Err(e) = handle.wait() {
            if first_error.is_none() {
                bridge.cancel_pending();
                first_error = Some(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    bridge.push_string(new_manifest_bytes.to_vec(), layout.manifest_path.clone()).wait()?;
    Ok(())
}
