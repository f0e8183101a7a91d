//! Checksum-gated upload of the opaque resource archive.

use crate::adb::DeviceBridge;
use crate::error::SyncError;
use crate::progress;
use ring::digest::{Context, SHA256};
use std::fs;
use std::io::{self, Read};
use std::path::Path;

const BLOCK_SIZE: usize = 64 * 1024;

/// Streams the file through SHA-256 in 64 KiB blocks and returns the lowercase
/// hex digest.
pub fn checksum(path: &Path) -> io::Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    let mut context = Context::new(&SHA256);
    let mut buffer = [0u8; BLOCK_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        context.update(&buffer[..read]);
    }
    Ok(hex::encode(context.finish().as_ref()))
}

pub struct ResourceLayout {
    pub checksum_path: String,
    pub archive_path: String,
}

impl ResourceLayout {
    pub fn for_package(device_root: &str, package: &str) -> Self {
        ResourceLayout {
            checksum_path: format!("{device_root}/{package}/resources_checksum"),
            archive_path: format!("{device_root}/{package}/resources.ap_"),
        }
    }
}

pub fn sync(
    bridge: &dyn DeviceBridge,
    local_archive: &Path,
    layout: &ResourceLayout,
) -> Result<(), SyncError> {
    let digest = checksum(local_archive).map_err(|e| SyncError::Bridge {
        argv: vec![],
        exit_code: None,
        stdout: String::new(),
        stderr: format!("hashing resource archive: {e}"),
    })?;

    if let Some(device_digest) = bridge.pull(&layout.checksum_path) {
        if String::from_utf8_lossy(&device_digest).trim() == digest {
            return Ok(());
        }
    }

    // Anchor removed before the data it guards is mutated, per I4.
    bridge.delete_multiple(&[layout.checksum_path.clone()])?;
    progress::update("pushing resource archive");
    bridge.push(local_archive.to_path_buf(), layout.archive_path.clone()).wait()?;
    bridge.push_string(digest.into_bytes(), layout.checksum_path.clone()).wait()?;
    Ok(())
}
