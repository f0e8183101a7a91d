//! Proves the device-side application is the one produced by the prior
//! installer invocation before any incremental work is attempted.

use crate::adb::DeviceBridge;
use crate::error::SyncError;

pub fn verify(bridge: &dyn DeviceBridge, package: &str, timestamp_path: &str) -> Result<(), SyncError> {
    let stored = bridge.pull(timestamp_path).ok_or_else(|| SyncError::Timestamp {
        message: "at least one non-incremental install must precede incremental installs"
            .to_string(),
    })?;
    let stored = String::from_utf8_lossy(&stored).trim().to_string();

    let actual = bridge.get_install_time(package)?;
    if stored != actual {
        return Err(SyncError::Timestamp {
            message: "installed app has an unexpected timestamp; did you install it other than through this tool?"
                .to_string(),
        });
    }
    Ok(())
}
