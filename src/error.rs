//! The classified error taxonomy the device bridge and its callers raise.
//!
//! Everything that can be classified from an adb invocation's stderr ends up
//! as one of these variants; ordinary local I/O failures stay as
//! `anyhow::Error` until they cross a boundary that spec requires to be
//! classified (see `adb::classify`).

use std::fmt;

#[derive(Debug)]
pub enum SyncError {
    DeviceNotFound,
    DeviceUnauthorized,
    MultipleDevices { message: String },
    Bridge { argv: Vec<String>, exit_code: Option<i32>, stdout: String, stderr: String },
    Timestamp { message: String },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::DeviceNotFound => {
                write!(f, "no device found; connect a device or start an emulator")
            }
            SyncError::DeviceUnauthorized => {
                write!(f, "device unauthorized; accept the USB debugging prompt on the device")
            }
            SyncError::MultipleDevices { message } => {
                write!(f, "{message} (specify a device with --extra_adb_arg=-s,<serial>)")
            }
            SyncError::Bridge { argv, exit_code, stdout, stderr } => {
                write!(
                    f,
                    "adb command failed: {argv:?} (exit {:?}): stdout={stdout:?} stderr={stderr:?}",
                    exit_code
                )
            }
            SyncError::Timestamp { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for SyncError {}
