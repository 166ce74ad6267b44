//! Handle System Calls
//!
//! Each call resolves user-supplied values through the calling process's
//! handle set and reports failures as [`Status`] codes.

use crate::cap::{ProcessHandles, Rights};

use super::Status;

/// The value user mode passes for "no handle".
pub const HANDLE_INVALID: u32 = 0;

/// Parse a rights mask from user mode.
///
/// Accepts [`Rights::SAME_RIGHTS`] alone or any set of defined rights.
fn rights_from_raw(raw: u32) -> Result<Rights, Status> {
    if raw == Rights::SAME_RIGHTS.bits() {
        return Ok(Rights::SAME_RIGHTS);
    }
    Rights::from_bits(raw).ok_or(Status::InvalidArgs)
}

/// Close a handle. Closing [`HANDLE_INVALID`] succeeds and does nothing.
pub fn sys_handle_close(process: &ProcessHandles<'_>, value: u32) -> Status {
    if value == HANDLE_INVALID {
        return Status::Ok;
    }
    match process.close(value) {
        Ok(()) => Status::Ok,
        Err(err) => err.into(),
    }
}

/// Close every handle in `values`.
///
/// Invalid values do not stop the rest from being closed; the first
/// failure is reported.
pub fn sys_handle_close_many(process: &ProcessHandles<'_>, values: &[u32]) -> Status {
    values
        .iter()
        .map(|&value| sys_handle_close(process, value))
        .fold(Status::Ok, |first, status| if first == Status::Ok { status } else { first })
}

/// Duplicate a handle. The source needs the DUPLICATE right.
pub fn sys_handle_duplicate(process: &ProcessHandles<'_>, value: u32, rights: u32) -> Result<u32, Status> {
    let rights = rights_from_raw(rights)?;
    Ok(process.duplicate(value, rights)?)
}

/// Replace a handle with one carrying `rights`, closing the original.
pub fn sys_handle_replace(process: &ProcessHandles<'_>, value: u32, rights: u32) -> Result<u32, Status> {
    let rights = rights_from_raw(rights)?;
    Ok(process.replace(value, rights)?)
}
