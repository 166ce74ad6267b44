//! System Call Interface
//!
//! The handle system calls and the status codes they return to user mode.
//!
//! # Security Model
//! - Every handle value from user mode is validated before use
//! - Invalid inputs return errors, never panic
//! - Exhaustion is reported as `NoResources`, never a kernel fault
//!
//! # Current Syscalls
//! - 0: handle_close(value)
//! - 1: handle_duplicate(value, rights) -> value
//! - 2: handle_replace(value, rights) -> value

pub mod handle_ops;

use crate::cap::{HandleError, ProcessHandles};

/// System call numbers
pub mod numbers {
    pub const SYS_HANDLE_CLOSE: usize = 0;
    pub const SYS_HANDLE_DUPLICATE: usize = 1;
    pub const SYS_HANDLE_REPLACE: usize = 2;
}

/// System call status codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    /// Unknown system call number
    NotSupported = -2,
    /// Out of handles
    NoResources = -3,
    /// Invalid argument
    InvalidArgs = -10,
    /// Value does not name a handle of the caller
    BadHandle = -11,
    /// Handle lacks a required right
    AccessDenied = -30,
}

impl Status {
    /// The value placed in the return register.
    #[inline]
    pub const fn into_raw(self) -> i32 {
        self as i32
    }
}

impl From<HandleError> for Status {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::NoResources | HandleError::Arena(_) => Self::NoResources,
            HandleError::BadHandle => Self::BadHandle,
            HandleError::AccessDenied => Self::AccessDenied,
            HandleError::InvalidArgs => Self::InvalidArgs,
        }
    }
}

/// Dispatch a system call on behalf of `process`.
///
/// # Returns
/// The new handle value or 0 on success, a negative [`Status`] on failure
pub fn dispatch(process: &ProcessHandles<'_>, syscall_num: usize, args: &[usize; 2]) -> i64 {
    let value = args[0] as u32;
    let result = match syscall_num {
        numbers::SYS_HANDLE_CLOSE => match handle_ops::sys_handle_close(process, value) {
            Status::Ok => Ok(0),
            status => Err(status),
        },
        numbers::SYS_HANDLE_DUPLICATE => handle_ops::sys_handle_duplicate(process, value, args[1] as u32),
        numbers::SYS_HANDLE_REPLACE => handle_ops::sys_handle_replace(process, value, args[1] as u32),
        _ => {
            log::warn!(target: "syscall", "unknown syscall {}", syscall_num);
            Err(Status::NotSupported)
        }
    };
    match result {
        Ok(value) => i64::from(value),
        Err(status) => i64::from(status.into_raw()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::{HandleTableArena, Koid, Rights};
    use crate::config::HandleTableConfig;
    use crate::mm::ArenaError;
    use crate::testutil::{leak_vm, TestDispatcher};

    #[test]
    fn test_status_from_handle_error() {
        assert_eq!(Status::from(HandleError::NoResources), Status::NoResources);
        assert_eq!(
            Status::from(HandleError::Arena(ArenaError::InvalidArgs)),
            Status::NoResources
        );
        assert_eq!(Status::from(HandleError::BadHandle).into_raw(), -11);
        assert_eq!(Status::from(HandleError::AccessDenied).into_raw(), -30);
    }

    #[test]
    fn test_dispatch() {
        let table = HandleTableArena::init(leak_vm(32), HandleTableConfig::with_capacity(64)).unwrap();
        let process = ProcessHandles::new(&table, Koid::generate());
        let value = process.add(table.make(TestDispatcher::new(), Rights::BASIC).unwrap());

        let dup = dispatch(&process, numbers::SYS_HANDLE_DUPLICATE, &[value as usize, Rights::WAIT.bits() as usize]);
        assert!(dup > 0);
        assert_eq!(dispatch(&process, numbers::SYS_HANDLE_CLOSE, &[dup as usize, 0]), 0);
        assert_eq!(dispatch(&process, numbers::SYS_HANDLE_CLOSE, &[dup as usize, 0]), -11);
        assert_eq!(dispatch(&process, 99, &[0, 0]), -2);
        assert_eq!(process.len(), 1);
    }
}
