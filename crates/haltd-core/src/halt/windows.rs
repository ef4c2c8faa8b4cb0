//! Windows halt backend.

#![allow(unsafe_code)]

use std::io;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_NOT_ALL_ASSIGNED, GetLastError, HANDLE, LUID,
};
use windows_sys::Win32::Security::{
    AdjustTokenPrivileges, LUID_AND_ATTRIBUTES, LookupPrivilegeValueW, SE_PRIVILEGE_ENABLED,
    TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows_sys::Win32::System::Shutdown::{
    InitiateSystemShutdownExW, SHTDN_REASON_FLAG_PLANNED, SHTDN_REASON_MAJOR_OTHER,
    SHTDN_REASON_MINOR_OTHER,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use super::{HaltError, PrivilegedHalt};

const SHUTDOWN_PRIVILEGE: &str = "SeShutdownPrivilege";

/// Enables `SeShutdownPrivilege` and asks Windows to power off.
pub struct WindowsHalt;

/// Closes the process token on drop.
struct TokenHandle(HANDLE);

impl Drop for TokenHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from OpenProcessToken and is closed once.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

fn last_error(context: &str) -> String {
    format!("{context}: {}", io::Error::last_os_error())
}

impl PrivilegedHalt for WindowsHalt {
    fn name(&self) -> &str {
        "windows"
    }

    fn acquire_privilege(&self) -> Result<(), HaltError> {
        let mut raw: HANDLE = ptr::null_mut();
        // SAFETY: GetCurrentProcess returns a pseudo-handle; `raw` is a valid
        // out-pointer.
        let ok = unsafe {
            OpenProcessToken(
                GetCurrentProcess(),
                TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
                &mut raw,
            )
        };
        if ok == 0 {
            return Err(HaltError::Privilege(last_error("OpenProcessToken")));
        }
        let token = TokenHandle(raw);

        let name = wide(SHUTDOWN_PRIVILEGE);
        let mut luid = LUID {
            LowPart: 0,
            HighPart: 0,
        };
        // SAFETY: `name` is NUL-terminated; `luid` is a valid out-pointer.
        let ok = unsafe { LookupPrivilegeValueW(ptr::null(), name.as_ptr(), &mut luid) };
        if ok == 0 {
            return Err(HaltError::Privilege(last_error("LookupPrivilegeValueW")));
        }

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };
        // SAFETY: `privileges` is a fully initialised TOKEN_PRIVILEGES; no
        // previous state is requested.
        let ok = unsafe {
            AdjustTokenPrivileges(
                token.0,
                0,
                &privileges,
                0,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(HaltError::Privilege(last_error("AdjustTokenPrivileges")));
        }

        // AdjustTokenPrivileges succeeds even when nothing was assigned.
        // SAFETY: reads the calling thread's last-error value.
        if unsafe { GetLastError() } == ERROR_NOT_ALL_ASSIGNED {
            return Err(HaltError::Privilege(format!(
                "{SHUTDOWN_PRIVILEGE} is not held by this account"
            )));
        }

        Ok(())
    }

    fn halt(&self) -> Result<(), HaltError> {
        let reason =
            SHTDN_REASON_MAJOR_OTHER | SHTDN_REASON_MINOR_OTHER | SHTDN_REASON_FLAG_PLANNED;
        // SAFETY: null machine name targets the local host; null message is
        // allowed.
        let ok = unsafe { InitiateSystemShutdownExW(ptr::null(), ptr::null(), 0, 1, 0, reason) };
        if ok == 0 {
            return Err(HaltError::Request(last_error("InitiateSystemShutdownExW")));
        }
        Ok(())
    }
}
