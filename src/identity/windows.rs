//! Token borrowing from a process owned by the target account
//!
//! Windows has no uid to switch to. Instead the running processes are scanned for one whose
//! token belongs to the target user, and that token is duplicated into a primary token the
//! child is created with. Needs SeAssignPrimaryTokenPrivilege and only works while the user
//! has a process running.

use std::ffi::c_void;
use std::mem;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Security::{
    DuplicateTokenEx, GetTokenInformation, LookupAccountSidW, SecurityImpersonation,
    TokenPrimary, TokenUser, SID_NAME_USE, TOKEN_ALL_ACCESS, TOKEN_DUPLICATE, TOKEN_QUERY,
    TOKEN_USER,
};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows_sys::Win32::System::Threading::{
    OpenProcess, OpenProcessToken, PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::{IdentityStrategy, LaunchCredential};
use crate::error::IdentityError;

/// Owned primary token handle
#[derive(Debug)]
pub struct PrimaryToken(HANDLE);

// SAFETY: a token handle is a kernel object reference usable from any thread
unsafe impl Send for PrimaryToken {}
unsafe impl Sync for PrimaryToken {}

impl PrimaryToken {
    pub fn as_raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for PrimaryToken {
    fn drop(&mut self) {
        // SAFETY: we own the handle and close it exactly once
        unsafe { CloseHandle(self.0) };
    }
}

/// Closes a handle on drop
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_null() && self.0 != INVALID_HANDLE_VALUE {
            // SAFETY: we own the handle and close it exactly once
            unsafe { CloseHandle(self.0) };
        }
    }
}

/// Launches children with a token borrowed from one of the target user's processes
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsTokenIdentity;

impl IdentityStrategy for WindowsTokenIdentity {
    fn resolve(&self, username: &str) -> Result<LaunchCredential, IdentityError> {
        let token = find_user_token(username)?.ok_or_else(|| IdentityError::UserNotFound {
            user: username.to_string(),
        })?;

        let mut primary: HANDLE = ptr::null_mut();
        // SAFETY: `token` is a valid token opened with TOKEN_DUPLICATE
        let ok = unsafe {
            DuplicateTokenEx(
                token.0,
                TOKEN_ALL_ACCESS,
                ptr::null(),
                SecurityImpersonation,
                TokenPrimary,
                &mut primary,
            )
        };
        if ok == 0 {
            return Err(IdentityError::TokenAcquisition {
                user: username.to_string(),
                reason: format!("DuplicateTokenEx failed: {}", last_error()),
            });
        }

        tracing::debug!(user = username, "duplicated primary token");
        Ok(LaunchCredential::Token(PrimaryToken(primary)))
    }
}

/// Find a token owned by `username` among the running processes
fn find_user_token(username: &str) -> Result<Option<OwnedHandle>, IdentityError> {
    // SAFETY: plain snapshot call, checked below
    let snapshot = OwnedHandle(unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) });
    if snapshot.0 == INVALID_HANDLE_VALUE {
        return Err(IdentityError::TokenAcquisition {
            user: username.to_string(),
            reason: format!("process snapshot failed: {}", last_error()),
        });
    }

    // SAFETY: PROCESSENTRY32W is plain data
    let mut entry: PROCESSENTRY32W = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

    let mut denied = 0usize;
    // SAFETY: the snapshot handle and entry are valid
    let mut more = unsafe { Process32FirstW(snapshot.0, &mut entry) } != 0;
    while more {
        match open_token(entry.th32ProcessID) {
            Some(token) => {
                if token_matches(&token, username) {
                    return Ok(Some(token));
                }
            }
            None => denied += 1,
        }
        // SAFETY: as above
        more = unsafe { Process32NextW(snapshot.0, &mut entry) } != 0;
    }

    tracing::debug!(user = username, denied, "no process owned by user");
    Ok(None)
}

fn open_token(pid: u32) -> Option<OwnedHandle> {
    // SAFETY: OpenProcess returns null on failure, which we check
    let process = OwnedHandle(unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) });
    if process.0.is_null() {
        return None;
    }

    let mut token: HANDLE = ptr::null_mut();
    // SAFETY: `process` is a valid process handle
    let ok = unsafe { OpenProcessToken(process.0, TOKEN_QUERY | TOKEN_DUPLICATE, &mut token) };
    (ok != 0).then_some(OwnedHandle(token))
}

/// Compare the token's account against `username` (`user` or `DOMAIN\user`), ignoring case
fn token_matches(token: &OwnedHandle, username: &str) -> bool {
    let Some((domain, account)) = token_account(token) else {
        return false;
    };
    let qualified = format!("{}\\{}", domain, account);
    username.eq_ignore_ascii_case(&qualified) || username.eq_ignore_ascii_case(&account)
}

fn token_account(token: &OwnedHandle) -> Option<(String, String)> {
    let mut needed = 0u32;
    // SAFETY: size query with a null buffer
    unsafe { GetTokenInformation(token.0, TokenUser, ptr::null_mut(), 0, &mut needed) };
    if needed == 0 {
        return None;
    }

    // u64 storage keeps TOKEN_USER aligned
    let mut buf = vec![0u64; (needed as usize).div_ceil(mem::size_of::<u64>())];
    // SAFETY: `buf` holds at least `needed` bytes
    let ok = unsafe {
        GetTokenInformation(
            token.0,
            TokenUser,
            buf.as_mut_ptr() as *mut c_void,
            needed,
            &mut needed,
        )
    };
    if ok == 0 {
        return None;
    }
    // SAFETY: GetTokenInformation wrote a TOKEN_USER at the start of `buf`
    let sid = unsafe { (*(buf.as_ptr() as *const TOKEN_USER)).User.Sid };

    let mut name = vec![0u16; 256];
    let mut domain = vec![0u16; 256];
    let mut name_len = name.len() as u32;
    let mut domain_len = domain.len() as u32;
    let mut sid_use: SID_NAME_USE = 0;
    // SAFETY: buffers and their lengths match
    let ok = unsafe {
        LookupAccountSidW(
            ptr::null(),
            sid,
            name.as_mut_ptr(),
            &mut name_len,
            domain.as_mut_ptr(),
            &mut domain_len,
            &mut sid_use,
        )
    };
    if ok == 0 {
        return None;
    }

    Some((
        String::from_utf16_lossy(&domain[..domain_len as usize]),
        String::from_utf16_lossy(&name[..name_len as usize]),
    ))
}

fn last_error() -> std::io::Error {
    // SAFETY: no preconditions
    std::io::Error::from_raw_os_error(unsafe { GetLastError() } as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_not_found() {
        let err = WindowsTokenIdentity
            .resolve("execrelay-no-such-user-4f1c")
            .unwrap_err();
        assert!(matches!(err, IdentityError::UserNotFound { .. }));
    }
}
