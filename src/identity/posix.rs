//! User lookup through the system user database

use std::ffi::CString;
use std::io;
use std::ptr;

use super::{IdentityStrategy, LaunchCredential};
use crate::error::IdentityError;

/// Fallback buffer size when `_SC_GETPW_R_SIZE_MAX` is indeterminate
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Largest buffer tried before giving up on ERANGE
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Resolves users with `getpwnam_r`
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixIdentity;

impl IdentityStrategy for PosixIdentity {
    fn resolve(&self, username: &str) -> Result<LaunchCredential, IdentityError> {
        let not_found = || IdentityError::UserNotFound {
            user: username.to_string(),
        };
        let name = CString::new(username).map_err(|_| not_found())?;

        let mut buf = vec![0 as libc::c_char; initial_buffer_size()];
        loop {
            // SAFETY: passwd is plain data; getpwnam_r fills it and points its strings into `buf`
            let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::passwd = ptr::null_mut();

            // SAFETY: all pointers are valid for the duration of the call and `buf.len()` is exact
            let rc = unsafe {
                libc::getpwnam_r(
                    name.as_ptr(),
                    &mut pwd,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };

            if rc == libc::ERANGE && buf.len() < MAX_BUFFER_SIZE {
                let grown = buf.len() * 2;
                buf.resize(grown, 0);
                continue;
            }

            if !result.is_null() {
                tracing::debug!(user = username, uid = pwd.pw_uid, gid = pwd.pw_gid, "resolved user");
                return Ok(LaunchCredential::Posix {
                    uid: pwd.pw_uid,
                    gid: pwd.pw_gid,
                });
            }

            // POSIX allows any of these for "no such entry"
            return match rc {
                0 | libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM => Err(not_found()),
                code => Err(IdentityError::Lookup {
                    user: username.to_string(),
                    source: io::Error::from_raw_os_error(code),
                }),
            };
        }
    }
}

fn initial_buffer_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) };
    usize::try_from(size)
        .ok()
        .filter(|&s| s > 0)
        .unwrap_or(DEFAULT_BUFFER_SIZE)
}
