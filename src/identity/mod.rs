//! Identity switching
//!
//! Resolves a user name into credentials the executor attaches to a child process.
//! The strategy is picked per platform at construction time and injected into the executor
//! as a trait object, so tests can swap in a mock.

use std::sync::Arc;

use crate::error::IdentityError;

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use posix::PosixIdentity;
#[cfg(windows)]
pub use windows::{PrimaryToken, WindowsTokenIdentity};

/// Credentials for launching a process as another user
#[derive(Debug)]
pub enum LaunchCredential {
    /// Numeric user and group id applied at spawn
    Posix { uid: u32, gid: u32 },
    /// Primary token duplicated from a process owned by the target account
    #[cfg(windows)]
    Token(PrimaryToken),
}

/// Resolves a user name into launch credentials
#[cfg_attr(test, mockall::automock)]
pub trait IdentityStrategy: Send + Sync {
    /// Look up `username`
    ///
    /// # Errors
    /// * `IdentityError::UserNotFound` - no such account
    /// * `IdentityError::TokenAcquisition` - the account's token could not be obtained
    /// * `IdentityError::Lookup` - the account database could not be queried
    fn resolve(&self, username: &str) -> Result<LaunchCredential, IdentityError>;
}

/// Strategy for platforms without identity switching
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedIdentity;

impl IdentityStrategy for UnsupportedIdentity {
    fn resolve(&self, _username: &str) -> Result<LaunchCredential, IdentityError> {
        Err(IdentityError::Unsupported)
    }
}

/// The identity strategy for the current platform
pub fn platform_strategy() -> Arc<dyn IdentityStrategy> {
    #[cfg(unix)]
    {
        Arc::new(PosixIdentity)
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsTokenIdentity)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Arc::new(UnsupportedIdentity)
    }
}
