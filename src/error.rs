use core::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::string::TooManyTokens;

/// Error number reported by the kernel for a failed call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Errno(pub libc::c_int);

impl Errno {
    pub fn last() -> Self {
        Self(unsafe { *libc::__errno_location() })
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

impl From<std::io::Error> for Errno {
    fn from(err: std::io::Error) -> Self {
        Self(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("unable to open '{}': {errno}", .path.display())]
    Open { path: PathBuf, errno: Errno },

    #[error("unable to read '{}': {errno}", .path.display())]
    Read { path: PathBuf, errno: Errno },

    #[error("cannot mount {device} on {}: {errno}", .target.display())]
    Mount {
        device: String,
        target: PathBuf,
        errno: Errno,
    },

    #[error("cannot setup loop device '{}' with '{}': {errno}", .device.display(), .file.display())]
    Bind {
        device: PathBuf,
        file: PathBuf,
        errno: Errno,
    },

    #[error("unable to move the '{}' mountpoint to '{}': {errno}", .from.display(), .to.display())]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        errno: Errno,
    },

    #[error("unable to switch to the new root ({op}): {errno}")]
    Switch { op: &'static str, errno: Errno },

    #[error("unable to change to '{}' directory: {errno}", .path.display())]
    ChangeDir { path: PathBuf, errno: Errno },

    #[error("unable to duplicate console handles: {errno}")]
    Console { errno: Errno },

    #[error("'{0}' parameter not found")]
    MissingParameter(&'static str),

    #[error(transparent)]
    TooManyTokens(#[from] TooManyTokens),

    #[error("unable to find the 'init' executable")]
    Resolution,

    #[error("exec of '{}' failed: {errno}", .program.display())]
    Exec { program: PathBuf, errno: Errno },
}

impl InitError {
    /// Status the process leaves with. A returning exec is logged but ends
    /// the process with status 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            InitError::Exec { .. } => 0,
            _ => 1,
        }
    }
}
