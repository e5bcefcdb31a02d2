use core::time::Duration;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::devices;
use crate::error::{Errno, InitError};
use crate::string::{tokenize, TooManyTokens};
use crate::sys::System;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MountFlag {
    Move,
    ReadOnly,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MountpointFlags {
    move_mount: bool,
    read_only: bool,
}

impl MountpointFlags {
    pub fn new(flags: &[MountFlag]) -> Self {
        let mut mountpoint_flags = Self::default();

        for &flag in flags {
            match flag {
                MountFlag::Move => mountpoint_flags.move_mount = true,
                MountFlag::ReadOnly => mountpoint_flags.read_only = true,
            }
        }

        mountpoint_flags
    }

    pub fn is_move(&self) -> bool {
        self.move_mount
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn flags(&self) -> libc::c_ulong {
        (self.move_mount as libc::c_ulong * libc::MS_MOVE)
            | (self.read_only as libc::c_ulong * libc::MS_RDONLY)
    }
}

/// Where and how something gets mounted; the source is given per attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct Mountpoint {
    target: PathBuf,
    fstype: Option<String>,
    flags: MountpointFlags,
    data: Option<String>,
}

impl Mountpoint {
    pub fn new(
        target: &Path,
        fstype: Option<&str>,
        flags: MountpointFlags,
        data: Option<&str>,
    ) -> Self {
        Self {
            target: target.to_path_buf(),
            fstype: fstype.map(String::from),
            flags,
            data: data.map(String::from),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn mount<S: System>(&self, sys: &mut S, source: Option<&Path>) -> Result<(), InitError> {
        self.try_mount(sys, source, self.fstype.as_deref())
            .map_err(|errno| self.failure(source, errno))
    }

    /// Mounts `source`, trying every filesystem the kernel supports when no
    /// type was given.
    ///
    /// A known type or a move goes straight to the kernel; otherwise each
    /// type named in `filesystems` is tried in listing order.
    pub fn mount_any<S: System>(
        &self,
        sys: &mut S,
        filesystems: &Path,
        source: &Path,
    ) -> Result<(), InitError> {
        if self.fstype.is_some() || self.flags.is_move() {
            return self.mount(sys, Some(source));
        }

        let listing = sys.read_text(filesystems, crate::TEXT_CAPACITY)?;
        let candidates = supported_filesystems(&listing)?;

        let mut last = Errno(libc::ENODEV);
        for fstype in candidates {
            match self.try_mount(sys, Some(source), Some(fstype)) {
                Ok(()) => return Ok(()),
                Err(errno) => last = errno,
            }
        }

        debug!(
            "Failed attempt to mount {} on {}",
            source.display(),
            self.target.display()
        );
        Err(self.failure(Some(source), last))
    }

    fn try_mount<S: System>(
        &self,
        sys: &mut S,
        source: Option<&Path>,
        fstype: Option<&str>,
    ) -> Result<(), Errno> {
        sys.mount(source, &self.target, fstype, self.flags, self.data.as_deref())
    }

    fn failure(&self, source: Option<&Path>, errno: Errno) -> InitError {
        InitError::Mount {
            device: source.map_or_else(|| "none".into(), |s| s.display().to_string()),
            target: self.target.clone(),
            errno,
        }
    }
}

/// Filesystem types from a `/proc/filesystems` listing, in listing order.
///
/// Block filesystems are the lines starting with a tab. `nodev` lines name
/// virtual filesystems and are skipped, except ubifs which sits on a flash
/// volume rather than a block device yet is listed as `nodev`.
///
/// Only the candidates count against [`crate::MAX_FILESYSTEMS`].
pub fn supported_filesystems(listing: &[u8]) -> Result<Vec<&str>, InitError> {
    const UBIFS: &[u8] = b"nodev\tubifs";

    /* a line is at least one byte and its newline */
    let lines = tokenize(listing, b'\n', crate::TEXT_CAPACITY / 2)?;

    let mut candidates = Vec::new();
    for line in lines {
        let line = if line.starts_with(UBIFS) { &line[5..] } else { line };

        let Some(fstype) = line
            .strip_prefix(b"\t")
            .and_then(|name| core::str::from_utf8(name).ok())
        else {
            continue;
        };

        if candidates.len() == crate::MAX_FILESYSTEMS {
            return Err(TooManyTokens {
                capacity: crate::MAX_FILESYSTEMS,
            }
            .into());
        }

        candidates.push(fstype);
    }

    Ok(candidates)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Retry {
    pub rounds: u32,
    pub delay: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            rounds: crate::MOUNT_RETRIES,
            delay: crate::MOUNT_RETRY_DELAY,
        }
    }
}

/// Mounts the first device of the comma-separated `list` that works.
///
/// The whole list is walked up to `retry.rounds` times, sleeping in between,
/// as hotplugged storage can show up late. Returns the device that mounted.
pub fn multi_mount<'a, S: System>(
    sys: &mut S,
    filesystems: &Path,
    list: &'a OsStr,
    mountpoint: &Mountpoint,
    retry: Retry,
) -> Result<&'a OsStr, InitError> {
    let mut last = Errno(libc::ENODEV);

    for round in 0..retry.rounds {
        if round > 0 {
            sys.sleep(retry.delay);
        }

        for device in devices(list) {
            match mountpoint.mount_any(sys, filesystems, Path::new(device)) {
                Ok(()) => {
                    info!(
                        "{} mounted on {}",
                        Path::new(device).display(),
                        mountpoint.target().display()
                    );
                    return Ok(device);
                }
                Err(InitError::Mount { errno, .. }) => last = errno,
                Err(err) => {
                    debug!("{err}");
                    last = Errno(libc::EIO);
                }
            }
        }
    }

    Err(InitError::Mount {
        device: list.to_string_lossy().into_owned(),
        target: mountpoint.target().to_path_buf(),
        errno: last,
    })
}
