//! Loop device setup: backs `/dev/loopN` with a regular file.

use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::{debug, error};

use crate::error::InitError;
use crate::sys::{OpenMode, System};

pub const LOOP_SET_FD: libc::c_ulong = 0x4C00;
pub const LOOP_SET_STATUS64: libc::c_ulong = 0x4C04;

pub const LO_NAME_SIZE: usize = 64;
pub const LO_KEY_SIZE: usize = 32;

/// Mirrors the kernel's `struct loop_info64`.
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopInfo64 {
    pub lo_device: u64,
    pub lo_inode: u64,
    pub lo_rdevice: u64,
    pub lo_offset: u64,
    pub lo_sizelimit: u64,
    pub lo_number: u32,
    pub lo_encrypt_type: u32,
    pub lo_encrypt_key_size: u32,
    pub lo_flags: u32,
    pub lo_file_name: [u8; LO_NAME_SIZE],
    pub lo_crypt_name: [u8; LO_NAME_SIZE],
    pub lo_encrypt_key: [u8; LO_KEY_SIZE],
    pub lo_init: [u64; 2],
}

impl LoopInfo64 {
    /// Status carrying only the backing file name, cut to fit and always
    /// NUL-terminated.
    pub fn with_file_name(file: &Path) -> Self {
        let mut lo_file_name = [0u8; LO_NAME_SIZE];
        let name = file.as_os_str().as_bytes();
        let len = name.len().min(LO_NAME_SIZE - 1);
        lo_file_name[..len].copy_from_slice(&name[..len]);

        Self {
            lo_device: 0,
            lo_inode: 0,
            lo_rdevice: 0,
            lo_offset: 0,
            lo_sizelimit: 0,
            lo_number: 0,
            lo_encrypt_type: 0,
            lo_encrypt_key_size: 0,
            lo_flags: 0,
            lo_file_name,
            lo_crypt_name: [0u8; LO_NAME_SIZE],
            lo_encrypt_key: [0u8; LO_KEY_SIZE],
            lo_init: [0; 2],
        }
    }

    pub fn file_name(&self) -> &[u8] {
        let end = self
            .lo_file_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LO_NAME_SIZE);
        &self.lo_file_name[..end]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoopIndex(u8);

impl LoopIndex {
    pub fn new(index: u8) -> Option<Self> {
        (index <= 9).then_some(Self(index))
    }

    pub fn from_digit(digit: u8) -> Option<Self> {
        digit
            .is_ascii_digit()
            .then(|| Self(digit - b'0'))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

pub fn loop_device_path(index: LoopIndex) -> PathBuf {
    Path::new(crate::DEV).join(format!("loop{}", index.get()))
}

/// Attaches `file` to the loop device `device` and records its name.
///
/// Both descriptors are closed whatever the outcome.
pub fn losetup<S: System>(sys: &mut S, device: &Path, file: &Path) -> Result<(), InitError> {
    debug!(
        "Setting up loopback: '{}' associated to '{}'.",
        device.display(),
        file.display()
    );

    let file_fd = sys.open(file, OpenMode::ReadOnly).map_err(|errno| {
        error!("losetup: cannot open '{}'.", file.display());
        InitError::Open {
            path: file.to_path_buf(),
            errno,
        }
    })?;

    let loop_fd = match sys.open(device, OpenMode::ReadOnly) {
        Ok(fd) => fd,
        Err(errno) => {
            error!("losetup: cannot open '{}'.", device.display());
            sys.close(file_fd);
            return Err(InitError::Open {
                path: device.to_path_buf(),
                errno,
            });
        }
    };

    let res = sys
        .loop_set_fd(loop_fd, file_fd)
        .and_then(|_| sys.loop_set_status(loop_fd, &LoopInfo64::with_file_name(file)));

    sys.close(loop_fd);
    sys.close(file_fd);

    res.map_err(|errno| {
        error!("Cannot setup loop device '{}'.", device.display());
        InitError::Bind {
            device: device.to_path_buf(),
            file: file.to_path_buf(),
            errno,
        }
    })
}
