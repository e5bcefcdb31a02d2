//! The handful of kernel calls the root switch is made of.
//!
//! Everything above this module goes through [`System`], so the whole boot
//! sequence can run against a recording double in tests.

use core::time::Duration;
use std::ffi::OsString;
use std::path::Path;

use crate::error::{Errno, InitError};
use crate::loop_dev::{LoopInfo64, LOOP_SET_FD, LOOP_SET_STATUS64};
use crate::mount::MountpointFlags;
use crate::string::{c_os_str, c_path, c_str};

pub type RawFd = libc::c_int;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

pub trait System {
    fn mount(
        &mut self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MountpointFlags,
        data: Option<&str>,
    ) -> Result<(), Errno>;

    fn umount(&mut self, target: &Path) -> Result<(), Errno>;

    fn read_text(&mut self, path: &Path, capacity: usize) -> Result<Vec<u8>, InitError>;

    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<RawFd, Errno>;

    fn dup2(&mut self, fd: RawFd, target: RawFd) -> Result<(), Errno>;

    fn close(&mut self, fd: RawFd);

    fn loop_set_fd(&mut self, loop_fd: RawFd, file_fd: RawFd) -> Result<(), Errno>;

    fn loop_set_status(&mut self, loop_fd: RawFd, info: &LoopInfo64) -> Result<(), Errno>;

    fn chdir(&mut self, path: &Path) -> Result<(), Errno>;

    fn chroot(&mut self, path: &Path) -> Result<(), Errno>;

    fn is_executable(&mut self, path: &Path) -> bool;

    fn sleep(&mut self, duration: Duration);

    /// Replaces the process image. Only returns on failure when run for real.
    fn exec(&mut self, program: &Path, argv: &[OsString]) -> Result<(), Errno>;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Linux;

fn check(ret: libc::c_int) -> Result<(), Errno> {
    /*
     * On success, zero is returned. On error, -1 is returned, and errno
     * is set to indicate the error.
     */
    if ret == 0 {
        Ok(())
    } else {
        Err(Errno::last())
    }
}

impl System for Linux {
    fn mount(
        &mut self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MountpointFlags,
        data: Option<&str>,
    ) -> Result<(), Errno> {
        let source = source.map(c_path).transpose()?;
        let target = c_path(target)?;
        let fstype = fstype.map(c_str).transpose()?;
        let data = data.map(c_str).transpose()?;

        check(unsafe {
            libc::mount(
                source.as_ref().map_or(core::ptr::null(), |s| s.as_ptr()),
                target.as_ptr(),
                fstype.as_ref().map_or(core::ptr::null(), |s| s.as_ptr()),
                flags.flags(),
                data.as_ref()
                    .map_or(core::ptr::null(), |s| s.as_ptr() as *const libc::c_void),
            )
        })
    }

    fn umount(&mut self, target: &Path) -> Result<(), Errno> {
        let target = c_path(target)?;

        check(unsafe { libc::umount(target.as_ptr()) })
    }

    fn read_text(&mut self, path: &Path, capacity: usize) -> Result<Vec<u8>, InitError> {
        crate::text::read_text_file(path, capacity)
    }

    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<RawFd, Errno> {
        let path = c_path(path)?;
        let flags = match mode {
            OpenMode::ReadOnly => libc::O_RDONLY,
            OpenMode::ReadWrite => libc::O_RDWR,
        };

        match unsafe { libc::open(path.as_ptr(), flags, 0) } {
            fd if fd < 0 => Err(Errno::last()),
            fd => Ok(fd),
        }
    }

    fn dup2(&mut self, fd: RawFd, target: RawFd) -> Result<(), Errno> {
        match unsafe { libc::dup2(fd, target) } {
            ret if ret == target => Ok(()),
            _ => Err(Errno::last()),
        }
    }

    fn close(&mut self, fd: RawFd) {
        unsafe {
            libc::close(fd);
        }
    }

    fn loop_set_fd(&mut self, loop_fd: RawFd, file_fd: RawFd) -> Result<(), Errno> {
        match unsafe { libc::ioctl(loop_fd, LOOP_SET_FD as _, file_fd) } {
            ret if ret < 0 => Err(Errno::last()),
            _ => Ok(()),
        }
    }

    fn loop_set_status(&mut self, loop_fd: RawFd, info: &LoopInfo64) -> Result<(), Errno> {
        match unsafe { libc::ioctl(loop_fd, LOOP_SET_STATUS64 as _, info as *const LoopInfo64) } {
            ret if ret < 0 => Err(Errno::last()),
            _ => Ok(()),
        }
    }

    fn chdir(&mut self, path: &Path) -> Result<(), Errno> {
        let path = c_path(path)?;

        check(unsafe { libc::chdir(path.as_ptr()) })
    }

    fn chroot(&mut self, path: &Path) -> Result<(), Errno> {
        let path = c_path(path)?;

        check(unsafe { libc::chroot(path.as_ptr()) })
    }

    fn is_executable(&mut self, path: &Path) -> bool {
        match c_path(path) {
            Ok(path) => unsafe { libc::access(path.as_ptr(), libc::X_OK) == 0 },
            Err(_) => false,
        }
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn exec(&mut self, program: &Path, argv: &[OsString]) -> Result<(), Errno> {
        let program = c_path(program)?;
        let argv = argv
            .iter()
            .map(|arg| c_os_str(arg))
            .collect::<Result<Vec<_>, _>>()?;

        let mut ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        ptrs.push(core::ptr::null());

        unsafe {
            libc::execv(program.as_ptr(), ptrs.as_ptr());
        }

        Err(Errno::last())
    }
}
