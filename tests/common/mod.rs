#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mininit::error::{Errno, InitError};
use mininit::loop_dev::LoopInfo64;
use mininit::mount::MountpointFlags;
use mininit::sys::{OpenMode, RawFd, System};

pub const LISTING: &str = "nodev\tsysfs\nnodev\tproc\n\text4\nnodev\tubifs\n\tvfat\n";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Mount {
        source: Option<OsString>,
        target: String,
        fstype: Option<String>,
        moving: bool,
        read_only: bool,
        data: Option<String>,
    },
    Umount(String),
    Read(String),
    Open(String, OpenMode),
    Dup2(RawFd, RawFd),
    Close(RawFd),
    LoopSetFd(RawFd, RawFd),
    LoopSetStatus(RawFd, String),
    Chdir(String),
    Chroot(String),
    Sleep(Duration),
    Exec(OsString, Vec<OsString>),
}

/// Records every call and answers from a small in-memory world.
#[derive(Debug)]
pub struct FakeSystem {
    pub calls: Vec<Call>,
    pub files: HashMap<PathBuf, Vec<u8>>,
    /// device -> the only filesystem type it mounts as
    pub devices: HashMap<OsString, String>,
    pub executables: HashSet<PathBuf>,
    pub missing: HashSet<PathBuf>,
    pub failing: HashSet<&'static str>,
    pub open_fds: HashSet<RawFd>,
    next_fd: RawFd,
}

impl FakeSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        files.insert(PathBuf::from(mininit::FILESYSTEMS), LISTING.as_bytes().to_vec());

        Self {
            calls: Vec::new(),
            files,
            devices: HashMap::new(),
            executables: HashSet::new(),
            missing: HashSet::new(),
            failing: HashSet::new(),
            open_fds: HashSet::new(),
            next_fd: 3,
        }
    }

    pub fn cmdline(self, cmdline: &str) -> Self {
        self.cmdline_bytes(cmdline.as_bytes())
    }

    pub fn cmdline_bytes(mut self, cmdline: &[u8]) -> Self {
        self.files
            .insert(PathBuf::from(mininit::CMDLINE), cmdline.to_vec());
        self
    }

    pub fn listing(mut self, listing: &str) -> Self {
        self.files
            .insert(PathBuf::from(mininit::FILESYSTEMS), listing.as_bytes().to_vec());
        self
    }

    pub fn device(self, device: &str, fstype: &str) -> Self {
        self.device_bytes(device.as_bytes(), fstype)
    }

    pub fn device_bytes(mut self, device: &[u8], fstype: &str) -> Self {
        self.devices
            .insert(OsString::from_vec(device.to_vec()), fstype.to_string());
        self
    }

    pub fn executable(mut self, path: &str) -> Self {
        self.executables.insert(PathBuf::from(path));
        self
    }

    pub fn missing(mut self, path: &str) -> Self {
        self.missing.insert(PathBuf::from(path));
        self
    }

    pub fn failing(mut self, op: &'static str) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn mounts(&self) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::Mount { .. }))
            .collect()
    }

    /// (source, fstype) of every mount attempted on `target`.
    pub fn attempts_on(&self, target: &str) -> Vec<(OsString, Option<String>)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Mount {
                    source,
                    target: t,
                    fstype,
                    ..
                } if t == target => Some((source.clone().unwrap_or_default(), fstype.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.iter().position(pred)
    }

    fn fail(&self, op: &str) -> bool {
        self.failing.contains(op)
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

impl System for FakeSystem {
    fn mount(
        &mut self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MountpointFlags,
        data: Option<&str>,
    ) -> Result<(), Errno> {
        self.calls.push(Call::Mount {
            source: source.map(|s| s.as_os_str().to_os_string()),
            target: display(target),
            fstype: fstype.map(String::from),
            moving: flags.is_move(),
            read_only: flags.is_read_only(),
            data: data.map(String::from),
        });

        if flags.is_move() {
            let op = if target == Path::new("/") { "switch" } else { "move" };
            return if self.fail(op) {
                Err(Errno(libc::EINVAL))
            } else {
                Ok(())
            };
        }

        match source {
            None if self.fail("proc") => Err(Errno(libc::ENODEV)),
            None => Ok(()),
            Some(source) => match self.devices.get(source.as_os_str()) {
                Some(fs) if Some(fs.as_str()) == fstype => Ok(()),
                Some(_) => Err(Errno(libc::EINVAL)),
                None => Err(Errno(libc::ENXIO)),
            },
        }
    }

    fn umount(&mut self, target: &Path) -> Result<(), Errno> {
        self.calls.push(Call::Umount(display(target)));
        if self.fail("umount") {
            Err(Errno(libc::EBUSY))
        } else {
            Ok(())
        }
    }

    fn read_text(&mut self, path: &Path, _capacity: usize) -> Result<Vec<u8>, InitError> {
        self.calls.push(Call::Read(display(path)));
        self.files.get(path).cloned().ok_or(InitError::Open {
            path: path.to_path_buf(),
            errno: Errno(libc::ENOENT),
        })
    }

    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<RawFd, Errno> {
        self.calls.push(Call::Open(display(path), mode));
        if self.missing.contains(path) {
            return Err(Errno(libc::ENOENT));
        }

        let fd = self.next_fd;
        self.next_fd += 1;
        self.open_fds.insert(fd);
        Ok(fd)
    }

    fn dup2(&mut self, fd: RawFd, target: RawFd) -> Result<(), Errno> {
        self.calls.push(Call::Dup2(fd, target));
        if self.fail("dup2") {
            Err(Errno(libc::EBADF))
        } else {
            Ok(())
        }
    }

    fn close(&mut self, fd: RawFd) {
        self.calls.push(Call::Close(fd));
        self.open_fds.remove(&fd);
    }

    fn loop_set_fd(&mut self, loop_fd: RawFd, file_fd: RawFd) -> Result<(), Errno> {
        self.calls.push(Call::LoopSetFd(loop_fd, file_fd));
        if self.fail("loop_set_fd") {
            Err(Errno(libc::EBUSY))
        } else {
            Ok(())
        }
    }

    fn loop_set_status(&mut self, loop_fd: RawFd, info: &LoopInfo64) -> Result<(), Errno> {
        let name = String::from_utf8_lossy(info.file_name()).into_owned();
        self.calls.push(Call::LoopSetStatus(loop_fd, name));
        if self.fail("loop_set_status") {
            Err(Errno(libc::EINVAL))
        } else {
            Ok(())
        }
    }

    fn chdir(&mut self, path: &Path) -> Result<(), Errno> {
        self.calls.push(Call::Chdir(display(path)));
        if self.fail("chdir") {
            Err(Errno(libc::ENOENT))
        } else {
            Ok(())
        }
    }

    fn chroot(&mut self, path: &Path) -> Result<(), Errno> {
        self.calls.push(Call::Chroot(display(path)));
        if self.fail("chroot") {
            Err(Errno(libc::EPERM))
        } else {
            Ok(())
        }
    }

    fn is_executable(&mut self, path: &Path) -> bool {
        self.executables.contains(path)
    }

    fn sleep(&mut self, duration: Duration) {
        self.calls.push(Call::Sleep(duration));
    }

    fn exec(&mut self, program: &Path, argv: &[OsString]) -> Result<(), Errno> {
        self.calls
            .push(Call::Exec(program.as_os_str().to_os_string(), argv.to_vec()));
        if self.fail("exec") {
            Err(Errno(libc::ENOEXEC))
        } else {
            Ok(())
        }
    }
}
