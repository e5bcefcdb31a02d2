//! The boot sequence, from an empty initramfs to the real init.
//!
//! Steps run strictly in order and none is retried. Up to
//! [`Stage::PreserveOldRoot`] a failure leaves the initramfs untouched; from
//! there on the old root is held open and must be closed on the way out.

use core::fmt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};

use crate::config::BootParams;
use crate::error::InitError;
use crate::loop_dev::{loop_device_path, losetup};
use crate::mount::{multi_mount, MountFlag, Mountpoint, MountpointFlags, Retry};
use crate::sys::{OpenMode, RawFd, System};

#[derive(Clone, Debug, PartialEq)]
pub struct Layout {
    pub proc: PathBuf,
    pub cmdline: PathBuf,
    pub filesystems: PathBuf,
    pub boot: PathBuf,
    pub root: PathBuf,
    pub console: PathBuf,
    pub inits: Vec<PathBuf>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            proc: PathBuf::from(crate::PROC),
            cmdline: PathBuf::from(crate::CMDLINE),
            filesystems: PathBuf::from(crate::FILESYSTEMS),
            boot: PathBuf::from(crate::BOOT),
            root: PathBuf::from(crate::SYSROOT),
            console: PathBuf::from(crate::CONSOLE),
            inits: crate::INITS.iter().map(PathBuf::from).collect(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    MountProc,
    ParseParams,
    MountBoot,
    SetupLoops,
    MountRoot,
    RelocateBoot,
    ChangeWorkingDir,
    RebindConsole,
    PreserveOldRoot,
    SwitchRoot,
    ChrootFinal,
    ReleaseOldRoot,
    ResolveInit,
    Exec,
}

impl Stage {
    pub const SEQUENCE: [Stage; 14] = [
        Stage::MountProc,
        Stage::ParseParams,
        Stage::MountBoot,
        Stage::SetupLoops,
        Stage::MountRoot,
        Stage::RelocateBoot,
        Stage::ChangeWorkingDir,
        Stage::RebindConsole,
        Stage::PreserveOldRoot,
        Stage::SwitchRoot,
        Stage::ChrootFinal,
        Stage::ReleaseOldRoot,
        Stage::ResolveInit,
        Stage::Exec,
    ];

    /// Whether the initramfs view may already be gone when this step fails.
    pub fn is_irreversible(self) -> bool {
        self >= Stage::PreserveOldRoot
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::MountProc => "mount proc",
            Stage::ParseParams => "parse boot parameters",
            Stage::MountBoot => "mount boot",
            Stage::SetupLoops => "setup loop devices",
            Stage::MountRoot => "mount root",
            Stage::RelocateBoot => "move boot",
            Stage::ChangeWorkingDir => "enter new root",
            Stage::RebindConsole => "reopen console",
            Stage::PreserveOldRoot => "hold old root",
            Stage::SwitchRoot => "switch root",
            Stage::ChrootFinal => "chroot",
            Stage::ReleaseOldRoot => "release old root",
            Stage::ResolveInit => "find init",
            Stage::Exec => "exec init",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum Outcome {
    Continue,
    Warn(InitError),
    Abort(InitError),
}

impl From<Result<(), InitError>> for Outcome {
    fn from(res: Result<(), InitError>) -> Self {
        match res {
            Ok(()) => Outcome::Continue,
            Err(err) => Outcome::Abort(err),
        }
    }
}

pub struct RootSwitch<S: System> {
    sys: S,
    layout: Layout,
    retry: Retry,
    params: BootParams,
    boot_mounted: bool,
    old_root: Option<RawFd>,
    program: Option<PathBuf>,
    completed: Vec<Stage>,
}

impl<S: System> RootSwitch<S> {
    pub fn new(sys: S, layout: Layout) -> Self {
        Self {
            sys,
            layout,
            retry: Retry::default(),
            params: BootParams::default(),
            boot_mounted: false,
            old_root: None,
            program: None,
            completed: Vec::new(),
        }
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    pub fn system(&self) -> &S {
        &self.sys
    }

    pub fn params(&self) -> &BootParams {
        &self.params
    }

    /// Steps that ran to completion, in order.
    pub fn completed(&self) -> &[Stage] {
        &self.completed
    }

    pub fn is_holding_old_root(&self) -> bool {
        self.old_root.is_some()
    }

    /// Runs every step. With a real kernel this only returns on failure.
    pub fn run(&mut self) -> Result<(), InitError> {
        for stage in Stage::SEQUENCE {
            debug!("{stage}");

            match self.step(stage) {
                Outcome::Continue => {}
                Outcome::Warn(err) => warn!("{err}"),
                Outcome::Abort(err) => {
                    error!("{stage} failed: {err}");
                    self.release_old_root();
                    return Err(err);
                }
            }

            self.completed.push(stage);
        }

        Ok(())
    }

    pub fn step(&mut self, stage: Stage) -> Outcome {
        match stage {
            Stage::MountProc => self.mount_proc().into(),
            Stage::ParseParams => self.parse_params().into(),
            Stage::MountBoot => self.mount_boot(),
            Stage::SetupLoops => self.setup_loops(),
            Stage::MountRoot => self.mount_root().into(),
            Stage::RelocateBoot => self.relocate_boot().into(),
            Stage::ChangeWorkingDir => self.change_working_dir().into(),
            Stage::RebindConsole => self.rebind_console().into(),
            Stage::PreserveOldRoot => self.preserve_old_root().into(),
            Stage::SwitchRoot => self.switch_root().into(),
            Stage::ChrootFinal => self.chroot_final().into(),
            Stage::ReleaseOldRoot => {
                self.release_old_root();
                Outcome::Continue
            }
            Stage::ResolveInit => self.resolve_init().into(),
            Stage::Exec => self.exec().into(),
        }
    }

    fn mount_proc(&mut self) -> Result<(), InitError> {
        Mountpoint::new(&self.layout.proc, Some("proc"), MountpointFlags::default(), None)
            .mount(&mut self.sys, None)
    }

    fn parse_params(&mut self) -> Result<(), InitError> {
        let cmdline = self.sys.read_text(&self.layout.cmdline, crate::TEXT_CAPACITY)?;
        debug!("Command line read: {}", String::from_utf8_lossy(&cmdline));

        self.params = BootParams::new(&cmdline, crate::MAX_PARAMS)?;
        Ok(())
    }

    fn mount_boot(&mut self) -> Outcome {
        let Some(list) = self.params.value("boot") else {
            return Outcome::Warn(InitError::MissingParameter("boot"));
        };

        let mountpoint = Mountpoint::new(
            &self.layout.boot,
            None,
            MountpointFlags::new(&[MountFlag::ReadOnly]),
            Some(crate::BOOT_DATA),
        );

        match multi_mount(&mut self.sys, &self.layout.filesystems, list, &mountpoint, self.retry) {
            Ok(_) => {
                self.boot_mounted = true;
                Outcome::Continue
            }
            Err(err) => Outcome::Abort(err),
        }
    }

    fn setup_loops(&mut self) -> Outcome {
        for (index, file) in self.params.loops() {
            let device = loop_device_path(index);

            // a broken loop device shows up again as a failed mount
            if let Err(err) = losetup(&mut self.sys, &device, Path::new(file)) {
                warn!("{err}");
            }
        }

        Outcome::Continue
    }

    fn mount_root(&mut self) -> Result<(), InitError> {
        let list = self
            .params
            .value("root")
            .ok_or(InitError::MissingParameter("root"))?;

        let mountpoint = Mountpoint::new(
            &self.layout.root,
            None,
            MountpointFlags::new(&[MountFlag::ReadOnly]),
            None,
        );

        multi_mount(&mut self.sys, &self.layout.filesystems, list, &mountpoint, self.retry)?;
        Ok(())
    }

    fn relocate_boot(&mut self) -> Result<(), InitError> {
        if !self.boot_mounted {
            return Ok(());
        }

        let boot = &self.layout.boot;
        let to = self
            .layout
            .root
            .join(boot.strip_prefix("/").unwrap_or(boot.as_path()));
        debug!("Moving '{}' mountpoint", self.layout.boot.display());

        self.sys
            .mount(
                Some(&self.layout.boot),
                &to,
                None,
                MountpointFlags::new(&[MountFlag::Move]),
                None,
            )
            .map_err(|errno| InitError::Relocate {
                from: self.layout.boot.clone(),
                to,
                errno,
            })
    }

    fn change_working_dir(&mut self) -> Result<(), InitError> {
        debug!("Switching root");

        self.sys
            .chdir(&self.layout.root)
            .map_err(|errno| InitError::ChangeDir {
                path: self.layout.root.clone(),
                errno,
            })
    }

    fn rebind_console(&mut self) -> Result<(), InitError> {
        let console = self.layout.root.join(&self.layout.console);

        let fd = self
            .sys
            .open(&console, OpenMode::ReadWrite)
            .map_err(|errno| InitError::Open {
                path: console,
                errno,
            })?;

        let res = (0..=2).try_for_each(|std_fd| self.sys.dup2(fd, std_fd));

        if fd > 2 {
            self.sys.close(fd);
        }

        res.map_err(|errno| InitError::Console { errno })
    }

    fn preserve_old_root(&mut self) -> Result<(), InitError> {
        let fd = self
            .sys
            .open(Path::new("/"), OpenMode::ReadOnly)
            .map_err(|errno| InitError::Open {
                path: PathBuf::from("/"),
                errno,
            })?;
        self.old_root = Some(fd);

        if let Err(errno) = self.sys.umount(&self.layout.proc) {
            warn!("Unable to unmount '{}': {errno}", self.layout.proc.display());
        }

        Ok(())
    }

    fn switch_root(&mut self) -> Result<(), InitError> {
        self.sys
            .mount(
                Some(Path::new(".")),
                Path::new("/"),
                None,
                MountpointFlags::new(&[MountFlag::Move]),
                None,
            )
            .map_err(|errno| InitError::Switch {
                op: "move to /",
                errno,
            })
    }

    fn chroot_final(&mut self) -> Result<(), InitError> {
        self.sys
            .chroot(Path::new("."))
            .map_err(|errno| InitError::Switch { op: "chroot", errno })?;

        self.sys
            .chdir(Path::new("/"))
            .map_err(|errno| InitError::Switch { op: "chdir", errno })
    }

    fn release_old_root(&mut self) {
        if let Some(fd) = self.old_root.take() {
            self.sys.close(fd);
        }
    }

    fn resolve_init(&mut self) -> Result<(), InitError> {
        let program = match self.params.value("init") {
            Some(init) => PathBuf::from(init),
            None => self
                .layout
                .inits
                .iter()
                .find(|init| self.sys.is_executable(init))
                .cloned()
                .ok_or(InitError::Resolution)?,
        };

        debug!("Using '{}' as init", program.display());
        self.program = Some(program);
        Ok(())
    }

    fn exec(&mut self) -> Result<(), InitError> {
        let program = self.program.take().ok_or(InitError::Resolution)?;

        let argv: Vec<OsString> = core::iter::once(program.clone().into_os_string())
            .chain(self.params.params().iter().cloned())
            .collect();

        self.sys
            .exec(&program, &argv)
            .map_err(|errno| InitError::Exec { program, errno })
    }
}
