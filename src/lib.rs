extern crate libc;

pub mod config;
pub mod error;
pub mod loop_dev;
pub mod mount;
pub mod string;
pub mod switch_root;
pub mod sys;
pub mod text;

use core::time::Duration;

/// Process information filesystem, mounted first and dropped before the switch.
pub const PROC: &str = "/proc";
pub const CMDLINE: &str = "/proc/cmdline";
pub const FILESYSTEMS: &str = "/proc/filesystems";

pub const BOOT: &str = "/boot";
pub const SYSROOT: &str = "/root";

/// Console device, relative to the new root.
pub const CONSOLE: &str = "dev/console";

pub const DEV: &str = "/dev";

/// Searched in order when no `init=` is given.
pub const INITS: [&str; 4] = ["/sbin/init", "/etc/init", "/bin/init", "/bin/sh"];

pub const RESCUE_SHELL: &str = "/bin/sh";

/// Mount options handed to the boot partition.
pub const BOOT_DATA: &str = "utf8";

/// Hotplugged storage may need a while to show up: 20 rounds of 100ms.
pub const MOUNT_RETRIES: u32 = 20;
pub const MOUNT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub const TEXT_CAPACITY: usize = 4096;

/// A 64 entry argument vector, less the program path and the terminating NULL.
pub const MAX_PARAMS: usize = 62;

/// Block filesystem types tried per device; `nodev` entries are not counted.
pub const MAX_FILESYSTEMS: usize = 64;
