use env_logger::Env;
use log::info;

use mininit::{
    switch_root::{Layout, RootSwitch},
    sys::Linux,
};

fn main() {
    let level = if cfg!(feature = "trace") { "trace" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    info!(
        "{} {} starting",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let mut switch = RootSwitch::new(Linux, Layout::default());

    let code = match switch.run() {
        Ok(()) => {
            /* execv replaces this program with the init one */
            unreachable!()
        }
        Err(err) => {
            #[cfg(feature = "droptosh")]
            rescue_shell();

            err.exit_code()
        }
    };

    std::process::exit(code);
}

#[cfg(feature = "droptosh")]
fn rescue_shell() {
    use mininit::sys::System;
    use std::ffi::OsString;
    use std::path::Path;

    let shell = mininit::RESCUE_SHELL;
    log::error!("Dropping to {shell}");

    if let Err(errno) = Linux.exec(Path::new(shell), &[OsString::from(shell)]) {
        log::error!("exec of '{shell}' failed: {errno}");
    }
}
