use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::error;

use crate::error::{Errno, InitError};

/// Reads at most `capacity - 1` bytes of `path` in a single read.
///
/// Meant for pseudo-files, which hand out their whole content at once, so a
/// short read is taken as the full content. One trailing newline is dropped,
/// the rest is kept byte for byte.
pub fn read_text_file(path: &Path, capacity: usize) -> Result<Vec<u8>, InitError> {
    let mut file = File::open(path).map_err(|err| {
        error!("Unable to open '{}'.", path.display());
        InitError::Open {
            path: path.to_path_buf(),
            errno: Errno::from(err),
        }
    })?;

    let mut buf = vec![0u8; capacity.saturating_sub(1)];
    let read = file.read(&mut buf);
    drop(file);

    let read = read.map_err(|err| {
        error!("Unable to read '{}'.", path.display());
        InitError::Read {
            path: path.to_path_buf(),
            errno: Errno::from(err),
        }
    })?;

    buf.truncate(read);
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }

    Ok(buf)
}
