use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use thiserror::Error;

use crate::error::Errno;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("more than {capacity} tokens")]
pub struct TooManyTokens {
    pub capacity: usize,
}

/// Splits `buf` on `delim`, dropping empty pieces. More than `capacity`
/// tokens is an error rather than a silent truncation.
pub fn tokenize(buf: &[u8], delim: u8, capacity: usize) -> Result<Vec<&[u8]>, TooManyTokens> {
    let mut tokens = Vec::new();

    for token in buf.split(|&b| b == delim).filter(|t| !t.is_empty()) {
        if tokens.len() == capacity {
            return Err(TooManyTokens { capacity });
        }

        tokens.push(token);
    }

    Ok(tokens)
}

pub(crate) fn c_path(path: &Path) -> Result<CString, Errno> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno(libc::EINVAL))
}

pub(crate) fn c_str(str: &str) -> Result<CString, Errno> {
    CString::new(str).map_err(|_| Errno(libc::EINVAL))
}

pub(crate) fn c_os_str(str: &OsStr) -> Result<CString, Errno> {
    CString::new(str.as_bytes()).map_err(|_| Errno(libc::EINVAL))
}
