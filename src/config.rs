use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use crate::error::InitError;
use crate::loop_dev::LoopIndex;
use crate::string::tokenize;

/// Kernel command line, kept as the ordered list of its tokens.
///
/// Tokens are raw bytes: the kernel does not promise any encoding and
/// device or init paths must reach mount and exec as given. Duplicate keys
/// are legal, lookups return the first match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootParams {
    params: Vec<OsString>,
}

impl BootParams {
    pub fn new(content: &[u8], capacity: usize) -> Result<Self, InitError> {
        let params = tokenize(content, b' ', capacity)?
            .into_iter()
            .map(|param| OsString::from_vec(param.to_vec()))
            .collect();

        Ok(Self { params })
    }

    pub fn params(&self) -> &[OsString] {
        &self.params
    }

    pub fn value(&self, key: &str) -> Option<&OsStr> {
        self.params.iter().find_map(|param| {
            param
                .as_bytes()
                .strip_prefix(key.as_bytes())
                .and_then(|rest| rest.strip_prefix(b"="))
                .map(OsStr::from_bytes)
        })
    }

    /// Every `loopN=file` token, N being a single digit, in command line order.
    pub fn loops(&self) -> impl Iterator<Item = (LoopIndex, &OsStr)> + '_ {
        self.params.iter().filter_map(|param| {
            let rest = param.as_bytes().strip_prefix(b"loop")?;
            let (digit, file) = rest.split_first()?;
            let file = file.strip_prefix(b"=")?;

            match LoopIndex::from_digit(*digit) {
                Some(index) => Some((index, OsStr::from_bytes(file))),
                None => {
                    log::debug!(
                        "Ignoring '{}': not a loop device number.",
                        param.to_string_lossy()
                    );
                    None
                }
            }
        })
    }
}

/// Splits a `boot=`/`root=` value into the devices to try, left to right.
pub fn devices(list: &OsStr) -> impl Iterator<Item = &OsStr> {
    list.as_bytes()
        .split(|&b| b == b',')
        .filter(|device| !device.is_empty())
        .map(OsStr::from_bytes)
}
