use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    protocol::{HR_HANDLE_MASK, HR_SHIFT, TPM_HT_NV_INDEX},
};

/// Handle type stored in the most significant byte of a handle.
#[must_use]
pub const fn type_tag(handle: u32) -> u8 {
    (handle >> HR_SHIFT) as u8
}

/// Build a handle from a 24-bit index number and a handle type.
#[must_use]
pub const fn with_type_tag(index: u32, tag: u8) -> u32 {
    ((tag as u32) << HR_SHIFT) | (index & HR_HANDLE_MASK)
}

/// Handle of an NV index (`TPMI_RH_NV_INDEX`).
///
/// Always carries the `TPM_HT_NV_INDEX` type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct NvIndex(u32);

impl NvIndex {
    pub fn new(handle: u32) -> Result<Self, Error> {
        if type_tag(handle) != TPM_HT_NV_INDEX {
            return Err(Error::InvalidFormat(format!(
                "index type for 0x{handle:08x} is not NV"
            )));
        }

        Ok(NvIndex(handle))
    }

    /// NV index handle for the caller-chosen 24-bit index number.
    pub fn from_index(index: u32) -> Result<Self, Error> {
        if index > HR_HANDLE_MASK {
            return Err(Error::InvalidInput(format!(
                "NV index number 0x{index:x} does not fit in 24 bits"
            )));
        }

        Ok(NvIndex(with_type_tag(index, TPM_HT_NV_INDEX)))
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// The 24-bit index number without the type tag.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 & HR_HANDLE_MASK
    }
}

impl TryFrom<u32> for NvIndex {
    type Error = Error;

    fn try_from(handle: u32) -> Result<Self, Error> {
        NvIndex::new(handle)
    }
}

impl From<NvIndex> for u32 {
    fn from(index: NvIndex) -> Self {
        index.0
    }
}

impl fmt::Display for NvIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Indices are always written in hexadecimal, with or without `0x`.
impl FromStr for NvIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let handle = u32::from_str_radix(digits, 16)
            .map_err(|e| Error::InvalidFormat(format!("invalid NV index '{s}': {e}")))?;
        NvIndex::new(handle)
    }
}
