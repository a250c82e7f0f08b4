//! Exact sizes of every command and reply shape.
//!
//! A command is laid out as
//!
//! ```text
//! [Header][Handles][AuthSession + password][Body size + data][Footer]
//! ```
//!
//! and its total length is computed here, from the fixed parts and the
//! variable password and data lengths, before the buffer is allocated.

use crate::{
    error::Error,
    header::{COMMAND_HEADER_SIZE, RESPONSE_HEADER_SIZE},
    protocol::{MAX_CAP_HANDLES, MAX_DIGEST_SIZE, SHA256_DIGEST_SIZE},
    session::{AUTH_RESPONSE_SIZE, PASSWORD_SESSION_PREFIX_SIZE},
};

pub const HANDLE_SIZE: usize = 4;
/// Size prefix of every `TPM2B_*` structure.
pub const SIZE_FIELD: usize = 2;
pub const PARAMETER_SIZE_FIELD: usize = 4;

/// `TPMS_NV_PUBLIC`: index, nameAlg, attributes, authPolicy size, dataSize.
pub const NV_PUBLIC_BODY_SIZE: usize = 4 + 2 + 4 + 2 + 2;
/// `TPM2B_NV_PUBLIC` with an empty auth policy.
pub const NV_PUBLIC_SIZE: usize = SIZE_FIELD + NV_PUBLIC_BODY_SIZE;
/// `TPM2B_NAME` of an NV index: nameAlg followed by its SHA-256 digest.
pub const NV_NAME_SIZE: usize = SIZE_FIELD + 2 + SHA256_DIGEST_SIZE;
/// Largest `TPM2B_NV_PUBLIC` a TPM returns: the auth policy is at most one
/// digest of the largest bank.
pub const NV_PUBLIC_MAX_SIZE: usize = NV_PUBLIC_SIZE + MAX_DIGEST_SIZE;
/// Largest `TPM2B_NAME` of an NV index, whatever its name algorithm.
pub const NV_NAME_MAX_SIZE: usize = SIZE_FIELD + 2 + MAX_DIGEST_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLayout {
    /// Handles in the handle area.
    pub handles: usize,
    /// Whether a password session follows the handles.
    pub session: bool,
    /// Fixed bytes before the variable data, when the command carries data.
    pub body_prefix: Option<usize>,
    /// Fixed bytes after the variable data.
    pub footer: usize,
}

impl CommandLayout {
    /// Bytes up to, but excluding, the password.
    #[must_use]
    pub const fn fixed_prefix(&self) -> usize {
        let session = if self.session {
            PASSWORD_SESSION_PREFIX_SIZE
        } else {
            0
        };
        COMMAND_HEADER_SIZE + self.handles * HANDLE_SIZE + session
    }

    /// Smallest possible command, with empty password and data.
    #[must_use]
    pub const fn min_size(&self) -> usize {
        let body = match self.body_prefix {
            Some(prefix) => prefix,
            None => 0,
        };
        self.fixed_prefix() + body + self.footer
    }

    /// Total command length for the given password and data lengths.
    pub fn size(&self, auth_len: usize, data_len: usize) -> Result<u32, Error> {
        if auth_len > usize::from(u16::MAX) {
            return Err(Error::InvalidInput(format!(
                "authorization of {auth_len} bytes exceeds {} bytes",
                u16::MAX
            )));
        }
        if data_len > usize::from(u16::MAX) {
            return Err(Error::InvalidInput(format!(
                "data of {data_len} bytes exceeds {} bytes",
                u16::MAX
            )));
        }
        if !self.session && auth_len != 0 {
            return Err(Error::InvalidInput(
                "command does not carry an authorization session".to_owned(),
            ));
        }
        if self.body_prefix.is_none() && data_len != 0 {
            return Err(Error::InvalidInput(
                "command does not carry a data payload".to_owned(),
            ));
        }

        let size = self
            .fixed_prefix()
            .checked_add(auth_len)
            .and_then(|size| size.checked_add(self.body_prefix.unwrap_or(0)))
            .and_then(|size| size.checked_add(data_len))
            .and_then(|size| size.checked_add(self.footer))
            .ok_or_else(|| Error::InvalidInput("command size overflow".to_owned()))?;

        u32::try_from(size)
            .map_err(|_| Error::InvalidInput(format!("command of {size} bytes is too large")))
    }
}

/// `NV_UndefineSpace`, `NV_ReadLock`, `NV_WriteLock`: auth handle, index, session.
pub const NV_INDEX_AUTH_COMMAND: CommandLayout = CommandLayout {
    handles: 2,
    session: true,
    body_prefix: None,
    footer: 0,
};

/// `NV_DefineSpace`: owner handle, session, `TPM2B_AUTH`, `TPM2B_NV_PUBLIC`.
pub const NV_DEFINE_SPACE_COMMAND: CommandLayout = CommandLayout {
    handles: 1,
    session: true,
    body_prefix: Some(SIZE_FIELD),
    footer: NV_PUBLIC_SIZE,
};

/// `NV_Write`: auth handle, index, session, `TPM2B_MAX_NV_BUFFER`, offset.
pub const NV_WRITE_COMMAND: CommandLayout = CommandLayout {
    handles: 2,
    session: true,
    body_prefix: Some(SIZE_FIELD),
    footer: 2,
};

/// `NV_Read`: auth handle, index, session, size, offset.
pub const NV_READ_COMMAND: CommandLayout = CommandLayout {
    handles: 2,
    session: true,
    body_prefix: None,
    footer: 2 + 2,
};

/// `NV_ReadPublic`: index only, no session.
pub const NV_READ_PUBLIC_COMMAND: CommandLayout = CommandLayout {
    handles: 1,
    session: false,
    body_prefix: None,
    footer: 0,
};

/// `GetCapability`: capability, property, propertyCount.
pub const GET_CAPABILITY_COMMAND: CommandLayout = CommandLayout {
    handles: 0,
    session: false,
    body_prefix: None,
    footer: 4 + 4 + 4,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLayout {
    /// Fixed bytes before the variable data, header included.
    pub prefix: usize,
    /// Whether a variable data payload follows the prefix.
    pub data: bool,
    /// Fixed bytes after the data.
    pub footer: usize,
}

impl ResponseLayout {
    /// Largest possible reply for `data_len` bytes of payload.
    #[must_use]
    pub const fn size(&self, data_len: usize) -> usize {
        let data = if self.data { data_len } else { 0 };
        self.prefix + data + self.footer
    }
}

/// Commands returning no parameters: parameter size and the auth echo.
pub const SESSION_RESPONSE: ResponseLayout = ResponseLayout {
    prefix: RESPONSE_HEADER_SIZE + PARAMETER_SIZE_FIELD,
    data: false,
    footer: AUTH_RESPONSE_SIZE,
};

/// `NV_Read`: parameter size, `TPM2B_MAX_NV_BUFFER`, auth echo.
pub const NV_READ_RESPONSE: ResponseLayout = ResponseLayout {
    prefix: RESPONSE_HEADER_SIZE + PARAMETER_SIZE_FIELD + SIZE_FIELD,
    data: true,
    footer: AUTH_RESPONSE_SIZE,
};

/// `NV_ReadPublic`: `TPM2B_NV_PUBLIC` and `TPM2B_NAME`, with room for a
/// policy and a name of the largest digest.
pub const NV_READ_PUBLIC_RESPONSE: ResponseLayout = ResponseLayout {
    prefix: RESPONSE_HEADER_SIZE + NV_PUBLIC_MAX_SIZE + NV_NAME_MAX_SIZE,
    data: false,
    footer: 0,
};

/// `GetCapability(TPM_CAP_HANDLES)`: moreData, capability, count, handles.
pub const GET_CAPABILITY_HANDLES_RESPONSE: ResponseLayout = ResponseLayout {
    prefix: RESPONSE_HEADER_SIZE + 1 + 4 + 4 + MAX_CAP_HANDLES * HANDLE_SIZE,
    data: false,
    footer: 0,
};
