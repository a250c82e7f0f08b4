//! Password authorization session (`TPMS_AUTH_COMMAND` without nonce).
//!
//! Layout on the wire:
//!
//! ```text
//! u32 sessionSize | u32 TPM_RS_PW | u16 nonceSize=0 | u8 attributes=0 | u16 passwordSize | password
//! ```
//!
//! `sessionSize` counts every byte after itself. HMAC, policy and salted
//! sessions are not supported.

use crate::{
    error::Error,
    protocol::{SessionAttributes, TPM_RS_PW},
    wire::{Reader, Writer},
};

const SESSION_SIZE_FIELD: usize = 4;

/// Bytes of the session written before the password itself.
pub const PASSWORD_SESSION_PREFIX_SIZE: usize = SESSION_SIZE_FIELD + 4 + 2 + 1 + 2;

/// `{u16 nonceSize, u8 attributes, u16 hmacSize}` echoed by the TPM.
pub const AUTH_RESPONSE_SIZE: usize = 2 + 1 + 2;

#[derive(Debug, Clone, Copy)]
pub struct PasswordSession<'a> {
    password: &'a [u8],
}

impl<'a> PasswordSession<'a> {
    /// An empty password authorizes as owner with its empty auth value.
    pub fn new(password: &'a [u8]) -> Result<Self, Error> {
        if password.len() > usize::from(u16::MAX) {
            return Err(Error::InvalidInput(format!(
                "password of {} bytes exceeds {} bytes",
                password.len(),
                u16::MAX
            )));
        }

        Ok(PasswordSession { password })
    }

    #[must_use]
    pub fn password(&self) -> &'a [u8] {
        self.password
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        PASSWORD_SESSION_PREFIX_SIZE + self.password.len()
    }

    /// Value of the `sessionSize` field.
    #[must_use]
    pub fn session_size(&self) -> u32 {
        (self.encoded_len() - SESSION_SIZE_FIELD) as u32
    }

    /// Append the session and return the offset right after the password,
    /// where the command-specific fields continue.
    pub fn write(&self, writer: &mut Writer) -> Result<usize, Error> {
        let start = writer.offset();

        writer.u32(0)?;
        writer.u32(TPM_RS_PW)?;
        writer.u16(0)?;
        writer.u8(SessionAttributes::empty().bits())?;
        writer.u16(self.password.len() as u16)?;
        writer.bytes(self.password)?;

        let written = writer.offset() - start;
        writer.patch_u32(start, (written - SESSION_SIZE_FIELD) as u32)?;

        Ok(writer.offset())
    }
}

/// Encode a standalone password session.
///
/// Returns the encoded block and its length in bytes.
pub fn build_password_session(password: &[u8]) -> Result<(Vec<u8>, usize), Error> {
    let session = PasswordSession::new(password)?;
    let mut writer = Writer::with_size(session.encoded_len());
    let end = session.write(&mut writer)?;

    Ok((writer.finish()?, end))
}

/// Session area returned after the response parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResponse {
    pub nonce_size: u16,
    pub attributes: u8,
    pub hmac_size: u16,
}

impl AuthResponse {
    pub fn read(reader: &mut Reader) -> Result<Self, Error> {
        let nonce_size = reader.u16()?;
        reader.bytes(usize::from(nonce_size))?;
        let attributes = reader.u8()?;
        let hmac_size = reader.u16()?;
        reader.bytes(usize::from(hmac_size))?;

        Ok(AuthResponse {
            nonce_size,
            attributes,
            hmac_size,
        })
    }

    /// Echo written by a TPM for a password session: no nonce, no HMAC.
    pub fn write(&self, writer: &mut Writer) -> Result<(), Error> {
        writer.u16(0)?;
        writer.u8(self.attributes)?;
        writer.u16(0)?;
        Ok(())
    }
}

/// Parse a password session from a command, as the TPM does.
///
/// Returns the session handle and the password; `sessionSize` must match
/// the content that follows it.
pub fn read_password_session<'a>(reader: &mut Reader<'a>) -> Result<(u32, &'a [u8]), Error> {
    let session_size = reader.u32()?;
    let handle = reader.u32()?;
    let nonce_size = reader.u16()?;
    reader.bytes(usize::from(nonce_size))?;
    let _attributes = reader.u8()?;
    let password_size = reader.u16()?;
    let password = reader.bytes(usize::from(password_size))?;

    let expected =
        PASSWORD_SESSION_PREFIX_SIZE - SESSION_SIZE_FIELD + usize::from(nonce_size) + password.len();
    if session_size as usize != expected {
        return Err(Error::InvalidFormat(format!(
            "session size {session_size} does not match its {expected}-byte content"
        )));
    }

    Ok((handle, password))
}
