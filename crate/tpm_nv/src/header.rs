//! Command and response headers shared by every TPM 2.0 command.

use crate::{
    error::Error,
    protocol::{CommandCode, ResponseCode, TPM_ST_NO_SESSIONS, TPM_ST_SESSIONS},
    wire::{Reader, Writer},
};

/// `{u16 tag, u32 commandSize, u32 commandCode}`
pub const COMMAND_HEADER_SIZE: usize = 2 + 4 + 4;
/// `{u16 tag, u32 responseSize, u32 responseCode}`
pub const RESPONSE_HEADER_SIZE: usize = 2 + 4 + 4;

const SIZE_FIELD_OFFSET: usize = 2;

/// Write the command header.
///
/// `total_size` must be the final length of the command: the header is only
/// written once the layout sizer has produced it.
pub fn fill_command_header(
    writer: &mut Writer,
    session_tag: u16,
    command_code: CommandCode,
    total_size: u32,
) -> Result<(), Error> {
    if writer.offset() != 0 {
        return Err(Error::LayoutError(
            "command header must start the buffer".to_owned(),
        ));
    }
    if total_size as usize != writer.capacity() {
        return Err(Error::LayoutError(format!(
            "header size {total_size} does not match the {}-byte command buffer",
            writer.capacity()
        )));
    }

    writer.u16(session_tag)?;
    writer.u32(total_size)?;
    writer.u32(command_code.into())?;

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub session_tag: u16,
    pub size: u32,
    pub code: ResponseCode,
}

impl ResponseHeader {
    /// Whether a session area (parameter size and auth echo) follows.
    #[must_use]
    pub fn has_sessions(&self) -> bool {
        self.session_tag == TPM_ST_SESSIONS
    }
}

/// Decode the header present at the start of every reply, whatever the command.
pub fn read_response_header(response: &[u8]) -> Result<ResponseHeader, Error> {
    if response.len() < RESPONSE_HEADER_SIZE {
        return Err(Error::UnexpectedResponse(format!(
            "reply of {} bytes is shorter than its header",
            response.len()
        )));
    }

    let mut reader = Reader::new(response);
    let header = ResponseHeader {
        session_tag: reader.u16()?,
        size: reader.u32()?,
        code: reader.u32()?.into(),
    };

    if header.session_tag != TPM_ST_SESSIONS && header.session_tag != TPM_ST_NO_SESSIONS {
        return Err(Error::UnexpectedResponse(format!(
            "unexpected session tag 0x{:04x}",
            header.session_tag
        )));
    }
    if (header.size as usize) < RESPONSE_HEADER_SIZE || header.size as usize > response.len() {
        return Err(Error::UnexpectedResponse(format!(
            "reply header declares {} bytes, {} received",
            header.size,
            response.len()
        )));
    }

    Ok(header)
}

/// Read back the size field of an encoded command.
pub fn command_size(command: &[u8]) -> Result<u32, Error> {
    Reader::at(command, SIZE_FIELD_OFFSET).u32()
}
