//! Encoders and decoders of the NV commands.
//!
//! Every encoder computes the final command size with the layout sizer,
//! allocates the buffer once, fills the header and then the fields in wire
//! order. Decoders only trust the reply's own size field and never read
//! past it.

use crate::{
    error::Error,
    handle::NvIndex,
    header::{fill_command_header, read_response_header, ResponseHeader, RESPONSE_HEADER_SIZE},
    layout::{
        CommandLayout, GET_CAPABILITY_COMMAND, NV_DEFINE_SPACE_COMMAND, NV_INDEX_AUTH_COMMAND,
        NV_READ_COMMAND, NV_READ_PUBLIC_COMMAND, NV_WRITE_COMMAND,
    },
    protocol::{
        CommandCode, NvAttributes, HR_NV_INDEX, MAX_CAP_HANDLES, TPM_ALG_SHA256, TPM_CAP_HANDLES,
        TPM_RH_OWNER, TPM_ST_NO_SESSIONS, TPM_ST_SESSIONS,
    },
    public::NvPublic,
    session::{AuthResponse, PasswordSession},
    wire::{Reader, Writer},
};

/// Principal authorizing an access to `index`.
///
/// Without a password the owner authorizes with its empty auth value;
/// with one, the index authorizes itself.
#[must_use]
pub fn auth_handle(index: NvIndex, password: &[u8]) -> u32 {
    if password.is_empty() {
        TPM_RH_OWNER
    } else {
        index.value()
    }
}

/// Allocate a command of `layout` and write its header.
fn start_command(
    layout: &CommandLayout,
    command_code: CommandCode,
    auth_len: usize,
    data_len: usize,
) -> Result<Writer, Error> {
    let size = layout.size(auth_len, data_len)?;
    let tag = if layout.session {
        TPM_ST_SESSIONS
    } else {
        TPM_ST_NO_SESSIONS
    };

    let mut writer = Writer::with_size(size as usize);
    fill_command_header(&mut writer, tag, command_code, size)?;
    Ok(writer)
}

/// `TPM2_NV_DefineSpace`.
///
/// `auth` becomes the authorization value of the new index. The command
/// itself is authorized by the owner with an empty password.
pub fn encode_define_space(
    index: NvIndex,
    attributes: NvAttributes,
    data_size: u16,
    auth: &[u8],
) -> Result<Vec<u8>, Error> {
    let session = PasswordSession::new(&[])?;
    let public = NvPublic::new(index, attributes, data_size);

    let mut writer = start_command(
        &NV_DEFINE_SPACE_COMMAND,
        CommandCode::NvDefineSpace,
        session.password().len(),
        auth.len(),
    )?;
    writer.u32(TPM_RH_OWNER)?;
    session.write(&mut writer)?;
    writer.u16(auth.len() as u16)?;
    writer.bytes(auth)?;
    public.write(&mut writer)?;

    writer.finish()
}

/// Commands made only of an auth handle, the index and a session.
fn encode_index_auth(
    command_code: CommandCode,
    auth_handle: u32,
    index: NvIndex,
    password: &[u8],
) -> Result<Vec<u8>, Error> {
    let session = PasswordSession::new(password)?;

    let mut writer = start_command(
        &NV_INDEX_AUTH_COMMAND,
        command_code,
        password.len(),
        0,
    )?;
    writer.u32(auth_handle)?;
    writer.u32(index.value())?;
    session.write(&mut writer)?;

    writer.finish()
}

/// `TPM2_NV_UndefineSpace`, always authorized by the owner.
pub fn encode_undefine_space(index: NvIndex) -> Result<Vec<u8>, Error> {
    encode_index_auth(CommandCode::NvUndefineSpace, TPM_RH_OWNER, index, &[])
}

pub fn encode_read_lock(index: NvIndex, password: &[u8]) -> Result<Vec<u8>, Error> {
    encode_index_auth(
        CommandCode::NvReadLock,
        auth_handle(index, password),
        index,
        password,
    )
}

pub fn encode_write_lock(index: NvIndex, password: &[u8]) -> Result<Vec<u8>, Error> {
    encode_index_auth(
        CommandCode::NvWriteLock,
        auth_handle(index, password),
        index,
        password,
    )
}

/// `TPM2_NV_Read` of `size` bytes at `offset`.
pub fn encode_read(
    index: NvIndex,
    password: &[u8],
    offset: u16,
    size: u16,
) -> Result<Vec<u8>, Error> {
    let session = PasswordSession::new(password)?;

    let mut writer = start_command(&NV_READ_COMMAND, CommandCode::NvRead, password.len(), 0)?;
    writer.u32(auth_handle(index, password))?;
    writer.u32(index.value())?;
    session.write(&mut writer)?;
    writer.u16(size)?;
    writer.u16(offset)?;

    writer.finish()
}

/// `TPM2_NV_Write` of `data` at `offset`.
pub fn encode_write(
    index: NvIndex,
    password: &[u8],
    offset: u16,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let session = PasswordSession::new(password)?;

    let mut writer = start_command(
        &NV_WRITE_COMMAND,
        CommandCode::NvWrite,
        password.len(),
        data.len(),
    )?;
    writer.u32(auth_handle(index, password))?;
    writer.u32(index.value())?;
    session.write(&mut writer)?;
    writer.u16(data.len() as u16)?;
    writer.bytes(data)?;
    writer.u16(offset)?;

    writer.finish()
}

/// `TPM2_NV_ReadPublic`, sent without a session.
pub fn encode_read_public(index: NvIndex) -> Result<Vec<u8>, Error> {
    let mut writer = start_command(&NV_READ_PUBLIC_COMMAND, CommandCode::NvReadPublic, 0, 0)?;
    writer.u32(index.value())?;

    writer.finish()
}

/// `TPM2_GetCapability(TPM_CAP_HANDLES)` for every NV index, starting
/// with the first one of the NV range.
pub fn encode_get_nv_handles() -> Result<Vec<u8>, Error> {
    let mut writer = start_command(&GET_CAPABILITY_COMMAND, CommandCode::GetCapability, 0, 0)?;
    writer.u32(TPM_CAP_HANDLES)?;
    writer.u32(HR_NV_INDEX)?;
    writer.u32(MAX_CAP_HANDLES as u32)?;

    writer.finish()
}

/// Reads past the reply are malformed replies, not codec bugs.
fn truncated(e: Error) -> Error {
    match e {
        Error::CodecError(e) => Error::UnexpectedResponse(format!("truncated reply: {e}")),
        e => e,
    }
}

/// Decode the header and fail with the TPM's code unless it is a success.
///
/// Returns the header and the reply cut down to its declared size.
pub fn check_response(response: &[u8]) -> Result<(ResponseHeader, &[u8]), Error> {
    let header = read_response_header(response)?;
    if !header.code.is_success() {
        return Err(Error::Tpm(header.code));
    }

    Ok((header, &response[..header.size as usize]))
}

/// Parameter area of a reply to a command sent with a session.
///
/// Returns a reader over the parameters and checks that the auth echo
/// closes the reply.
fn session_parameters(response: &[u8]) -> Result<Reader<'_>, Error> {
    let (header, response) = check_response(response)?;
    if !header.has_sessions() {
        return Err(Error::UnexpectedResponse(
            "reply to a session command carries no session area".to_owned(),
        ));
    }

    let mut reader = Reader::at(response, RESPONSE_HEADER_SIZE);
    let parameter_size = reader.u32()? as usize;
    let parameters = reader.bytes(parameter_size)?;
    AuthResponse::read(&mut reader)?;
    if reader.remaining() != 0 {
        return Err(Error::UnexpectedResponse(format!(
            "{} bytes left after the session area",
            reader.remaining()
        )));
    }

    Ok(Reader::new(parameters))
}

/// Reply of a command that returns no parameter.
pub fn decode_session_response(response: &[u8]) -> Result<(), Error> {
    session_parameters(response).map_err(truncated)?;
    Ok(())
}

/// Reply to `TPM2_NV_Read`; the data may not exceed the requested size.
pub fn decode_read(response: &[u8], requested: u16) -> Result<Vec<u8>, Error> {
    let decode = || -> Result<Vec<u8>, Error> {
        let mut parameters = session_parameters(response)?;
        let size = parameters.u16()?;
        if size > requested {
            return Err(Error::UnexpectedResponse(format!(
                "{size} bytes returned for a {requested}-byte read"
            )));
        }
        Ok(parameters.bytes(usize::from(size))?.to_vec())
    };

    decode().map_err(truncated)
}

/// Reply to `TPM2_NV_ReadPublic`.
///
/// The returned name must be the digest of the returned public area.
pub fn decode_read_public(response: &[u8]) -> Result<NvPublic, Error> {
    let decode = || -> Result<NvPublic, Error> {
        let (_, response) = check_response(response)?;
        let mut reader = Reader::at(response, RESPONSE_HEADER_SIZE);
        let public = NvPublic::read(&mut reader)?;
        let name_size = usize::from(reader.u16()?);
        let name = reader.bytes(name_size)?;

        if public.name_alg == TPM_ALG_SHA256 && public.name()?[2..] != *name {
            return Err(Error::UnexpectedResponse(format!(
                "name returned for {} does not match its public area",
                public.index
            )));
        }

        Ok(public)
    };

    decode().map_err(truncated)
}

/// NV handles returned by a capability query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityHandles {
    /// Set by the TPM when handles were left out of the reply.
    pub more_data: bool,
    pub handles: Vec<NvIndex>,
}

/// Reply to `TPM2_GetCapability(TPM_CAP_HANDLES)`.
pub fn decode_get_nv_handles(response: &[u8]) -> Result<CapabilityHandles, Error> {
    let decode = || -> Result<CapabilityHandles, Error> {
        let (_, response) = check_response(response)?;
        let mut reader = Reader::at(response, RESPONSE_HEADER_SIZE);
        let more_data = reader.u8()? != 0;
        let capability = reader.u32()?;
        if capability != TPM_CAP_HANDLES {
            return Err(Error::UnexpectedResponse(format!(
                "capability 0x{capability:x} returned for a handle query"
            )));
        }

        let count = reader.u32()? as usize;
        if count > MAX_CAP_HANDLES || count * 4 > reader.remaining() {
            return Err(Error::UnexpectedResponse(format!(
                "{count} handles announced in a {}-byte reply",
                response.len()
            )));
        }

        let handles = (0..count)
            .map(|_| {
                let handle = reader.u32()?;
                NvIndex::new(handle).map_err(|_| {
                    Error::UnexpectedResponse(format!(
                        "handle 0x{handle:08x} returned for an NV handle query"
                    ))
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(CapabilityHandles { more_data, handles })
    };

    decode().map_err(truncated)
}
