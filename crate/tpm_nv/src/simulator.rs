//! In-memory TPM serving the NV commands over the [`Transport`] contract.
//!
//! It parses the same wire format a TPM does and enforces owner and index
//! authorization, lock state, ranges and duplicate or missing indices, with
//! the response codes a TPM reports. The owner authorization value is
//! empty.

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::{
    error::Error,
    handle::{type_tag, NvIndex},
    header::{COMMAND_HEADER_SIZE, RESPONSE_HEADER_SIZE},
    layout::{NV_NAME_SIZE, PARAMETER_SIZE_FIELD, SIZE_FIELD},
    protocol::{
        CommandCode, NvAttributes, ResponseCode, MAX_CAP_HANDLES, TPM_ALG_SHA256,
        TPM_CAP_HANDLES, TPM_HT_NV_INDEX, TPM_RH_OWNER, TPM_RS_PW, TPM_ST_NO_SESSIONS,
        TPM_ST_SESSIONS,
    },
    public::NvPublic,
    session::{read_password_session, AuthResponse, AUTH_RESPONSE_SIZE},
    transport::Transport,
    wire::{Reader, Writer},
};

/// Largest authorization value of a SHA-256 index.
const MAX_AUTH_SIZE: usize = 32;

/// Attributes the TPM sets itself and refuses at definition time.
const STATUS_ATTRIBUTES: NvAttributes = NvAttributes::READLOCKED
    .union(NvAttributes::WRITELOCKED)
    .union(NvAttributes::WRITTEN)
    .union(NvAttributes::PLATFORMCREATE);

#[derive(Debug, Clone)]
struct Space {
    public: NvPublic,
    auth: Vec<u8>,
    data: Vec<u8>,
}

enum Access {
    Read,
    Write,
}

/// Successful reply parameters.
struct Reply {
    sessions: bool,
    parameters: Vec<u8>,
}

impl Reply {
    fn session(parameters: Vec<u8>) -> Self {
        Reply {
            sessions: true,
            parameters,
        }
    }

    fn no_session(parameters: Vec<u8>) -> Self {
        Reply {
            sessions: false,
            parameters,
        }
    }
}

type CommandResult = Result<Reply, ResponseCode>;

/// A request that does not hold the fields of its command.
fn malformed(e: Error) -> ResponseCode {
    trace!("malformed command: {e}");
    ResponseCode::INSUFFICIENT
}

#[derive(Debug, Default)]
pub struct Simulator {
    spaces: BTreeMap<NvIndex, Space>,
    transport_failure: bool,
    handles_per_reply: Option<usize>,
    last_request: Option<Vec<u8>>,
}

impl Simulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `submit` fail without a reply.
    pub fn set_transport_failure(&mut self, fail: bool) {
        self.transport_failure = fail;
    }

    /// Cap the handles returned by one capability reply, below the
    /// protocol limit, so that the TPM reports more data.
    pub fn set_handles_per_reply(&mut self, handles: usize) {
        self.handles_per_reply = Some(handles);
    }

    /// Last command received, whether it succeeded or not.
    #[must_use]
    pub fn last_request(&self) -> Option<&[u8]> {
        self.last_request.as_deref()
    }

    /// Raw content of an index.
    #[must_use]
    pub fn data(&self, index: NvIndex) -> Option<&[u8]> {
        self.spaces.get(&index).map(|space| space.data.as_slice())
    }

    /// Indices currently defined.
    pub fn indices(&self) -> impl Iterator<Item = NvIndex> + '_ {
        self.spaces.keys().copied()
    }

    /// `TPM2_Startup(TPM_SU_CLEAR)` after a reset: clears the locks and the
    /// content that only last until the next restart.
    pub fn restart(&mut self) {
        debug!("Simulated TPM restart");
        for space in self.spaces.values_mut() {
            let attributes = &mut space.public.attributes;
            attributes.remove(NvAttributes::READLOCKED);

            let write_once_locked = attributes.contains(NvAttributes::WRITEDEFINE)
                && attributes.contains(NvAttributes::WRITTEN);
            if attributes.contains(NvAttributes::WRITE_STCLEAR) && !write_once_locked {
                attributes.remove(NvAttributes::WRITELOCKED);
            }

            if attributes.contains(NvAttributes::CLEAR_STCLEAR) {
                attributes.remove(NvAttributes::WRITTEN);
                space.data.fill(0xff);
            }
        }
    }

    fn execute(&mut self, request: &[u8]) -> CommandResult {
        let mut reader = Reader::new(request);
        let tag = reader.u16().map_err(malformed)?;
        let size = reader.u32().map_err(malformed)?;
        let code = reader.u32().map_err(malformed)?;

        if size as usize != request.len() {
            return Err(ResponseCode::COMMAND_SIZE);
        }
        let command = CommandCode::try_from(code).map_err(|_| ResponseCode::COMMAND_CODE)?;
        let expected_tag = match command {
            CommandCode::NvReadPublic | CommandCode::GetCapability => TPM_ST_NO_SESSIONS,
            _ => TPM_ST_SESSIONS,
        };
        if tag != expected_tag {
            return Err(ResponseCode::BAD_TAG);
        }

        debug!("Simulated TPM executing {command:?}");
        let mut reader = Reader::at(request, COMMAND_HEADER_SIZE);
        let reply = match command {
            CommandCode::NvDefineSpace => self.define_space(&mut reader),
            CommandCode::NvUndefineSpace => self.undefine_space(&mut reader),
            CommandCode::NvRead => self.read(&mut reader),
            CommandCode::NvWrite => self.write(&mut reader),
            CommandCode::NvReadLock => self.read_lock(&mut reader),
            CommandCode::NvWriteLock => self.write_lock(&mut reader),
            CommandCode::NvReadPublic => self.read_public(&mut reader),
            CommandCode::GetCapability => self.get_capability(&mut reader),
        }?;

        if reader.remaining() != 0 {
            return Err(ResponseCode::COMMAND_SIZE);
        }
        Ok(reply)
    }

    fn index_handle(reader: &mut Reader, position: u32) -> Result<NvIndex, ResponseCode> {
        let handle = reader.u32().map_err(malformed)?;
        NvIndex::new(handle).map_err(|_| ResponseCode::handle(position))
    }

    /// Check a session authorizing the owner.
    fn owner_session(reader: &mut Reader) -> Result<(), ResponseCode> {
        let (session, password) = read_password_session(reader).map_err(malformed)?;
        if session != TPM_RS_PW {
            return Err(ResponseCode::VALUE);
        }
        if !password.is_empty() {
            return Err(ResponseCode::AUTH_FAIL_S1);
        }
        Ok(())
    }

    fn space(&self, index: NvIndex, position: u32) -> Result<&Space, ResponseCode> {
        self.spaces
            .get(&index)
            .ok_or(ResponseCode::handle(position))
    }

    fn space_mut(&mut self, index: NvIndex, position: u32) -> Result<&mut Space, ResponseCode> {
        self.spaces
            .get_mut(&index)
            .ok_or(ResponseCode::handle(position))
    }

    /// Parse `{authHandle, nvIndex, session}` and check the authorization
    /// for `access`.
    fn authorize(&self, reader: &mut Reader, access: Access) -> Result<NvIndex, ResponseCode> {
        let auth_handle = reader.u32().map_err(malformed)?;
        let index = Self::index_handle(reader, 2)?;
        let (session, password) = read_password_session(reader).map_err(malformed)?;
        if session != TPM_RS_PW {
            return Err(ResponseCode::VALUE);
        }

        let space = self.space(index, 2)?;
        let attributes = space.public.attributes;
        let (owner_right, auth_right) = match access {
            Access::Read => (NvAttributes::OWNERREAD, NvAttributes::AUTHREAD),
            Access::Write => (NvAttributes::OWNERWRITE, NvAttributes::AUTHWRITE),
        };

        let (right, auth_value): (NvAttributes, &[u8]) = if auth_handle == TPM_RH_OWNER {
            (owner_right, &[])
        } else if auth_handle == index.value() {
            (auth_right, space.auth.as_slice())
        } else {
            return Err(ResponseCode::handle(1));
        };

        if !attributes.contains(right) {
            return Err(ResponseCode::NV_AUTHORIZATION);
        }
        if password != auth_value {
            return Err(ResponseCode::AUTH_FAIL_S1);
        }

        Ok(index)
    }

    fn define_space(&mut self, reader: &mut Reader) -> CommandResult {
        if reader.u32().map_err(malformed)? != TPM_RH_OWNER {
            return Err(ResponseCode::HANDLE_1);
        }
        Self::owner_session(reader)?;

        let auth_size = usize::from(reader.u16().map_err(malformed)?);
        let auth = reader.bytes(auth_size).map_err(malformed)?.to_vec();
        let public = NvPublic::read(reader).map_err(|_| ResponseCode::SIZE)?;

        if auth.len() > MAX_AUTH_SIZE {
            return Err(ResponseCode::SIZE);
        }
        if public.name_alg != TPM_ALG_SHA256 {
            return Err(ResponseCode::VALUE);
        }

        let attributes = public.attributes;
        let readable = attributes.intersects(NvAttributes::OWNERREAD | NvAttributes::AUTHREAD);
        let writable = attributes.intersects(NvAttributes::OWNERWRITE | NvAttributes::AUTHWRITE);
        if attributes.intersects(STATUS_ATTRIBUTES) || !readable || !writable {
            return Err(ResponseCode::ATTRIBUTES);
        }
        if self.spaces.contains_key(&public.index) {
            return Err(ResponseCode::NV_DEFINED);
        }

        debug!(
            "Defining {} ({} bytes, attributes 0x{:08x})",
            public.index,
            public.data_size,
            attributes.bits()
        );
        let data = vec![0xff; usize::from(public.data_size)];
        self.spaces
            .insert(public.index, Space { public, auth, data });

        Ok(Reply::session(Vec::new()))
    }

    fn undefine_space(&mut self, reader: &mut Reader) -> CommandResult {
        if reader.u32().map_err(malformed)? != TPM_RH_OWNER {
            return Err(ResponseCode::HANDLE_1);
        }
        let index = Self::index_handle(reader, 2)?;
        Self::owner_session(reader)?;

        let space = self.space(index, 2)?;
        if space.public.attributes.contains(NvAttributes::POLICY_DELETE) {
            return Err(ResponseCode::ATTRIBUTES);
        }

        debug!("Undefining {index}");
        self.spaces.remove(&index);
        Ok(Reply::session(Vec::new()))
    }

    fn read(&mut self, reader: &mut Reader) -> CommandResult {
        let index = self.authorize(reader, Access::Read)?;
        let size = usize::from(reader.u16().map_err(malformed)?);
        let offset = usize::from(reader.u16().map_err(malformed)?);

        let space = self.space(index, 2)?;
        let attributes = space.public.attributes;
        if attributes.contains(NvAttributes::READLOCKED) {
            return Err(ResponseCode::NV_LOCKED);
        }
        if !attributes.contains(NvAttributes::WRITTEN) {
            return Err(ResponseCode::NV_UNINITIALIZED);
        }
        if offset + size > space.data.len() {
            return Err(ResponseCode::NV_RANGE);
        }

        let mut parameters = Writer::with_size(SIZE_FIELD + size);
        parameters.u16(size as u16).map_err(malformed)?;
        parameters
            .bytes(&space.data[offset..offset + size])
            .map_err(malformed)?;

        Ok(Reply::session(parameters.finish().map_err(malformed)?))
    }

    fn write(&mut self, reader: &mut Reader) -> CommandResult {
        let index = self.authorize(reader, Access::Write)?;
        let size = usize::from(reader.u16().map_err(malformed)?);
        let data = reader.bytes(size).map_err(malformed)?;
        let offset = usize::from(reader.u16().map_err(malformed)?);

        let space = self.space_mut(index, 2)?;
        let attributes = &mut space.public.attributes;
        if attributes.contains(NvAttributes::WRITELOCKED) {
            return Err(ResponseCode::NV_LOCKED);
        }
        if offset + size > space.data.len() {
            return Err(ResponseCode::NV_RANGE);
        }
        if attributes.contains(NvAttributes::WRITEALL)
            && (offset != 0 || size != space.data.len())
        {
            return Err(ResponseCode::NV_RANGE);
        }

        space.data[offset..offset + size].copy_from_slice(data);
        attributes.insert(NvAttributes::WRITTEN);
        if attributes.contains(NvAttributes::WRITEDEFINE) {
            attributes.insert(NvAttributes::WRITELOCKED);
        }

        Ok(Reply::session(Vec::new()))
    }

    fn read_lock(&mut self, reader: &mut Reader) -> CommandResult {
        let index = self.authorize(reader, Access::Read)?;

        let attributes = &mut self.space_mut(index, 2)?.public.attributes;
        if !attributes.contains(NvAttributes::READ_STCLEAR) {
            return Err(ResponseCode::ATTRIBUTES);
        }
        attributes.insert(NvAttributes::READLOCKED);

        Ok(Reply::session(Vec::new()))
    }

    fn write_lock(&mut self, reader: &mut Reader) -> CommandResult {
        let index = self.authorize(reader, Access::Write)?;

        let attributes = &mut self.space_mut(index, 2)?.public.attributes;
        if !attributes.intersects(NvAttributes::WRITE_STCLEAR | NvAttributes::WRITEDEFINE) {
            return Err(ResponseCode::ATTRIBUTES);
        }
        attributes.insert(NvAttributes::WRITELOCKED);

        Ok(Reply::session(Vec::new()))
    }

    fn read_public(&mut self, reader: &mut Reader) -> CommandResult {
        let index = Self::index_handle(reader, 1)?;
        let public = &self.space(index, 1)?.public;
        let name = public.name().map_err(malformed)?;

        let mut parameters = Writer::with_size(public.encoded_len() + NV_NAME_SIZE);
        public.write(&mut parameters).map_err(malformed)?;
        parameters.bytes(&name).map_err(malformed)?;

        Ok(Reply::no_session(parameters.finish().map_err(malformed)?))
    }

    fn get_capability(&mut self, reader: &mut Reader) -> CommandResult {
        let capability = reader.u32().map_err(malformed)?;
        let property = reader.u32().map_err(malformed)?;
        let count = reader.u32().map_err(malformed)? as usize;

        if capability != TPM_CAP_HANDLES || type_tag(property) != TPM_HT_NV_INDEX {
            return Err(ResponseCode::VALUE);
        }

        let limit = count
            .min(MAX_CAP_HANDLES)
            .min(self.handles_per_reply.unwrap_or(MAX_CAP_HANDLES));
        let mut handles = self
            .spaces
            .keys()
            .copied()
            .filter(|index| index.value() >= property)
            .peekable();
        let selected: Vec<NvIndex> = handles.by_ref().take(limit).collect();
        let more_data = handles.peek().is_some();

        let mut parameters = Writer::with_size(1 + 4 + 4 + selected.len() * 4);
        parameters.u8(u8::from(more_data)).map_err(malformed)?;
        parameters.u32(TPM_CAP_HANDLES).map_err(malformed)?;
        parameters.u32(selected.len() as u32).map_err(malformed)?;
        for index in &selected {
            parameters.u32(index.value()).map_err(malformed)?;
        }

        Ok(Reply::no_session(parameters.finish().map_err(malformed)?))
    }
}

/// Marshal a reply the way a TPM does.
fn encode_reply(result: CommandResult) -> Result<Vec<u8>, Error> {
    let reply = match result {
        Ok(reply) => reply,
        Err(code) => {
            debug!("Simulated TPM returning {code}");
            let mut writer = Writer::with_size(RESPONSE_HEADER_SIZE);
            writer.u16(TPM_ST_NO_SESSIONS)?;
            writer.u32(RESPONSE_HEADER_SIZE as u32)?;
            writer.u32(code.value())?;
            return writer.finish();
        }
    };

    let (tag, size) = if reply.sessions {
        (
            TPM_ST_SESSIONS,
            RESPONSE_HEADER_SIZE + PARAMETER_SIZE_FIELD + reply.parameters.len() + AUTH_RESPONSE_SIZE,
        )
    } else {
        (
            TPM_ST_NO_SESSIONS,
            RESPONSE_HEADER_SIZE + reply.parameters.len(),
        )
    };

    let mut writer = Writer::with_size(size);
    writer.u16(tag)?;
    writer.u32(size as u32)?;
    writer.u32(ResponseCode::SUCCESS.value())?;
    if reply.sessions {
        writer.u32(reply.parameters.len() as u32)?;
        writer.bytes(&reply.parameters)?;
        AuthResponse {
            nonce_size: 0,
            attributes: 0,
            hmac_size: 0,
        }
        .write(&mut writer)?;
    } else {
        writer.bytes(&reply.parameters)?;
    }
    writer.finish()
}

impl Transport for Simulator {
    fn submit(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, Error> {
        self.last_request = Some(request.to_vec());
        if self.transport_failure {
            return Err(Error::Transport("simulated transport failure".to_owned()));
        }

        let result = self.execute(request);
        let reply = encode_reply(result)?;
        if reply.len() > response.len() {
            return Err(Error::Transport(format!(
                "reply of {} bytes does not fit a {}-byte buffer",
                reply.len(),
                response.len()
            )));
        }

        response[..reply.len()].copy_from_slice(&reply);
        Ok(reply.len())
    }
}
