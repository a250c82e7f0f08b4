//! NV index commands executed over a [`Transport`].
//!
//! Each function builds its request, submits it with a reply buffer sized
//! for the largest reply of the command and decodes the reply. A non-success
//! response code is returned as [`Error::Tpm`], a transport that produced no
//! reply as [`Error::Transport`]. Nothing is retried.

use core::fmt;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    attributes::{from_wire_attributes, to_wire_attributes, AccessRights, ToolAttributes},
    command::{
        decode_get_nv_handles, decode_read, decode_read_public, decode_session_response,
        encode_define_space, encode_get_nv_handles, encode_read, encode_read_lock,
        encode_read_public, encode_undefine_space, encode_write, encode_write_lock,
    },
    error::Error,
    handle::NvIndex,
    header::read_response_header,
    layout::{
        GET_CAPABILITY_HANDLES_RESPONSE, NV_READ_PUBLIC_RESPONSE, NV_READ_RESPONSE,
        SESSION_RESPONSE,
    },
    protocol::CommandCode,
    public::NvPublic,
    transport::Transport,
};

/// Tool-level description of an NV index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvSpaceInfo {
    pub index: NvIndex,
    pub data_size: u16,
    pub attributes: ToolAttributes,
    pub owner: AccessRights,
    pub auth: AccessRights,
}

impl NvSpaceInfo {
    #[must_use]
    pub fn from_public(public: &NvPublic) -> Self {
        let (attributes, owner, auth) = from_wire_attributes(public.attributes);
        NvSpaceInfo {
            index: public.index,
            data_size: public.data_size,
            attributes,
            owner,
            auth,
        }
    }

    /// Whether the index was written since it was defined.
    #[must_use]
    pub fn written(&self) -> bool {
        self.attributes.contains(ToolAttributes::WRITTEN)
    }
}

impl fmt::Display for NvSpaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}, {} bytes, owner rights: {}, auth rights: {}, attributes: {}",
            self.index,
            self.data_size,
            self.owner,
            self.auth,
            self.attributes.to_tokens()
        )
    }
}

/// Submit `request` and return the reply, cut to the bytes received.
fn execute<T: Transport + ?Sized>(
    tpm: &mut T,
    command_code: CommandCode,
    request: &[u8],
    response_size: usize,
) -> Result<Vec<u8>, Error> {
    debug!(
        "Sending {command_code:?} ({} bytes, reply up to {response_size} bytes)",
        request.len()
    );
    trace!("request: {}", hex::encode(request));

    let mut response = vec![0u8; response_size];
    let received = tpm.submit(request, &mut response)?;
    if received > response_size {
        return Err(Error::Transport(format!(
            "transport reported {received} bytes for a {response_size}-byte buffer"
        )));
    }
    response.truncate(received);
    trace!("response: {}", hex::encode(&response));

    if let Ok(header) = read_response_header(&response) {
        debug!("{command_code:?} returned {}", header.code);
    }

    Ok(response)
}

/// Define an index of `data_size` bytes.
///
/// `password` becomes the index authorization value, used when it is
/// accessed through its auth rights. Status attributes are ignored.
pub fn define_space<T: Transport + ?Sized>(
    tpm: &mut T,
    index: NvIndex,
    data_size: u16,
    attributes: ToolAttributes,
    owner: AccessRights,
    auth: AccessRights,
    password: &[u8],
) -> Result<(), Error> {
    if attributes.intersects(ToolAttributes::STATUS) {
        warn!(
            "status attributes {} cannot be set, ignoring them",
            (attributes & ToolAttributes::STATUS).to_tokens()
        );
    }

    let bits = to_wire_attributes(attributes, owner, auth);
    debug!("Defining {index}: {data_size} bytes, TPMA_NV 0x{:08x}", bits.bits());

    let request = encode_define_space(index, bits, data_size, password)?;
    let response = execute(
        tpm,
        CommandCode::NvDefineSpace,
        &request,
        SESSION_RESPONSE.size(0),
    )?;
    decode_session_response(&response)
}

pub fn undefine_space<T: Transport + ?Sized>(tpm: &mut T, index: NvIndex) -> Result<(), Error> {
    let request = encode_undefine_space(index)?;
    let response = execute(
        tpm,
        CommandCode::NvUndefineSpace,
        &request,
        SESSION_RESPONSE.size(0),
    )?;
    decode_session_response(&response)
}

/// Read `size` bytes at `offset`.
///
/// An empty password reads as owner, any other as the index itself.
pub fn read<T: Transport + ?Sized>(
    tpm: &mut T,
    index: NvIndex,
    password: &[u8],
    offset: u16,
    size: u16,
) -> Result<Vec<u8>, Error> {
    let request = encode_read(index, password, offset, size)?;
    let response = execute(
        tpm,
        CommandCode::NvRead,
        &request,
        NV_READ_RESPONSE.size(usize::from(size)),
    )?;
    decode_read(&response, size)
}

/// Write `data` at `offset`.
pub fn write<T: Transport + ?Sized>(
    tpm: &mut T,
    index: NvIndex,
    password: &[u8],
    offset: u16,
    data: &[u8],
) -> Result<(), Error> {
    let request = encode_write(index, password, offset, data)?;
    let response = execute(
        tpm,
        CommandCode::NvWrite,
        &request,
        SESSION_RESPONSE.size(0),
    )?;
    decode_session_response(&response)
}

/// Block reads until the next TPM restart.
pub fn read_lock<T: Transport + ?Sized>(
    tpm: &mut T,
    index: NvIndex,
    password: &[u8],
) -> Result<(), Error> {
    let request = encode_read_lock(index, password)?;
    let response = execute(
        tpm,
        CommandCode::NvReadLock,
        &request,
        SESSION_RESPONSE.size(0),
    )?;
    decode_session_response(&response)
}

/// Block writes, until the next restart or for good on write-once indices.
pub fn write_lock<T: Transport + ?Sized>(
    tpm: &mut T,
    index: NvIndex,
    password: &[u8],
) -> Result<(), Error> {
    let request = encode_write_lock(index, password)?;
    let response = execute(
        tpm,
        CommandCode::NvWriteLock,
        &request,
        SESSION_RESPONSE.size(0),
    )?;
    decode_session_response(&response)
}

/// Public area of an index as returned by the TPM.
pub fn read_public_area<T: Transport + ?Sized>(
    tpm: &mut T,
    index: NvIndex,
) -> Result<NvPublic, Error> {
    let request = encode_read_public(index)?;
    let response = execute(
        tpm,
        CommandCode::NvReadPublic,
        &request,
        NV_READ_PUBLIC_RESPONSE.size(0),
    )?;
    decode_read_public(&response)
}

pub fn read_public<T: Transport + ?Sized>(
    tpm: &mut T,
    index: NvIndex,
) -> Result<NvSpaceInfo, Error> {
    Ok(NvSpaceInfo::from_public(&read_public_area(tpm, index)?))
}

/// Result of an NV handle query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    /// Every handle of the reply, whatever the requested capacity.
    pub total: usize,
    /// The first `min(capacity, total)` handles.
    pub handles: Vec<NvIndex>,
}

/// List the defined NV indices.
///
/// At most `capacity` handles are returned but `total` is always the count
/// reported by the TPM: query once with a capacity of 0, then again with
/// `total`. A single reply is read; indices past the first
/// `MAX_CAP_HANDLES` are not listed.
pub fn enumerate<T: Transport + ?Sized>(
    tpm: &mut T,
    capacity: usize,
) -> Result<Enumeration, Error> {
    let request = encode_get_nv_handles()?;
    let response = execute(
        tpm,
        CommandCode::GetCapability,
        &request,
        GET_CAPABILITY_HANDLES_RESPONSE.size(0),
    )?;
    let mut reply = decode_get_nv_handles(&response)?;

    if reply.more_data {
        warn!(
            "the TPM holds more NV indices than the {} listed",
            reply.handles.len()
        );
    }

    let total = reply.handles.len();
    reply.handles.truncate(capacity);
    debug!("{total} NV indices defined, {} returned", reply.handles.len());

    Ok(Enumeration {
        total,
        handles: reply.handles,
    })
}

/// Every defined NV index, discovering the count first.
pub fn enumerate_all<T: Transport + ?Sized>(tpm: &mut T) -> Result<Vec<NvIndex>, Error> {
    let total = enumerate(tpm, 0)?.total;
    Ok(enumerate(tpm, total)?.handles)
}

/// Public description of every defined NV index.
pub fn query_all<T: Transport + ?Sized>(tpm: &mut T) -> Result<Vec<NvSpaceInfo>, Error> {
    enumerate_all(tpm)?
        .into_iter()
        .map(|index| read_public(tpm, index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::auth_handle,
        header::{command_size, COMMAND_HEADER_SIZE},
        layout::{NV_PUBLIC_SIZE, SIZE_FIELD},
        protocol::{NvAttributes, ResponseCode, TPM_RH_OWNER, TPM_ST_NO_SESSIONS},
        session::{read_password_session, PASSWORD_SESSION_PREFIX_SIZE},
        simulator::Simulator,
        wire::{Reader, Writer},
    };
    use test_log::test;

    fn index(n: u32) -> NvIndex {
        NvIndex::from_index(n).unwrap()
    }

    fn tpm_code(result: Result<impl fmt::Debug, Error>) -> ResponseCode {
        match result {
            Err(Error::Tpm(code)) => code,
            other => panic!("expected a TPM error, got {other:?}"),
        }
    }

    #[test]
    fn test_define_space_read_lockable_owner_rw() {
        let mut tpm = Simulator::new();
        define_space(
            &mut tpm,
            index(1),
            64,
            ToolAttributes::READ_LOCKABLE,
            AccessRights::ReadWrite,
            AccessRights::None,
            &[],
        )
        .unwrap();

        let request = tpm.last_request().unwrap().to_vec();
        assert_eq!(command_size(&request).unwrap() as usize, request.len());
        assert_eq!(
            request.len(),
            COMMAND_HEADER_SIZE + 4 + PASSWORD_SESSION_PREFIX_SIZE + SIZE_FIELD + NV_PUBLIC_SIZE
        );
        let attributes = Reader::at(&request, request.len() - 8).u32().unwrap();
        assert_eq!(
            NvAttributes::from_bits_retain(attributes),
            NvAttributes::OWNERREAD | NvAttributes::OWNERWRITE | NvAttributes::READ_STCLEAR
        );

        let info = read_public(&mut tpm, index(1)).unwrap();
        assert_eq!(info.index.value(), 0x0100_0001);
        assert_eq!(info.owner, AccessRights::ReadWrite);
        assert_eq!(info.auth, AccessRights::None);
        assert_eq!(info.attributes, ToolAttributes::READ_LOCKABLE);
        assert_eq!(
            info.to_string(),
            "0x01000001, 64 bytes, owner rights: RW, auth rights: NA, attributes: RL"
        );
    }

    #[test]
    fn test_write_with_password() {
        let mut tpm = Simulator::new();
        define_space(
            &mut tpm,
            index(2),
            32,
            ToolAttributes::empty(),
            AccessRights::Read,
            AccessRights::ReadWrite,
            b"secret",
        )
        .unwrap();

        let data = [0xAA; 8];
        write(&mut tpm, index(2), b"secret", 16, &data).unwrap();

        let request = tpm.last_request().unwrap().to_vec();
        let mut reader = Reader::at(&request, COMMAND_HEADER_SIZE);
        assert_eq!(reader.u32().unwrap(), index(2).value());
        assert_eq!(auth_handle(index(2), b"secret"), index(2).value());
        reader.u32().unwrap();
        let (_, password) = read_password_session(&mut reader).unwrap();
        assert_eq!(password, b"secret");

        assert_eq!(
            &tpm.data(index(2)).unwrap()[16..24],
            &data
        );
        assert_eq!(read(&mut tpm, index(2), &[], 16, 8).unwrap(), data);
        assert_eq!(read(&mut tpm, index(2), b"secret", 20, 4).unwrap(), [0xAA; 4]);
    }

    #[test]
    fn test_read_public_never_written() {
        let mut tpm = Simulator::new();
        define_space(
            &mut tpm,
            index(3),
            128,
            ToolAttributes::WRITE_LOCKABLE | ToolAttributes::NON_PROTECTED,
            AccessRights::ReadWrite,
            AccessRights::None,
            &[],
        )
        .unwrap();

        let info = read_public(&mut tpm, index(3)).unwrap();
        assert!(!info.written());
        assert_eq!(info.data_size, 128);

        write(&mut tpm, index(3), &[], 0, b"hello").unwrap();
        let info = read_public(&mut tpm, index(3)).unwrap();
        assert!(info.written());
        assert_eq!(info.attributes.to_tokens(), "WL+NP+WR");
    }

    #[test]
    fn test_transport_failure_on_every_command() {
        let mut tpm = Simulator::new();
        tpm.set_transport_failure(true);
        let nv = index(4);

        let results: Vec<Result<(), Error>> = vec![
            define_space(
                &mut tpm,
                nv,
                8,
                ToolAttributes::empty(),
                AccessRights::ReadWrite,
                AccessRights::None,
                &[],
            ),
            undefine_space(&mut tpm, nv),
            read(&mut tpm, nv, &[], 0, 8).map(|_| ()),
            write(&mut tpm, nv, &[], 0, &[1]),
            read_lock(&mut tpm, nv, &[]),
            write_lock(&mut tpm, nv, b"pw"),
            read_public(&mut tpm, nv).map(|_| ()),
            enumerate(&mut tpm, 0).map(|_| ()),
        ];

        for result in results {
            let error = result.unwrap_err();
            assert!(matches!(error, Error::Transport(_)));
            assert_eq!(error.result_code(), ResponseCode::FAILURE.value());
        }
    }

    #[test]
    fn test_discover_then_fetch() {
        let mut tpm = Simulator::new();
        for n in [0x10, 0x11, 0x12] {
            define_space(
                &mut tpm,
                index(n),
                4,
                ToolAttributes::empty(),
                AccessRights::ReadWrite,
                AccessRights::None,
                &[],
            )
            .unwrap();
        }

        let discovered = enumerate(&mut tpm, 0).unwrap();
        assert_eq!(discovered.total, 3);
        assert!(discovered.handles.is_empty());

        let fetched = enumerate(&mut tpm, discovered.total).unwrap();
        assert_eq!(fetched.total, 3);
        assert_eq!(fetched.handles, vec![index(0x10), index(0x11), index(0x12)]);
        assert!(fetched
            .handles
            .iter()
            .all(|handle| handle.value() >> 24 == 0x01));

        let partial = enumerate(&mut tpm, 2).unwrap();
        assert_eq!(partial.total, 3);
        assert_eq!(partial.handles.len(), 2);

        assert_eq!(enumerate_all(&mut tpm).unwrap().len(), 3);
    }

    #[test]
    fn test_enumerate_single_reply() {
        let mut tpm = Simulator::new();
        for n in 0..5 {
            define_space(
                &mut tpm,
                index(n),
                1,
                ToolAttributes::empty(),
                AccessRights::ReadWrite,
                AccessRights::None,
                &[],
            )
            .unwrap();
        }
        tpm.set_handles_per_reply(3);

        let enumeration = enumerate(&mut tpm, 10).unwrap();
        assert_eq!(enumeration.total, 3);
        assert_eq!(enumeration.handles.len(), 3);
    }

    #[test]
    fn test_query_all() {
        let mut tpm = Simulator::new();
        assert!(query_all(&mut tpm).unwrap().is_empty());

        define_space(
            &mut tpm,
            index(0x20),
            16,
            ToolAttributes::PERMANENT,
            AccessRights::ReadWrite,
            AccessRights::None,
            &[],
        )
        .unwrap();
        define_space(
            &mut tpm,
            index(0x21),
            32,
            ToolAttributes::WRITE_ALL,
            AccessRights::None,
            AccessRights::ReadWrite,
            b"pw",
        )
        .unwrap();

        let spaces = query_all(&mut tpm).unwrap();
        assert_eq!(spaces.len(), 2);
        assert_eq!(spaces[0].attributes, ToolAttributes::PERMANENT);
        assert_eq!(spaces[1].data_size, 32);
        assert_eq!(spaces[1].auth, AccessRights::ReadWrite);
        assert_eq!(spaces[1].owner, AccessRights::None);
    }

    #[test]
    fn test_protocol_errors_are_carried_verbatim() {
        let mut tpm = Simulator::new();
        let nv = index(5);
        assert_eq!(
            tpm_code(read_public(&mut tpm, nv)),
            ResponseCode::handle(1)
        );
        assert_eq!(tpm_code(undefine_space(&mut tpm, nv)), ResponseCode::handle(2));

        define_space(
            &mut tpm,
            nv,
            8,
            ToolAttributes::READ_LOCKABLE,
            AccessRights::ReadWrite,
            AccessRights::None,
            b"pw",
        )
        .unwrap();
        assert_eq!(
            tpm_code(define_space(
                &mut tpm,
                nv,
                8,
                ToolAttributes::empty(),
                AccessRights::ReadWrite,
                AccessRights::None,
                &[],
            )),
            ResponseCode::NV_DEFINED
        );

        assert_eq!(
            tpm_code(read(&mut tpm, nv, &[], 0, 8)),
            ResponseCode::NV_UNINITIALIZED
        );
        assert_eq!(
            tpm_code(write(&mut tpm, nv, &[], 4, &[0; 8])),
            ResponseCode::NV_RANGE
        );
        // No auth rights granted to the index
        assert_eq!(
            tpm_code(write(&mut tpm, nv, b"pw", 0, &[0; 8])),
            ResponseCode::NV_AUTHORIZATION
        );

        write(&mut tpm, nv, &[], 0, &[7; 8]).unwrap();
        read_lock(&mut tpm, nv, &[]).unwrap();
        let error = read(&mut tpm, nv, &[], 0, 8).unwrap_err();
        assert_eq!(error.result_code(), ResponseCode::NV_LOCKED.value());
        assert_eq!(
            tpm_code(write_lock(&mut tpm, nv, &[])),
            ResponseCode::ATTRIBUTES
        );

        tpm.restart();
        assert_eq!(read(&mut tpm, nv, &[], 0, 8).unwrap(), vec![7; 8]);
    }

    #[test]
    fn test_wrong_password() {
        let mut tpm = Simulator::new();
        let nv = index(6);
        define_space(
            &mut tpm,
            nv,
            8,
            ToolAttributes::empty(),
            AccessRights::None,
            AccessRights::ReadWrite,
            b"right",
        )
        .unwrap();

        assert_eq!(
            tpm_code(write(&mut tpm, nv, b"wrong", 0, &[1])),
            ResponseCode::AUTH_FAIL_S1
        );
        // The owner has no rights on this index
        assert_eq!(
            tpm_code(write(&mut tpm, nv, &[], 0, &[1])),
            ResponseCode::NV_AUTHORIZATION
        );
        write(&mut tpm, nv, b"right", 0, &[1]).unwrap();
    }

    #[test]
    fn test_write_once_and_write_lock() {
        let mut tpm = Simulator::new();
        let once = index(7);
        let lockable = index(8);
        for (nv, attributes) in [
            (once, ToolAttributes::WRITE_ONCE),
            (lockable, ToolAttributes::WRITE_LOCKABLE),
        ] {
            define_space(
                &mut tpm,
                nv,
                4,
                attributes,
                AccessRights::ReadWrite,
                AccessRights::None,
                &[],
            )
            .unwrap();
        }

        write(&mut tpm, once, &[], 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            tpm_code(write(&mut tpm, once, &[], 0, &[5])),
            ResponseCode::NV_LOCKED
        );

        write_lock(&mut tpm, lockable, &[]).unwrap();
        let info = read_public(&mut tpm, lockable).unwrap();
        assert!(info.attributes.contains(ToolAttributes::WRITE_LOCKED));
        assert_eq!(
            tpm_code(write(&mut tpm, lockable, &[], 0, &[5])),
            ResponseCode::NV_LOCKED
        );

        tpm.restart();
        write(&mut tpm, lockable, &[], 0, &[5]).unwrap();
        assert_eq!(
            tpm_code(write(&mut tpm, once, &[], 0, &[5])),
            ResponseCode::NV_LOCKED
        );
    }

    #[test]
    fn test_write_all_and_permanent() {
        let mut tpm = Simulator::new();
        let nv = index(9);
        define_space(
            &mut tpm,
            nv,
            4,
            ToolAttributes::WRITE_ALL | ToolAttributes::PERMANENT,
            AccessRights::ReadWrite,
            AccessRights::None,
            &[],
        )
        .unwrap();

        assert_eq!(
            tpm_code(write(&mut tpm, nv, &[], 0, &[1, 2])),
            ResponseCode::NV_RANGE
        );
        write(&mut tpm, nv, &[], 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            tpm_code(undefine_space(&mut tpm, nv)),
            ResponseCode::ATTRIBUTES
        );
    }

    #[test]
    fn test_status_attributes_are_not_requested() {
        let mut tpm = Simulator::new();
        define_space(
            &mut tpm,
            index(10),
            4,
            ToolAttributes::WRITTEN | ToolAttributes::READ_LOCKED,
            AccessRights::ReadWrite,
            AccessRights::None,
            &[],
        )
        .unwrap();

        let info = read_public(&mut tpm, index(10)).unwrap();
        assert!(info.attributes.is_empty());
    }

    #[test]
    fn test_undefine_authorizes_as_owner() {
        let mut tpm = Simulator::new();
        define_space(
            &mut tpm,
            index(11),
            4,
            ToolAttributes::empty(),
            AccessRights::ReadWrite,
            AccessRights::ReadWrite,
            b"pw",
        )
        .unwrap();
        undefine_space(&mut tpm, index(11)).unwrap();

        let request = tpm.last_request().unwrap();
        assert_eq!(
            Reader::at(request, COMMAND_HEADER_SIZE).u32().unwrap(),
            TPM_RH_OWNER
        );
        assert_eq!(tpm.indices().count(), 0);
    }

    /// Transport replaying one canned reply, cut to the caller's buffer
    /// the way the device driver does.
    struct Replay(Vec<u8>);

    impl Transport for Replay {
        fn submit(&mut self, _request: &[u8], response: &mut [u8]) -> Result<usize, Error> {
            let len = self.0.len().min(response.len());
            response[..len].copy_from_slice(&self.0[..len]);
            Ok(len)
        }
    }

    #[test]
    fn test_read_public_with_auth_policy() {
        let mut public = NvPublic::new(
            index(0x20),
            NvAttributes::AUTHREAD | NvAttributes::POLICYWRITE,
            16,
        );
        public.auth_policy = vec![0xa5; 32];
        let name = public.name().unwrap();

        let size = 10 + public.encoded_len() + name.len();
        let mut writer = Writer::with_size(size);
        writer.u16(TPM_ST_NO_SESSIONS).unwrap();
        writer.u32(size as u32).unwrap();
        writer.u32(0).unwrap();
        public.write(&mut writer).unwrap();
        writer.bytes(&name).unwrap();
        let reply = writer.finish().unwrap();
        assert_eq!(reply.len(), 94);

        let mut tpm = Replay(reply);
        assert_eq!(read_public_area(&mut tpm, index(0x20)).unwrap(), public);
        let info = read_public(&mut tpm, index(0x20)).unwrap();
        assert_eq!(info.data_size, 16);
        assert_eq!(info.auth, AccessRights::Read);
    }
}
