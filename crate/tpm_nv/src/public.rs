//! `TPM2B_NV_PUBLIC` and the name derived from it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::Error,
    handle::NvIndex,
    layout::{NV_NAME_SIZE, NV_PUBLIC_BODY_SIZE, SIZE_FIELD},
    protocol::{NvAttributes, SHA256_DIGEST_SIZE, TPM_ALG_SHA256},
    wire::{Reader, Writer},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvPublic {
    pub index: NvIndex,
    pub name_alg: u16,
    pub attributes: NvAttributes,
    /// Always empty for indices defined by this crate.
    #[serde(with = "hex::serde")]
    pub auth_policy: Vec<u8>,
    pub data_size: u16,
}

impl NvPublic {
    /// Public area of a new index: SHA-256 names, no policy.
    #[must_use]
    pub fn new(index: NvIndex, attributes: NvAttributes, data_size: u16) -> Self {
        NvPublic {
            index,
            name_alg: TPM_ALG_SHA256,
            attributes,
            auth_policy: Vec::new(),
            data_size,
        }
    }

    /// Length of the `TPMS_NV_PUBLIC` body, without the size prefix.
    #[must_use]
    pub fn body_len(&self) -> usize {
        NV_PUBLIC_BODY_SIZE + self.auth_policy.len()
    }

    /// Length on the wire, size prefix included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        SIZE_FIELD + self.body_len()
    }

    /// Append the `TPM2B_NV_PUBLIC`.
    pub fn write(&self, writer: &mut Writer) -> Result<(), Error> {
        let body_len = u16::try_from(self.body_len()).map_err(|_| {
            Error::InvalidInput(format!(
                "auth policy of {} bytes is too large",
                self.auth_policy.len()
            ))
        })?;

        writer.u16(body_len)?;
        self.write_body(writer)
    }

    fn write_body(&self, writer: &mut Writer) -> Result<(), Error> {
        writer.u32(self.index.value())?;
        writer.u16(self.name_alg)?;
        writer.u32(self.attributes.bits())?;
        writer.u16(self.auth_policy.len() as u16)?;
        writer.bytes(&self.auth_policy)?;
        writer.u16(self.data_size)?;
        Ok(())
    }

    /// Read a `TPM2B_NV_PUBLIC`; the size prefix must match the body.
    pub fn read(reader: &mut Reader) -> Result<Self, Error> {
        let size = usize::from(reader.u16()?);
        let start = reader.offset();

        let index = NvIndex::new(reader.u32()?)?;
        let name_alg = reader.u16()?;
        let attributes = NvAttributes::from_bits_retain(reader.u32()?);
        let policy_size = usize::from(reader.u16()?);
        let auth_policy = reader.bytes(policy_size)?.to_vec();
        let data_size = reader.u16()?;

        let read = reader.offset() - start;
        if read != size {
            return Err(Error::UnexpectedResponse(format!(
                "NV public area declares {size} bytes, {read} decoded"
            )));
        }

        Ok(NvPublic {
            index,
            name_alg,
            attributes,
            auth_policy,
            data_size,
        })
    }

    /// Marshalled `TPMS_NV_PUBLIC`, the input of the name digest.
    pub fn marshal_body(&self) -> Result<Vec<u8>, Error> {
        let mut writer = Writer::with_size(self.body_len());
        self.write_body(&mut writer)?;
        writer.finish()
    }

    /// `TPM2B_NAME` of the index: the name algorithm followed by the digest
    /// of the public area.
    pub fn name(&self) -> Result<Vec<u8>, Error> {
        if self.name_alg != TPM_ALG_SHA256 {
            return Err(Error::InvalidInput(format!(
                "unsupported name algorithm 0x{:04x}",
                self.name_alg
            )));
        }

        let digest = Sha256::digest(self.marshal_body()?);
        let mut writer = Writer::with_size(NV_NAME_SIZE);
        writer.u16((2 + SHA256_DIGEST_SIZE) as u16)?;
        writer.u16(self.name_alg)?;
        writer.bytes(&digest)?;
        writer.finish()
    }
}
