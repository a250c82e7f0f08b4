//! Marshalling of the TPM 2.0 NV index commands.
//!
//! Requests are sized by [`layout`] before being allocated, filled field by
//! field in big-endian order by [`command`], sent over a [`Transport`] and
//! their replies decoded against the bytes actually received. [`nv`] ties
//! these steps together for each command.

pub mod attributes;
pub mod command;
pub mod error;
pub mod handle;
pub mod header;
pub mod layout;
pub mod nv;
pub mod protocol;
pub mod public;
pub mod session;
pub mod simulator;
pub mod transport;
pub mod wire;

pub use attributes::{AccessRights, ToolAttributes};
pub use error::Error;
pub use handle::NvIndex;
pub use nv::{
    define_space, enumerate, enumerate_all, query_all, read, read_lock, read_public,
    read_public_area, undefine_space, write, write_lock, Enumeration, NvSpaceInfo,
};
pub use protocol::{NvAttributes, ResponseCode};
pub use public::NvPublic;
pub use simulator::Simulator;
pub use transport::{is_tpm, DeviceTransport, Transport, DEFAULT_TPM_DEVICE_PATH};
