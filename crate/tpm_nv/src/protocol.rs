//! TPM 2.0 constants and types used by the NV commands.
//!
//! Names follow "Trusted Platform Module Library Part 2: Structures" so the
//! values can be looked up there.

use bitflags::bitflags;
use core::fmt;
use serde::{Deserialize, Serialize};

/// `TPM_ST_NO_SESSIONS`
pub const TPM_ST_NO_SESSIONS: u16 = 0x8001;
/// `TPM_ST_SESSIONS`
pub const TPM_ST_SESSIONS: u16 = 0x8002;

pub const HR_SHIFT: u32 = 24;
pub const HR_HANDLE_MASK: u32 = 0x00ff_ffff;

pub const TPM_HT_NV_INDEX: u8 = 0x01;
pub const TPM_HT_PERMANENT: u8 = 0x40;

/// First handle of the NV index range, used as the capability property.
pub const HR_NV_INDEX: u32 = (TPM_HT_NV_INDEX as u32) << HR_SHIFT;

pub const TPM_RH_OWNER: u32 = (TPM_HT_PERMANENT as u32) << HR_SHIFT | 0x01;
// `TPM_RS_PW` (not `TPM_RH_PW`), the password session pseudo-handle
pub const TPM_RS_PW: u32 = (TPM_HT_PERMANENT as u32) << HR_SHIFT | 0x09;

pub const TPM_ALG_SHA256: u16 = 0x000B;
pub const SHA256_DIGEST_SIZE: usize = 32;
/// Largest digest of any bank (SHA-512).
pub const MAX_DIGEST_SIZE: usize = 64;

pub const TPM_CAP_HANDLES: u32 = 0x0000_0001;

pub const MAX_CAP_BUFFER: usize = 1024;
pub const MAX_CAP_DATA: usize = MAX_CAP_BUFFER - 4 - 4;
pub const MAX_CAP_HANDLES: usize = MAX_CAP_DATA / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandCode {
    NvUndefineSpace = 0x0000_0122,
    NvDefineSpace = 0x0000_012A,
    NvWrite = 0x0000_0137,
    NvWriteLock = 0x0000_0138,
    NvRead = 0x0000_014E,
    NvReadLock = 0x0000_014F,
    NvReadPublic = 0x0000_0169,
    GetCapability = 0x0000_017A,
}

impl From<CommandCode> for u32 {
    fn from(code: CommandCode) -> Self {
        code as u32
    }
}

impl TryFrom<u32> for CommandCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0000_0122 => CommandCode::NvUndefineSpace,
            0x0000_012A => CommandCode::NvDefineSpace,
            0x0000_0137 => CommandCode::NvWrite,
            0x0000_0138 => CommandCode::NvWriteLock,
            0x0000_014E => CommandCode::NvRead,
            0x0000_014F => CommandCode::NvReadLock,
            0x0000_0169 => CommandCode::NvReadPublic,
            0x0000_017A => CommandCode::GetCapability,
            _ => return Err(value),
        })
    }
}

/// Response code carried in every reply header.
///
/// Only [`ResponseCode::SUCCESS`] means the command completed; any other
/// value is handed back to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseCode(pub u32);

impl ResponseCode {
    pub const SUCCESS: ResponseCode = ResponseCode(0x000);
    pub const BAD_TAG: ResponseCode = ResponseCode(0x01E);
    pub const FAILURE: ResponseCode = ResponseCode(0x101);
    pub const COMMAND_SIZE: ResponseCode = ResponseCode(0x142);
    pub const COMMAND_CODE: ResponseCode = ResponseCode(0x143);
    pub const AUTHSIZE: ResponseCode = ResponseCode(0x144);
    pub const NV_RANGE: ResponseCode = ResponseCode(0x146);
    pub const NV_LOCKED: ResponseCode = ResponseCode(0x148);
    pub const NV_AUTHORIZATION: ResponseCode = ResponseCode(0x149);
    pub const NV_UNINITIALIZED: ResponseCode = ResponseCode(0x14A);
    pub const NV_DEFINED: ResponseCode = ResponseCode(0x14C);
    pub const ATTRIBUTES: ResponseCode = ResponseCode(0x082);
    pub const VALUE: ResponseCode = ResponseCode(0x084);
    pub const SIZE: ResponseCode = ResponseCode(0x095);
    pub const INSUFFICIENT: ResponseCode = ResponseCode(0x09A);
    pub const HANDLE_1: ResponseCode = ResponseCode::handle(1);
    /// `TPM_RC_AUTH_FAIL` reported against the first session.
    pub const AUTH_FAIL_S1: ResponseCode = ResponseCode(0x08E | 0x800 | 0x100);

    /// `TPM_RC_HANDLE` reported against handle number `n` of the command.
    #[must_use]
    pub const fn handle(n: u32) -> ResponseCode {
        ResponseCode(0x08B | (n << 8))
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "TPM_RC_SUCCESS",
            Self::BAD_TAG => "TPM_RC_BAD_TAG",
            Self::FAILURE => "TPM_RC_FAILURE",
            Self::COMMAND_SIZE => "TPM_RC_COMMAND_SIZE",
            Self::COMMAND_CODE => "TPM_RC_COMMAND_CODE",
            Self::AUTHSIZE => "TPM_RC_AUTHSIZE",
            Self::NV_RANGE => "TPM_RC_NV_RANGE",
            Self::NV_LOCKED => "TPM_RC_NV_LOCKED",
            Self::NV_AUTHORIZATION => "TPM_RC_NV_AUTHORIZATION",
            Self::NV_UNINITIALIZED => "TPM_RC_NV_UNINITIALIZED",
            Self::NV_DEFINED => "TPM_RC_NV_DEFINED",
            Self::ATTRIBUTES => "TPM_RC_ATTRIBUTES",
            Self::VALUE => "TPM_RC_VALUE",
            Self::SIZE => "TPM_RC_SIZE",
            Self::INSUFFICIENT => "TPM_RC_INSUFFICIENT",
            Self::AUTH_FAIL_S1 => "TPM_RC_AUTH_FAIL",
            _ if self.0 & 0xff == 0x8B => "TPM_RC_HANDLE",
            _ => return None,
        })
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:03x})", self.0),
            None => write!(f, "0x{:03x}", self.0),
        }
    }
}

impl From<u32> for ResponseCode {
    fn from(value: u32) -> Self {
        ResponseCode(value)
    }
}

bitflags! {
    /// `TPMA_NV`, the 32-bit attribute mask of an NV index.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct NvAttributes: u32 {
        const PPWRITE = 0x0000_0001;
        const OWNERWRITE = 0x0000_0002;
        const AUTHWRITE = 0x0000_0004;
        const POLICYWRITE = 0x0000_0008;
        const COUNTER = 0x0000_0010;
        const BITS = 0x0000_0020;
        const EXTEND = 0x0000_0040;
        const POLICY_DELETE = 0x0000_0400;
        const WRITELOCKED = 0x0000_0800;
        const WRITEALL = 0x0000_1000;
        const WRITEDEFINE = 0x0000_2000;
        const WRITE_STCLEAR = 0x0000_4000;
        const GLOBALLOCK = 0x0000_8000;
        const PPREAD = 0x0001_0000;
        const OWNERREAD = 0x0002_0000;
        const AUTHREAD = 0x0004_0000;
        const POLICYREAD = 0x0008_0000;
        const NO_DA = 0x0200_0000;
        const ORDERLY = 0x0400_0000;
        const CLEAR_STCLEAR = 0x0800_0000;
        const READLOCKED = 0x1000_0000;
        const WRITTEN = 0x2000_0000;
        const PLATFORMCREATE = 0x4000_0000;
        const READ_STCLEAR = 0x8000_0000;

        // Reserved and type bits are kept when decoding a reply.
        const _ = !0;
    }
}

bitflags! {
    /// `TPMA_SESSION`. Password sessions are always sent with no attribute set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionAttributes: u8 {
        const CONTINUE_SESSION = 0x01;
        const AUDIT_EXCLUSIVE = 0x02;
        const AUDIT_RESET = 0x04;
        const DECRYPT = 0x20;
        const ENCRYPT = 0x40;
        const AUDIT = 0x80;
    }
}
