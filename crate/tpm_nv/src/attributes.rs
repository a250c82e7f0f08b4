//! Tool-level NV attributes and their `TPMA_NV` projection.
//!
//! The tool exposes eight attributes settable at creation, four status
//! attributes that can only be observed, and read/write rights for the owner
//! and for the index's own authorization value. Each one maps to exactly one
//! `TPMA_NV` bit through the tables below, used in both directions.

use bitflags::bitflags;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{error::Error, protocol::NvAttributes};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ToolAttributes: u16 {
        const READ_LOCKABLE = 1 << 0;
        const WRITE_LOCKABLE = 1 << 1;
        const WRITE_ONCE = 1 << 2;
        const WRITE_ALL = 1 << 3;
        const NON_PROTECTED = 1 << 4;
        const CACHED = 1 << 5;
        const VOLATILE_DIRTY = 1 << 6;
        const PERMANENT = 1 << 7;

        const READ_LOCKED = 1 << 8;
        const WRITE_LOCKED = 1 << 9;
        const WRITTEN = 1 << 10;
        const PLATFORM_OWNED = 1 << 11;
    }
}

impl ToolAttributes {
    /// Attributes that can be requested when defining a space.
    pub const SETTABLE: ToolAttributes = ToolAttributes::from_bits_truncate(0x00ff);
    /// Attributes reported by the TPM, never settable.
    pub const STATUS: ToolAttributes = ToolAttributes::from_bits_truncate(0x0f00);

    /// Tokens joined with `+`, e.g. `RL+WL+WR`.
    #[must_use]
    pub fn to_tokens(self) -> String {
        ATTRIBUTE_MAP
            .iter()
            .filter(|entry| self.contains(entry.tool))
            .map(|entry| entry.token)
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Parse `+`-separated tokens. An empty string or `none` is the empty set.
    pub fn from_tokens(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(ToolAttributes::empty());
        }

        s.split('+')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .try_fold(ToolAttributes::empty(), |acc, token| {
                ATTRIBUTE_MAP
                    .iter()
                    .find(|entry| entry.token.eq_ignore_ascii_case(token))
                    .map(|entry| acc | entry.tool)
                    .ok_or_else(|| Error::InvalidFormat(format!("unknown attribute '{token}'")))
            })
    }
}

/// Access granted to one principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AccessRights {
    None = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl AccessRights {
    pub const ALL: [AccessRights; 4] = [
        AccessRights::None,
        AccessRights::Read,
        AccessRights::Write,
        AccessRights::ReadWrite,
    ];

    #[must_use]
    pub const fn new(read: bool, write: bool) -> Self {
        match (read, write) {
            (false, false) => AccessRights::None,
            (true, false) => AccessRights::Read,
            (false, true) => AccessRights::Write,
            (true, true) => AccessRights::ReadWrite,
        }
    }

    #[must_use]
    pub const fn can_read(self) -> bool {
        matches!(self, AccessRights::Read | AccessRights::ReadWrite)
    }

    #[must_use]
    pub const fn can_write(self) -> bool {
        matches!(self, AccessRights::Write | AccessRights::ReadWrite)
    }
}

impl fmt::Display for AccessRights {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let token = match self {
            AccessRights::None => "NA",
            AccessRights::Read => "R",
            AccessRights::Write => "W",
            AccessRights::ReadWrite => "RW",
        };
        write!(f, "{token}")
    }
}

impl FromStr for AccessRights {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NA" => Ok(AccessRights::None),
            "R" => Ok(AccessRights::Read),
            "W" => Ok(AccessRights::Write),
            "RW" => Ok(AccessRights::ReadWrite),
            _ => Err(Error::InvalidFormat(format!(
                "access rights must be one of NA, R, W or RW, got '{s}'"
            ))),
        }
    }
}

struct AttributeEntry {
    tool: ToolAttributes,
    nv: NvAttributes,
    token: &'static str,
}

// Settable attributes first; only those are encoded.
const ATTRIBUTE_MAP: [AttributeEntry; 12] = [
    AttributeEntry {
        tool: ToolAttributes::READ_LOCKABLE,
        nv: NvAttributes::READ_STCLEAR,
        token: "RL",
    },
    AttributeEntry {
        tool: ToolAttributes::WRITE_LOCKABLE,
        nv: NvAttributes::WRITE_STCLEAR,
        token: "WL",
    },
    AttributeEntry {
        tool: ToolAttributes::WRITE_ONCE,
        nv: NvAttributes::WRITEDEFINE,
        token: "WO",
    },
    AttributeEntry {
        tool: ToolAttributes::WRITE_ALL,
        nv: NvAttributes::WRITEALL,
        token: "WA",
    },
    AttributeEntry {
        tool: ToolAttributes::NON_PROTECTED,
        nv: NvAttributes::NO_DA,
        token: "NP",
    },
    AttributeEntry {
        tool: ToolAttributes::CACHED,
        nv: NvAttributes::ORDERLY,
        token: "CH",
    },
    AttributeEntry {
        tool: ToolAttributes::VOLATILE_DIRTY,
        nv: NvAttributes::CLEAR_STCLEAR,
        token: "VL",
    },
    AttributeEntry {
        tool: ToolAttributes::PERMANENT,
        nv: NvAttributes::POLICY_DELETE,
        token: "PT",
    },
    AttributeEntry {
        tool: ToolAttributes::READ_LOCKED,
        nv: NvAttributes::READLOCKED,
        token: "LR",
    },
    AttributeEntry {
        tool: ToolAttributes::WRITE_LOCKED,
        nv: NvAttributes::WRITELOCKED,
        token: "LW",
    },
    AttributeEntry {
        tool: ToolAttributes::WRITTEN,
        nv: NvAttributes::WRITTEN,
        token: "WR",
    },
    AttributeEntry {
        tool: ToolAttributes::PLATFORM_OWNED,
        nv: NvAttributes::PLATFORMCREATE,
        token: "PO",
    },
];

const SETTABLE_ENTRIES: usize = 8;

/// (read bit, write bit) for the owner and for the index authorization.
const OWNER_RIGHTS: (NvAttributes, NvAttributes) =
    (NvAttributes::OWNERREAD, NvAttributes::OWNERWRITE);
const AUTH_RIGHTS: (NvAttributes, NvAttributes) =
    (NvAttributes::AUTHREAD, NvAttributes::AUTHWRITE);

fn rights_to_wire(rights: AccessRights, (read, write): (NvAttributes, NvAttributes)) -> NvAttributes {
    let mut bits = NvAttributes::empty();
    bits.set(read, rights.can_read());
    bits.set(write, rights.can_write());
    bits
}

fn rights_from_wire(
    bits: NvAttributes,
    (read, write): (NvAttributes, NvAttributes),
) -> AccessRights {
    AccessRights::new(bits.contains(read), bits.contains(write))
}

/// Build the `TPMA_NV` mask of a new index.
///
/// Status attributes in `attributes` are ignored: the TPM owns them, and the
/// type and lock bits of the mask are left clear.
#[must_use]
pub fn to_wire_attributes(
    attributes: ToolAttributes,
    owner: AccessRights,
    auth: AccessRights,
) -> NvAttributes {
    let flags = ATTRIBUTE_MAP[..SETTABLE_ENTRIES]
        .iter()
        .filter(|entry| attributes.contains(entry.tool))
        .fold(NvAttributes::empty(), |acc, entry| acc | entry.nv);

    flags | rights_to_wire(owner, OWNER_RIGHTS) | rights_to_wire(auth, AUTH_RIGHTS)
}

/// Split a `TPMA_NV` mask into tool attributes, including status, and the
/// owner and auth rights.
#[must_use]
pub fn from_wire_attributes(bits: NvAttributes) -> (ToolAttributes, AccessRights, AccessRights) {
    let attributes = ATTRIBUTE_MAP
        .iter()
        .filter(|entry| bits.contains(entry.nv))
        .fold(ToolAttributes::empty(), |acc, entry| acc | entry.tool);

    (
        attributes,
        rights_from_wire(bits, OWNER_RIGHTS),
        rights_from_wire(bits, AUTH_RIGHTS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_attribute_round_trip_exhaustive() {
        for raw in 0..=0xffu16 {
            let attributes = ToolAttributes::from_bits_truncate(raw);
            for owner in AccessRights::ALL {
                for auth in AccessRights::ALL {
                    let bits = to_wire_attributes(attributes, owner, auth);
                    assert_eq!(from_wire_attributes(bits), (attributes, owner, auth));
                }
            }
        }
    }

    #[test]
    fn test_each_flag_has_its_own_bit() {
        let mut seen = NvAttributes::empty();
        for entry in &ATTRIBUTE_MAP {
            assert_eq!(entry.nv.bits().count_ones(), 1);
            assert!(!seen.intersects(entry.nv));
            seen |= entry.nv;
        }
        for rights in [OWNER_RIGHTS, AUTH_RIGHTS] {
            assert!(!seen.intersects(rights.0 | rights.1));
            seen |= rights.0 | rights.1;
        }
    }

    #[test]
    fn test_status_flags_are_never_encoded() {
        let bits = to_wire_attributes(ToolAttributes::all(), AccessRights::None, AccessRights::None);
        assert!(!bits.intersects(
            NvAttributes::READLOCKED
                | NvAttributes::WRITELOCKED
                | NvAttributes::WRITTEN
                | NvAttributes::PLATFORMCREATE
        ));
        assert!(!bits.intersects(NvAttributes::COUNTER | NvAttributes::BITS | NvAttributes::EXTEND));
    }

    #[test]
    fn test_status_flags_are_decoded() {
        let bits = NvAttributes::READLOCKED
            | NvAttributes::WRITELOCKED
            | NvAttributes::WRITTEN
            | NvAttributes::PLATFORMCREATE
            | NvAttributes::OWNERREAD;
        let (attributes, owner, auth) = from_wire_attributes(bits);
        assert_eq!(attributes, ToolAttributes::STATUS);
        assert_eq!(owner, AccessRights::Read);
        assert_eq!(auth, AccessRights::None);
    }

    #[test]
    fn test_read_lockable_owner_rw() {
        let bits = to_wire_attributes(
            ToolAttributes::READ_LOCKABLE,
            AccessRights::ReadWrite,
            AccessRights::None,
        );
        assert_eq!(
            bits,
            NvAttributes::OWNERREAD | NvAttributes::OWNERWRITE | NvAttributes::READ_STCLEAR
        );
        assert_eq!(bits.bits(), 0x8002_0002);
    }

    #[test]
    fn test_tokens() {
        let attributes = ToolAttributes::READ_LOCKABLE
            | ToolAttributes::PERMANENT
            | ToolAttributes::WRITTEN;
        assert_eq!(attributes.to_tokens(), "RL+PT+WR");
        assert_eq!(ToolAttributes::from_tokens("RL+PT+WR").unwrap(), attributes);
        assert_eq!(ToolAttributes::from_tokens("wr + rl+pt+").unwrap(), attributes);
        assert_eq!(ToolAttributes::from_tokens("").unwrap(), ToolAttributes::empty());
        assert_eq!(ToolAttributes::empty().to_tokens(), "");
        assert!(ToolAttributes::from_tokens("RL+XX").is_err());

        for raw in 0..=0x0fffu16 {
            let attributes = ToolAttributes::from_bits_truncate(raw);
            assert_eq!(
                ToolAttributes::from_tokens(&attributes.to_tokens()).unwrap(),
                attributes
            );
        }
    }

    #[test]
    fn test_access_rights_tokens() {
        for rights in AccessRights::ALL {
            assert_eq!(rights.to_string().parse::<AccessRights>().unwrap(), rights);
        }
        assert_eq!("rw".parse::<AccessRights>().unwrap(), AccessRights::ReadWrite);
        assert!("X".parse::<AccessRights>().is_err());
    }
}
