use anyhow::Result;
use clap::Args;
use log::debug;
use tpm_nv::{define_space, undefine_space, AccessRights, NvIndex, ToolAttributes, Transport};

use crate::password_bytes;

/// Define a new NV index
///
/// Attributes are `+`-separated tokens:
///   RL read lockable, WL write lockable, WO write once, WA write all,
///   NP not protected against dictionary attacks, CH cached (orderly),
///   VL volatile (cleared on restart), PT permanent (cannot be deleted).
/// Rights are NA, R, W or RW.
#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct CreateArgs {
    /// NV index handle, in hexadecimal
    index: NvIndex,

    /// Attributes, e.g. `RL+WL`, or `none`
    #[arg(value_parser = ToolAttributes::from_tokens)]
    attributes: ToolAttributes,

    /// Owner rights
    owner: AccessRights,

    /// Rights granted through the index password
    auth: AccessRights,

    /// Size of the index in bytes
    size: u16,

    /// Password of the index
    password: Option<String>,
}

impl CreateArgs {
    pub fn run(&self, tpm: &mut impl Transport) -> Result<()> {
        let password = password_bytes(self.password.as_deref())?;

        debug!(
            "Creating {} with attributes '{}'",
            self.index,
            self.attributes.to_tokens()
        );
        define_space(
            tpm,
            self.index,
            self.size,
            self.attributes,
            self.owner,
            self.auth,
            &password,
        )?;

        println!("NV index {} created ({} bytes)", self.index, self.size);

        Ok(())
    }
}

/// Delete an NV index
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// NV index handle, in hexadecimal
    index: NvIndex,
}

impl DeleteArgs {
    pub fn run(&self, tpm: &mut impl Transport) -> Result<()> {
        undefine_space(tpm, self.index)?;

        println!("NV index {} deleted", self.index);

        Ok(())
    }
}
