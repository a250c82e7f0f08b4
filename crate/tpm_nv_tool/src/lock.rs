use anyhow::Result;
use clap::Args;
use tpm_nv::{read_lock, write_lock, NvIndex, Transport};

use crate::password_bytes;

/// Lock an NV index for reading until the next TPM restart
#[derive(Args, Debug)]
pub struct ReadLockArgs {
    /// NV index handle, in hexadecimal
    index: NvIndex,

    /// Password of the index; the owner authorizes when absent
    password: Option<String>,
}

impl ReadLockArgs {
    pub fn run(&self, tpm: &mut impl Transport) -> Result<()> {
        let password = password_bytes(self.password.as_deref())?;
        read_lock(tpm, self.index, &password)?;

        println!("NV index {} locked for reading", self.index);

        Ok(())
    }
}

/// Lock an NV index for writing
#[derive(Args, Debug)]
pub struct WriteLockArgs {
    /// NV index handle, in hexadecimal
    index: NvIndex,

    /// Password of the index; the owner authorizes when absent
    password: Option<String>,
}

impl WriteLockArgs {
    pub fn run(&self, tpm: &mut impl Transport) -> Result<()> {
        let password = password_bytes(self.password.as_deref())?;
        write_lock(tpm, self.index, &password)?;

        println!("NV index {} locked for writing", self.index);

        Ok(())
    }
}
