use anyhow::Result;
use clap::Args;
use tpm_nv::{enumerate_all, query_all, read_public, NvIndex, Transport};

/// List the handles of every defined NV index
#[derive(Args, Debug)]
pub struct EnumerateArgs {
    /// Print a JSON array
    #[arg(long)]
    json: bool,
}

impl EnumerateArgs {
    pub fn run(&self, tpm: &mut impl Transport) -> Result<()> {
        let handles = enumerate_all(tpm)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&handles)?);
        } else {
            println!("{} NV indices defined", handles.len());
            for handle in handles {
                println!("{handle}");
            }
        }

        Ok(())
    }
}

/// Describe every defined NV index
#[derive(Args, Debug)]
pub struct QueryAllArgs {
    /// Print a JSON array
    #[arg(long)]
    json: bool,
}

impl QueryAllArgs {
    pub fn run(&self, tpm: &mut impl Transport) -> Result<()> {
        let spaces = query_all(tpm)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&spaces)?);
        } else {
            for space in spaces {
                println!("{space}");
            }
        }

        Ok(())
    }
}

/// Describe one NV index
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// NV index handle, in hexadecimal
    index: NvIndex,

    /// Print JSON
    #[arg(long)]
    json: bool,
}

impl QueryArgs {
    pub fn run(&self, tpm: &mut impl Transport) -> Result<()> {
        let space = read_public(tpm, self.index)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&space)?);
        } else {
            println!("{space}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;
    use tpm_nv::{define_space, AccessRights, Simulator, ToolAttributes};

    #[test]
    fn test_query_commands() {
        let mut tpm = Simulator::new();
        let index = NvIndex::from_index(1).unwrap();
        define_space(
            &mut tpm,
            index,
            8,
            ToolAttributes::READ_LOCKABLE,
            AccessRights::ReadWrite,
            AccessRights::None,
            &[],
        )
        .unwrap();

        EnumerateArgs { json: true }.run(&mut tpm).unwrap();
        QueryAllArgs { json: false }.run(&mut tpm).unwrap();
        QueryArgs { index, json: true }.run(&mut tpm).unwrap();

        let missing = NvIndex::from_index(2).unwrap();
        assert!(QueryArgs {
            index: missing,
            json: false
        }
        .run(&mut tpm)
        .is_err());
    }
}
