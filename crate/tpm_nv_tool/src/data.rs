use std::io::{self, IsTerminal, Read, Write};

use anyhow::{bail, Result};
use clap::Args;
use tpm_nv::{read, write, NvIndex, Transport};

use crate::{dump::hex_dump, password_bytes};

/// Write data read from the standard input into an NV index
#[derive(Args, Debug)]
pub struct WriteArgs {
    /// NV index handle, in hexadecimal
    index: NvIndex,

    /// Offset in the index
    offset: u16,

    /// Number of bytes to write
    size: u16,

    /// Password of the index; the owner authorizes when absent
    password: Option<String>,
}

impl WriteArgs {
    pub fn run(&self, tpm: &mut impl Transport) -> Result<()> {
        let mut data = Vec::with_capacity(usize::from(self.size));
        io::stdin()
            .lock()
            .take(u64::from(self.size))
            .read_to_end(&mut data)?;

        self.write(tpm, &data)
    }

    fn write(&self, tpm: &mut impl Transport, data: &[u8]) -> Result<()> {
        if data.len() != usize::from(self.size) {
            bail!(
                "expected {} bytes of data, got {}",
                self.size,
                data.len()
            );
        }

        let password = password_bytes(self.password.as_deref())?;
        write(tpm, self.index, &password, self.offset, data)?;

        eprintln!(
            "{} bytes written to {} at offset {}",
            data.len(),
            self.index,
            self.offset
        );

        Ok(())
    }
}

/// Read data from an NV index
///
/// The data is dumped in hexadecimal on the standard error, and written
/// raw on the standard output unless it is a terminal.
#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct ReadArgs {
    /// NV index handle, in hexadecimal
    index: NvIndex,

    /// Offset in the index
    offset: u16,

    /// Number of bytes to read
    size: u16,

    /// Password of the index; the owner authorizes when absent
    password: Option<String>,
}

impl ReadArgs {
    pub fn run(&self, tpm: &mut impl Transport) -> Result<()> {
        let data = self.read(tpm)?;

        eprint!("{}", hex_dump(&data, usize::from(self.offset)));

        let mut stdout = io::stdout().lock();
        if !stdout.is_terminal() {
            stdout.write_all(&data)?;
            stdout.flush()?;
        }

        Ok(())
    }

    fn read(&self, tpm: &mut impl Transport) -> Result<Vec<u8>> {
        let password = password_bytes(self.password.as_deref())?;
        Ok(read(tpm, self.index, &password, self.offset, self.size)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;
    use tpm_nv::{define_space, AccessRights, Simulator, ToolAttributes};

    fn setup() -> (Simulator, NvIndex) {
        let mut tpm = Simulator::new();
        let index = NvIndex::from_index(7).unwrap();
        define_space(
            &mut tpm,
            index,
            32,
            ToolAttributes::empty(),
            AccessRights::ReadWrite,
            AccessRights::ReadWrite,
            b"pw",
        )
        .unwrap();
        (tpm, index)
    }

    #[test]
    fn test_write_then_read() {
        let (mut tpm, index) = setup();

        WriteArgs {
            index,
            offset: 4,
            size: 3,
            password: Some("pw".to_owned()),
        }
        .write(&mut tpm, b"abc")
        .unwrap();

        let data = ReadArgs {
            index,
            offset: 4,
            size: 3,
            password: None,
        }
        .read(&mut tpm)
        .unwrap();
        assert_eq!(data, b"abc");
    }

    #[test]
    fn test_write_requires_announced_size() {
        let (mut tpm, index) = setup();

        let args = WriteArgs {
            index,
            offset: 0,
            size: 4,
            password: None,
        };
        let before = tpm.last_request().map(<[u8]>::to_vec);
        assert!(args.write(&mut tpm, b"abc").is_err());
        assert_eq!(tpm.last_request().map(<[u8]>::to_vec), before);
    }
}
