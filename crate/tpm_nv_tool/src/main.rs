use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use tpm_nv::{DeviceTransport, DEFAULT_TPM_DEVICE_PATH};

pub mod data;
pub mod dump;
pub mod lock;
pub mod query;
pub mod space;

use data::{ReadArgs, WriteArgs};
use lock::{ReadLockArgs, WriteLockArgs};
use query::{EnumerateArgs, QueryAllArgs, QueryArgs};
use space::{CreateArgs, DeleteArgs};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TPM character device
    #[arg(long, global = true, env = "TPM_NV_DEVICE", default_value = DEFAULT_TPM_DEVICE_PATH)]
    device: PathBuf,

    #[command(subcommand)]
    command: CliCommands,
}

#[derive(Subcommand)]
enum CliCommands {
    Enumerate(EnumerateArgs),
    QueryAll(QueryAllArgs),
    Query(QueryArgs),
    Create(CreateArgs),
    Delete(DeleteArgs),
    Write(WriteArgs),
    Read(ReadArgs),
    ReadLock(ReadLockArgs),
    WriteLock(WriteLockArgs),
}

/// Password given on the command line, empty when absent.
///
/// An explicitly empty password would silently select the owner
/// authorization, so it is refused.
pub(crate) fn password_bytes(password: Option<&str>) -> Result<Vec<u8>> {
    match password {
        None => Ok(Vec::new()),
        Some("") => bail!("Password not valid"),
        Some(password) => Ok(password.as_bytes().to_vec()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let opts = Cli::parse();
    let mut tpm = DeviceTransport::open_path(&opts.device)?;

    match opts.command {
        CliCommands::Enumerate(args) => args.run(&mut tpm),
        CliCommands::QueryAll(args) => args.run(&mut tpm),
        CliCommands::Query(args) => args.run(&mut tpm),
        CliCommands::Create(args) => args.run(&mut tpm),
        CliCommands::Delete(args) => args.run(&mut tpm),
        CliCommands::Write(args) => args.run(&mut tpm),
        CliCommands::Read(args) => args.run(&mut tpm),
        CliCommands::ReadLock(args) => args.run(&mut tpm),
        CliCommands::WriteLock(args) => args.run(&mut tpm),
    }?;

    tpm.close()?;

    Ok(())
}
