use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::Error;

/// Linux TPM resource manager device.
pub const DEFAULT_TPM_DEVICE_PATH: &str = "/dev/tpmrm0";

/// Test whether a TPM is reachable through the default device
#[must_use]
pub fn is_tpm() -> bool {
    PathBuf::from(DEFAULT_TPM_DEVICE_PATH).exists()
}

/// Synchronous channel to a TPM.
///
/// One command is in flight at a time: `submit` takes `&mut self`, so
/// commands sent over the same transport are serialized by the borrow
/// checker.
pub trait Transport {
    /// Send `request` and write the reply into `response`.
    ///
    /// Returns the number of reply bytes received. `response` is sized by
    /// the caller for the largest reply of the command.
    fn submit(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn submit(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, Error> {
        (**self).submit(request, response)
    }
}

/// TPM character device (`/dev/tpm0` or `/dev/tpmrm0`).
///
/// The device is open as long as the value lives.
#[derive(Debug)]
pub struct DeviceTransport {
    path: PathBuf,
    file: fs::File,
}

impl DeviceTransport {
    /// Open the resource manager device.
    pub fn open() -> Result<Self, Error> {
        Self::open_path(DEFAULT_TPM_DEVICE_PATH)
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening TPM device {}...", path.display());

        let file = fs::OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(DeviceTransport { path, file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the device.
    pub fn close(self) -> Result<(), Error> {
        debug!("Closing TPM device {}", self.path.display());
        drop(self.file);
        Ok(())
    }
}

impl Transport for DeviceTransport {
    fn submit(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, Error> {
        self.file
            .write_all(request)
            .map_err(|e| Error::Transport(format!("cannot send command: {e}")))?;

        // The driver hands back a whole reply per read.
        let received = self
            .file
            .read(response)
            .map_err(|e| Error::Transport(format!("cannot receive reply: {e}")))?;

        if received == 0 {
            return Err(Error::Transport("no reply received".to_owned()));
        }

        Ok(received)
    }
}
