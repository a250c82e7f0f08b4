use thiserror::Error;

use crate::protocol::ResponseCode;

#[derive(Error, Debug)]
pub enum Error {
    #[error("InvalidFormat: {0}")]
    InvalidFormat(String),
    #[error("InvalidInput: {0}")]
    InvalidInput(String),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("LayoutError: {0}")]
    LayoutError(String),
    #[error(transparent)]
    CodecError(#[from] scroll::Error),
    #[error("TpmError: {0}")]
    Tpm(ResponseCode),
    #[error("TransportError: {0}")]
    Transport(String),
    #[error("UnexpectedResponse: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Numeric result code of a failed command.
    ///
    /// Codes issued by the TPM are returned verbatim. Every other failure,
    /// including a transport that produced no reply, reports the generic
    /// `TPM_RC_FAILURE`.
    #[must_use]
    pub fn result_code(&self) -> u32 {
        match self {
            Error::Tpm(code) => code.value(),
            _ => ResponseCode::FAILURE.value(),
        }
    }
}
