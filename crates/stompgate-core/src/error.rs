//! Codec error type.

use thiserror::Error;

/// Errors produced while decoding or encoding STOMP frames.
///
/// Every grammar violation maps to [`CodecError::MalformedFrame`]; the `Io`
/// variant only carries transport failures surfaced through the framed
/// stream.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("decoder poisoned by an earlier malformed frame")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CodecError::MalformedFrame(reason.into())
    }

    /// True when the error is a frame grammar violation.
    pub fn is_malformed(&self) -> bool {
        matches!(self, CodecError::MalformedFrame(_))
    }
}
