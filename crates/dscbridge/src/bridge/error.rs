//! Errors raised while reading or writing the wire format.

use std::io;
use std::string::FromUtf8Error;

/// Failure to read or write one protocol field.
///
/// Every variant is fatal to the connection: the format carries no frame
/// boundaries, so once a field is misread the position of the next request
/// is unknown.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream in the middle of a request.
    #[error("unexpected end of stream")]
    Truncated,

    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("length {len} exceeds maximum of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("records nested deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("invalid UTF-8 in string field: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("unknown operation kind: {0}")]
    UnknownOperation(u8),

    #[error("unsupported value type tag: {0}")]
    UnsupportedType(u8),
}

impl ProtocolError {
    /// Maps a read failure, folding a short read into [`ProtocolError::Truncated`].
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(err)
        }
    }

    /// True when the socket itself failed, as opposed to malformed content.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Truncated)
    }
}
