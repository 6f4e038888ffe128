use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An item that is not inline was appended without a writing client.
    MissingWritingClient,
    /// No segment could be obtained for the next record.
    SegmentAllocation,
    /// The writing client could not produce a usable blob.
    Encoding,
    Io,
    /// A hand-off message was malformed.
    Wire,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, descr: String) -> Error {
        return Error {
            kind: kind,
            message: descr,
        };
    }

    pub fn kind(&self) -> ErrorKind {
        return self.kind;
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        return Error::new(ErrorKind::Io, format!("{}", err));
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

/// Errors that stop playback of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The record tag is not in the registry.
    UnknownItemType(u8),
    /// A record runs past the written end of its segment.
    UnexpectedEnd,
    /// Encoded blob does not match its checksum.
    ChecksumMismatch,
    /// An encoded record was found but no reading client is set.
    MissingReadingClient,
    /// The reading client produced an item of the wrong type.
    ItemTypeMismatch { expected: u8, found: u8 },
    /// The reading client rejected the blob.
    Malformed(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownItemType(tag) => write!(f, "unknown item type: 0x{:02X}", tag),
            DecodeError::UnexpectedEnd => write!(f, "unexpected end of segment"),
            DecodeError::ChecksumMismatch => write!(f, "encoded item failed checksum"),
            DecodeError::MissingReadingClient => {
                write!(f, "encoded item found but no reading client is set")
            }
            DecodeError::ItemTypeMismatch { expected, found } => write!(
                f,
                "reading client decoded item type 0x{:02X}, expected 0x{:02X}",
                found, expected
            ),
            DecodeError::Malformed(msg) => write!(f, "malformed encoded item: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}
