//! Failure statuses shared by every stream object.

use std::{fmt, io};

use thiserror::Error;

/// A convenient type alias for `Result<T, bytestack::Status>`.
pub type StreamResult<T> = Result<T, Status>;

/// Category of a stream failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Malformed input or a violated precondition surfaced to the caller.
    InvalidArgument,
    /// An internal precondition did not hold; a programmer error.
    FailedPrecondition,
    /// An unparsable record or a checksum mismatch on read.
    DataLoss,
    /// A position limit, a position overflow or an oversized message.
    ResourceExhausted,
    /// The writer does not support the requested capability.
    Unimplemented,
    NotFound,
    PermissionDenied,
    /// An I/O failure the operating system did not explain.
    Unknown,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusCode::InvalidArgument => "invalid argument",
            StatusCode::FailedPrecondition => "failed precondition",
            StatusCode::DataLoss => "data loss",
            StatusCode::ResourceExhausted => "resource exhausted",
            StatusCode::Unimplemented => "unimplemented",
            StatusCode::NotFound => "not found",
            StatusCode::PermissionDenied => "permission denied",
            StatusCode::Unknown => "unknown",
        })
    }
}

/// A latched stream failure: a [`StatusCode`] plus a human-readable message.
///
/// Layers annotate a status on the way out, prepending context such as the
/// position at which the failure was detected. Annotation never changes the
/// code, so composed stacks report a single coherent message chain under the
/// code of the layer that detected the failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DataLoss, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(StatusCode::ResourceExhausted, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unknown, message)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prepends `context` to the message, keeping the code.
    pub fn annotate(self, context: impl fmt::Display) -> Self {
        Self {
            code: self.code,
            message: format!("{context}: {}", self.message),
        }
    }
}

impl From<io::Error> for Status {
    fn from(err: io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::NotFound => StatusCode::NotFound,
            io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => StatusCode::InvalidArgument,
            io::ErrorKind::UnexpectedEof => StatusCode::DataLoss,
            // Includes failures where errno was never set.
            _ => StatusCode::Unknown,
        };
        Self::new(code, err.to_string())
    }
}

impl From<binrw::Error> for Status {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(err) => err.into(),
            err => Self::invalid_argument(err.to_string()),
        }
    }
}

impl From<snap::Error> for Status {
    fn from(err: snap::Error) -> Self {
        match err {
            snap::Error::TooBig { .. } => Self::resource_exhausted(err.to_string()),
            err => Self::data_loss(err.to_string()),
        }
    }
}

impl From<prost::DecodeError> for Status {
    fn from(err: prost::DecodeError) -> Self {
        Self::data_loss(err.to_string())
    }
}
