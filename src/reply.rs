mod error;

pub use error::ReplyError;

use crate::bytes::Output;
use bytes::Bytes;

/// The universal value crossing the engine boundary in either direction.
/// Every payload records an explicit length, so NUL bytes are legal in
/// `Bulk`, `Status` and `Error`; an `Array` counts elements, not bytes.
#[derive(Clone, Eq, PartialEq)]
pub enum Reply {
    Null,
    Int(i64),
    Bulk(Bytes),
    Array(Vec<Reply>),
    Status(Bytes),
    Error(Bytes),
}

impl Reply {
    /// The canonical `+OK` status.
    pub fn ok() -> Self {
        Reply::Status(Bytes::from_static(b"OK"))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Reply::*;
        match self {
            Null => write!(f, "Null"),
            Int(n) => write!(f, "Int({n})"),
            Bulk(bytes) => write!(f, "Bulk({:?})", Output(bytes)),
            Array(items) => f.debug_list().entries(items).finish(),
            Status(bytes) => write!(f, "Status({:?})", Output(bytes)),
            Error(bytes) => write!(f, "Error({:?})", Output(bytes)),
        }
    }
}

impl From<i64> for Reply {
    fn from(value: i64) -> Self {
        Reply::Int(value)
    }
}

impl From<i32> for Reply {
    fn from(value: i32) -> Self {
        Reply::Int(value.into())
    }
}

impl From<Bytes> for Reply {
    fn from(value: Bytes) -> Self {
        Reply::Bulk(value)
    }
}

impl From<&Bytes> for Reply {
    fn from(value: &Bytes) -> Self {
        Reply::Bulk(value.clone())
    }
}

impl From<Vec<u8>> for Reply {
    fn from(value: Vec<u8>) -> Self {
        Reply::Bulk(value.into())
    }
}

impl<const N: usize> From<&'static [u8; N]> for Reply {
    fn from(value: &'static [u8; N]) -> Self {
        Reply::Bulk(Bytes::from_static(value))
    }
}

impl From<&'static str> for Reply {
    fn from(value: &'static str) -> Self {
        Reply::Status(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<Reply>> for Reply {
    fn from(value: Vec<Reply>) -> Self {
        Reply::Array(value)
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Reply::Null,
        }
    }
}

impl From<ReplyError> for Reply {
    fn from(error: ReplyError) -> Self {
        let message = match error {
            ReplyError::Custom(bytes) => bytes,
            other => other.to_string().into_bytes().into(),
        };
        Reply::Error(message)
    }
}
