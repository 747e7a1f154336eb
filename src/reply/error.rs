use crate::bytes::Output;
use bytes::Bytes;
use thiserror::Error;

/// Every failure a script or host can observe. The `Display` strings are
/// the exact bytes that appear inside an `Error` reply.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReplyError {
    #[error("ERR invalid KEYS/ARGV encoding")]
    ArgDecode,

    #[error("ERR KEYS/ARGV exceeds configured limit")]
    ArgLimit,

    #[error("ERR invalid argument to redis.call")]
    CallArgument,

    #[error("{}", Output(&.0[..]))]
    Custom(Bytes),

    #[error("ERR reply decoding failed")]
    Decode,

    #[error("ERR empty reply from host")]
    EmptyHostReply,

    #[error("ERR reply encoding failed")]
    Encode,

    #[error("Script killed by fuel limit")]
    Fuel,

    #[error("ERR redis.log requires level and message")]
    LogArguments,

    #[error("ERR redis.call requires arguments")]
    MissingCommand,

    #[error("ERR reply nesting exceeds depth limit")]
    NestingDepth,

    #[error("ERR no host configured")]
    NoHost,

    #[error("NOSCRIPT No matching script. Please use EVAL.")]
    Noscript,

    #[error("ERR eval is not reentrant")]
    Reentrant,

    #[error("ERR reply exceeds configured limit")]
    ReplyLimit,

    #[error("ERR Lua VM not initialized")]
    Uninitialized,

    #[error("ERR unknown reply type")]
    UnknownReplyType,

    #[error("ERR unsupported Lua return type")]
    UnsupportedReturn,
}

impl From<String> for ReplyError {
    fn from(message: String) -> Self {
        ReplyError::Custom(message.into_bytes().into())
    }
}
