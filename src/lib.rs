mod bytes;
mod engine;
mod host;
mod modules;
mod redis;
mod reply;
mod runtime;

pub mod abi;
pub mod wire;

// Public interface
pub use engine::{Engine, Limits};
pub use host::{LogLevel, NullHost, RedisHost};
pub use reply::{Reply, ReplyError};
pub use runtime::Runtime;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
