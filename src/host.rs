use crate::{
    bytes::Output,
    reply::{Reply, ReplyError},
};
use bytes::Bytes;

/// The four Redis log levels, exported on the `redis` table as
/// `LOG_DEBUG`..`LOG_WARNING`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
    Verbose,
    Notice,
    Warning,
}

impl LogLevel {
    /// The integer value scripts pass to `redis.log`. Values outside the
    /// defined range clamp to `Debug`.
    pub fn from_i64(level: i64) -> Self {
        match level {
            1 => LogLevel::Verbose,
            2 => LogLevel::Notice,
            3 => LogLevel::Warning,
            _ => LogLevel::Debug,
        }
    }

    pub const fn as_i64(self) -> i64 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Verbose => 1,
            LogLevel::Notice => 2,
            LogLevel::Warning => 3,
        }
    }
}

/// The command router a script reaches through `redis.call`/`redis.pcall`.
///
/// Implementations run synchronously on the evaluating thread and must not
/// reenter the engine that invoked them. Command failures are expressed
/// either as an `Err` or as an `Error` reply; the bridge raises both inside
/// `redis.call` and surfaces both as `{err=...}` tables inside
/// `redis.pcall`.
pub trait RedisHost {
    /// Route one command. The argument vector is the raw bytes the script
    /// passed, command name first.
    fn call(&self, args: &[Bytes]) -> Result<Reply, ReplyError>;

    /// The `redis.pcall` variant. The default forwards to [`RedisHost::call`];
    /// hosts that distinguish the two can override.
    fn pcall(&self, args: &[Bytes]) -> Result<Reply, ReplyError> {
        self.call(args)
    }

    /// Receive one `redis.log` line. Best-effort; must not fail.
    fn log(&self, level: LogLevel, message: &[u8]);
}

/// The host used when no command router is attached. Scripts still evaluate
/// deterministically; `redis.call` fails with a fixed error and log lines
/// land on the `log` facade.
#[derive(Debug, Default)]
pub struct NullHost;

impl RedisHost for NullHost {
    fn call(&self, _args: &[Bytes]) -> Result<Reply, ReplyError> {
        Err(ReplyError::NoHost)
    }

    fn log(&self, level: LogLevel, message: &[u8]) {
        let message = Output(message);
        match level {
            LogLevel::Debug | LogLevel::Verbose => log::debug!(target: "script", "{message}"),
            LogLevel::Notice => log::info!(target: "script", "{message}"),
            LogLevel::Warning => log::warn!(target: "script", "{message}"),
        }
    }
}
