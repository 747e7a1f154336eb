//! The `redis` table installed inside the VM: `call`/`pcall` routing across
//! the host boundary, `log`, `sha1hex`, the reply constructors, `setresp`,
//! and the Lua ↔ reply marshalling both directions.

use crate::{
    bytes::fmt_number,
    host::{LogLevel, RedisHost},
    reply::{Reply, ReplyError},
    wire,
};
use bytes::Bytes;
use mlua::{Function, Lua, MultiValue, Result as LuaResult, Table, Value};
use sha1::{Digest, Sha1};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

/// Lua-side trampoline around the raw call dispatchers. Raising from Lua
/// with level 0 leaves the payload untouched, so script-level `pcall`
/// observes the exact error bytes rather than an interpreter-wrapped
/// message.
const TRAMPOLINE: &str = "\
local raw = ...
return function(...)
    local value, raised = raw(...)
    if raised ~= nil then
        error(raised, 0)
    end
    return value
end
";

pub(crate) fn install(
    lua: &Lua,
    host: Arc<dyn RedisHost>,
    resp: Arc<AtomicU32>,
) -> LuaResult<()> {
    let redis = lua.create_table()?;

    let call_host = host.clone();
    let raw_call = lua.create_function(move |lua, args: MultiValue| {
        dispatch(lua, &*call_host, args, true)
    })?;
    redis.set("call", trampoline(lua, raw_call)?)?;

    let pcall_host = host.clone();
    let raw_pcall = lua.create_function(move |lua, args: MultiValue| {
        dispatch(lua, &*pcall_host, args, false)
    })?;
    redis.set("pcall", trampoline(lua, raw_pcall)?)?;

    let log_host = host.clone();
    redis.set(
        "log",
        lua.create_function(move |_, args: MultiValue| {
            let mut args = args.into_iter();
            let (Some(level), Some(message)) = (args.next(), args.next()) else {
                return Err(raise(ReplyError::LogArguments));
            };
            let level = match level {
                Value::Integer(i) => i,
                Value::Number(n) => n as i64,
                _ => return Err(raise(ReplyError::LogArguments)),
            };
            let Some(message) = coerce_bytes(&message) else {
                return Err(raise(ReplyError::LogArguments));
            };
            log_host.log(LogLevel::from_i64(level), &message);
            Ok(())
        })?,
    )?;

    redis.set(
        "sha1hex",
        lua.create_function(|lua, value: Value| {
            let Some(bytes) = coerce_bytes(&value) else {
                return Err(mlua::Error::RuntimeError(
                    "bad argument #1 to 'sha1hex' (string expected)".into(),
                ));
            };
            lua.create_string(sha1_hex(&bytes))
        })?,
    )?;

    redis.set(
        "status_reply",
        lua.create_function(|lua, message: mlua::String| {
            let table = lua.create_table()?;
            table.set("ok", message)?;
            Ok(table)
        })?,
    )?;

    redis.set(
        "error_reply",
        lua.create_function(|lua, message: mlua::String| {
            let table = lua.create_table()?;
            table.set("err", message)?;
            Ok(table)
        })?,
    )?;

    redis.set(
        "setresp",
        lua.create_function(move |_, version: i64| {
            Ok(resp.swap(version as u32, Ordering::Relaxed))
        })?,
    )?;

    for level in [
        LogLevel::Debug,
        LogLevel::Verbose,
        LogLevel::Notice,
        LogLevel::Warning,
    ] {
        redis.set(constant_name(level), level.as_i64())?;
    }

    lua.globals().set("redis", redis)
}

fn constant_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "LOG_DEBUG",
        LogLevel::Verbose => "LOG_VERBOSE",
        LogLevel::Notice => "LOG_NOTICE",
        LogLevel::Warning => "LOG_WARNING",
    }
}

fn trampoline(lua: &Lua, raw: Function) -> LuaResult<Function> {
    lua.load(TRAMPOLINE).call(raw)
}

fn raise(error: ReplyError) -> mlua::Error {
    mlua::Error::RuntimeError(error.to_string())
}

/// One `redis.call`/`redis.pcall` round trip: marshal the argument vector,
/// dispatch to the host, decode the reply into its Lua shape. The second
/// return value is the payload the trampoline raises.
fn dispatch(
    lua: &Lua,
    host: &dyn RedisHost,
    args: MultiValue,
    raise_errors: bool,
) -> LuaResult<(Value, Option<mlua::String>)> {
    let args = match marshal_args(args) {
        Ok(args) => args,
        Err(error) => return raised(lua, error.to_string().into_bytes().into()),
    };

    let reply = if raise_errors {
        match host.call(&args) {
            Ok(reply) => reply,
            Err(error) => return raised(lua, error.to_string().into_bytes().into()),
        }
    } else {
        match host.pcall(&args) {
            Ok(reply) => reply,
            Err(error) => error.into(),
        }
    };

    match reply_to_lua(lua, &reply, raise_errors)? {
        Decoded::Value(value) => Ok((value, None)),
        Decoded::Raise(payload) => raised(lua, payload),
    }
}

fn raised(lua: &Lua, payload: Bytes) -> LuaResult<(Value, Option<mlua::String>)> {
    Ok((Value::Nil, Some(lua.create_string(&payload)?)))
}

/// Coerce one `redis.call` argument to the bytes that cross the boundary.
fn marshal_args(args: MultiValue) -> Result<Vec<Bytes>, ReplyError> {
    if args.is_empty() {
        return Err(ReplyError::MissingCommand);
    }
    let mut out = Vec::with_capacity(args.len());
    for value in args {
        let bytes: Bytes = match value {
            Value::String(s) => s.as_bytes().to_vec().into(),
            Value::Integer(i) => i.to_string().into_bytes().into(),
            Value::Number(n) => fmt_number(n).into_bytes().into(),
            Value::Boolean(true) => Bytes::from_static(b"1"),
            Value::Boolean(false) => Bytes::from_static(b"0"),
            _ => return Err(ReplyError::CallArgument),
        };
        out.push(bytes);
    }
    Ok(out)
}

fn coerce_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Integer(i) => Some(i.to_string().into_bytes()),
        Value::Number(n) => Some(fmt_number(*n).into_bytes()),
        _ => None,
    }
}

pub(crate) fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

enum Decoded {
    Value(Value),
    Raise(Bytes),
}

/// Decode a reply into the matching Lua shape. In raising mode an `Error`
/// anywhere in the tree aborts the decode and carries its payload out.
fn reply_to_lua(lua: &Lua, reply: &Reply, raise_errors: bool) -> LuaResult<Decoded> {
    Ok(Decoded::Value(match reply {
        Reply::Null => Value::Nil,
        Reply::Int(n) => Value::Integer(*n),
        Reply::Bulk(bytes) => Value::String(lua.create_string(bytes)?),
        Reply::Status(bytes) => {
            let table = lua.create_table()?;
            table.set("ok", lua.create_string(bytes)?)?;
            Value::Table(table)
        }
        Reply::Error(bytes) => {
            if raise_errors {
                return Ok(Decoded::Raise(bytes.clone()));
            }
            let table = lua.create_table()?;
            table.set("err", lua.create_string(bytes)?)?;
            Value::Table(table)
        }
        Reply::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                match reply_to_lua(lua, item, raise_errors)? {
                    Decoded::Value(value) => table.raw_set(i + 1, value)?,
                    raise => return Ok(raise),
                }
            }
            Value::Table(table)
        }
    }))
}

/// Encode a script's return value. Tables prefer a string `ok` field, then
/// `err`, then the `#`-length sequence; non-sequence keys are dropped,
/// matching Redis.
pub(crate) fn lua_to_reply(value: &Value) -> Result<Reply, ReplyError> {
    lua_to_reply_at(value, 0)
}

fn lua_to_reply_at(value: &Value, depth: usize) -> Result<Reply, ReplyError> {
    if depth > wire::MAX_DEPTH {
        return Err(ReplyError::NestingDepth);
    }
    Ok(match value {
        Value::Nil => Reply::Null,
        Value::Boolean(true) => Reply::Int(1),
        Value::Boolean(false) => Reply::Null,
        Value::Integer(i) => Reply::Int(*i),
        Value::Number(n) => {
            let n = *n;
            if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
                Reply::Int(n as i64)
            } else {
                Reply::Bulk(fmt_number(n).into_bytes().into())
            }
        }
        Value::String(s) => Reply::Bulk(s.as_bytes().to_vec().into()),
        Value::Table(table) => {
            if let Some(bytes) = field_string(table, "ok")? {
                return Ok(Reply::Status(bytes));
            }
            if let Some(bytes) = field_string(table, "err")? {
                return Ok(Reply::Error(bytes));
            }
            let len = table.raw_len();
            let mut items = Vec::with_capacity(len);
            for i in 1..=len {
                let item: Value = table.raw_get(i).map_err(internal)?;
                items.push(lua_to_reply_at(&item, depth + 1)?);
            }
            Reply::Array(items)
        }
        _ => return Err(ReplyError::UnsupportedReturn),
    })
}

/// A table field under the interpreter's string coercion: strings as-is,
/// numbers via their decimal form, everything else absent.
fn field_string(table: &Table, key: &str) -> Result<Option<Bytes>, ReplyError> {
    match table.get::<Value>(key) {
        Ok(Value::String(s)) => Ok(Some(s.as_bytes().to_vec().into())),
        Ok(Value::Integer(i)) => Ok(Some(i.to_string().into_bytes().into())),
        Ok(Value::Number(n)) => Ok(Some(fmt_number(n).into_bytes().into())),
        Ok(_) => Ok(None),
        Err(error) => Err(internal(error)),
    }
}

fn internal(error: mlua::Error) -> ReplyError {
    ReplyError::Custom(error.to_string().into_bytes().into())
}
