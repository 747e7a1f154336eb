mod fuel;
mod sandbox;

use crate::{
    host::RedisHost,
    redis,
    reply::{Reply, ReplyError},
    wire,
};
use bytes::Bytes;
use fuel::Fuel;
use mlua::{HookTriggers, Lua, LuaOptions, MultiValue, StdLib, VmState};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

/// The instruction budget an engine starts with.
pub const DEFAULT_FUEL: u64 = 10_000_000;

/// Caps applied to each evaluation. A zero value means unenforced; new
/// values take effect on the next eval.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limits {
    /// Instruction credit per eval.
    pub max_fuel: u64,

    /// Ceiling on the encoded size of the final reply.
    pub max_reply_bytes: usize,

    /// Ceiling on the encoded size of the inbound `KEYS`/`ARGV` array.
    pub max_arg_bytes: usize,

    /// Ceiling on VM heap usage, applied to the interpreter allocator.
    pub max_memory_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_fuel: DEFAULT_FUEL,
            max_reply_bytes: 0,
            max_arg_bytes: 0,
            max_memory_bytes: 0,
        }
    }
}

/// One sandboxed Lua 5.1 VM plus its fuel meter, limits and Redis bridge.
///
/// An engine serves one evaluation at a time; `&mut self` on the eval
/// entrypoints makes concurrent or reentrant use unrepresentable. Every
/// failure surfaces as an `Error` reply, never as a panic or a Rust error.
pub struct Engine {
    lua: Lua,
    fuel: Fuel,
    limits: Limits,
    resp: Arc<AtomicU32>,
    host: Arc<dyn RedisHost>,
}

impl Engine {
    /// Build a fresh VM: whitelisted libraries only, companion modules and
    /// the `redis` table installed, nondeterminism scrubbed, fuel hook
    /// armed.
    pub fn new(host: Arc<dyn RedisHost>, limits: Limits) -> mlua::Result<Self> {
        let fuel = Fuel::new(limits.max_fuel);
        let resp = Arc::new(AtomicU32::new(2));
        let lua = build_vm(&host, &fuel, &resp, &limits)?;
        log::debug!("lua vm initialized");
        Ok(Engine {
            lua,
            fuel,
            limits,
            resp,
            host,
        })
    }

    /// Destroy the VM and rebuild it with the same host and limits. There is
    /// no partially reset state: the old VM serves until the new one is
    /// fully constructed.
    pub fn reset(&mut self) -> mlua::Result<()> {
        self.lua = build_vm(&self.host, &self.fuel, &self.resp, &self.limits)?;
        self.fuel.refill();
        log::debug!("lua vm reset");
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
        self.fuel.set_limit(limits.max_fuel);
        if limits.max_memory_bytes > 0 {
            if let Err(error) = self.lua.set_memory_limit(limits.max_memory_bytes) {
                log::warn!("memory limit rejected: {error}");
            }
        }
    }

    /// The RESP version last recorded by `redis.setresp`. Bookkeeping only.
    pub fn resp_version(&self) -> u32 {
        self.resp.load(Ordering::Relaxed)
    }

    /// Compile a script without running it, reporting the load diagnostic.
    pub fn check(&self, script: &[u8]) -> Result<(), ReplyError> {
        self.lua
            .load(script)
            .set_name("@user_script")
            .into_function()
            .map(|_| ())
            .map_err(internal)
    }

    /// Run a script with empty `KEYS`/`ARGV`.
    pub fn eval(&mut self, script: &[u8]) -> Reply {
        match self.run(script, Vec::new(), 0) {
            Ok(reply) => reply,
            Err(error) => error.into(),
        }
    }

    /// Run a script against an encoded argument array, split at `keys_count`
    /// into `KEYS` and `ARGV`.
    pub fn eval_with_args(&mut self, script: &[u8], args: &[u8], keys_count: u32) -> Reply {
        let result = self.decode_args(args, keys_count).and_then(|(items, keys)| {
            self.run(script, items, keys)
        });
        match result {
            Ok(reply) => reply,
            Err(error) => error.into(),
        }
    }

    fn decode_args(&self, args: &[u8], keys_count: u32) -> Result<(Vec<Bytes>, usize), ReplyError> {
        if self.limits.max_arg_bytes > 0 && args.len() > self.limits.max_arg_bytes {
            return Err(ReplyError::ArgLimit);
        }
        let items = wire::decode_args(args).map_err(|_| ReplyError::ArgDecode)?;
        let keys_count = usize::try_from(keys_count).map_err(|_| ReplyError::ArgDecode)?;
        if keys_count > items.len() {
            return Err(ReplyError::ArgDecode);
        }
        Ok((items, keys_count))
    }

    fn run(
        &mut self,
        script: &[u8],
        items: Vec<Bytes>,
        keys_count: usize,
    ) -> Result<Reply, ReplyError> {
        self.fuel.refill();
        self.bind_globals(&items, keys_count)?;

        let function = self
            .lua
            .load(script)
            .set_name("@user_script")
            .into_function()
            .map_err(|error| self.failure(error))?;

        let values = function
            .call::<MultiValue>(())
            .map_err(|error| self.failure(error))?;

        let reply = match values.into_iter().next() {
            None => Reply::ok(),
            Some(value) => redis::lua_to_reply(&value)?,
        };

        if self.limits.max_reply_bytes > 0 && wire::encoded_len(&reply) > self.limits.max_reply_bytes
        {
            return Err(ReplyError::ReplyLimit);
        }
        Ok(reply)
    }

    /// Fresh `KEYS`/`ARGV` globals for this invocation.
    fn bind_globals(&self, items: &[Bytes], keys_count: usize) -> Result<(), ReplyError> {
        let bind = |name: &str, slice: &[Bytes]| -> mlua::Result<()> {
            let table = self.lua.create_table_with_capacity(slice.len(), 0)?;
            for (i, item) in slice.iter().enumerate() {
                table.raw_set(i + 1, self.lua.create_string(item)?)?;
            }
            self.lua.globals().set(name, table)
        };
        bind("KEYS", &items[..keys_count]).map_err(internal)?;
        bind("ARGV", &items[keys_count..]).map_err(internal)?;
        Ok(())
    }

    /// Map an interpreter failure to its reply. Fuel death takes precedence
    /// over whatever message the interpreter wrapped around the hook error.
    fn failure(&self, error: mlua::Error) -> ReplyError {
        if self.fuel.exhausted() {
            return ReplyError::Fuel;
        }
        ReplyError::Custom(message(&error).into_bytes().into())
    }
}

fn internal(error: mlua::Error) -> ReplyError {
    ReplyError::Custom(message(&error).into_bytes().into())
}

/// The diagnostic for a failed load or call, with any interpreter stack
/// traceback stripped.
fn message(error: &mlua::Error) -> String {
    let text = match error {
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::RuntimeError(message) | mlua::Error::MemoryError(message) => message.clone(),
        mlua::Error::CallbackError { cause, .. } => return message(cause),
        other => other.to_string(),
    };
    match text.find("\nstack traceback:") {
        Some(at) => text[..at].to_string(),
        None => text,
    }
}

fn build_vm(
    host: &Arc<dyn RedisHost>,
    fuel: &Fuel,
    resp: &Arc<AtomicU32>,
    limits: &Limits,
) -> mlua::Result<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;
    if limits.max_memory_bytes > 0 {
        lua.set_memory_limit(limits.max_memory_bytes)?;
    }
    sandbox::scrub(&lua)?;
    crate::modules::install(&lua)?;
    redis::install(&lua, host.clone(), resp.clone())?;
    sandbox::replace_print(&lua, host.clone())?;

    let meter = fuel.clone();
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(fuel::STRIDE),
        move |_lua, _debug| {
            if meter.consume(fuel::STRIDE) {
                Ok(VmState::Continue)
            } else {
                Err(mlua::Error::RuntimeError(
                    ReplyError::Fuel.to_string(),
                ))
            }
        },
    );
    Ok(lua)
}
