use crate::{
    bytes::script_line,
    engine::{Engine, Limits},
    host::{NullHost, RedisHost},
    redis::sha1_hex,
    reply::{Reply, ReplyError},
    wire,
};
use bytes::Bytes;
use hashbrown::HashMap;
use std::sync::Arc;

/// The host-facing front end: owns an engine plus the script cache, computes
/// script identities, and decorates `user_script:` error replies the way
/// Redis does.
pub struct Runtime {
    engine: Engine,
    scripts: HashMap<String, Bytes>,
}

impl Runtime {
    pub fn new(host: Arc<dyn RedisHost>, limits: Limits) -> mlua::Result<Self> {
        Ok(Runtime {
            engine: Engine::new(host, limits)?,
            scripts: HashMap::new(),
        })
    }

    /// A runtime with no command router attached.
    pub fn standalone() -> mlua::Result<Self> {
        Runtime::new(Arc::new(NullHost), Limits::default())
    }

    pub fn limits(&self) -> Limits {
        self.engine.limits()
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.engine.set_limits(limits);
    }

    /// Tear down and rebuild the VM. The script cache survives; it is keyed
    /// on source identity, not VM state.
    pub fn reset(&mut self) -> mlua::Result<()> {
        self.engine.reset()
    }

    /// Evaluate a script with the given key and argument vectors, caching it
    /// under its SHA-1 as a side effect.
    pub fn eval(&mut self, script: &[u8], keys: &[Bytes], argv: &[Bytes]) -> Reply {
        let mut args = Vec::with_capacity(keys.len() + argv.len());
        args.extend_from_slice(keys);
        args.extend_from_slice(argv);
        let encoded = match wire::encode_args(&args) {
            Ok(encoded) => encoded,
            Err(error) => return Reply::from(ReplyError::from(error)),
        };
        let Ok(keys_count) = u32::try_from(keys.len()) else {
            return ReplyError::ArgDecode.into();
        };
        self.eval_encoded(script, &encoded, keys_count)
    }

    /// Evaluate against an already-encoded argument array.
    pub fn eval_encoded(&mut self, script: &[u8], args: &[u8], keys_count: u32) -> Reply {
        let sha = sha1_hex(script);
        self.scripts
            .entry(sha.clone())
            .or_insert_with(|| Bytes::copy_from_slice(script));
        decorate(self.engine.eval_with_args(script, args, keys_count), &sha)
    }

    /// Evaluate a previously loaded script by its 40-hex identity.
    pub fn eval_sha(&mut self, sha: &str, keys: &[Bytes], argv: &[Bytes]) -> Reply {
        let sha = sha.to_ascii_lowercase();
        let Some(script) = self.scripts.get(&sha).cloned() else {
            return ReplyError::Noscript.into();
        };
        self.eval(&script, keys, argv)
    }

    /// Compile and cache a script without running it. Returns the identity
    /// under which `eval_sha` will find it.
    pub fn load(&mut self, script: &[u8]) -> Result<String, ReplyError> {
        self.engine.check(script)?;
        let sha = sha1_hex(script);
        self.scripts
            .insert(sha.clone(), Bytes::copy_from_slice(script));
        Ok(sha)
    }

    pub fn exists(&self, shas: &[&str]) -> Vec<bool> {
        shas.iter()
            .map(|sha| self.scripts.contains_key(&sha.to_ascii_lowercase()))
            .collect()
    }

    pub fn flush(&mut self) {
        self.scripts.clear();
    }
}

/// Rewrite a `user_script:N:`-prefixed error payload into the Redis-exact
/// decorated form. Every other reply passes through untouched.
fn decorate(reply: Reply, sha: &str) -> Reply {
    let Reply::Error(payload) = &reply else {
        return reply;
    };
    let Some((line, message)) = script_line(payload) else {
        return reply;
    };
    let prefix = format!("user_script:{line}: ");
    let suffix = format!(" script: {sha}, on @user_script:{line}.");
    let mut out = Vec::with_capacity(prefix.len() + message.len() + suffix.len());
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(message);
    out.extend_from_slice(suffix.as_bytes());
    Reply::Error(out.into())
}
