//! The versioned C export surface over a thread-local [`Runtime`].
//!
//! Every buffer crossing this boundary carries a hidden length header and is
//! released with [`free_mem`], whichever side produced it: the embedder
//! allocates script and argument buffers with [`alloc`] and frees reply
//! buffers the engine hands back; host callbacks allocate their reply
//! buffers with [`alloc`] and the engine frees them after decoding.
//!
//! `PtrLen` results return by value; the platform C ABI lowers that to an
//! sret out-parameter or a register pair as the target requires. Hosts
//! talking to a 32-bit linear-memory artifact can also use the packed-u64
//! helpers in [`crate::wire`].

use crate::{
    engine::Limits,
    host::{LogLevel, NullHost, RedisHost},
    reply::{Reply, ReplyError},
    runtime::Runtime,
    wire,
};
use bytes::Bytes;
use std::alloc::{dealloc, Layout};
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// Single integer bumped on any incompatible change to reply tags, field
/// widths, or export signatures.
pub const ABI_VERSION: i32 = 0;

/// A pointer paired with a byte length, returned by value.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PtrLen {
    pub ptr: *mut u8,
    pub len: usize,
}

impl PtrLen {
    const NULL: PtrLen = PtrLen {
        ptr: std::ptr::null_mut(),
        len: 0,
    };
}

/// `redis_call`/`redis_pcall` callback: consumes an encoded argument array,
/// returns an owned encoded reply allocated with [`alloc`].
pub type CallFn = unsafe extern "C" fn(args_ptr: *const u8, args_len: usize) -> PtrLen;

/// `redis_log` callback. Best-effort; must not fail.
pub type LogFn = unsafe extern "C" fn(level: u32, msg_ptr: *const u8, msg_len: usize);

/// The host import table. Absent entries fall back: `redis_pcall` to
/// `redis_call`, both to the host-less error when neither is present.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct HostCallbacks {
    pub redis_call: Option<CallFn>,
    pub redis_pcall: Option<CallFn>,
    pub redis_log: Option<LogFn>,
}

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
    static CALLBACKS: Cell<Option<HostCallbacks>> = const { Cell::new(None) };
}

/// Register the callback table consumed by subsequent [`init`] calls.
#[no_mangle]
pub extern "C" fn install_host(callbacks: HostCallbacks) {
    CALLBACKS.with(|cell| cell.set(Some(callbacks)));
}

#[no_mangle]
pub extern "C" fn abi_version() -> i32 {
    ABI_VERSION
}

/// Build the engine. Returns 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn init() -> i32 {
    let host: Arc<dyn RedisHost> = match CALLBACKS.with(|cell| cell.get()) {
        Some(callbacks) => Arc::new(CallbackHost { callbacks }),
        None => Arc::new(NullHost),
    };
    let runtime = match Runtime::new(host, Limits::default()) {
        Ok(runtime) => runtime,
        Err(error) => {
            log::error!("engine init failed: {error}");
            return -1;
        }
    };
    RUNTIME.with(|cell| match cell.try_borrow_mut() {
        Ok(mut slot) => {
            *slot = Some(runtime);
            0
        }
        Err(_) => -1,
    })
}

/// Destroy and rebuild the VM. Valid only after a successful [`init`].
#[no_mangle]
pub extern "C" fn reset() -> i32 {
    RUNTIME.with(|cell| {
        let Ok(mut slot) = cell.try_borrow_mut() else {
            return -1;
        };
        let Some(runtime) = slot.as_mut() else {
            return -1;
        };
        match runtime.reset() {
            Ok(()) => 0,
            Err(error) => {
                log::error!("engine reset failed: {error}");
                -1
            }
        }
    })
}

/// Evaluate a script with empty `KEYS`/`ARGV`.
///
/// # Safety
///
/// `ptr` must point at `len` readable bytes for the duration of the call,
/// or be null with `len == 0`.
#[no_mangle]
pub unsafe extern "C" fn eval(ptr: *const u8, len: usize) -> PtrLen {
    let script = slice_arg(ptr, len);
    with_runtime(|runtime| runtime.eval(script, &[], &[]))
}

/// Evaluate a script against an encoded argument array split at
/// `keys_count`.
///
/// # Safety
///
/// Both pointer/length pairs must name readable byte ranges for the
/// duration of the call, or be null with a zero length.
#[no_mangle]
pub unsafe extern "C" fn eval_with_args(
    script_ptr: *const u8,
    script_len: usize,
    args_ptr: *const u8,
    args_len: usize,
    keys_count: u32,
) -> PtrLen {
    let script = slice_arg(script_ptr, script_len);
    let args = slice_arg(args_ptr, args_len);
    with_runtime(|runtime| runtime.eval_encoded(script, args, keys_count))
}

/// Configure the caps applied to subsequent evals. Zero means unenforced.
#[no_mangle]
pub extern "C" fn set_limits(max_fuel: u32, max_reply_bytes: u32, max_arg_bytes: u32) {
    RUNTIME.with(|cell| {
        let Ok(mut slot) = cell.try_borrow_mut() else {
            return;
        };
        let Some(runtime) = slot.as_mut() else {
            return;
        };
        let limits = Limits {
            max_fuel: max_fuel.into(),
            max_reply_bytes: max_reply_bytes as usize,
            max_arg_bytes: max_arg_bytes as usize,
            ..runtime.limits()
        };
        runtime.set_limits(limits);
    });
}

const HEADER: usize = std::mem::size_of::<usize>();
const ALIGN: usize = 8;

/// Allocate a buffer whose length is tracked in a hidden header, so
/// [`free_mem`] needs no size argument. Returns null on failure.
#[no_mangle]
pub extern "C" fn alloc(size: usize) -> *mut u8 {
    let Some(total) = HEADER.checked_add(size) else {
        return std::ptr::null_mut();
    };
    let Ok(layout) = Layout::from_size_align(total, ALIGN) else {
        return std::ptr::null_mut();
    };
    let base = unsafe { std::alloc::alloc(layout) };
    if base.is_null() {
        return std::ptr::null_mut();
    }
    unsafe {
        (base as *mut usize).write(size);
        base.add(HEADER)
    }
}

/// Release a buffer produced by [`alloc`] on either side of the boundary.
/// Null is a no-op.
///
/// # Safety
///
/// `ptr` must have come from [`alloc`] and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn free_mem(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let base = ptr.sub(HEADER);
    let size = (base as *const usize).read();
    dealloc(
        base,
        Layout::from_size_align_unchecked(HEADER + size, ALIGN),
    );
}

unsafe fn slice_arg<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len)
    }
}

/// Run one eval against the thread's runtime. Calling before `init` or
/// reentering from a host callback yields the corresponding error reply.
fn with_runtime(f: impl FnOnce(&mut Runtime) -> Reply) -> PtrLen {
    let reply = RUNTIME.with(|cell| match cell.try_borrow_mut() {
        Ok(mut slot) => match slot.as_mut() {
            Some(runtime) => f(runtime),
            None => ReplyError::Uninitialized.into(),
        },
        Err(_) => ReplyError::Reentrant.into(),
    });
    export_reply(reply)
}

fn export_reply(reply: Reply) -> PtrLen {
    let encoded = match wire::encode_reply(&reply) {
        Ok(encoded) => encoded,
        Err(error) => match wire::encode_reply(&Reply::from(ReplyError::from(error))) {
            Ok(encoded) => encoded,
            Err(_) => return PtrLen::NULL,
        },
    };
    let ptr = alloc(encoded.len());
    if ptr.is_null() {
        return PtrLen::NULL;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(encoded.as_ptr(), ptr, encoded.len());
    }
    PtrLen {
        ptr,
        len: encoded.len(),
    }
}

/// A [`RedisHost`] over the registered C callback table.
struct CallbackHost {
    callbacks: HostCallbacks,
}

impl CallbackHost {
    fn dispatch(&self, callback: Option<CallFn>, args: &[Bytes]) -> Result<Reply, ReplyError> {
        let Some(callback) = callback else {
            return Err(ReplyError::NoHost);
        };
        let encoded = wire::encode_args(args).map_err(ReplyError::from)?;
        let raw = unsafe { callback(encoded.as_ptr(), encoded.len()) };
        if raw.ptr.is_null() || raw.len == 0 {
            return Err(ReplyError::EmptyHostReply);
        }
        let bytes = unsafe { std::slice::from_raw_parts(raw.ptr, raw.len) };
        let decoded = wire::decode_reply(bytes).map_err(ReplyError::from);
        unsafe { free_mem(raw.ptr) };
        decoded
    }
}

impl RedisHost for CallbackHost {
    fn call(&self, args: &[Bytes]) -> Result<Reply, ReplyError> {
        self.dispatch(self.callbacks.redis_call, args)
    }

    fn pcall(&self, args: &[Bytes]) -> Result<Reply, ReplyError> {
        let callback = self.callbacks.redis_pcall.or(self.callbacks.redis_call);
        self.dispatch(callback, args)
    }

    fn log(&self, level: LogLevel, message: &[u8]) {
        if let Some(callback) = self.callbacks.redis_log {
            unsafe { callback(level.as_i64() as u32, message.as_ptr(), message.len()) }
        }
    }
}
