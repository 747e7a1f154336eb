//! The `bit` library with LuaBitOp semantics: every operation normalizes its
//! inputs to the 32-bit range and returns a signed 32-bit result.

use mlua::{Lua, Result as LuaResult, Table, Variadic};

const WRAP: f64 = 4_294_967_296.0;

/// Normalize a Lua number to the signed 32-bit range: truncate toward zero,
/// then wrap modulo 2^32.
fn tobit(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(WRAP) as u32 as i32
}

fn fold(args: Variadic<f64>, name: &str, op: impl Fn(u32, u32) -> u32) -> LuaResult<i32> {
    let mut args = args.iter();
    let Some(first) = args.next() else {
        return Err(mlua::Error::RuntimeError(format!(
            "bad argument #1 to '{name}' (number expected, got no value)"
        )));
    };
    let mut acc = tobit(*first) as u32;
    for arg in args {
        acc = op(acc, tobit(*arg) as u32);
    }
    Ok(acc as i32)
}

pub(crate) fn table(lua: &Lua) -> LuaResult<Table> {
    let bit = lua.create_table()?;

    bit.set("tobit", lua.create_function(|_, n: f64| Ok(tobit(n)))?)?;
    bit.set("bnot", lua.create_function(|_, n: f64| Ok(!tobit(n)))?)?;

    bit.set(
        "band",
        lua.create_function(|_, args: Variadic<f64>| fold(args, "band", |a, b| a & b))?,
    )?;
    bit.set(
        "bor",
        lua.create_function(|_, args: Variadic<f64>| fold(args, "bor", |a, b| a | b))?,
    )?;
    bit.set(
        "bxor",
        lua.create_function(|_, args: Variadic<f64>| fold(args, "bxor", |a, b| a ^ b))?,
    )?;

    bit.set(
        "lshift",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok(((tobit(x) as u32) << (tobit(n) as u32 & 31)) as i32)
        })?,
    )?;
    bit.set(
        "rshift",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok((tobit(x) as u32 >> (tobit(n) as u32 & 31)) as i32)
        })?,
    )?;
    bit.set(
        "arshift",
        lua.create_function(|_, (x, n): (f64, f64)| Ok(tobit(x) >> (tobit(n) as u32 & 31)))?,
    )?;

    bit.set(
        "rol",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok((tobit(x) as u32).rotate_left(tobit(n) as u32 & 31) as i32)
        })?,
    )?;
    bit.set(
        "ror",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok((tobit(x) as u32).rotate_right(tobit(n) as u32 & 31) as i32)
        })?,
    )?;

    bit.set(
        "bswap",
        lua.create_function(|_, n: f64| Ok((tobit(n) as u32).swap_bytes() as i32))?,
    )?;

    bit.set(
        "tohex",
        lua.create_function(|_, (x, n): (f64, Option<f64>)| {
            let digits = n.map(tobit).unwrap_or(8);
            let upper = digits < 0;
            let width = digits.unsigned_abs().clamp(1, 8) as usize;
            let hex = format!("{:08x}", tobit(x) as u32);
            let tail = hex[8 - width..].to_string();
            Ok(if upper { tail.to_uppercase() } else { tail })
        })?,
    )?;

    Ok(bit)
}
