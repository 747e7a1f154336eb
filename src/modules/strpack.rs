//! The `struct` library: `pack`/`unpack`/`size` over a byte-oriented format
//! string. Supported options: `<` `>` `=` byte order, `b B h H l L` fixed
//! integers, `i`/`I` with a size digit 1-8, `f` `d` floats, `s`
//! zero-terminated string, `cN` fixed-width string, `x` padding, spaces and
//! `!` ignored. Byte order starts little-endian.

use mlua::{Lua, MultiValue, Result as LuaResult, Table, Value};

fn err(message: impl Into<String>) -> mlua::Error {
    mlua::Error::RuntimeError(message.into())
}

enum Op {
    SetLittle(bool),
    Int { size: usize, signed: bool },
    Float,
    Double,
    Str,
    Char(usize),
    Pad,
}

fn ops(fmt: &[u8]) -> LuaResult<Vec<Op>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < fmt.len() {
        let c = fmt[i];
        i += 1;
        match c {
            b'<' | b'=' => out.push(Op::SetLittle(true)),
            b'>' => out.push(Op::SetLittle(false)),
            b'!' | b' ' => {}
            b'b' => out.push(Op::Int { size: 1, signed: true }),
            b'B' => out.push(Op::Int { size: 1, signed: false }),
            b'h' => out.push(Op::Int { size: 2, signed: true }),
            b'H' => out.push(Op::Int { size: 2, signed: false }),
            b'l' => out.push(Op::Int { size: 8, signed: true }),
            b'L' => out.push(Op::Int { size: 8, signed: false }),
            b'i' | b'I' => {
                let (size, next) = digits(fmt, i);
                i = next;
                let size = size.unwrap_or(4);
                if !(1..=8).contains(&size) {
                    return Err(err("integral size out of limits"));
                }
                out.push(Op::Int {
                    size,
                    signed: c == b'i',
                });
            }
            b'f' => out.push(Op::Float),
            b'd' => out.push(Op::Double),
            b's' => out.push(Op::Str),
            b'c' => {
                let (size, next) = digits(fmt, i);
                i = next;
                match size {
                    Some(size) if size > 0 => out.push(Op::Char(size)),
                    _ => return Err(err("invalid size for format option 'c'")),
                }
            }
            b'x' => out.push(Op::Pad),
            other => {
                return Err(err(format!(
                    "invalid format option '{}'",
                    char::from(other)
                )))
            }
        }
    }
    Ok(out)
}

fn digits(fmt: &[u8], mut i: usize) -> (Option<usize>, usize) {
    let start = i;
    let mut value = 0usize;
    while i < fmt.len() && fmt[i].is_ascii_digit() {
        value = value.saturating_mul(10).saturating_add(usize::from(fmt[i] - b'0'));
        i += 1;
    }
    if i == start {
        (None, i)
    } else {
        (Some(value), i)
    }
}

pub(crate) fn table(lua: &Lua) -> LuaResult<Table> {
    let strpack = lua.create_table()?;

    strpack.set(
        "pack",
        lua.create_function(|lua, (fmt, args): (mlua::String, MultiValue)| {
            let mut little = true;
            let mut buf = Vec::new();
            let mut args = args.into_iter();
            for op in ops(&fmt.as_bytes())? {
                match op {
                    Op::SetLittle(value) => little = value,
                    Op::Pad => buf.push(0),
                    Op::Int { size, .. } => {
                        let value = next_number(&mut args)?.trunc() as i64;
                        put_int(&mut buf, value as u64, size, little);
                    }
                    Op::Float => {
                        let value = next_number(&mut args)? as f32;
                        put_bytes(&mut buf, &value.to_le_bytes(), little);
                    }
                    Op::Double => {
                        let value = next_number(&mut args)?;
                        put_bytes(&mut buf, &value.to_le_bytes(), little);
                    }
                    Op::Str => {
                        buf.extend_from_slice(&next_string(&mut args)?);
                        buf.push(0);
                    }
                    Op::Char(size) => {
                        let value = next_string(&mut args)?;
                        if value.len() < size {
                            return Err(err("string too short for format option 'c'"));
                        }
                        buf.extend_from_slice(&value[..size]);
                    }
                }
            }
            lua.create_string(&buf)
        })?,
    )?;

    strpack.set(
        "unpack",
        lua.create_function(
            |lua, (fmt, data, init): (mlua::String, mlua::String, Option<i64>)| {
                let data = data.as_bytes();
                let mut pos = match init {
                    Some(init) if init > 1 => init as usize - 1,
                    _ => 0,
                };
                let mut little = true;
                let mut values = Vec::new();
                for op in ops(&fmt.as_bytes())? {
                    match op {
                        Op::SetLittle(value) => little = value,
                        Op::Pad => {
                            need(&data, pos, 1)?;
                            pos += 1;
                        }
                        Op::Int { size, signed } => {
                            need(&data, pos, size)?;
                            values.push(get_int(&data[pos..pos + size], signed, little));
                            pos += size;
                        }
                        Op::Float => {
                            need(&data, pos, 4)?;
                            let raw = ordered::<4>(&data[pos..pos + 4], little);
                            values.push(Value::Number(f64::from(f32::from_le_bytes(raw))));
                            pos += 4;
                        }
                        Op::Double => {
                            need(&data, pos, 8)?;
                            let raw = ordered::<8>(&data[pos..pos + 8], little);
                            values.push(Value::Number(f64::from_le_bytes(raw)));
                            pos += 8;
                        }
                        Op::Str => {
                            let Some(end) = data[pos.min(data.len())..].iter().position(|b| *b == 0)
                            else {
                                return Err(err("unfinished string for format 's'"));
                            };
                            values.push(Value::String(
                                lua.create_string(&data[pos..pos + end])?,
                            ));
                            pos += end + 1;
                        }
                        Op::Char(size) => {
                            need(&data, pos, size)?;
                            values.push(Value::String(
                                lua.create_string(&data[pos..pos + size])?,
                            ));
                            pos += size;
                        }
                    }
                }
                values.push(Value::Integer(pos as i64 + 1));
                Ok(MultiValue::from_iter(values))
            },
        )?,
    )?;

    strpack.set(
        "size",
        lua.create_function(|_, fmt: mlua::String| {
            let mut total = 0usize;
            for op in ops(&fmt.as_bytes())? {
                total += match op {
                    Op::SetLittle(_) => 0,
                    Op::Pad => 1,
                    Op::Int { size, .. } => size,
                    Op::Float => 4,
                    Op::Double => 8,
                    Op::Char(size) => size,
                    Op::Str => return Err(err("variable-size format in size")),
                };
            }
            Ok(total)
        })?,
    )?;

    Ok(strpack)
}

fn next_number(args: &mut impl Iterator<Item = Value>) -> LuaResult<f64> {
    match args.next() {
        Some(Value::Integer(i)) => Ok(i as f64),
        Some(Value::Number(n)) => Ok(n),
        _ => Err(err("bad argument to 'pack' (number expected)")),
    }
}

fn next_string(args: &mut impl Iterator<Item = Value>) -> LuaResult<Vec<u8>> {
    match args.next() {
        Some(Value::String(s)) => Ok(s.as_bytes().to_vec()),
        Some(Value::Integer(i)) => Ok(i.to_string().into_bytes()),
        Some(Value::Number(n)) => Ok(crate::bytes::fmt_number(n).into_bytes()),
        _ => Err(err("bad argument to 'pack' (string expected)")),
    }
}

fn put_int(buf: &mut Vec<u8>, value: u64, size: usize, little: bool) {
    let bytes = value.to_le_bytes();
    if little {
        buf.extend_from_slice(&bytes[..size]);
    } else {
        buf.extend(bytes[..size].iter().rev());
    }
}

fn put_bytes(buf: &mut Vec<u8>, le: &[u8], little: bool) {
    if little {
        buf.extend_from_slice(le);
    } else {
        buf.extend(le.iter().rev());
    }
}

/// Reassemble `N` wire bytes into little-endian order.
fn ordered<const N: usize>(raw: &[u8], little: bool) -> [u8; N] {
    let mut out = [0u8; N];
    for (i, b) in raw.iter().enumerate() {
        if little {
            out[i] = *b;
        } else {
            out[N - 1 - i] = *b;
        }
    }
    out
}

fn get_int(raw: &[u8], signed: bool, little: bool) -> Value {
    let mut value = 0u64;
    if little {
        for b in raw.iter().rev() {
            value = value << 8 | u64::from(*b);
        }
    } else {
        for b in raw {
            value = value << 8 | u64::from(*b);
        }
    }
    if signed {
        let shift = 64 - 8 * raw.len() as u32;
        Value::Integer((value as i64) << shift >> shift)
    } else {
        match i64::try_from(value) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Number(value as f64),
        }
    }
}

fn need(data: &[u8], pos: usize, len: usize) -> LuaResult<()> {
    if pos.saturating_add(len) > data.len() {
        Err(err("data string too short"))
    } else {
        Ok(())
    }
}
