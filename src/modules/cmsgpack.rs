//! The `cmsgpack` library: `pack` concatenates one MessagePack encoding per
//! argument, `unpack` returns one value per encoded object. Integers take
//! the smallest encoding that holds them; sequences become arrays and other
//! tables become maps.

use crate::wire::MAX_DEPTH;
use bytes::{Buf, BufMut};
use mlua::{Lua, MultiValue, Result as LuaResult, Table, Value};

fn err(message: &str) -> mlua::Error {
    mlua::Error::RuntimeError(message.into())
}

pub(crate) fn table(lua: &Lua) -> LuaResult<Table> {
    let cmsgpack = lua.create_table()?;

    cmsgpack.set(
        "pack",
        lua.create_function(|lua, args: MultiValue| {
            let mut buf = Vec::new();
            for value in args.iter() {
                write_value(&mut buf, value, 0)?;
            }
            lua.create_string(&buf)
        })?,
    )?;

    cmsgpack.set(
        "unpack",
        lua.create_function(|lua, data: mlua::String| {
            let bytes = data.as_bytes();
            let mut buf: &[u8] = &bytes;
            let mut values = Vec::new();
            while !buf.is_empty() {
                values.push(read_value(lua, &mut buf, 0)?);
            }
            Ok(MultiValue::from_iter(values))
        })?,
    )?;

    Ok(cmsgpack)
}

fn write_value(buf: &mut Vec<u8>, value: &Value, depth: usize) -> LuaResult<()> {
    if depth > MAX_DEPTH {
        return Err(err("cannot pack: excessive nesting"));
    }
    match value {
        Value::Nil => buf.put_u8(0xc0),
        Value::Boolean(false) => buf.put_u8(0xc2),
        Value::Boolean(true) => buf.put_u8(0xc3),
        Value::Integer(i) => write_int(buf, *i),
        Value::Number(n) => {
            let n = *n;
            if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
                write_int(buf, n as i64);
            } else {
                buf.put_u8(0xcb);
                buf.put_f64(n);
            }
        }
        Value::String(s) => write_str(buf, &s.as_bytes()),
        Value::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                write_array_header(buf, len)?;
                for i in 1..=len {
                    let item: Value = table.raw_get(i)?;
                    write_value(buf, &item, depth + 1)?;
                }
            } else {
                let pairs: Vec<(Value, Value)> = table
                    .pairs::<Value, Value>()
                    .collect::<LuaResult<Vec<_>>>()?;
                write_map_header(buf, pairs.len())?;
                for (key, item) in &pairs {
                    write_value(buf, key, depth + 1)?;
                    write_value(buf, item, depth + 1)?;
                }
            }
        }
        _ => return Err(err("cannot pack: unsupported type")),
    }
    Ok(())
}

fn write_int(buf: &mut Vec<u8>, i: i64) {
    match i {
        0..=127 => buf.put_u8(i as u8),
        -32..=-1 => buf.put_u8(i as u8),
        -128..=-33 => {
            buf.put_u8(0xd0);
            buf.put_i8(i as i8);
        }
        128..=255 => {
            buf.put_u8(0xcc);
            buf.put_u8(i as u8);
        }
        -32_768..=-129 => {
            buf.put_u8(0xd1);
            buf.put_i16(i as i16);
        }
        256..=65_535 => {
            buf.put_u8(0xcd);
            buf.put_u16(i as u16);
        }
        -2_147_483_648..=-32_769 => {
            buf.put_u8(0xd2);
            buf.put_i32(i as i32);
        }
        65_536..=4_294_967_295 => {
            buf.put_u8(0xce);
            buf.put_u32(i as u32);
        }
        _ if i < 0 => {
            buf.put_u8(0xd3);
            buf.put_i64(i);
        }
        _ => {
            buf.put_u8(0xcf);
            buf.put_u64(i as u64);
        }
    }
}

fn write_str(buf: &mut Vec<u8>, s: &[u8]) {
    match s.len() {
        0..=31 => buf.put_u8(0xa0 | s.len() as u8),
        32..=255 => {
            buf.put_u8(0xd9);
            buf.put_u8(s.len() as u8);
        }
        256..=65_535 => {
            buf.put_u8(0xda);
            buf.put_u16(s.len() as u16);
        }
        _ => {
            buf.put_u8(0xdb);
            buf.put_u32(s.len() as u32);
        }
    }
    buf.put_slice(s);
}

fn write_array_header(buf: &mut Vec<u8>, len: usize) -> LuaResult<()> {
    match len {
        0..=15 => buf.put_u8(0x90 | len as u8),
        16..=65_535 => {
            buf.put_u8(0xdc);
            buf.put_u16(len as u16);
        }
        _ => {
            buf.put_u8(0xdd);
            buf.put_u32(u32::try_from(len).map_err(|_| err("cannot pack: table too large"))?);
        }
    }
    Ok(())
}

fn write_map_header(buf: &mut Vec<u8>, len: usize) -> LuaResult<()> {
    match len {
        0..=15 => buf.put_u8(0x80 | len as u8),
        16..=65_535 => {
            buf.put_u8(0xde);
            buf.put_u16(len as u16);
        }
        _ => {
            buf.put_u8(0xdf);
            buf.put_u32(u32::try_from(len).map_err(|_| err("cannot pack: table too large"))?);
        }
    }
    Ok(())
}

fn need(buf: &&[u8], n: usize) -> LuaResult<()> {
    if buf.remaining() < n {
        Err(err("missing bytes in input"))
    } else {
        Ok(())
    }
}

fn read_value(lua: &Lua, buf: &mut &[u8], depth: usize) -> LuaResult<Value> {
    if depth > MAX_DEPTH {
        return Err(err("cannot unpack: excessive nesting"));
    }
    need(buf, 1)?;
    let tag = buf.get_u8();
    Ok(match tag {
        0x00..=0x7f => Value::Integer(i64::from(tag)),
        0xe0..=0xff => Value::Integer(i64::from(tag as i8)),
        0x80..=0x8f => read_map(lua, buf, usize::from(tag & 0x0f), depth)?,
        0x90..=0x9f => read_array(lua, buf, usize::from(tag & 0x0f), depth)?,
        0xa0..=0xbf => read_str(lua, buf, usize::from(tag & 0x1f))?,
        0xc0 => Value::Nil,
        0xc2 => Value::Boolean(false),
        0xc3 => Value::Boolean(true),
        0xc4 | 0xd9 => {
            need(buf, 1)?;
            let len = usize::from(buf.get_u8());
            read_str(lua, buf, len)?
        }
        0xc5 | 0xda => {
            need(buf, 2)?;
            let len = usize::from(buf.get_u16());
            read_str(lua, buf, len)?
        }
        0xc6 | 0xdb => {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            read_str(lua, buf, len)?
        }
        0xca => {
            need(buf, 4)?;
            Value::Number(f64::from(buf.get_f32()))
        }
        0xcb => {
            need(buf, 8)?;
            Value::Number(buf.get_f64())
        }
        0xcc => {
            need(buf, 1)?;
            Value::Integer(i64::from(buf.get_u8()))
        }
        0xcd => {
            need(buf, 2)?;
            Value::Integer(i64::from(buf.get_u16()))
        }
        0xce => {
            need(buf, 4)?;
            Value::Integer(i64::from(buf.get_u32()))
        }
        0xcf => {
            need(buf, 8)?;
            let value = buf.get_u64();
            match i64::try_from(value) {
                Ok(i) => Value::Integer(i),
                Err(_) => Value::Number(value as f64),
            }
        }
        0xd0 => {
            need(buf, 1)?;
            Value::Integer(i64::from(buf.get_i8()))
        }
        0xd1 => {
            need(buf, 2)?;
            Value::Integer(i64::from(buf.get_i16()))
        }
        0xd2 => {
            need(buf, 4)?;
            Value::Integer(i64::from(buf.get_i32()))
        }
        0xd3 => {
            need(buf, 8)?;
            Value::Integer(buf.get_i64())
        }
        0xdc => {
            need(buf, 2)?;
            let len = usize::from(buf.get_u16());
            read_array(lua, buf, len, depth)?
        }
        0xdd => {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            read_array(lua, buf, len, depth)?
        }
        0xde => {
            need(buf, 2)?;
            let len = usize::from(buf.get_u16());
            read_map(lua, buf, len, depth)?
        }
        0xdf => {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            read_map(lua, buf, len, depth)?
        }
        _ => return Err(err("bad data in input")),
    })
}

fn read_str(lua: &Lua, buf: &mut &[u8], len: usize) -> LuaResult<Value> {
    need(buf, len)?;
    let string = lua.create_string(&buf[..len])?;
    buf.advance(len);
    Ok(Value::String(string))
}

fn read_array(lua: &Lua, buf: &mut &[u8], len: usize, depth: usize) -> LuaResult<Value> {
    // One byte per element at minimum bounds an honest count.
    need(buf, len)?;
    let table = lua.create_table_with_capacity(len, 0)?;
    for i in 1..=len {
        table.raw_set(i, read_value(lua, buf, depth + 1)?)?;
    }
    Ok(Value::Table(table))
}

fn read_map(lua: &Lua, buf: &mut &[u8], len: usize, depth: usize) -> LuaResult<Value> {
    need(buf, len.saturating_mul(2))?;
    let table = lua.create_table_with_capacity(0, len)?;
    for _ in 0..len {
        let key = read_value(lua, buf, depth + 1)?;
        let value = read_value(lua, buf, depth + 1)?;
        if matches!(key, Value::Nil) {
            return Err(err("bad data in input"));
        }
        table.set(key, value)?;
    }
    Ok(Value::Table(table))
}
