//! The `cjson` library: `encode`, `decode`, and the `cjson.null` sentinel.
//! Sequences become JSON arrays, other tables become objects with number
//! keys coerced to strings, and object keys serialize in sorted order, so
//! encoding is deterministic.

use crate::{bytes::fmt_number, wire::MAX_DEPTH};
use mlua::{LightUserData, Lua, Result as LuaResult, Table, Value};
use serde_json::{Map, Number, Value as Json};
use std::ptr;

/// JSON `null` decodes to this sentinel, and the sentinel encodes back.
fn null() -> Value {
    Value::LightUserData(LightUserData(ptr::null_mut()))
}

fn err(message: impl Into<String>) -> mlua::Error {
    mlua::Error::RuntimeError(message.into())
}

pub(crate) fn table(lua: &Lua) -> LuaResult<Table> {
    let cjson = lua.create_table()?;

    cjson.set(
        "encode",
        lua.create_function(|lua, value: Value| {
            let json = to_json(&value, 0)?;
            let text = serde_json::to_string(&json)
                .map_err(|error| err(format!("Cannot serialise: {error}")))?;
            lua.create_string(text)
        })?,
    )?;

    cjson.set(
        "decode",
        lua.create_function(|lua, text: mlua::String| {
            let json: Json = serde_json::from_slice(&text.as_bytes())
                .map_err(|error| err(format!("invalid JSON: {error}")))?;
            from_json(lua, &json)
        })?,
    )?;

    cjson.set("null", null())?;

    Ok(cjson)
}

fn to_json(value: &Value, depth: usize) -> LuaResult<Json> {
    if depth > MAX_DEPTH {
        return Err(err("Cannot serialise, excessive nesting"));
    }
    Ok(match value {
        Value::Nil => Json::Null,
        Value::LightUserData(data) if data.0.is_null() => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Number(n) => {
            let n = *n;
            if !n.is_finite() {
                return Err(err("Cannot serialise number: must not be NaN or Infinity"));
            }
            if n.fract() == 0.0 && n.abs() < 9e15 {
                Json::from(n as i64)
            } else {
                Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
            }
        }
        Value::String(s) => {
            let text = std::str::from_utf8(&s.as_bytes())
                .map_err(|_| err("Cannot serialise string: invalid UTF-8"))?
                .to_string();
            Json::String(text)
        }
        Value::Table(table) => {
            let len = table.raw_len();
            if len > 0 && is_sequence(table, len)? {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let item: Value = table.raw_get(i)?;
                    items.push(to_json(&item, depth + 1)?);
                }
                Json::Array(items)
            } else {
                let mut map = Map::new();
                for pair in table.pairs::<Value, Value>() {
                    let (key, item) = pair?;
                    let key = match key {
                        Value::String(s) => std::str::from_utf8(&s.as_bytes())
                            .map_err(|_| err("Cannot serialise table key: invalid UTF-8"))?
                            .to_string(),
                        Value::Integer(i) => i.to_string(),
                        Value::Number(n) => fmt_number(n),
                        _ => return Err(err("Cannot serialise table key")),
                    };
                    map.insert(key, to_json(&item, depth + 1)?);
                }
                Json::Object(map)
            }
        }
        _ => {
            return Err(err(format!(
                "Cannot serialise {}: type not supported",
                value.type_name()
            )))
        }
    })
}

/// Whether the table is exactly the sequence `1..=len`, with no other keys.
fn is_sequence(table: &Table, len: usize) -> LuaResult<bool> {
    let mut entries = 0usize;
    for pair in table.pairs::<Value, Value>() {
        let (key, _) = pair?;
        match key {
            Value::Integer(i) if i >= 1 && (i as u64) <= len as u64 => entries += 1,
            Value::Number(n) if n.fract() == 0.0 && n >= 1.0 && n <= len as f64 => entries += 1,
            _ => return Ok(false),
        }
    }
    Ok(entries == len)
}

fn from_json(lua: &Lua, json: &Json) -> LuaResult<Value> {
    Ok(match json {
        Json::Null => null(),
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(lua.create_string(s)?),
        Json::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, from_json(lua, item)?)?;
            }
            Value::Table(table)
        }
        Json::Object(map) => {
            let table = lua.create_table_with_capacity(0, map.len())?;
            for (key, item) in map {
                table.raw_set(key.as_str(), from_json(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}
