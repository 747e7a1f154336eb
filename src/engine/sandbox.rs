use crate::host::{LogLevel, RedisHost};
use mlua::{Lua, MultiValue, Result as LuaResult, Value};
use std::sync::Arc;

/// Globals removed after the whitelisted libraries open. Module loading is
/// scrubbed in both the global and package-registry senses.
const SCRUBBED: &[&str] = &[
    "io",
    "os",
    "debug",
    "package",
    "require",
    "dofile",
    "loadfile",
];

/// Strip every nondeterministic and I/O facility from a freshly built VM.
pub fn scrub(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    if let Value::Table(package) = globals.get::<Value>("package")? {
        if let Value::Table(loaded) = package.get::<Value>("loaded")? {
            for name in SCRUBBED {
                loaded.set(*name, Value::Nil)?;
            }
        }
    }

    for name in SCRUBBED {
        globals.set(*name, Value::Nil)?;
    }

    if let Value::Table(math) = globals.get::<Value>("math")? {
        math.set("random", Value::Nil)?;
        math.set("randomseed", Value::Nil)?;
    }

    Ok(())
}

/// Swap the base library's stdout `print` for a forwarder into the host log
/// at notice level.
pub fn replace_print(lua: &Lua, host: Arc<dyn RedisHost>) -> LuaResult<()> {
    let print = lua.create_function(move |_, args: MultiValue| {
        let line = args.iter().map(display).collect::<Vec<_>>().join("\t");
        host.log(LogLevel::Notice, line.as_bytes());
        Ok(())
    })?;
    lua.globals().set("print", print)
}

fn display(value: &Value) -> String {
    match value {
        Value::Nil => "nil".into(),
        Value::Boolean(true) => "true".into(),
        Value::Boolean(false) => "false".into(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => crate::bytes::fmt_number(*n),
        Value::String(s) => String::from_utf8_lossy(&s.as_bytes()).into_owned(),
        other => other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullHost;
    use mlua::{LuaOptions, StdLib};

    fn scrubbed_vm() -> Lua {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )
        .unwrap();
        scrub(&lua).unwrap();
        replace_print(&lua, Arc::new(NullHost)).unwrap();
        lua
    }

    fn global_exists(lua: &Lua, name: &str) -> bool {
        !matches!(lua.globals().get::<Value>(name), Ok(Value::Nil))
    }

    #[test]
    fn dangerous_globals_are_gone() {
        let lua = scrubbed_vm();
        for name in SCRUBBED {
            assert!(!global_exists(&lua, name), "{name} survived the scrub");
        }
    }

    #[test]
    fn whitelisted_libraries_survive() {
        let lua = scrubbed_vm();
        for name in ["string", "table", "math", "print", "tostring", "pcall"] {
            assert!(global_exists(&lua, name), "{name} missing");
        }
    }

    #[test]
    fn randomness_is_gone() {
        let lua = scrubbed_vm();
        let random: Value = lua.load("return math.random").eval().unwrap();
        assert!(matches!(random, Value::Nil));
        let seed: Value = lua.load("return math.randomseed").eval().unwrap();
        assert!(matches!(seed, Value::Nil));
    }

    #[test]
    fn math_otherwise_works() {
        let lua = scrubbed_vm();
        let floor: f64 = lua.load("return math.floor(2.7)").eval().unwrap();
        assert_eq!(floor, 2.0);
    }
}
