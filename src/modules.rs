mod bit;
mod cjson;
mod cmsgpack;
mod strpack;

use mlua::{Lua, Result as LuaResult};

/// Install the four Redis companion libraries as globals on a fresh VM.
pub(crate) fn install(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    globals.set("cjson", cjson::table(lua)?)?;
    globals.set("cmsgpack", cmsgpack::table(lua)?)?;
    globals.set("struct", strpack::table(lua)?)?;
    globals.set("bit", bit::table(lua)?)?;
    Ok(())
}
