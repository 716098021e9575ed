//! Conversions between the generic value model and Lua values.

use mlua::Lua;
use webmirror_dynamic::{Object, Value};

pub fn dynamic_to_lua_value<'lua>(
    lua: &'lua Lua,
    value: Value,
) -> mlua::Result<mlua::Value<'lua>> {
    Ok(match value {
        Value::Null => mlua::Value::Nil,
        Value::Bool(b) => mlua::Value::Boolean(b),
        Value::I64(i) => mlua::Value::Integer(i),
        Value::F64(f) => mlua::Value::Number(f.into_inner()),
        Value::String(s) => mlua::Value::String(lua.create_string(&s)?),
        Value::Array(array) => {
            let table = lua.create_table()?;
            for (idx, element) in array.into_iter().enumerate() {
                table.set(idx + 1, dynamic_to_lua_value(lua, element)?)?;
            }
            mlua::Value::Table(table)
        }
        Value::Object(object) => {
            let table = lua.create_table()?;
            for (key, element) in object {
                table.set(key, dynamic_to_lua_value(lua, element)?)?;
            }
            mlua::Value::Table(table)
        }
    })
}

pub fn lua_value_to_dynamic(value: mlua::Value) -> mlua::Result<Value> {
    Ok(match value {
        mlua::Value::Nil => Value::Null,
        mlua::Value::Boolean(b) => Value::Bool(b),
        mlua::Value::Integer(i) => Value::I64(i),
        mlua::Value::Number(n) => Value::from(n),
        mlua::Value::String(s) => {
            Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        mlua::Value::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                // A non-empty sequence part means the table reads as an
                // array; mixed tables lose their hash part.
                let mut elements = Vec::with_capacity(len);
                for idx in 1..=len {
                    elements.push(lua_value_to_dynamic(table.raw_get(idx)?)?);
                }
                Value::Array(elements.into())
            } else {
                let mut object = Object::new();
                for pair in table.pairs::<mlua::Value, mlua::Value>() {
                    let (key, element) = pair?;
                    let key = match key {
                        mlua::Value::String(s) => {
                            String::from_utf8_lossy(s.as_bytes()).into_owned()
                        }
                        mlua::Value::Integer(i) => i.to_string(),
                        mlua::Value::Number(n) => n.to_string(),
                        _ => continue,
                    };
                    object.insert(key, lua_value_to_dynamic(element)?);
                }
                Value::Object(object)
            }
        }
        // Functions, threads and userdata have no generic counterpart.
        _ => Value::Null,
    })
}
