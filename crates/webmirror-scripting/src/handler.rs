//! The installed scripted handler and its capability table.

use crate::events::Callback;
use mlua::{Function, Lua, RegistryKey, Table};

/// A handler table pinned in the Lua registry, with the set of callback
/// methods it implements probed once at install time.
///
/// Probing up front keeps per-callback dispatch to a plain array load
/// when the method is absent, which is the common case.
pub struct Handler {
    key: RegistryKey,
    installed: [bool; Callback::COUNT],
    has_error_handler: bool,
    has_error_policy: bool,
}

impl Handler {
    pub(crate) fn install(lua: &Lua, table: Table) -> mlua::Result<Self> {
        let mut installed = [false; Callback::COUNT];
        for cb in Callback::ALL {
            let slot = table.get::<_, mlua::Value>(cb.method_name())?;
            installed[cb.index()] = matches!(slot, mlua::Value::Function(_));
            if installed[cb.index()] {
                log::debug!("handler implements {cb}");
            }
        }
        let has_error_handler = matches!(
            table.get::<_, mlua::Value>("error_handler")?,
            mlua::Value::Function(_)
        );
        let has_error_policy = matches!(
            table.get::<_, mlua::Value>("error_policy")?,
            mlua::Value::Table(_)
        );
        let key = lua.create_registry_value(table)?;
        Ok(Self {
            key,
            installed,
            has_error_handler,
            has_error_policy,
        })
    }

    pub fn implements(&self, cb: Callback) -> bool {
        self.installed[cb.index()]
    }

    pub(crate) fn has_error_handler(&self) -> bool {
        self.has_error_handler
    }

    pub(crate) fn has_error_policy(&self) -> bool {
        self.has_error_policy
    }

    pub(crate) fn table<'lua>(&self, lua: &'lua Lua) -> mlua::Result<Table<'lua>> {
        lua.registry_value(&self.key)
    }

    /// The method for `cb`, or `None` when the handler does not
    /// implement it. Callers pass the handler table as the first
    /// argument, matching Lua's `:` calling convention.
    pub(crate) fn method<'lua>(
        &self,
        lua: &'lua Lua,
        cb: Callback,
    ) -> mlua::Result<Option<Function<'lua>>> {
        if !self.implements(cb) {
            return Ok(None);
        }
        Ok(Some(self.table(lua)?.get(cb.method_name())?))
    }

    pub(crate) fn release(self, lua: &Lua) {
        let _ = lua.remove_registry_value(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install_chunk(lua: &Lua, chunk: &str) -> Handler {
        let table: Table = lua.load(chunk).eval().unwrap();
        Handler::install(lua, table).unwrap()
    }

    #[test]
    fn probes_only_function_slots() {
        let lua = Lua::new();
        let handler = install_chunk(
            &lua,
            r#"return {
                start = function(self, opts) return true end,
                check_link = 42,
            }"#,
        );
        assert!(handler.implements(Callback::Start));
        assert!(!handler.implements(Callback::CheckLink));
        assert!(!handler.implements(Callback::End));
    }

    #[test]
    fn method_returns_callable_bound_to_table() {
        let lua = Lua::new();
        let handler = install_chunk(
            &lua,
            r#"return {
                tag = "h",
                query2 = function(self, question) return self.tag .. question end,
            }"#,
        );
        let method = handler.method(&lua, Callback::Query2).unwrap().unwrap();
        let table = handler.table(&lua).unwrap();
        let answer: String = method.call((table, "?")).unwrap();
        assert_eq!(answer, "h?");
    }

    #[test]
    fn method_is_none_when_not_implemented() {
        let lua = Lua::new();
        let handler = install_chunk(&lua, "return {}");
        assert!(handler.method(&lua, Callback::Pause).unwrap().is_none());
    }

    #[test]
    fn detects_escalation_hooks() {
        let lua = Lua::new();
        let with_both = install_chunk(
            &lua,
            r#"return {
                error_handler = function(self, name, message) return 1 end,
                error_policy = { __default__ = 0 },
            }"#,
        );
        assert!(with_both.has_error_handler());
        assert!(with_both.has_error_policy());

        let bare = install_chunk(&lua, "return {}");
        assert!(!bare.has_error_handler());
        assert!(!bare.has_error_policy());
    }

    #[test]
    fn release_drops_the_registry_pin() {
        let lua = Lua::new();
        let handler = install_chunk(&lua, "return { start = function() end }");
        handler.release(&lua);
        lua.expire_registry_values();
    }
}
