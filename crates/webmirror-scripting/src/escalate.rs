//! Tiered resolution of handler faults.
//!
//! When a callback method raises, the bridge asks, in order: the
//! handler's own `error_handler` method (its verdict is final), the
//! process environment, then the handler's `error_policy` table with
//! its default key followed by the per-callback key. Anything that goes
//! wrong while deciding how to handle a fault resolves to an immediate
//! stop.

use crate::events::Callback;
use crate::handler::Handler;
use mlua::{Function, Lua, Table};
use std::env;

/// Abort the run without waiting for in-flight transfers.
pub const IMMEDIATE_STOP: i64 = -1;
/// Finish in-flight work, then stop before the next gated callback.
pub const REGULAR_STOP: i64 = 0;
/// Log the fault and carry on.
pub const IGNORE_EXCEPTION: i64 = 1;

/// Environment variable overriding the default fault resolution.
pub const ERROR_POLICY_ENV: &str = "WEBMIRROR_ERROR_POLICY";

/// Key consulted in `error_policy` before the per-callback key.
pub const DEFAULT_POLICY_KEY: &str = "__default__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    ImmediateStop,
    RegularStop,
    IgnoreException,
}

impl Resolution {
    pub fn code(self) -> i64 {
        match self {
            Resolution::ImmediateStop => IMMEDIATE_STOP,
            Resolution::RegularStop => REGULAR_STOP,
            Resolution::IgnoreException => IGNORE_EXCEPTION,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            IMMEDIATE_STOP => Some(Resolution::ImmediateStop),
            REGULAR_STOP => Some(Resolution::RegularStop),
            IGNORE_EXCEPTION => Some(Resolution::IgnoreException),
            _ => None,
        }
    }
}

pub(crate) fn resolve(
    lua: &Lua,
    handler: Option<&Handler>,
    cb: Callback,
    fault: &mlua::Error,
) -> Resolution {
    if let Some(h) = handler {
        if h.has_error_handler() {
            return run_error_handler(lua, h, cb, fault);
        }
    }
    log::error!("{cb} failed: {fault}");

    let mut resolution = Resolution::RegularStop;
    if let Ok(raw) = env::var(ERROR_POLICY_ENV) {
        match raw.trim().parse::<i64>().ok().and_then(Resolution::from_code) {
            Some(r) => resolution = r,
            None => {
                // A garbled override fails closed, even when the script
                // carries a valid error_policy table.
                log::error!("{ERROR_POLICY_ENV} holds invalid policy {raw:?}");
                return Resolution::ImmediateStop;
            }
        }
    }

    if let Some(h) = handler {
        if h.has_error_policy() {
            match policy_lookup(lua, h, cb) {
                Ok(Some(r)) => resolution = r,
                Ok(None) => {}
                Err(()) => return Resolution::ImmediateStop,
            }
        }
    }
    resolution
}

fn run_error_handler(lua: &Lua, handler: &Handler, cb: Callback, fault: &mlua::Error) -> Resolution {
    let verdict = (|| -> mlua::Result<mlua::Value> {
        let table = handler.table(lua)?;
        let func: Function = table.get("error_handler")?;
        func.call((table, cb.method_name(), fault.to_string()))
    })();
    match verdict {
        Ok(mlua::Value::Integer(code)) => match Resolution::from_code(code) {
            Some(r) => r,
            None => {
                log::error!("error_handler for {cb} returned out-of-range code {code}");
                Resolution::ImmediateStop
            }
        },
        Ok(other) => {
            log::error!(
                "error_handler for {cb} returned {}, expected an integer",
                other.type_name()
            );
            Resolution::ImmediateStop
        }
        Err(second) => {
            log::error!("error_handler for {cb} failed itself: {second}");
            Resolution::ImmediateStop
        }
    }
}

fn policy_lookup(lua: &Lua, handler: &Handler, cb: Callback) -> Result<Option<Resolution>, ()> {
    let table = handler.table(lua).map_err(drop)?;
    let policy: Table = table.get("error_policy").map_err(drop)?;
    let mut chosen = None;
    for key in [DEFAULT_POLICY_KEY, cb.method_name()] {
        match policy.get::<_, mlua::Value>(key).map_err(drop)? {
            mlua::Value::Nil => {}
            mlua::Value::Integer(code) => match Resolution::from_code(code) {
                Some(r) => chosen = Some(r),
                None => {
                    log::error!("error_policy[{key:?}] holds out-of-range code {code}");
                    return Err(());
                }
            },
            other => {
                log::error!(
                    "error_policy[{key:?}] is a {}, expected an integer",
                    other.type_name()
                );
                return Err(());
            }
        }
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler_from(lua: &Lua, chunk: &str) -> Handler {
        let table: Table = lua.load(chunk).eval().unwrap();
        Handler::install(lua, table).unwrap()
    }

    fn fault() -> mlua::Error {
        mlua::Error::RuntimeError("boom".to_string())
    }

    fn resolve_with_env(
        lua: &Lua,
        handler: Option<&Handler>,
        cb: Callback,
        env_value: Option<&str>,
    ) -> Resolution {
        let _guard = crate::testenv::lock();
        match env_value {
            Some(v) => env::set_var(ERROR_POLICY_ENV, v),
            None => env::remove_var(ERROR_POLICY_ENV),
        }
        let resolution = resolve(lua, handler, cb, &fault());
        env::remove_var(ERROR_POLICY_ENV);
        resolution
    }

    #[test]
    fn default_is_regular_stop() {
        let lua = Lua::new();
        let handler = handler_from(&lua, "return {}");
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, None);
        assert_eq!(r, Resolution::RegularStop);
    }

    #[test]
    fn environment_overrides_default() {
        let lua = Lua::new();
        let handler = handler_from(&lua, "return {}");
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, Some("1"));
        assert_eq!(r, Resolution::IgnoreException);
    }

    #[test]
    fn invalid_environment_value_stops_immediately() {
        let lua = Lua::new();
        let handler = handler_from(&lua, "return {}");
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, Some("always"));
        assert_eq!(r, Resolution::ImmediateStop);
    }

    #[test]
    fn invalid_environment_value_is_not_rescued_by_the_policy_table() {
        let lua = Lua::new();
        let handler = handler_from(&lua, "return { error_policy = { __default__ = 1 } }");
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, Some("always"));
        assert_eq!(r, Resolution::ImmediateStop);
    }

    #[test]
    fn policy_default_key_applies_to_every_callback() {
        let lua = Lua::new();
        let handler = handler_from(&lua, "return { error_policy = { __default__ = 1 } }");
        let r = resolve_with_env(&lua, Some(&handler), Callback::SaveFile, None);
        assert_eq!(r, Resolution::IgnoreException);
    }

    #[test]
    fn per_callback_key_overrides_default_key() {
        let lua = Lua::new();
        let handler = handler_from(
            &lua,
            r#"return { error_policy = { __default__ = 1, save_file = -1 } }"#,
        );
        let r = resolve_with_env(&lua, Some(&handler), Callback::SaveFile, None);
        assert_eq!(r, Resolution::ImmediateStop);
        let other = resolve_with_env(&lua, Some(&handler), Callback::Query2, None);
        assert_eq!(other, Resolution::IgnoreException);
    }

    #[test]
    fn policy_table_overrides_environment() {
        let lua = Lua::new();
        let handler = handler_from(&lua, "return { error_policy = { __default__ = -1 } }");
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, Some("1"));
        assert_eq!(r, Resolution::ImmediateStop);
    }

    #[test]
    fn malformed_policy_entry_stops_immediately() {
        let lua = Lua::new();
        let handler = handler_from(&lua, r#"return { error_policy = { __default__ = "no" } }"#);
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, None);
        assert_eq!(r, Resolution::ImmediateStop);
    }

    #[test]
    fn error_handler_verdict_is_final() {
        let lua = Lua::new();
        let handler = handler_from(
            &lua,
            r#"return {
                error_handler = function(self, name, message) return 1 end,
                error_policy = { __default__ = -1 },
            }"#,
        );
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, Some("-1"));
        assert_eq!(r, Resolution::IgnoreException);
    }

    #[test]
    fn error_handler_receives_callback_name_and_message() {
        let lua = Lua::new();
        let handler = handler_from(
            &lua,
            r#"return {
                error_handler = function(self, name, message)
                    self.seen_name = name
                    self.seen_message = message
                    return 0
                end,
            }"#,
        );
        let r = resolve_with_env(&lua, Some(&handler), Callback::CheckLink, None);
        assert_eq!(r, Resolution::RegularStop);
        let table = handler.table(&lua).unwrap();
        assert_eq!(table.get::<_, String>("seen_name").unwrap(), "check_link");
        assert!(table
            .get::<_, String>("seen_message")
            .unwrap()
            .contains("boom"));
    }

    #[test]
    fn faulty_error_handler_stops_immediately() {
        let lua = Lua::new();
        let handler = handler_from(
            &lua,
            r#"return { error_handler = function() error("worse") end }"#,
        );
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, None);
        assert_eq!(r, Resolution::ImmediateStop);
    }

    #[test]
    fn non_integer_verdict_stops_immediately() {
        let lua = Lua::new();
        let handler = handler_from(
            &lua,
            r#"return { error_handler = function() return "fine" end }"#,
        );
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, None);
        assert_eq!(r, Resolution::ImmediateStop);
    }

    #[test]
    fn out_of_range_verdict_stops_immediately() {
        let lua = Lua::new();
        let handler = handler_from(
            &lua,
            r#"return { error_handler = function() return 7 end }"#,
        );
        let r = resolve_with_env(&lua, Some(&handler), Callback::Start, None);
        assert_eq!(r, Resolution::ImmediateStop);
    }

    #[test]
    fn no_handler_resolves_from_environment_only() {
        let lua = Lua::new();
        let r = resolve_with_env(&lua, None, Callback::Start, Some("0"));
        assert_eq!(r, Resolution::RegularStop);
    }
}
