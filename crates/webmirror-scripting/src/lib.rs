//! Scripted callback bridge for a crawl engine.
//!
//! Embeds a Lua interpreter next to the engine and routes the engine's
//! extension points through a user-supplied handler table: the script
//! can veto transfers, rewrite documents and local file names, edit the
//! run configuration, and decide how its own failures escalate. One
//! interpreter serves the whole process and callbacks are serialized,
//! so handlers never observe concurrent entry.

mod dispatch;
mod escalate;
mod events;
mod handler;
mod harness;
pub mod hooks;
mod lifecycle;
mod luaconv;
mod marshal;
mod records;

pub use dispatch::LoopStats;
pub use escalate::{
    Resolution, DEFAULT_POLICY_KEY, ERROR_POLICY_ENV, IGNORE_EXCEPTION, IMMEDIATE_STOP,
    REGULAR_STOP,
};
pub use events::Callback;
pub use handler::Handler;
pub use harness::{run_mirror, CrawlEngine};
pub use hooks::{bridge, hook_table, plugin_init, HookFn};
pub use lifecycle::{
    BridgeContext, InitError, RuntimeState, DEFAULT_MODULE, REGISTER_FN, SCRIPT_ENV,
    SCRIPT_SUFFIX,
};
pub use luaconv::{dynamic_to_lua_value, lua_value_to_dynamic};
pub use marshal::{FieldDef, FieldError, FieldType, FieldValue, Marshal};
#[cfg(feature = "cookies")]
pub use records::{AuthEntry, CookieJar, CookieRecord};
pub use records::{BoundedBuffer, EngineOptions, RequestContext, ResponseBlock};
