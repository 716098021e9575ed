//! Interpreter lifecycle and the bridge's shared state.
//!
//! A [`BridgeContext`] owns one Lua interpreter and the installed
//! handler behind a single mutex, so callback execution is serialized
//! no matter how many engine threads fire events. The context moves
//! through [`RuntimeState`] exactly once: idle, ready, tearing down,
//! finalized. A finalized context never loads another script.

use crate::escalate::{IGNORE_EXCEPTION, IMMEDIATE_STOP, REGULAR_STOP};
use crate::handler::Handler;
use mlua::{Function, Lua, Table};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Environment variable naming the script to auto-load: either a bare
/// module name or a path whose directory is prepended to the search
/// path.
pub const SCRIPT_ENV: &str = "WEBMIRROR_SCRIPT";

/// Module loaded when [`SCRIPT_ENV`] is unset.
pub const DEFAULT_MODULE: &str = "webmirror";

/// Suffix stripped from the module name before `require`.
pub const SCRIPT_SUFFIX: &str = ".lua";

/// Factory function the loaded module must export.
pub const REGISTER_FN: &str = "register";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Idle,
    Ready,
    TearingDown,
    Finalized,
}

#[derive(Debug, Error)]
pub enum InitError {
    /// `require` could not locate the module. `silent` marks the benign
    /// case: nothing was configured and the bridge probed for the
    /// default module on its own initiative.
    #[error("script module `{module}` not found")]
    ModuleNotFound { module: String, silent: bool },
    #[error("script module does not export `register`")]
    MissingRegister,
    #[error("`register` is not callable")]
    RegisterNotCallable,
    #[error("`register` did not produce a handler table")]
    RegisterFailed(#[source] mlua::Error),
    #[error("bridge already finalized")]
    Finalized,
    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

/// The interpreter and handler, plus the per-run answer cache for the
/// interactive query callbacks.
pub(crate) struct Runtime {
    pub(crate) lua: Option<Lua>,
    pub(crate) handler: Option<Handler>,
    pub(crate) query2_answer: Option<String>,
    pub(crate) query3_answer: Option<String>,
}

impl Runtime {
    pub(crate) fn script(&self) -> Option<(&Lua, &Handler)> {
        match (&self.lua, &self.handler) {
            (Some(lua), Some(handler)) => Some((lua, handler)),
            _ => None,
        }
    }
}

/// Shared state of one embedding of the bridge.
pub struct BridgeContext {
    runtime: Mutex<Runtime>,
    state: Mutex<RuntimeState>,
    stop_requested: AtomicBool,
    abort_on_start: AtomicBool,
    active: AtomicUsize,
    entries: AtomicUsize,
    overlap: AtomicBool,
}

impl Default for BridgeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeContext {
    pub fn new() -> Self {
        Self {
            runtime: Mutex::new(Runtime {
                lua: None,
                handler: None,
                query2_answer: None,
                query3_answer: None,
            }),
            state: Mutex::new(RuntimeState::Idle),
            stop_requested: AtomicBool::new(false),
            abort_on_start: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            entries: AtomicUsize::new(0),
            overlap: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn arm_abort(&self) {
        self.abort_on_start.store(true, Ordering::SeqCst);
    }

    pub(crate) fn abort_armed(&self) -> bool {
        self.abort_on_start.load(Ordering::SeqCst)
    }

    /// Total callback entries serviced so far.
    pub fn callback_entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    /// Whether two callbacks were ever observed executing at once.
    /// Stays `false` for the lifetime of the context; the runtime mutex
    /// serializes every entry.
    pub fn observed_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    /// Run `f` with exclusive access to the interpreter.
    pub(crate) fn with_runtime<T>(&self, f: impl FnOnce(&mut Runtime) -> T) -> T {
        let mut guard = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap.store(true, Ordering::SeqCst);
        }
        self.entries.fetch_add(1, Ordering::SeqCst);
        let out = f(&mut guard);
        self.active.fetch_sub(1, Ordering::SeqCst);
        out
    }

    /// Load the configured script module, or the default one when
    /// nothing is configured.
    ///
    /// The context ends up `Ready` even when loading fails, matching
    /// the engine's expectation that initialization happens at most
    /// once; the returned error tells the caller what went wrong.
    pub fn initialize_auto(&self, from_plugin_init: bool) -> Result<(), InitError> {
        match self.state() {
            RuntimeState::Ready => return Ok(()),
            RuntimeState::TearingDown | RuntimeState::Finalized => {
                return Err(InitError::Finalized)
            }
            RuntimeState::Idle => {}
        }

        let configured = env::var(SCRIPT_ENV).ok();
        let env_was_set = configured.is_some();
        let (dir, module) = script_location(configured.as_deref());

        let lua = Lua::new();
        install_globals(&lua)?;
        prepend_search_path(&lua, &dir)?;

        let loaded = load_handler(&lua, &module);

        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        runtime.lua = Some(lua);
        *state = RuntimeState::Ready;
        match loaded {
            Ok(handler) => {
                log::info!("loaded script module `{module}` from `{dir}`");
                runtime.handler = Some(handler);
                Ok(())
            }
            Err(mut err) => {
                if let InitError::ModuleNotFound { silent, .. } = &mut err {
                    *silent = !env_was_set && from_plugin_init;
                }
                Err(err)
            }
        }
    }

    /// Install a handler produced by `register` instead of loading a
    /// module from disk. On failure the context stays `Idle`.
    pub fn initialize_with<F>(&self, register: F) -> Result<(), InitError>
    where
        F: for<'lua> FnOnce(&'lua Lua) -> mlua::Result<Table<'lua>>,
    {
        match self.state() {
            RuntimeState::Ready => return Ok(()),
            RuntimeState::TearingDown | RuntimeState::Finalized => {
                return Err(InitError::Finalized)
            }
            RuntimeState::Idle => {}
        }

        let lua = Lua::new();
        install_globals(&lua)?;
        let handler = {
            let table = register(&lua).map_err(InitError::RegisterFailed)?;
            Handler::install(&lua, table)?
        };

        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        runtime.lua = Some(lua);
        runtime.handler = Some(handler);
        *state = RuntimeState::Ready;
        Ok(())
    }

    /// Release the handler and drop the interpreter. Safe to call
    /// repeatedly and from any state.
    pub fn teardown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                RuntimeState::TearingDown | RuntimeState::Finalized => return,
                _ => *state = RuntimeState::TearingDown,
            }
        }
        {
            let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
            if let (Some(handler), Some(lua)) = (runtime.handler.take(), runtime.lua.as_ref()) {
                handler.release(lua);
            }
            runtime.query2_answer = None;
            runtime.query3_answer = None;
            runtime.lua = None;
        }
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = RuntimeState::Finalized;
        log::debug!("bridge finalized");
    }
}

/// Split a script location into a search directory and a module name.
pub(crate) fn script_location(configured: Option<&str>) -> (String, String) {
    let raw = configured.unwrap_or(DEFAULT_MODULE);
    let (dir, name) = match raw.rfind('/') {
        Some(pos) => (&raw[..pos], &raw[pos + 1..]),
        None => (".", raw),
    };
    let name = name.strip_suffix(SCRIPT_SUFFIX).unwrap_or(name);
    let name = if name.is_empty() { DEFAULT_MODULE } else { name };
    let dir = if dir.is_empty() { "/" } else { dir };
    (dir.to_string(), name.to_string())
}

/// Expose the escalation codes to scripts as globals.
fn install_globals(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set("IMMEDIATE_STOP", IMMEDIATE_STOP)?;
    globals.set("REGULAR_STOP", REGULAR_STOP)?;
    globals.set("IGNORE_EXCEPTION", IGNORE_EXCEPTION)?;
    Ok(())
}

fn prepend_search_path(lua: &Lua, dir: &str) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    let path: String = package.get("path")?;
    package.set("path", format!("{dir}/?.lua;{path}"))
}

fn load_handler(lua: &Lua, module: &str) -> Result<Handler, InitError> {
    let require: Function = lua.globals().get("require")?;
    let loaded: mlua::Value = require.call(module).map_err(|e| {
        if e.to_string().contains(&format!("module '{module}' not found")) {
            InitError::ModuleNotFound {
                module: module.to_string(),
                silent: false,
            }
        } else {
            InitError::Lua(e)
        }
    })?;
    let exports = match loaded {
        mlua::Value::Table(t) => t,
        _ => return Err(InitError::MissingRegister),
    };
    let register = match exports.get::<_, mlua::Value>(REGISTER_FN)? {
        mlua::Value::Function(f) => f,
        mlua::Value::Nil => return Err(InitError::MissingRegister),
        _ => return Err(InitError::RegisterNotCallable),
    };
    let handler: Table = register.call(()).map_err(InitError::RegisterFailed)?;
    Ok(Handler::install(lua, handler)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_location_defaults() {
        assert_eq!(
            script_location(None),
            (".".to_string(), DEFAULT_MODULE.to_string())
        );
    }

    #[test]
    fn script_location_splits_paths_and_strips_suffix() {
        assert_eq!(
            script_location(Some("/opt/scripts/mirror.lua")),
            ("/opt/scripts".to_string(), "mirror".to_string())
        );
        assert_eq!(
            script_location(Some("mirror.lua")),
            (".".to_string(), "mirror".to_string())
        );
        assert_eq!(
            script_location(Some("mirror")),
            (".".to_string(), "mirror".to_string())
        );
    }

    #[test]
    fn script_location_edge_shapes() {
        // A trailing slash means "search here, load the default module".
        assert_eq!(
            script_location(Some("/opt/scripts/")),
            ("/opt/scripts".to_string(), DEFAULT_MODULE.to_string())
        );
        assert_eq!(
            script_location(Some("/mirror.lua")),
            ("/".to_string(), "mirror".to_string())
        );
    }

    #[test]
    fn initialize_with_reaches_ready() {
        let ctx = BridgeContext::new();
        assert_eq!(ctx.state(), RuntimeState::Idle);
        ctx.initialize_with(|lua| lua.load("return {}").eval())
            .unwrap();
        assert_eq!(ctx.state(), RuntimeState::Ready);
        assert!(!ctx.stop_requested());
    }

    #[test]
    fn repeated_initialize_is_a_no_op() {
        let ctx = BridgeContext::new();
        ctx.initialize_with(|lua| lua.load("return { start = function() end }").eval())
            .unwrap();
        let called = std::cell::Cell::new(false);
        ctx.initialize_with(|lua| {
            called.set(true);
            lua.load("return {}").eval()
        })
        .unwrap();
        assert!(!called.get());
    }

    #[test]
    fn failed_register_leaves_context_idle() {
        let ctx = BridgeContext::new();
        let err = ctx
            .initialize_with(|lua| lua.load("error('refused')").eval())
            .unwrap_err();
        assert!(matches!(err, InitError::RegisterFailed(_)));
        assert_eq!(ctx.state(), RuntimeState::Idle);
    }

    #[test]
    fn teardown_is_idempotent() {
        let ctx = BridgeContext::new();
        ctx.initialize_with(|lua| lua.load("return {}").eval())
            .unwrap();
        ctx.teardown();
        assert_eq!(ctx.state(), RuntimeState::Finalized);
        ctx.teardown();
        assert_eq!(ctx.state(), RuntimeState::Finalized);
    }

    #[test]
    fn finalized_context_refuses_reinitialization() {
        let ctx = BridgeContext::new();
        ctx.initialize_with(|lua| lua.load("return {}").eval())
            .unwrap();
        ctx.teardown();
        let err = ctx
            .initialize_with(|lua| lua.load("return {}").eval())
            .unwrap_err();
        assert!(matches!(err, InitError::Finalized));
    }

    #[test]
    fn scripts_see_the_escalation_globals() {
        let ctx = BridgeContext::new();
        ctx.initialize_with(|lua| {
            let codes: (i64, i64, i64) = lua
                .load("return IMMEDIATE_STOP, REGULAR_STOP, IGNORE_EXCEPTION")
                .eval()?;
            assert_eq!(codes, (-1, 0, 1));
            lua.load("return {}").eval()
        })
        .unwrap();
    }

    #[test]
    fn stop_request_is_sticky() {
        let ctx = BridgeContext::new();
        assert!(!ctx.stop_requested());
        ctx.request_stop();
        assert!(ctx.stop_requested());
        ctx.request_stop();
        assert!(ctx.stop_requested());
    }
}
