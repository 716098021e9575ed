//! Driving a whole crawl from a host program.
//!
//! The inverse embedding of `hooks`: instead of the engine loading the
//! bridge as a plugin, the host supplies the handler up front, runs an
//! engine implementing [`CrawlEngine`] to completion, and gets the exit
//! code and error message back as a plain result.

use crate::lifecycle::BridgeContext;
use anyhow::{bail, Context as _};
use mlua::{Lua, Table};

/// A crawl engine the harness can drive end to end.
pub trait CrawlEngine {
    /// Run the crawl, firing bridge callbacks as it goes, and return
    /// the engine's exit code.
    fn main(&self, bridge: &BridgeContext, args: &[String]) -> i32;

    /// The engine's description of the last failure, when it kept one.
    fn error_message(&self) -> Option<String>;
}

/// Run one complete mirror with `register`'s handler installed before
/// the engine starts. The bridge is torn down before returning; the
/// error message is reported only for a nonzero exit code.
pub fn run_mirror<E, F>(
    engine: &E,
    register: F,
    args: &[String],
) -> anyhow::Result<(i32, Option<String>)>
where
    E: CrawlEngine,
    F: for<'lua> FnOnce(&'lua Lua) -> mlua::Result<Table<'lua>>,
{
    if args.is_empty() {
        bail!("no arguments given to the crawl engine");
    }
    let bridge = BridgeContext::new();
    bridge
        .initialize_with(register)
        .context("installing scripted handler")?;
    let code = engine.main(&bridge, args);
    bridge.teardown();
    let message = if code != 0 { engine.error_message() } else { None };
    Ok((code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::EngineOptions;
    use std::cell::RefCell;

    struct ProbeEngine {
        exit_code: i32,
        failure: Option<&'static str>,
        seen_args: RefCell<Vec<String>>,
    }

    impl ProbeEngine {
        fn new(exit_code: i32, failure: Option<&'static str>) -> Self {
            Self {
                exit_code,
                failure,
                seen_args: RefCell::new(Vec::new()),
            }
        }
    }

    impl CrawlEngine for ProbeEngine {
        fn main(&self, bridge: &BridgeContext, args: &[String]) -> i32 {
            *self.seen_args.borrow_mut() = args.to_vec();
            let mut opts = EngineOptions::default();
            if !bridge.start(&mut opts) {
                return 1;
            }
            bridge.save_file("index.html");
            bridge.end();
            self.exit_code
        }

        fn error_message(&self) -> Option<String> {
            self.failure.map(str::to_string)
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn successful_run_reports_no_message() {
        let engine = ProbeEngine::new(0, Some("stale message"));
        let (code, message) = run_mirror(
            &engine,
            |lua| lua.load("return { start = function() return true end }").eval(),
            &args(&["http://example.org/"]),
        )
        .unwrap();
        assert_eq!(code, 0);
        assert_eq!(message, None);
        assert_eq!(*engine.seen_args.borrow(), args(&["http://example.org/"]));
    }

    #[test]
    fn failed_run_carries_the_engine_message() {
        let engine = ProbeEngine::new(2, Some("network unreachable"));
        let (code, message) = run_mirror(
            &engine,
            |lua| lua.load("return {}").eval(),
            &args(&["http://example.org/"]),
        )
        .unwrap();
        assert_eq!(code, 2);
        assert_eq!(message.as_deref(), Some("network unreachable"));
    }

    #[test]
    fn empty_arguments_are_rejected() {
        let engine = ProbeEngine::new(0, None);
        let err = run_mirror(&engine, |lua| lua.load("return {}").eval(), &[]).unwrap_err();
        assert!(err.to_string().contains("no arguments"));
    }

    #[test]
    fn handler_can_cancel_the_crawl_at_start() {
        let engine = ProbeEngine::new(0, None);
        let (code, message) = run_mirror(
            &engine,
            |lua| lua.load("return { start = function() return false end }").eval(),
            &args(&["http://example.org/"]),
        )
        .unwrap();
        assert_eq!(code, 1);
        assert_eq!(message, None);
    }

    #[test]
    fn broken_register_surfaces_as_an_error() {
        let engine = ProbeEngine::new(0, None);
        let err = run_mirror(
            &engine,
            |lua| lua.load("error('no handler today')").eval::<mlua::Table>(),
            &args(&["http://example.org/"]),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("installing scripted handler"));
    }
}
