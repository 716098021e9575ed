//! Per-callback dispatch from engine events to handler methods.
//!
//! Every entry point takes the runtime mutex, snapshots the native
//! arguments into Lua values, calls the handler method if the script
//! implements it, and folds the result back into the engine's types.
//! Faults route through `escalate`: callbacks whose return value
//! reaches the engine directly translate the resolution into their
//! return value, the rest act on the shared stop flag.

use crate::escalate::{resolve, Resolution};
use crate::events::Callback;
use crate::handler::Handler;
use crate::lifecycle::{BridgeContext, Runtime};
use crate::luaconv::{dynamic_to_lua_value, lua_value_to_dynamic};
use crate::marshal::Marshal;
use crate::records::{BoundedBuffer, EngineOptions, RequestContext, ResponseBlock};
use mlua::Lua;
use std::path::Path;
use std::thread;
use std::time::Duration;
use webmirror_dynamic::{Object, Value};

/// Crawl progress counters passed to the periodic callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopStats {
    pub queue_capacity: i64,
    pub queue_position: i64,
    pub links_total: i64,
    pub links_non_html: i64,
    pub elapsed_seconds: i64,
}

impl LoopStats {
    fn to_generic(self) -> Object {
        let mut obj = Object::new();
        obj.insert("queue_capacity", self.queue_capacity);
        obj.insert("queue_position", self.queue_position);
        obj.insert("links_total", self.links_total);
        obj.insert("links_non_html", self.links_non_html);
        obj.insert("elapsed_seconds", self.elapsed_seconds);
        obj
    }
}

/// Nil, false and integer zero all read as a rejection; scripts ported
/// from the numeric convention keep working.
fn truthy(value: &mlua::Value) -> bool {
    !matches!(
        value,
        mlua::Value::Nil | mlua::Value::Boolean(false) | mlua::Value::Integer(0)
    )
}

/// Call the handler's method for `cb` with the handler table prepended,
/// or `None` when the script does not implement it.
fn invoke<'lua, A>(
    lua: &'lua Lua,
    handler: &Handler,
    cb: Callback,
    args: A,
) -> mlua::Result<Option<mlua::Value<'lua>>>
where
    A: mlua::IntoLuaMulti<'lua>,
{
    let Some(method) = handler.method(lua, cb)? else {
        return Ok(None);
    };
    let table = handler.table(lua)?;
    let mut multi = args.into_lua_multi(lua)?;
    multi.push_front(mlua::Value::Table(table));
    Ok(Some(method.call(multi)?))
}

fn request_arg<'lua>(
    lua: &'lua Lua,
    context: Option<&RequestContext>,
) -> mlua::Result<mlua::Value<'lua>> {
    let snapshot = match context {
        Some(ctx) => ctx.to_generic(),
        None => Object::new(),
    };
    dynamic_to_lua_value(lua, Value::Object(snapshot))
}

impl BridgeContext {
    /// Direct path: the resolution becomes the callback's own verdict.
    /// An immediate stop and a regular stop both report "do not
    /// proceed"; the engine tears down through its normal path either
    /// way.
    fn escalate_direct(
        &self,
        lua: &Lua,
        handler: Option<&Handler>,
        cb: Callback,
        fault: &mlua::Error,
    ) -> bool {
        matches!(
            resolve(lua, handler, cb, fault),
            Resolution::IgnoreException
        )
    }

    /// Indirect path: the callback's return value cannot carry the
    /// resolution, so act on the shared state instead.
    fn escalate_indirect(
        &self,
        lua: &Lua,
        handler: Option<&Handler>,
        cb: Callback,
        fault: &mlua::Error,
    ) {
        match resolve(lua, handler, cb, fault) {
            Resolution::IgnoreException => {}
            Resolution::RegularStop => self.request_stop(),
            Resolution::ImmediateStop => {
                log::error!("unrecoverable fault in {cb}, aborting");
                std::process::exit(1);
            }
        }
    }

    fn gated(&self, cb: Callback) -> bool {
        if self.stop_requested() {
            log::debug!("{cb} suppressed, stop already requested");
            return true;
        }
        false
    }

    fn process_options(
        &self,
        lua: &Lua,
        handler: &Handler,
        cb: Callback,
        options: &mut EngineOptions,
    ) -> bool {
        let outcome = (|| -> mlua::Result<bool> {
            let snapshot = dynamic_to_lua_value(lua, Value::Object(options.to_generic()))?;
            let Some(verdict) = invoke(lua, handler, cb, snapshot.clone())? else {
                return Ok(true);
            };
            if !truthy(&verdict) {
                return Ok(false);
            }
            // The script edits the table in place; a truthy verdict
            // means copy the edits back.
            let edited = lua_value_to_dynamic(snapshot)?;
            let Some(obj) = edited.as_object() else {
                return Err(mlua::Error::RuntimeError(
                    "options table lost its keys".to_string(),
                ));
            };
            options.from_generic(obj).map_err(mlua::Error::external)?;
            Ok(true)
        })();
        match outcome {
            Ok(proceed) => proceed,
            Err(e) => self.escalate_direct(lua, Some(handler), cb, &e),
        }
    }

    /// Crawl is starting. A falsy verdict or a prior stop request
    /// cancels it before any transfer begins.
    pub fn start(&self, options: &mut EngineOptions) -> bool {
        if self.gated(Callback::Start) {
            return false;
        }
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return true;
            };
            self.process_options(lua, handler, Callback::Start, options)
        })
    }

    /// Options were edited mid-run (interactive reconfiguration).
    pub fn change_options(&self, options: &mut EngineOptions) -> bool {
        if self.gated(Callback::ChangeOptions) {
            return false;
        }
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return true;
            };
            self.process_options(lua, handler, Callback::ChangeOptions, options)
        })
    }

    /// Crawl finished. Runs even after a stop request so scripts always
    /// see a final event.
    pub fn end(&self) -> bool {
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return true;
            };
            match invoke(lua, handler, Callback::End, ()) {
                Ok(Some(verdict)) => truthy(&verdict),
                Ok(None) => true,
                Err(e) => self.escalate_direct(lua, Some(handler), Callback::End, &e),
            }
        })
    }

    /// Should this document be parsed for links?
    pub fn check_html(&self, html: &[u8], url_address: &str, url_file: &str) -> bool {
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return true;
            };
            let outcome = (|| -> mlua::Result<Option<bool>> {
                let text = lua.create_string(html)?;
                Ok(
                    invoke(lua, handler, Callback::CheckHtml, (text, url_address, url_file))?
                        .map(|v| truthy(&v)),
                )
            })();
            match outcome {
                Ok(Some(verdict)) => verdict,
                Ok(None) => true,
                Err(e) => {
                    self.escalate_indirect(lua, Some(handler), Callback::CheckHtml, &e);
                    true
                }
            }
        })
    }

    fn rewrite_html(&self, cb: Callback, html: &mut Vec<u8>, url_address: &str, url_file: &str) {
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return;
            };
            let outcome = (|| -> mlua::Result<Option<mlua::Value>> {
                let text = lua.create_string(&html[..])?;
                invoke(lua, handler, cb, (text, url_address, url_file))
            })();
            match outcome {
                Ok(Some(mlua::Value::String(replacement))) => {
                    html.clear();
                    html.extend_from_slice(replacement.as_bytes());
                }
                // Any non-string result leaves the document alone.
                Ok(_) => {}
                Err(e) => self.escalate_indirect(lua, Some(handler), cb, &e),
            }
        })
    }

    /// Offer the document for rewriting before link extraction.
    pub fn preprocess_html(&self, html: &mut Vec<u8>, url_address: &str, url_file: &str) {
        self.rewrite_html(Callback::PreprocessHtml, html, url_address, url_file)
    }

    /// Offer the document for rewriting after link extraction.
    pub fn postprocess_html(&self, html: &mut Vec<u8>, url_address: &str, url_file: &str) {
        self.rewrite_html(Callback::PostprocessHtml, html, url_address, url_file)
    }

    fn query(&self, cb: Callback, question: &str, default: &str) -> String {
        self.with_runtime(|rt| {
            let Runtime {
                lua,
                handler,
                query2_answer,
                query3_answer,
            } = rt;
            let (Some(lua), Some(handler)) = (lua.as_ref(), handler.as_ref()) else {
                return default.to_string();
            };
            let outcome = (|| -> mlua::Result<Option<String>> {
                match invoke(lua, handler, cb, question)? {
                    Some(mlua::Value::String(s)) => {
                        Ok(Some(String::from_utf8_lossy(s.as_bytes()).into_owned()))
                    }
                    Some(_) | None => Ok(None),
                }
            })();
            match outcome {
                Ok(Some(answer)) => {
                    let slot = match cb {
                        Callback::Query2 => query2_answer,
                        _ => query3_answer,
                    };
                    *slot = Some(answer.clone());
                    answer
                }
                Ok(None) => default.to_string(),
                Err(e) => {
                    self.escalate_indirect(lua, Some(handler), cb, &e);
                    default.to_string()
                }
            }
        })
    }

    /// Interactive yes/no question ("follow this redirect?"). Defaults
    /// to yes when no script answers.
    pub fn query2(&self, question: &str) -> String {
        self.query(Callback::Query2, question, "y")
    }

    /// Interactive wildcard question ("which links?"). Defaults to all.
    pub fn query3(&self, question: &str) -> String {
        self.query(Callback::Query3, question, "*")
    }

    /// Periodic progress tick. A falsy verdict or a pending stop
    /// request tells the engine to wind down.
    pub fn loop_tick(&self, context: Option<&RequestContext>, stats: LoopStats) -> bool {
        if self.gated(Callback::Loop) {
            return false;
        }
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return true;
            };
            let outcome = (|| -> mlua::Result<Option<bool>> {
                let request = request_arg(lua, context)?;
                let counters = dynamic_to_lua_value(lua, Value::Object(stats.to_generic()))?;
                Ok(invoke(lua, handler, Callback::Loop, (request, counters))?
                    .map(|v| truthy(&v)))
            })();
            match outcome {
                Ok(Some(verdict)) => verdict,
                Ok(None) => true,
                Err(e) => self.escalate_direct(lua, Some(handler), Callback::Loop, &e),
            }
        })
    }

    /// Ask the script whether a discovered link should be fetched.
    /// Returns the script's integer verdict, or -1 for "no opinion".
    pub fn check_link(&self, url_address: &str, url_file: &str, status: i32) -> i64 {
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return -1;
            };
            match invoke(
                lua,
                handler,
                Callback::CheckLink,
                (url_address, url_file, status),
            ) {
                Ok(Some(mlua::Value::Integer(verdict))) => verdict,
                Ok(_) => -1,
                Err(e) => {
                    self.escalate_indirect(lua, Some(handler), Callback::CheckLink, &e);
                    -1
                }
            }
        })
    }

    /// The engine hit its pause lock. A scripted handler blocks however
    /// it likes; otherwise the bridge polls for the lock file to
    /// disappear, off the runtime mutex so other threads keep running.
    pub fn pause(&self, lock_file: &str) {
        let handled = self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return false;
            };
            match invoke(lua, handler, Callback::Pause, lock_file) {
                Ok(Some(_)) => true,
                Ok(None) => false,
                Err(e) => {
                    self.escalate_indirect(lua, Some(handler), Callback::Pause, &e);
                    true
                }
            }
        });
        if !handled {
            while Path::new(lock_file).exists() {
                thread::sleep(Duration::from_secs(1));
            }
        }
    }

    /// A file was written to the mirror.
    pub fn save_file(&self, filename: &str) {
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return;
            };
            if let Err(e) = invoke(lua, handler, Callback::SaveFile, filename) {
                self.escalate_indirect(lua, Some(handler), Callback::SaveFile, &e);
            }
        })
    }

    /// A link was discovered. A falsy verdict drops it.
    pub fn link_detected(&self, link: &str) -> bool {
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return true;
            };
            match invoke(lua, handler, Callback::LinkDetected, link) {
                Ok(Some(verdict)) => truthy(&verdict),
                Ok(None) => true,
                Err(e) => {
                    self.escalate_indirect(lua, Some(handler), Callback::LinkDetected, &e);
                    true
                }
            }
        })
    }

    /// Like [`link_detected`], with the enclosing tag when the parser
    /// still has it.
    ///
    /// [`link_detected`]: BridgeContext::link_detected
    pub fn link_detected2(&self, link: &str, tag: Option<&str>) -> bool {
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return true;
            };
            match invoke(lua, handler, Callback::LinkDetected2, (link, tag)) {
                Ok(Some(verdict)) => truthy(&verdict),
                Ok(None) => true,
                Err(e) => {
                    self.escalate_indirect(lua, Some(handler), Callback::LinkDetected2, &e);
                    true
                }
            }
        })
    }

    /// One transfer finished (in either direction of success).
    pub fn transfer_status(&self, context: &RequestContext) {
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return;
            };
            let outcome = (|| -> mlua::Result<Option<mlua::Value>> {
                let request = request_arg(lua, Some(context))?;
                invoke(lua, handler, Callback::TransferStatus, request)
            })();
            if let Err(e) = outcome {
                self.escalate_indirect(lua, Some(handler), Callback::TransferStatus, &e);
            }
        })
    }

    /// Let the script rename the local file before it is created. The
    /// returned name lands in `name`, truncated to its capacity.
    pub fn save_name(
        &self,
        url_address: &str,
        url_file: &str,
        referer_address: &str,
        referer_file: &str,
        name: &mut BoundedBuffer,
    ) {
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return;
            };
            let current = name.as_str().to_string();
            match invoke(
                lua,
                handler,
                Callback::SaveName,
                (url_address, url_file, referer_address, referer_file, current),
            ) {
                Ok(Some(mlua::Value::String(renamed))) => {
                    name.set(&String::from_utf8_lossy(renamed.as_bytes()));
                }
                Ok(_) => {}
                Err(e) => {
                    self.escalate_indirect(lua, Some(handler), Callback::SaveName, &e);
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn header(
        &self,
        cb: Callback,
        header_text: &str,
        url_address: &str,
        url_file: &str,
        referer_address: &str,
        referer_file: &str,
        response: &ResponseBlock,
    ) -> bool {
        if self.gated(cb) {
            return false;
        }
        self.with_runtime(|rt| {
            let Some((lua, handler)) = rt.script() else {
                return true;
            };
            let outcome = (|| -> mlua::Result<Option<bool>> {
                let block = dynamic_to_lua_value(lua, Value::Object(response.to_generic()))?;
                Ok(invoke(
                    lua,
                    handler,
                    cb,
                    (
                        header_text,
                        url_address,
                        url_file,
                        referer_address,
                        referer_file,
                        block,
                    ),
                )?
                .map(|v| truthy(&v)))
            })();
            match outcome {
                Ok(Some(verdict)) => verdict,
                Ok(None) => true,
                Err(e) => self.escalate_direct(lua, Some(handler), cb, &e),
            }
        })
    }

    /// An outgoing request header is about to be sent. A falsy verdict
    /// cancels the transfer.
    pub fn send_header(
        &self,
        header_text: &str,
        url_address: &str,
        url_file: &str,
        referer_address: &str,
        referer_file: &str,
        response: &ResponseBlock,
    ) -> bool {
        self.header(
            Callback::SendHeader,
            header_text,
            url_address,
            url_file,
            referer_address,
            referer_file,
            response,
        )
    }

    /// A response header arrived. A falsy verdict abandons the
    /// transfer.
    pub fn receive_header(
        &self,
        header_text: &str,
        url_address: &str,
        url_file: &str,
        referer_address: &str,
        referer_file: &str,
        response: &ResponseBlock,
    ) -> bool {
        self.header(
            Callback::ReceiveHeader,
            header_text,
            url_address,
            url_file,
            referer_address,
            referer_file,
            response,
        )
    }
}
