//! Process-global embedding of the bridge.
//!
//! An engine that loads the bridge as a plugin gets exactly one
//! [`BridgeContext`] for the whole process, created on first use, plus
//! a table of trampoline functions keyed by event name to feed its
//! hook registry.

use crate::dispatch::LoopStats;
use crate::events::Callback;
use crate::lifecycle::{BridgeContext, InitError};
use crate::records::{BoundedBuffer, EngineOptions, RequestContext, ResponseBlock};
use std::sync::OnceLock;

static BRIDGE: OnceLock<BridgeContext> = OnceLock::new();

/// The process-wide bridge instance.
pub fn bridge() -> &'static BridgeContext {
    BRIDGE.get_or_init(BridgeContext::new)
}

/// Plugin entry point: load the configured script module eagerly.
///
/// A missing default module with nothing configured is the "no script"
/// case and stays quiet. Any other failure is logged and arms the
/// start trampoline to cancel the crawl, so a broken script never
/// half-runs a mirror.
pub fn plugin_init() -> bool {
    match bridge().initialize_auto(true) {
        Ok(()) => {}
        Err(InitError::ModuleNotFound { module, silent: true }) => {
            log::debug!("no script module `{module}` present, running without one");
        }
        Err(err) => {
            log::error!("script initialization failed: {err}");
            bridge().arm_abort();
        }
    }
    true
}

/// One trampoline, typed by the signature its event expects.
pub enum HookFn {
    Options(fn(&mut EngineOptions) -> bool),
    Plain(fn() -> bool),
    CheckHtml(fn(&[u8], &str, &str) -> bool),
    RewriteHtml(fn(&mut Vec<u8>, &str, &str)),
    Query(fn(&str) -> String),
    Loop(fn(Option<&RequestContext>, LoopStats) -> bool),
    CheckLink(fn(&str, &str, i32) -> i64),
    Pause(fn(&str)),
    SaveFile(fn(&str)),
    LinkDetected(fn(&str) -> bool),
    LinkDetected2(fn(&str, Option<&str>) -> bool),
    TransferStatus(fn(&RequestContext)),
    SaveName(fn(&str, &str, &str, &str, &mut BoundedBuffer)),
    Header(fn(&str, &str, &str, &str, &str, &ResponseBlock) -> bool),
}

/// Every event name paired with its trampoline, in the engine's wire
/// spelling, ready to feed the engine's hook registry.
pub fn hook_table() -> [(&'static str, HookFn); Callback::COUNT] {
    [
        (Callback::Start.event_name(), HookFn::Options(start)),
        (Callback::End.event_name(), HookFn::Plain(end)),
        (
            Callback::ChangeOptions.event_name(),
            HookFn::Options(change_options),
        ),
        (Callback::CheckHtml.event_name(), HookFn::CheckHtml(check_html)),
        (
            Callback::PreprocessHtml.event_name(),
            HookFn::RewriteHtml(preprocess_html),
        ),
        (
            Callback::PostprocessHtml.event_name(),
            HookFn::RewriteHtml(postprocess_html),
        ),
        (Callback::Query2.event_name(), HookFn::Query(query2)),
        (Callback::Query3.event_name(), HookFn::Query(query3)),
        (Callback::Loop.event_name(), HookFn::Loop(loop_tick)),
        (Callback::CheckLink.event_name(), HookFn::CheckLink(check_link)),
        (Callback::Pause.event_name(), HookFn::Pause(pause)),
        (Callback::SaveFile.event_name(), HookFn::SaveFile(save_file)),
        (
            Callback::LinkDetected.event_name(),
            HookFn::LinkDetected(link_detected),
        ),
        (
            Callback::LinkDetected2.event_name(),
            HookFn::LinkDetected2(link_detected2),
        ),
        (
            Callback::TransferStatus.event_name(),
            HookFn::TransferStatus(transfer_status),
        ),
        (Callback::SaveName.event_name(), HookFn::SaveName(save_name)),
        (Callback::SendHeader.event_name(), HookFn::Header(send_header)),
        (
            Callback::ReceiveHeader.event_name(),
            HookFn::Header(receive_header),
        ),
    ]
}

/// Start trampoline. Falls back to loading the script here when the
/// engine never called [`plugin_init`]; in that lazy path a missing
/// module is an error, since the crawl is already committed.
pub fn start(options: &mut EngineOptions) -> bool {
    let ctx = bridge();
    if ctx.abort_armed() {
        log::error!("canceling crawl, script initialization failed earlier");
        return false;
    }
    if let Err(err) = ctx.initialize_auto(false) {
        log::error!("script initialization failed: {err}");
        return false;
    }
    ctx.start(options)
}

/// End trampoline: deliver the final event, then finalize the bridge.
pub fn end() -> bool {
    let ctx = bridge();
    let verdict = ctx.end();
    ctx.teardown();
    verdict
}

pub fn change_options(options: &mut EngineOptions) -> bool {
    bridge().change_options(options)
}

pub fn check_html(html: &[u8], url_address: &str, url_file: &str) -> bool {
    bridge().check_html(html, url_address, url_file)
}

pub fn preprocess_html(html: &mut Vec<u8>, url_address: &str, url_file: &str) {
    bridge().preprocess_html(html, url_address, url_file)
}

pub fn postprocess_html(html: &mut Vec<u8>, url_address: &str, url_file: &str) {
    bridge().postprocess_html(html, url_address, url_file)
}

pub fn query2(question: &str) -> String {
    bridge().query2(question)
}

pub fn query3(question: &str) -> String {
    bridge().query3(question)
}

pub fn loop_tick(context: Option<&RequestContext>, stats: LoopStats) -> bool {
    bridge().loop_tick(context, stats)
}

pub fn check_link(url_address: &str, url_file: &str, status: i32) -> i64 {
    bridge().check_link(url_address, url_file, status)
}

pub fn pause(lock_file: &str) {
    bridge().pause(lock_file)
}

pub fn save_file(filename: &str) {
    bridge().save_file(filename)
}

pub fn link_detected(link: &str) -> bool {
    bridge().link_detected(link)
}

pub fn link_detected2(link: &str, tag: Option<&str>) -> bool {
    bridge().link_detected2(link, tag)
}

pub fn transfer_status(context: &RequestContext) {
    bridge().transfer_status(context)
}

pub fn save_name(
    url_address: &str,
    url_file: &str,
    referer_address: &str,
    referer_file: &str,
    name: &mut BoundedBuffer,
) {
    bridge().save_name(url_address, url_file, referer_address, referer_file, name)
}

pub fn send_header(
    header_text: &str,
    url_address: &str,
    url_file: &str,
    referer_address: &str,
    referer_file: &str,
    response: &ResponseBlock,
) -> bool {
    bridge().send_header(
        header_text,
        url_address,
        url_file,
        referer_address,
        referer_file,
        response,
    )
}

pub fn receive_header(
    header_text: &str,
    url_address: &str,
    url_file: &str,
    referer_address: &str,
    referer_file: &str,
    response: &ResponseBlock,
) -> bool {
    bridge().receive_header(
        header_text,
        url_address,
        url_file,
        referer_address,
        referer_file,
        response,
    )
}
