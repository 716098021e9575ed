//! The fixed set of engine extension points the bridge can service.

use std::fmt;

/// One of the engine's named callback events.
///
/// The engine registers a trampoline per event under [`event_name`]
/// (dashed, the engine's wire spelling); the scripted handler supplies a
/// method per event under [`method_name`] (underscored, a valid Lua
/// identifier).
///
/// [`event_name`]: Callback::event_name
/// [`method_name`]: Callback::method_name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Callback {
    Start,
    End,
    ChangeOptions,
    CheckHtml,
    PreprocessHtml,
    PostprocessHtml,
    Query2,
    Query3,
    Loop,
    CheckLink,
    Pause,
    SaveFile,
    LinkDetected,
    LinkDetected2,
    TransferStatus,
    SaveName,
    SendHeader,
    ReceiveHeader,
}

impl Callback {
    pub const COUNT: usize = 18;

    pub const ALL: [Callback; Self::COUNT] = [
        Callback::Start,
        Callback::End,
        Callback::ChangeOptions,
        Callback::CheckHtml,
        Callback::PreprocessHtml,
        Callback::PostprocessHtml,
        Callback::Query2,
        Callback::Query3,
        Callback::Loop,
        Callback::CheckLink,
        Callback::Pause,
        Callback::SaveFile,
        Callback::LinkDetected,
        Callback::LinkDetected2,
        Callback::TransferStatus,
        Callback::SaveName,
        Callback::SendHeader,
        Callback::ReceiveHeader,
    ];

    /// Name of the handler method probed on the scripted table.
    pub fn method_name(self) -> &'static str {
        match self {
            Callback::Start => "start",
            Callback::End => "end",
            Callback::ChangeOptions => "change_options",
            Callback::CheckHtml => "check_html",
            Callback::PreprocessHtml => "preprocess_html",
            Callback::PostprocessHtml => "postprocess_html",
            Callback::Query2 => "query2",
            Callback::Query3 => "query3",
            Callback::Loop => "loop",
            Callback::CheckLink => "check_link",
            Callback::Pause => "pause",
            Callback::SaveFile => "save_file",
            Callback::LinkDetected => "link_detected",
            Callback::LinkDetected2 => "link_detected2",
            Callback::TransferStatus => "transfer_status",
            Callback::SaveName => "save_name",
            Callback::SendHeader => "send_header",
            Callback::ReceiveHeader => "receive_header",
        }
    }

    /// Name under which the engine registers the matching trampoline.
    pub fn event_name(self) -> &'static str {
        match self {
            Callback::Start => "start",
            Callback::End => "end",
            Callback::ChangeOptions => "change-options",
            Callback::CheckHtml => "check-html",
            Callback::PreprocessHtml => "preprocess-html",
            Callback::PostprocessHtml => "postprocess-html",
            Callback::Query2 => "query2",
            Callback::Query3 => "query3",
            Callback::Loop => "loop",
            Callback::CheckLink => "check-link",
            Callback::Pause => "pause",
            Callback::SaveFile => "save-file",
            Callback::LinkDetected => "link-detected",
            Callback::LinkDetected2 => "link-detected2",
            Callback::TransferStatus => "transfer-status",
            Callback::SaveName => "save-name",
            Callback::SendHeader => "send-header",
            Callback::ReceiveHeader => "receive-header",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}
