//! Native records the bridge marshals across the scripting boundary.
//!
//! These model the engine-owned structures at the bridge's interface:
//! the bridge borrows them for the duration of one callback, snapshots
//! them into a generic mapping, and (for the option records only)
//! writes permitted fields back when the handler accepts.

/// Truncate `s` to at most `max` bytes without splitting a UTF-8
/// sequence.
pub(crate) fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Fixed-capacity text buffer for in-place rewrites (the save-name
/// callback). Writing truncates to fit and zero-fills the tail so no
/// stale bytes survive a shorter rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedBuffer {
    bytes: Box<[u8]>,
    len: usize,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn with_contents(capacity: usize, contents: &str) -> Self {
        let mut buf = Self::new(capacity);
        buf.set(contents);
        buf
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_str(&self) -> &str {
        // Only ever written via `set`, which copies from a &str on a
        // char boundary.
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }

    /// The full backing storage, including the zeroed tail.
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }

    pub fn set(&mut self, contents: &str) {
        let truncated = truncate_str(contents, self.capacity());
        self.bytes[..truncated.len()].copy_from_slice(truncated.as_bytes());
        self.bytes[truncated.len()..].fill(0);
        self.len = truncated.len();
    }
}

/// The engine's mutable run configuration.
///
/// Field names track the generic schema keys in `marshal`. The engine's
/// file handles and opaque filter/hash pointers are not modeled here;
/// the record only carries what the schema exposes.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub wizard: i32,
    pub flush: bool,
    pub travel: i32,
    pub seeker: i32,
    pub depth: i32,
    pub ext_depth: i32,
    pub url_mode: i32,
    pub debug: i32,
    pub get_mode: i32,
    pub max_site_bytes: i64,
    pub max_file_non_html: i64,
    pub max_file_html: i64,
    pub max_sockets: i32,
    pub fragment_bytes: i64,
    pub near_link: bool,
    pub make_index: bool,
    pub keyword_index: i32,
    pub delete_old: bool,
    pub timeout: i32,
    pub rate_out: i32,
    pub max_time: i32,
    pub max_rate: i32,
    pub max_connections: f64,
    pub wait_time: i32,
    pub cache_mode: i32,
    pub shell: bool,
    pub savename_83: i32,
    pub savename_userdef: String,
    pub mime_html: bool,
    pub send_user_agent: bool,
    pub user_agent: String,
    pub referer: String,
    pub from: String,
    pub path_log: String,
    pub path_html: String,
    pub path_bin: String,
    pub retries: i32,
    pub make_stats: bool,
    pub make_tracking: bool,
    pub parse_java: bool,
    pub host_control: i32,
    pub error_page: bool,
    pub check_type: i32,
    pub all_in_cache: bool,
    pub robots: i32,
    pub external: bool,
    pub pass_privacy: bool,
    pub include_query: bool,
    pub mirror_first_page: bool,
    pub system_command: String,
    pub system_command_exec: bool,
    pub accept_cookies: bool,
    #[cfg(feature = "cookies")]
    pub cookies: Option<CookieJar>,
    pub http10: bool,
    pub no_keep_alive: bool,
    pub no_compression: bool,
    pub size_hack: bool,
    pub url_hack: bool,
    pub tolerant: bool,
    pub parse_all: bool,
    pub parse_debug: bool,
    pub no_recatch: bool,
    pub verbose_display: i32,
    pub footer: String,
    pub max_cache_bytes: i64,
    pub ftp_proxy: bool,
    pub file_list: String,
    pub url_list: String,
    pub lang_iso: String,
    pub mime_defs: String,
    pub max_links: i32,
    pub max_filters: i32,
    /// External command template; exposed to handlers, never copied
    /// back (the engine owns its storage).
    pub exec: Option<String>,
    pub quiet: bool,
    pub keyboard: bool,
    pub is_update: bool,
    pub dir_top_index: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            wizard: 0,
            flush: false,
            travel: 0,
            seeker: 1,
            depth: 9999,
            ext_depth: 0,
            url_mode: 2,
            debug: 0,
            get_mode: 3,
            max_site_bytes: -1,
            max_file_non_html: -1,
            max_file_html: -1,
            max_sockets: 4,
            fragment_bytes: -1,
            near_link: false,
            make_index: true,
            keyword_index: 0,
            delete_old: false,
            timeout: 120,
            rate_out: 0,
            max_time: -1,
            max_rate: 25000,
            max_connections: 10.0,
            wait_time: 0,
            cache_mode: 1,
            shell: false,
            savename_83: 0,
            savename_userdef: String::new(),
            mime_html: false,
            send_user_agent: true,
            user_agent: String::new(),
            referer: String::new(),
            from: String::new(),
            path_log: String::new(),
            path_html: String::new(),
            path_bin: String::new(),
            retries: 2,
            make_stats: false,
            make_tracking: false,
            parse_java: true,
            host_control: 0,
            error_page: true,
            check_type: 1,
            all_in_cache: false,
            robots: 2,
            external: false,
            pass_privacy: false,
            include_query: true,
            mirror_first_page: false,
            system_command: String::new(),
            system_command_exec: false,
            accept_cookies: true,
            #[cfg(feature = "cookies")]
            cookies: None,
            http10: false,
            no_keep_alive: false,
            no_compression: false,
            size_hack: false,
            url_hack: true,
            tolerant: false,
            parse_all: true,
            parse_debug: false,
            no_recatch: false,
            verbose_display: 0,
            footer: String::new(),
            max_cache_bytes: -1,
            ftp_proxy: false,
            file_list: String::new(),
            url_list: String::new(),
            lang_iso: String::new(),
            mime_defs: String::new(),
            max_links: 100_000,
            max_filters: 200,
            exec: None,
            quiet: false,
            keyboard: false,
            is_update: false,
            dir_top_index: false,
        }
    }
}

/// HTTP response metadata for one transfer. Read-only from the bridge's
/// perspective.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseBlock {
    pub status_code: i32,
    pub not_modified: bool,
    pub chunked: bool,
    pub compressed: bool,
    pub empty: bool,
    pub keep_alive: bool,
    pub keep_alive_trailers: bool,
    pub keep_alive_timeout: i32,
    pub keep_alive_max: i32,
    pub headers: Option<String>,
    pub size: i64,
    pub message: String,
    pub content_type: String,
    pub charset: String,
    pub content_encoding: String,
    pub location: Option<String>,
    pub total_size: i64,
    pub is_file: bool,
    pub ssl: bool,
    pub last_modified: String,
    pub etag: String,
    pub content_disposition: String,
    pub content_range: i64,
}

/// One URL's fetch lifecycle, as the engine tracks it. The bridge only
/// snapshots it; the designated rename callbacks rewrite the save path
/// through a [`BoundedBuffer`], never through this record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub url_address: String,
    pub url_file: String,
    pub save_path: String,
    pub referer_address: String,
    pub location_buffer: String,
    pub temp_file: Option<String>,
    pub status: i32,
    pub test_mode: bool,
    pub timeout: i32,
    pub timeout_refresh: i64,
    pub rate_out: i32,
    pub rate_out_time: i64,
    pub max_file_non_html: i64,
    pub max_file_html: i64,
    pub response: ResponseBlock,
    pub is_update: bool,
    pub head_request: bool,
    pub range_req_size: i64,
    pub keep_alive_start: i64,
    pub http11: bool,
    pub chunked: bool,
    pub chunk_address: Option<String>,
    pub chunk_size: i64,
    pub chunk_block_size: i64,
    pub compressed_size: i64,
    pub second_pass: Option<i64>,
    pub info: String,
    pub stop_ftp: bool,
    pub finalized: bool,
}

/// One stored cookie, an ordered list of its raw string fields.
#[cfg(feature = "cookies")]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieRecord {
    pub fields: Vec<String>,
}

/// One credential entry of the auth chain.
#[cfg(feature = "cookies")]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthEntry {
    pub prefix: String,
    pub credentials: String,
}

/// The engine's cookie store paired with its auth chain. Present on the
/// options record only when the credential subsystem is compiled in.
#[cfg(feature = "cookies")]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    pub cookies: Vec<CookieRecord>,
    pub auth: Vec<AuthEntry>,
}
