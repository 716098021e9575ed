//! Declarative field schemas mapping native records to generic values.
//!
//! Each record declares a flat table of [`FieldDef`]s. Snapshots walk
//! the table and emit an [`Object`]; restores validate every staged
//! field against the table first and only then write, so a bad value
//! from a handler never leaves a record half-updated.

use crate::records::{truncate_str, EngineOptions, RequestContext, ResponseBlock};
#[cfg(feature = "cookies")]
use crate::records::CookieJar;
use thiserror::Error;
use webmirror_dynamic::{Object, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("field `{field}` missing from snapshot")]
    Missing { field: &'static str },
    #[error("field `{field}` expected {expected}, got {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("field `{field}` out of range")]
    OutOfRange { field: &'static str },
}

/// Wire type of one schema field. Restores validate against this;
/// read-only fields never consult it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Long,
    Float,
    /// Required string, truncated to `max` bytes on restore.
    Str { max: usize },
    OptStr,
    OptInt,
}

/// A validated value staged for write-back.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f64),
    Str(String),
    OptStr(Option<String>),
    OptInt(Option<i64>),
}

/// One field of a record's schema. `get` returning `None` omits the
/// key from the snapshot; `set: None` marks the field read-only.
pub struct FieldDef<R> {
    pub name: &'static str,
    pub ty: FieldType,
    pub get: fn(&R) -> Option<Value>,
    pub set: Option<fn(&mut R, FieldValue)>,
}

/// Records with a declarative marshaling schema.
pub trait Marshal: Sized + 'static {
    fn schema() -> &'static [FieldDef<Self>];

    fn to_generic(&self) -> Object {
        schema_snapshot(self, Self::schema())
    }

    fn from_generic(&mut self, snapshot: &Object) -> Result<(), FieldError> {
        schema_restore(self, Self::schema(), snapshot)
    }
}

pub(crate) fn schema_snapshot<R>(record: &R, schema: &[FieldDef<R>]) -> Object {
    let mut obj = Object::new();
    for def in schema {
        if let Some(value) = (def.get)(record) {
            obj.insert(def.name, value);
        }
    }
    obj
}

pub(crate) fn schema_restore<R>(
    record: &mut R,
    schema: &[FieldDef<R>],
    snapshot: &Object,
) -> Result<(), FieldError> {
    let mut staged = Vec::with_capacity(schema.len());
    for def in schema {
        let Some(set) = def.set else { continue };
        staged.push((set, field_value(def.name, def.ty, snapshot)?));
    }
    for (set, value) in staged {
        set(record, value);
    }
    Ok(())
}

fn wrong(field: &'static str, expected: &'static str, found: &Value) -> FieldError {
    FieldError::WrongType {
        field,
        expected,
        found: found.variant_name(),
    }
}

fn field_value(
    name: &'static str,
    ty: FieldType,
    snapshot: &Object,
) -> Result<FieldValue, FieldError> {
    let found = snapshot.get(name);
    match ty {
        FieldType::OptStr => match found {
            None | Some(Value::Null) => Ok(FieldValue::OptStr(None)),
            Some(Value::String(s)) => Ok(FieldValue::OptStr(Some(s.clone()))),
            Some(other) => Err(wrong(name, "string or nil", other)),
        },
        FieldType::OptInt => match found {
            None | Some(Value::Null) => Ok(FieldValue::OptInt(None)),
            Some(other) => other
                .coerce_signed()
                .map(|n| FieldValue::OptInt(Some(n)))
                .ok_or_else(|| wrong(name, "integer or nil", other)),
        },
        _ => {
            let value = found.ok_or(FieldError::Missing { field: name })?;
            match ty {
                FieldType::Bool => match value {
                    Value::Bool(b) => Ok(FieldValue::Bool(*b)),
                    other => other
                        .coerce_signed()
                        .map(|n| FieldValue::Bool(n != 0))
                        .ok_or_else(|| wrong(name, "boolean", other)),
                },
                FieldType::Int => {
                    let n = value
                        .coerce_signed()
                        .ok_or_else(|| wrong(name, "integer", value))?;
                    i32::try_from(n)
                        .map(FieldValue::Int)
                        .map_err(|_| FieldError::OutOfRange { field: name })
                }
                FieldType::Long => value
                    .coerce_signed()
                    .map(FieldValue::Long)
                    .ok_or_else(|| wrong(name, "integer", value)),
                FieldType::Float => value
                    .coerce_float()
                    .map(FieldValue::Float)
                    .ok_or_else(|| wrong(name, "number", value)),
                FieldType::Str { max } => value
                    .as_str()
                    .map(|s| FieldValue::Str(truncate_str(s, max).to_string()))
                    .ok_or_else(|| wrong(name, "string", value)),
                FieldType::OptStr | FieldType::OptInt => unreachable!(),
            }
        }
    }
}

macro_rules! bool_field {
    ($rec:ty, $field:ident) => {
        FieldDef {
            name: stringify!($field),
            ty: FieldType::Bool,
            get: |r: &$rec| Some(Value::Bool(r.$field)),
            set: Some(|r: &mut $rec, v| {
                if let FieldValue::Bool(b) = v {
                    r.$field = b;
                }
            }),
        }
    };
}

macro_rules! int_field {
    ($rec:ty, $field:ident) => {
        FieldDef {
            name: stringify!($field),
            ty: FieldType::Int,
            get: |r: &$rec| Some(Value::I64(r.$field as i64)),
            set: Some(|r: &mut $rec, v| {
                if let FieldValue::Int(n) = v {
                    r.$field = n;
                }
            }),
        }
    };
}

macro_rules! long_field {
    ($rec:ty, $field:ident) => {
        FieldDef {
            name: stringify!($field),
            ty: FieldType::Long,
            get: |r: &$rec| Some(Value::I64(r.$field)),
            set: Some(|r: &mut $rec, v| {
                if let FieldValue::Long(n) = v {
                    r.$field = n;
                }
            }),
        }
    };
}

macro_rules! float_field {
    ($rec:ty, $field:ident) => {
        FieldDef {
            name: stringify!($field),
            ty: FieldType::Float,
            get: |r: &$rec| Some(Value::from(r.$field)),
            set: Some(|r: &mut $rec, v| {
                if let FieldValue::Float(n) = v {
                    r.$field = n;
                }
            }),
        }
    };
}

macro_rules! str_field {
    ($rec:ty, $field:ident, $max:expr) => {
        FieldDef {
            name: stringify!($field),
            ty: FieldType::Str { max: $max },
            get: |r: &$rec| Some(Value::String(r.$field.clone())),
            set: Some(|r: &mut $rec, v| {
                if let FieldValue::Str(s) = v {
                    r.$field = s;
                }
            }),
        }
    };
}

macro_rules! opt_str_field {
    ($rec:ty, $field:ident) => {
        FieldDef {
            name: stringify!($field),
            ty: FieldType::OptStr,
            get: |r: &$rec| r.$field.clone().map(Value::String),
            set: Some(|r: &mut $rec, v| {
                if let FieldValue::OptStr(s) = v {
                    r.$field = s;
                }
            }),
        }
    };
    ($rec:ty, $field:ident, readonly) => {
        FieldDef {
            name: stringify!($field),
            ty: FieldType::OptStr,
            get: |r: &$rec| r.$field.clone().map(Value::String),
            set: None,
        }
    };
}

macro_rules! opt_int_field {
    ($rec:ty, $field:ident) => {
        FieldDef {
            name: stringify!($field),
            ty: FieldType::OptInt,
            get: |r: &$rec| r.$field.map(Value::I64),
            set: Some(|r: &mut $rec, v| {
                if let FieldValue::OptInt(n) = v {
                    r.$field = n;
                }
            }),
        }
    };
}

static OPTIONS_SCHEMA: &[FieldDef<EngineOptions>] = &[
    int_field!(EngineOptions, wizard),
    bool_field!(EngineOptions, flush),
    int_field!(EngineOptions, travel),
    int_field!(EngineOptions, seeker),
    int_field!(EngineOptions, depth),
    int_field!(EngineOptions, ext_depth),
    int_field!(EngineOptions, url_mode),
    int_field!(EngineOptions, debug),
    int_field!(EngineOptions, get_mode),
    long_field!(EngineOptions, max_site_bytes),
    long_field!(EngineOptions, max_file_non_html),
    long_field!(EngineOptions, max_file_html),
    int_field!(EngineOptions, max_sockets),
    long_field!(EngineOptions, fragment_bytes),
    bool_field!(EngineOptions, near_link),
    bool_field!(EngineOptions, make_index),
    int_field!(EngineOptions, keyword_index),
    bool_field!(EngineOptions, delete_old),
    int_field!(EngineOptions, timeout),
    int_field!(EngineOptions, rate_out),
    int_field!(EngineOptions, max_time),
    int_field!(EngineOptions, max_rate),
    float_field!(EngineOptions, max_connections),
    int_field!(EngineOptions, wait_time),
    int_field!(EngineOptions, cache_mode),
    bool_field!(EngineOptions, shell),
    int_field!(EngineOptions, savename_83),
    str_field!(EngineOptions, savename_userdef, 256),
    bool_field!(EngineOptions, mime_html),
    bool_field!(EngineOptions, send_user_agent),
    str_field!(EngineOptions, user_agent, 128),
    str_field!(EngineOptions, referer, 256),
    str_field!(EngineOptions, from, 256),
    str_field!(EngineOptions, path_log, 1024),
    str_field!(EngineOptions, path_html, 1024),
    str_field!(EngineOptions, path_bin, 1024),
    int_field!(EngineOptions, retries),
    bool_field!(EngineOptions, make_stats),
    bool_field!(EngineOptions, make_tracking),
    bool_field!(EngineOptions, parse_java),
    int_field!(EngineOptions, host_control),
    bool_field!(EngineOptions, error_page),
    int_field!(EngineOptions, check_type),
    bool_field!(EngineOptions, all_in_cache),
    int_field!(EngineOptions, robots),
    bool_field!(EngineOptions, external),
    bool_field!(EngineOptions, pass_privacy),
    bool_field!(EngineOptions, include_query),
    bool_field!(EngineOptions, mirror_first_page),
    str_field!(EngineOptions, system_command, 2048),
    bool_field!(EngineOptions, system_command_exec),
    bool_field!(EngineOptions, accept_cookies),
    bool_field!(EngineOptions, http10),
    bool_field!(EngineOptions, no_keep_alive),
    bool_field!(EngineOptions, no_compression),
    bool_field!(EngineOptions, size_hack),
    bool_field!(EngineOptions, url_hack),
    bool_field!(EngineOptions, tolerant),
    bool_field!(EngineOptions, parse_all),
    bool_field!(EngineOptions, parse_debug),
    bool_field!(EngineOptions, no_recatch),
    int_field!(EngineOptions, verbose_display),
    str_field!(EngineOptions, footer, 256),
    long_field!(EngineOptions, max_cache_bytes),
    bool_field!(EngineOptions, ftp_proxy),
    str_field!(EngineOptions, file_list, 1024),
    str_field!(EngineOptions, url_list, 1024),
    str_field!(EngineOptions, lang_iso, 64),
    str_field!(EngineOptions, mime_defs, 2048),
    int_field!(EngineOptions, max_links),
    int_field!(EngineOptions, max_filters),
    opt_str_field!(EngineOptions, exec, readonly),
    bool_field!(EngineOptions, quiet),
    bool_field!(EngineOptions, keyboard),
    bool_field!(EngineOptions, is_update),
    bool_field!(EngineOptions, dir_top_index),
];

impl Marshal for EngineOptions {
    fn schema() -> &'static [FieldDef<Self>] {
        OPTIONS_SCHEMA
    }

    #[cfg(feature = "cookies")]
    fn to_generic(&self) -> Object {
        let mut obj = schema_snapshot(self, Self::schema());
        if let Some(jar) = &self.cookies {
            // Exposed for inspection only; restores never read it back.
            obj.insert("cookie", Value::Object(jar.to_generic()));
        }
        obj
    }
}

static RESPONSE_SCHEMA: &[FieldDef<ResponseBlock>] = &[
    int_field!(ResponseBlock, status_code),
    bool_field!(ResponseBlock, not_modified),
    bool_field!(ResponseBlock, chunked),
    bool_field!(ResponseBlock, compressed),
    bool_field!(ResponseBlock, empty),
    bool_field!(ResponseBlock, keep_alive),
    bool_field!(ResponseBlock, keep_alive_trailers),
    int_field!(ResponseBlock, keep_alive_timeout),
    int_field!(ResponseBlock, keep_alive_max),
    opt_str_field!(ResponseBlock, headers),
    long_field!(ResponseBlock, size),
    str_field!(ResponseBlock, message, 80),
    str_field!(ResponseBlock, content_type, 64),
    str_field!(ResponseBlock, charset, 64),
    str_field!(ResponseBlock, content_encoding, 64),
    opt_str_field!(ResponseBlock, location),
    long_field!(ResponseBlock, total_size),
    bool_field!(ResponseBlock, is_file),
    bool_field!(ResponseBlock, ssl),
    str_field!(ResponseBlock, last_modified, 64),
    str_field!(ResponseBlock, etag, 64),
    str_field!(ResponseBlock, content_disposition, 256),
    long_field!(ResponseBlock, content_range),
];

impl Marshal for ResponseBlock {
    fn schema() -> &'static [FieldDef<Self>] {
        RESPONSE_SCHEMA
    }
}

static REQUEST_SCHEMA: &[FieldDef<RequestContext>] = &[
    str_field!(RequestContext, url_address, 1024),
    str_field!(RequestContext, url_file, 1024),
    str_field!(RequestContext, save_path, 1024),
    str_field!(RequestContext, referer_address, 1024),
    str_field!(RequestContext, location_buffer, 1024),
    opt_str_field!(RequestContext, temp_file),
    int_field!(RequestContext, status),
    bool_field!(RequestContext, test_mode),
    int_field!(RequestContext, timeout),
    long_field!(RequestContext, timeout_refresh),
    int_field!(RequestContext, rate_out),
    long_field!(RequestContext, rate_out_time),
    long_field!(RequestContext, max_file_non_html),
    long_field!(RequestContext, max_file_html),
    bool_field!(RequestContext, is_update),
    bool_field!(RequestContext, head_request),
    long_field!(RequestContext, range_req_size),
    long_field!(RequestContext, keep_alive_start),
    bool_field!(RequestContext, http11),
    bool_field!(RequestContext, chunked),
    opt_str_field!(RequestContext, chunk_address),
    long_field!(RequestContext, chunk_size),
    long_field!(RequestContext, chunk_block_size),
    long_field!(RequestContext, compressed_size),
    opt_int_field!(RequestContext, second_pass),
    str_field!(RequestContext, info, 256),
    bool_field!(RequestContext, stop_ftp),
    bool_field!(RequestContext, finalized),
];

impl Marshal for RequestContext {
    fn schema() -> &'static [FieldDef<Self>] {
        REQUEST_SCHEMA
    }

    fn to_generic(&self) -> Object {
        let mut obj = schema_snapshot(self, Self::schema());
        obj.insert("response", Value::Object(self.response.to_generic()));
        obj
    }

    fn from_generic(&mut self, snapshot: &Object) -> Result<(), FieldError> {
        let nested = snapshot.get("response").ok_or(FieldError::Missing {
            field: "response",
        })?;
        let nested = nested.as_object().ok_or_else(|| FieldError::WrongType {
            field: "response",
            expected: "mapping",
            found: nested.variant_name(),
        })?;
        // Validate the nested block against a scratch copy so a bad
        // snapshot leaves both records untouched.
        let mut response = self.response.clone();
        response.from_generic(nested)?;
        schema_restore(self, Self::schema(), snapshot)?;
        self.response = response;
        Ok(())
    }
}

#[cfg(feature = "cookies")]
impl CookieJar {
    /// Snapshot the jar: cookies as arrays of raw fields, the auth
    /// chain as `[prefix, credentials]` pairs.
    pub fn to_generic(&self) -> Object {
        let mut obj = Object::new();
        obj.insert(
            "cookies",
            Value::Array(
                self.cookies
                    .iter()
                    .map(|c| {
                        Value::Array(
                            c.fields
                                .iter()
                                .map(|f| Value::String(f.clone()))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
        );
        obj.insert(
            "auth",
            Value::Array(
                self.auth
                    .iter()
                    .map(|a| {
                        Value::Array(
                            vec![
                                Value::String(a.prefix.clone()),
                                Value::String(a.credentials.clone()),
                            ]
                            .into(),
                        )
                    })
                    .collect(),
            ),
        );
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn options_snapshot_carries_every_field() {
        let opts = EngineOptions::default();
        let snap = opts.to_generic();
        assert_eq!(snap.get("depth"), Some(&Value::I64(9999)));
        assert_eq!(snap.get("flush"), Some(&Value::Bool(false)));
        assert_eq!(snap.get("max_site_bytes"), Some(&Value::I64(-1)));
        // Absent optionals stay out of the snapshot entirely.
        assert_eq!(snap.get("exec"), None);
    }

    #[test]
    fn options_round_trip_applies_edits() {
        let opts = EngineOptions::default();
        let mut snap = opts.to_generic();
        snap.insert("depth", 3i64);
        snap.insert("user_agent", "webmirror/1.0");
        snap.insert("flush", true);

        let mut restored = EngineOptions::default();
        restored.from_generic(&snap).unwrap();
        assert_eq!(restored.depth, 3);
        assert_eq!(restored.user_agent, "webmirror/1.0");
        assert!(restored.flush);
    }

    #[test]
    fn restore_requires_every_writable_field() {
        let mut snap = EngineOptions::default().to_generic();
        snap.remove("timeout");
        let mut opts = EngineOptions::default();
        assert_eq!(
            opts.from_generic(&snap),
            Err(FieldError::Missing { field: "timeout" })
        );
    }

    #[test]
    fn restore_rejects_wrong_type() {
        let mut snap = EngineOptions::default().to_generic();
        snap.insert("depth", "nine");
        let mut opts = EngineOptions::default();
        assert_eq!(
            opts.from_generic(&snap),
            Err(FieldError::WrongType {
                field: "depth",
                expected: "integer",
                found: "String",
            })
        );
    }

    #[test]
    fn failed_restore_leaves_record_untouched() {
        let mut snap = EngineOptions::default().to_generic();
        snap.insert("depth", 3i64);
        snap.insert("robots", "everywhere");
        let mut opts = EngineOptions::default();
        let before = opts.clone();
        assert!(opts.from_generic(&snap).is_err());
        assert_eq!(opts, before);
    }

    #[test]
    fn restore_truncates_strings_to_schema_limit() {
        let mut snap = EngineOptions::default().to_generic();
        snap.insert("user_agent", "x".repeat(200));
        let mut opts = EngineOptions::default();
        opts.from_generic(&snap).unwrap();
        assert_eq!(opts.user_agent.len(), 128);
    }

    #[test]
    fn bool_fields_accept_integers() {
        let mut snap = EngineOptions::default().to_generic();
        snap.insert("flush", 1i64);
        snap.insert("shell", 0i64);
        let mut opts = EngineOptions::default();
        opts.from_generic(&snap).unwrap();
        assert!(opts.flush);
        assert!(!opts.shell);
    }

    #[test]
    fn int_out_of_range_is_rejected() {
        let mut snap = EngineOptions::default().to_generic();
        snap.insert("depth", i64::MAX);
        let mut opts = EngineOptions::default();
        assert_eq!(
            opts.from_generic(&snap),
            Err(FieldError::OutOfRange { field: "depth" })
        );
    }

    #[test]
    fn request_snapshot_nests_response() {
        let mut ctx = RequestContext::default();
        ctx.url_address = "example.org".into();
        ctx.response.status_code = 304;
        ctx.response.not_modified = true;
        let snap = ctx.to_generic();
        assert_eq!(snap.get("url_address"), Some(&Value::from("example.org")));
        let response = snap.get("response").and_then(Value::as_object).unwrap();
        assert_eq!(response.get("status_code"), Some(&Value::I64(304)));
        assert_eq!(response.get("not_modified"), Some(&Value::Bool(true)));
    }

    #[test]
    fn request_round_trip_is_lossless() {
        let mut ctx = RequestContext::default();
        ctx.url_address = "example.org".into();
        ctx.url_file = "/a/b.html".into();
        ctx.temp_file = Some("/tmp/dl.part".into());
        ctx.second_pass = Some(2);
        ctx.status = 3;
        ctx.response.status_code = 206;
        ctx.response.location = Some("/moved".into());
        ctx.response.etag = "\"abc\"".into();

        let mut restored = RequestContext::default();
        restored.from_generic(&ctx.to_generic()).unwrap();
        assert_eq!(restored, ctx);
    }

    #[test]
    fn request_restore_requires_the_nested_response() {
        let mut snap = RequestContext::default().to_generic();
        snap.remove("response");
        let mut ctx = RequestContext::default();
        assert_eq!(
            ctx.from_generic(&snap),
            Err(FieldError::Missing { field: "response" })
        );
    }

    #[test]
    fn bad_nested_response_leaves_the_request_untouched() {
        let mut ctx = RequestContext::default();
        ctx.status = 1;
        let mut snap = ctx.to_generic();
        snap.insert("url_address", "elsewhere.example");
        let mut nested = ctx.response.to_generic();
        nested.insert("status_code", "teapot");
        snap.insert("response", nested);
        let before = ctx.clone();
        assert!(ctx.from_generic(&snap).is_err());
        assert_eq!(ctx, before);
    }

    #[cfg(feature = "cookies")]
    #[test]
    fn options_snapshot_includes_cookie_jar() {
        use crate::records::{AuthEntry, CookieRecord};
        let mut opts = EngineOptions::default();
        opts.cookies = Some(CookieJar {
            cookies: vec![CookieRecord {
                fields: vec!["example.org".into(), "TRUE".into(), "/".into()],
            }],
            auth: vec![AuthEntry {
                prefix: "example.org/private".into(),
                credentials: "user:pass".into(),
            }],
        });
        let snap = opts.to_generic();
        let jar = snap.get("cookie").and_then(Value::as_object).unwrap();
        let cookies = jar.get("cookies").and_then(Value::as_array).unwrap();
        assert_eq!(cookies.len(), 1);
        let auth = jar.get("auth").and_then(Value::as_array).unwrap();
        assert_eq!(auth.len(), 1);
    }

    proptest! {
        #[test]
        fn restored_strings_never_exceed_limit_or_split_utf8(s in ".{0,100}") {
            let mut snap = EngineOptions::default().to_generic();
            snap.insert("lang_iso", s.clone());
            let mut opts = EngineOptions::default();
            opts.from_generic(&snap).unwrap();
            prop_assert!(opts.lang_iso.len() <= 64);
            prop_assert!(s.starts_with(&opts.lang_iso));
        }
    }
}
