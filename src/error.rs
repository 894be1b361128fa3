//! Typed error hierarchy for the ksc-api crate.
//!
//! `KscError` gives every public operation exactly one failure kind, so
//! callers can pick a recovery strategy without parsing messages:
//!
//! | Variant            | Source                                   | Caller action                         |
//! |--------------------|------------------------------------------|---------------------------------------|
//! | `Transport`        | DNS, TCP, TLS, HTTP framing              | retry with backoff, if idempotent     |
//! | `Cancelled`        | caller token or deadline fired           | propagate                             |
//! | `Decode`           | reply could not be parsed                | report; do not retry                  |
//! | `Server`           | `PxgError` envelope                      | inspect `code`                        |
//! | `Auth`             | `PxgError` in the auth family, HTTP 401/403 | refresh credentials, retry once    |
//! | `IteratorExpired`  | iterator lifetime elapsed server-side    | re-issue the reset call               |
//! | `AsyncCancelled`   | async request cancelled server-side      | report; do not retry                  |
//!
//! The remaining variants cover boundaries outside the wire protocol:
//! encoding a caller value, building a session, using a closed session,
//! exhausting an async poll budget, and replies that lack a required field.
//!
//! The library never logs errors. They are returned unchanged to the caller.

use std::time::Duration;

use serde::Deserialize;

use crate::value::{Params, Value};

// ── Codec errors ───────────────────────────────────────────────────────

/// A value could not be encoded to, or decoded from, the wire form.
///
/// `path` locates the failing node with `$` as the document root, e.g.
/// `$.PxgRetVal.vecHosts[3]`. It is built while the error propagates out
/// of the recursive codec, so successful decodes pay nothing for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at {path}")]
pub struct CodecError {
    path: String,
    message: String,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        CodecError {
            path: "$".to_owned(),
            message: message.into(),
        }
    }

    /// Prefixes the path with a bag key (the error happened inside `key`).
    #[must_use]
    pub fn within_key(mut self, key: &str) -> Self {
        self.path.insert_str(1, &format!(".{key}"));
        self
    }

    /// Prefixes the path with an array index.
    #[must_use]
    pub fn within_index(mut self, index: usize) -> Self {
        self.path.insert_str(1, &format!("[{index}]"));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// ── Server errors ──────────────────────────────────────────────────────

/// A structured error reported by the server in a `PxgError` envelope.
///
/// `message` is the server's text as sent. `locdata` carries the
/// locale-independent template arguments the server attaches, so callers
/// can render their own message instead of relying on the server locale.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("server error {code} (subcode {subcode}): {message}")]
pub struct ServerError {
    pub code: i64,
    pub subcode: i64,
    pub message: String,
    pub module: String,
    pub file: String,
    pub line: i64,
    pub locdata: Params,
    /// HTTP status of the reply that carried the error.
    pub http_status: Option<u16>,
}

impl ServerError {
    /// Builds a `ServerError` from the decoded `PxgError` value.
    ///
    /// Only `code` is mandatory. The server omits the diagnostic fields
    /// for some errors, and those default to empty.
    pub fn from_envelope(
        value: &Value,
        http_status: Option<u16>,
    ) -> std::result::Result<Self, CodecError> {
        let bag = value.as_params().ok_or_else(|| {
            CodecError::new(format!(
                "PxgError must be a parameter bag, found {}",
                value.kind_name()
            ))
            .within_key("PxgError")
        })?;
        let int = |key: &str| bag.get(key).and_then(Value::as_i64);
        let text = |key: &str| {
            bag.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let code = int("code").ok_or_else(|| {
            CodecError::new("PxgError is missing an integer `code`").within_key("PxgError")
        })?;
        Ok(ServerError {
            code,
            subcode: int("subcode").unwrap_or(0),
            message: text("message"),
            module: text("module"),
            file: text("file"),
            line: int("line").unwrap_or(0),
            locdata: bag
                .get("locdata")
                .and_then(Value::as_params)
                .cloned()
                .unwrap_or_default(),
            http_status,
        })
    }

    /// Builds a `ServerError` for a non-success HTTP reply that carried no
    /// `PxgError` envelope. The HTTP status doubles as the code.
    pub fn from_http(status: u16, body: &[u8]) -> Self {
        ServerError {
            code: i64::from(status),
            subcode: 0,
            message: String::from_utf8_lossy(body).trim().to_owned(),
            module: String::new(),
            file: String::new(),
            line: 0,
            locdata: Params::new(),
            http_status: Some(status),
        }
    }
}

// ── Error code classification ──────────────────────────────────────────

/// Tables that sort `PxgError` codes into the specialised kinds.
///
/// The numeric codes differ between server releases, so the tables are
/// configuration rather than constants. HTTP 401 and 403 replies are
/// always treated as authentication failures, whatever their body says.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ErrorCodes {
    /// Codes meaning the credentials were rejected.
    pub auth: Vec<i64>,
    /// Codes meaning an iterator id is unknown because its lifetime elapsed.
    /// Empty by default.
    pub iterator_expired: Vec<i64>,
    /// Codes an async data getter uses to report a cancelled request.
    /// Empty by default.
    pub async_cancelled: Vec<i64>,
}

impl Default for ErrorCodes {
    fn default() -> Self {
        ErrorCodes {
            auth: vec![401, 403],
            iterator_expired: Vec::new(),
            async_cancelled: Vec::new(),
        }
    }
}

impl ErrorCodes {
    /// Wraps a server error in the most specific variant that applies.
    pub fn classify(&self, err: ServerError) -> KscError {
        if matches!(err.http_status, Some(401 | 403)) || self.auth.contains(&err.code) {
            KscError::Auth(err)
        } else if self.iterator_expired.contains(&err.code) {
            KscError::IteratorExpired(err)
        } else {
            KscError::Server(err)
        }
    }

    pub fn is_async_cancelled(&self, err: &ServerError) -> bool {
        self.async_cancelled.contains(&err.code)
    }
}

// ── KscError ───────────────────────────────────────────────────────────

/// Unified error type for all ksc-api operations.
#[derive(Debug, thiserror::Error)]
pub enum KscError {
    /// Network-level failure: DNS, connection refused, TLS, broken stream.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The caller's cancellation token or deadline fired first.
    #[error("operation cancelled")]
    Cancelled,

    /// The reply body was not valid tag-typed JSON.
    #[error("failed to decode reply: {0}")]
    Decode(#[source] CodecError),

    /// A request value has no wire representation. Raised before any I/O.
    #[error("failed to encode request: {0}")]
    Encode(#[source] CodecError),

    /// The reply decoded cleanly but lacks a field the caller requires.
    #[error("reply is missing required field `{field}`")]
    MissingField {
        /// Name of the absent field.
        field: String,
    },

    /// The server returned a `PxgError` envelope.
    #[error(transparent)]
    Server(ServerError),

    /// The server rejected the session's credentials.
    #[error("authentication rejected: {0}")]
    Auth(ServerError),

    /// The iterator id is no longer known to the server.
    ///
    /// Only produced for codes listed in [`ErrorCodes::iterator_expired`],
    /// which is empty by default. Until it is configured, an expired
    /// iterator surfaces as `Server`.
    #[error("iterator expired: {0}")]
    IteratorExpired(ServerError),

    /// The async request was cancelled on the server side.
    ///
    /// Only produced for codes listed in [`ErrorCodes::async_cancelled`],
    /// which is empty by default. Until it is configured, a server-side
    /// cancel surfaces as `Server`.
    #[error("async request {request_id} was cancelled by the server")]
    AsyncCancelled {
        /// Server-assigned request identifier.
        request_id: String,
    },

    /// The async helper's poll budget ran out before a final payload.
    #[error("polling timed out after {elapsed:?} for request {request_id}")]
    PollTimeout {
        /// Total time spent polling.
        elapsed: Duration,
        /// Server-assigned request identifier.
        request_id: String,
    },

    /// The session could not be built from the supplied settings.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// The session was closed before this call was issued.
    #[error("session is closed")]
    Closed,
}

impl KscError {
    /// The server error behind `Server`, `Auth` or `IteratorExpired`.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            KscError::Server(e) | KscError::Auth(e) | KscError::IteratorExpired(e) => Some(e),
            _ => None,
        }
    }

    /// True when repeating an idempotent request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KscError::Transport(_))
    }

    /// True when fresh credentials may fix the failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, KscError::Auth(_))
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, KscError>;
