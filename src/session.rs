//! Session: server address, credentials and per-call defaults.
//!
//! A `Session` is created once per operator and shared by every call. It is
//! cheap to clone (everything heavy sits behind `Arc`) and immutable after
//! construction: `with_auth`, `with_deadline` and `with_vserver` return new
//! sessions that share the connection pool with their parent.
//!
//! Lifecycle:
//! - The `reqwest::Client` (and its keep-alive pool) is shared by a session
//!   and all sessions derived from it.
//! - `close()` drops the pool and fires the ambient cancellation token, so
//!   in-flight calls end with `Cancelled` and later calls fail with
//!   `Closed`. Closing twice is a no-op.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::HeaderValue;
use tokio_util::sync::CancellationToken;

use crate::auth::Auth;
use crate::context::Context;
use crate::error::{ErrorCodes, KscError, Result};

/// Path prefix of every API endpoint.
pub const API_PREFIX: &str = "api/v1.0";

/// Header selecting a virtual server (tenant partition).
pub const VSERVER_HEADER: &str = "X-KSC-VServer";

// ── Debug sink ─────────────────────────────────────────────────────────

/// Receives raw reply bytes when a session runs in debug mode.
///
/// Implementations must not block: the sink runs inline on the calling task.
pub trait DebugSink: Send + Sync {
    fn raw_response(&self, service: &str, method: &str, status: u16, raw: &[u8]);
}

/// Default sink: one `tracing` debug event per reply, target `ksc_api::raw`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DebugSink for TracingSink {
    fn raw_response(&self, service: &str, method: &str, status: u16, raw: &[u8]) {
        tracing::debug!(
            target: "ksc_api::raw",
            service,
            method,
            status,
            body = %String::from_utf8_lossy(raw),
            "raw response"
        );
    }
}

// ── Session ────────────────────────────────────────────────────────────

/// State shared by a session and every session derived from it.
struct Shared {
    base_url: String,
    client: RwLock<Option<Client>>,
    ambient: CancellationToken,
}

/// Handle to one remote server with one set of credentials.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    auth: Auth,
    auth_header: HeaderValue,
    vserver: Option<String>,
    debug: bool,
    sink: Arc<dyn DebugSink>,
    default_deadline: Option<Duration>,
    error_codes: Arc<ErrorCodes>,
}

impl Session {
    /// Starts building a session against `base_url`
    /// (e.g. `https://ksc.example.com:13299`).
    pub fn builder(base_url: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.shared.base_url
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn vserver(&self) -> Option<&str> {
        self.vserver.as_deref()
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline
    }

    pub fn error_codes(&self) -> &ErrorCodes {
        &self.error_codes
    }

    /// Full URL of `<service>.<method>`. Never carries a query string.
    pub fn endpoint_url(&self, service: &str, method: &str) -> String {
        format!("{}/{API_PREFIX}/{service}.{method}", self.shared.base_url)
    }

    /// A fresh context tied to this session's ambient token and seeded
    /// with its default deadline.
    pub fn context(&self) -> Context {
        let ctx = Context::from_token(self.shared.ambient.child_token());
        match self.default_deadline {
            Some(d) => ctx.with_timeout(d),
            None => ctx,
        }
    }

    /// Derived session with different credentials.
    pub fn with_auth(&self, auth: Auth) -> Result<Session> {
        let auth_header = auth.header_value()?;
        Ok(Session {
            auth,
            auth_header,
            ..self.clone()
        })
    }

    /// Derived session whose calls default to `deadline` when the caller's
    /// context carries none.
    pub fn with_deadline(&self, deadline: Duration) -> Session {
        Session {
            default_deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Derived session targeting a virtual server.
    pub fn with_vserver(&self, vserver: impl Into<String>) -> Session {
        Session {
            vserver: Some(vserver.into()),
            ..self.clone()
        }
    }

    /// Releases pooled connections and cancels in-flight calls. Idempotent.
    ///
    /// Affects every session sharing this one's pool.
    pub fn close(&self) {
        let pool = self
            .shared
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if pool.is_some() {
            tracing::debug!(base_url = %self.shared.base_url, "session closed");
        }
        self.shared.ambient.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ambient.is_cancelled()
    }

    pub(crate) fn http_client(&self) -> Result<Client> {
        self.shared
            .client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(KscError::Closed)
    }

    pub(crate) fn ambient(&self) -> &CancellationToken {
        &self.shared.ambient
    }

    pub(crate) fn auth_header(&self) -> &HeaderValue {
        &self.auth_header
    }

    pub(crate) fn debug_sink(&self) -> Option<&dyn DebugSink> {
        self.debug.then_some(self.sink.as_ref())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.shared.base_url)
            .field("auth", &self.auth)
            .field("vserver", &self.vserver)
            .field("debug", &self.debug)
            .field("default_deadline", &self.default_deadline)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Builder ────────────────────────────────────────────────────────────

/// Builder for [`Session`].
///
/// Only the base URL and credentials are mandatory. No request timeout is
/// configured on the HTTP client: deadlines come from the caller's
/// [`Context`] or the session's default deadline.
pub struct SessionBuilder {
    base_url: String,
    auth: Option<Auth>,
    vserver: Option<String>,
    debug: bool,
    sink: Option<Arc<dyn DebugSink>>,
    default_deadline: Option<Duration>,
    connect_timeout: Option<Duration>,
    accept_invalid_certs: bool,
    error_codes: ErrorCodes,
    client: Option<Client>,
}

impl SessionBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        SessionBuilder {
            base_url: base_url.into(),
            auth: None,
            vserver: None,
            debug: false,
            sink: None,
            default_deadline: None,
            connect_timeout: None,
            accept_invalid_certs: false,
            error_codes: ErrorCodes::default(),
            client: None,
        }
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn vserver(mut self, vserver: impl Into<String>) -> Self {
        self.vserver = Some(vserver.into());
        self
    }

    /// Echo raw reply bytes to the debug sink.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Replaces the default [`TracingSink`].
    pub fn debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    /// Bounds TCP + TLS connection setup. Unset by default.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Accept self-signed server certificates. Servers ship with one by
    /// default; only enable this on trusted networks.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn error_codes(mut self, codes: ErrorCodes) -> Self {
        self.error_codes = codes;
        self
    }

    /// Uses a preconfigured HTTP client. `connect_timeout` and
    /// `accept_invalid_certs` are ignored when set.
    pub fn http_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<Session> {
        let base_url = normalize_base_url(&self.base_url)?;
        let auth = self
            .auth
            .ok_or_else(|| KscError::InvalidSession("credentials are required".to_owned()))?;
        let auth_header = auth.header_value()?;

        let client = match self.client {
            Some(client) => client,
            None => {
                let mut builder =
                    Client::builder().danger_accept_invalid_certs(self.accept_invalid_certs);
                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                builder.build()?
            }
        };

        Ok(Session {
            shared: Arc::new(Shared {
                base_url,
                client: RwLock::new(Some(client)),
                ambient: CancellationToken::new(),
            }),
            auth,
            auth_header,
            vserver: self.vserver,
            debug: self.debug,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            default_deadline: self.default_deadline,
            error_codes: Arc::new(self.error_codes),
        })
    }
}

/// Validates the base URL and strips trailing slashes, so endpoint URLs
/// never contain `//`.
fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(KscError::InvalidSession(
            "base URL must not be empty".to_owned(),
        ));
    }
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| KscError::InvalidSession(format!("invalid base URL `{trimmed}`: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(KscError::InvalidSession(format!(
            "base URL `{trimmed}` must use http or https"
        )));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(KscError::InvalidSession(format!(
            "base URL `{trimmed}` must not carry a query or fragment"
        )));
    }
    Ok(trimmed.to_owned())
}
