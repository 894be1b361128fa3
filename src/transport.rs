//! Request/response transport for `<Service>.<Method>` calls.
//!
//! Every remote method is a JSON POST to
//! `<base>/api/v1.0/<Service>.<Method>` whose body is a parameter bag and
//! whose reply is either a success bag (`PxgRetVal` plus optional companion
//! out-parameters) or a `PxgError` envelope.
//!
//! `Session::call` is the only place that touches HTTP:
//! - encodes the request bag through the codec (before any I/O, so an
//!   unencodable value never reaches the wire);
//! - attaches `Content-Type`, exactly one `Authorization` header, and the
//!   optional `X-KSC-VServer` header;
//! - races the send and the full body read against the caller's context,
//!   the session's ambient token and the default deadline;
//! - decodes the reply and turns `PxgError` into a classified `KscError`.
//!
//! The transport never retries and keeps no state between calls beyond what
//! the session already holds. Concurrent calls on one session are fine.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::codec;
use crate::context::Context;
use crate::error::{KscError, Result, ServerError};
use crate::session::{Session, VSERVER_HEADER};
use crate::value::{Params, Value};

/// Conventional key carrying a method's return value.
pub const RET_VAL: &str = "PxgRetVal";

/// Key of the server's error envelope.
pub const PXG_ERROR: &str = "PxgError";

// ── Reply ──────────────────────────────────────────────────────────────

/// A decoded success reply plus the exact bytes it was decoded from.
///
/// Methods may return companion out-parameters beside `PxgRetVal`, so the
/// whole top-level bag is kept and facades pull the keys they need.
#[derive(Debug, Clone)]
pub struct Reply {
    bag: Params,
    raw: Bytes,
}

impl Reply {
    pub fn new(bag: Params, raw: Bytes) -> Self {
        Reply { bag, raw }
    }

    /// The method's return value, if it has one.
    pub fn ret_val(&self) -> Option<&Value> {
        self.bag.get(RET_VAL)
    }

    /// The method's return value, `Value::Null` when absent.
    pub fn into_ret_val(mut self) -> Value {
        self.bag.remove(RET_VAL).unwrap_or(Value::Null)
    }

    /// A top-level field (`PxgRetVal` or a companion out-parameter).
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.bag.get(key)
    }

    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.bag.remove(key)
    }

    /// Looks `key` up among the top-level fields first, then inside a
    /// `PxgRetVal` bag. Methods disagree on where they put out-parameters.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.bag.get(key).or_else(|| {
            self.ret_val()
                .and_then(Value::as_params)
                .and_then(|inner| inner.get(key))
        })
    }

    pub fn bag(&self) -> &Params {
        &self.bag
    }

    /// The reply body exactly as received.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn into_parts(self) -> (Params, Bytes) {
        (self.bag, self.raw)
    }
}

// ── Call ───────────────────────────────────────────────────────────────

impl Session {
    /// Invokes `<service>.<method>` with `params` as the request body.
    ///
    /// # Errors
    ///
    /// - `KscError::Encode` — a value in `params` has no wire form.
    /// - `KscError::Closed` — the session was closed.
    /// - `KscError::Cancelled` — the context, the session's ambient token or
    ///   the deadline fired before the reply was fully read.
    /// - `KscError::Transport` — connection, TLS or body-read failure.
    /// - `KscError::Decode` — the reply is not a tag-typed parameter bag.
    /// - `KscError::Server` / `Auth` / `IteratorExpired` — the server
    ///   returned a `PxgError` (or a bare non-success HTTP status).
    pub async fn call(
        &self,
        ctx: &Context,
        service: &str,
        method: &str,
        params: Params,
    ) -> Result<Reply> {
        let body = codec::encode_params(&params).map_err(KscError::Encode)?;
        let client = self.http_client()?;
        let url = self.endpoint_url(service, method);

        ctx.run_scoped(
            Some(self.ambient()),
            self.default_deadline(),
            self.dispatch(client, url, body, service, method),
        )
        .await
    }

    async fn dispatch(
        &self,
        client: reqwest::Client,
        url: String,
        body: Vec<u8>,
        service: &str,
        method: &str,
    ) -> Result<Reply> {
        let mut request = client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, self.auth_header().clone())
            .body(body);
        if let Some(vserver) = self.vserver() {
            request = request.header(VSERVER_HEADER, vserver);
        }

        let response = request.send().await?;
        let status = response.status();
        let raw = response.bytes().await?;

        if let Some(sink) = self.debug_sink() {
            sink.raw_response(service, method, status.as_u16(), &raw);
        }

        let bag = interpret(status, &raw, self)?;
        Ok(Reply::new(bag, raw))
    }
}

/// Turns an HTTP status and body into a success bag or a classified error.
///
/// A `PxgError` envelope wins whatever the status. A non-success status
/// without one becomes a `ServerError` keyed on the HTTP status.
fn interpret(status: StatusCode, raw: &[u8], session: &Session) -> Result<Params> {
    let codes = session.error_codes();
    match codec::decode_params(raw) {
        Ok(mut bag) => {
            if let Some(envelope) = bag.remove(PXG_ERROR) {
                let err = ServerError::from_envelope(&envelope, Some(status.as_u16()))
                    .map_err(KscError::Decode)?;
                return Err(codes.classify(err));
            }
            if !status.is_success() {
                return Err(codes.classify(ServerError::from_http(status.as_u16(), raw)));
            }
            Ok(bag)
        }
        Err(_) if !status.is_success() => {
            Err(codes.classify(ServerError::from_http(status.as_u16(), raw)))
        }
        Err(e) => Err(KscError::Decode(e)),
    }
}
