//! Long-running server operations and the polling loop that waits on them.
//!
//! Methods ending in `Async` (and methods starting with `Request`) follow
//! one pattern:
//!
//! 1. **Start**: the call returns `{ "strRequestId": "<guid>" }`, either at
//!    top level or inside the `PxgRetVal` bag.
//! 2. **Poll**: a paired data getter, e.g.
//!    `ExecuteReportAsyncGetData(strRequestId, nChunkSize)`, returns either
//!    nothing yet, a partial chunk with a non-zero remaining-size hint, or
//!    the final chunk.
//! 3. **Cancel**: a paired canceller, e.g.
//!    `ExecuteReportAsyncCancel(strRequestId)`, aborts the request.
//!
//! [`AsyncOperation::wait`] runs that loop: the first poll is immediate,
//! later polls back off exponentially from 250 ms to 5 s with ±20% jitter,
//! and the backoff resets whenever a chunk brings data or the remaining-size
//! hint shrinks. Chunks are concatenated in arrival order.
//!
//! State machine:
//!
//! ```text
//! Submitted ──poll──► Pending ──partial──► Pending
//!                      │                      │
//!                      └── final payload ─────┴──► Completed
//!                      │
//!                      └── server error ──► Failed
//!                      │
//!                      └── ctx cancel ─────► Cancelling ──► Cancelled
//! ```
//!
//! When the caller's context fires before `Completed`/`Failed`, the helper
//! sends the canceller once (best effort, on its own short deadline) and
//! returns `KscError::Cancelled`. Running out of poll budget returns
//! `KscError::PollTimeout` and sends no cancel.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::time::Instant;

use crate::context::Context;
use crate::error::{CodecError, KscError, Result};
use crate::idiom;
use crate::session::Session;
use crate::transport::Reply;
use crate::value::{Params, Value};

/// Budget for the best-effort cancel sent after the caller's context fired.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

// ── State ──────────────────────────────────────────────────────────────

/// Lifecycle of one async request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Started; not polled yet.
    Submitted,
    /// Polled at least once; no final payload yet.
    Pending,
    /// The final payload arrived.
    Completed,
    /// The server reported an error, or the poll budget ran out.
    Failed,
    /// The canceller is in flight.
    Cancelling,
    /// Cancelled by the caller or by the server.
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }
}

// ── Polling configuration ──────────────────────────────────────────────

/// Controls the poll schedule.
///
/// Defaults:
/// - `initial`: 250 ms. Also the interval the schedule resets to on
///   progress.
/// - `max`: 5 s ceiling for the doubling backoff.
/// - `jitter`: 0.2, i.e. each sleep is scaled by a random factor in
///   `[0.8, 1.2]`.
/// - `budget`: 10 minutes of total polling. `None` polls until the
///   context fires.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub initial: Duration,
    pub max: Duration,
    pub jitter: f64,
    pub budget: Option<Duration>,
}

impl PollConfig {
    /// Schedule with the given bounds, default jitter and budget.
    pub fn new(initial: Duration, max: Duration) -> Self {
        PollConfig {
            initial,
            max: max.max(initial),
            ..PollConfig::default()
        }
    }

    #[must_use]
    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Interval after a poll that brought no progress.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }

    /// Interval to wait after a poll: back to `initial` on progress,
    /// otherwise one backoff step.
    pub fn after_poll(&self, current: Duration, progressed: bool) -> Duration {
        if progressed {
            self.initial
        } else {
            self.next_interval(current)
        }
    }

    /// `interval` scaled by a random factor within the jitter band.
    pub fn jittered(&self, interval: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return interval;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        interval.mul_f64(factor.max(0.0))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(5),
            jitter: 0.2,
            budget: Some(Duration::from_secs(600)),
        }
    }
}

// ── Method pairing ─────────────────────────────────────────────────────

/// The getter, canceller and field names paired with one async method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncSpec {
    service: String,
    data_method: String,
    cancel_method: String,
    request_id_param: String,
    chunk: Option<(String, i64)>,
    data_key: String,
    rest_key: String,
}

impl AsyncSpec {
    pub fn new(
        service: impl Into<String>,
        data_method: impl Into<String>,
        cancel_method: impl Into<String>,
    ) -> Self {
        AsyncSpec {
            service: service.into(),
            data_method: data_method.into(),
            cancel_method: cancel_method.into(),
            request_id_param: "strRequestId".to_owned(),
            chunk: Some(("nChunkSize".to_owned(), 65536)),
            data_key: "pXmlData".to_owned(),
            rest_key: "nDataSizeRest".to_owned(),
        }
    }

    /// Derives the getter and canceller from an `…Async` method name
    /// (`X` pairs with `XGetData` and `XCancel`).
    pub fn for_async_method(service: impl Into<String>, method: &str) -> Option<Self> {
        let data = idiom::data_getter_for(method)?;
        let cancel = idiom::canceller_for(method)?;
        Some(AsyncSpec::new(service, data, cancel))
    }

    /// Chunk-size argument sent with every poll. `None` omits it.
    #[must_use]
    pub fn chunk_size(mut self, chunk: Option<(&str, i64)>) -> Self {
        self.chunk = chunk.map(|(param, n)| (param.to_owned(), n));
        self
    }

    /// Reply field holding the payload chunk.
    #[must_use]
    pub fn data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = key.into();
        self
    }

    /// Reply field holding the remaining-size hint.
    #[must_use]
    pub fn rest_key(mut self, key: impl Into<String>) -> Self {
        self.rest_key = key.into();
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn data_method(&self) -> &str {
        &self.data_method
    }

    pub fn cancel_method(&self) -> &str {
        &self.cancel_method
    }
}

// ── Operation ──────────────────────────────────────────────────────────

/// Progress callback: `(bytes_so_far, bytes_remaining)`, called after every
/// poll including those that found nothing new. `bytes_remaining` is the
/// last hint the server sent, 0 before the first one. Runs inline on the
/// polling task and must not block.
pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

/// One in-flight server request. Owned by a single consumer.
pub struct AsyncOperation {
    session: Session,
    spec: AsyncSpec,
    request_id: String,
    config: PollConfig,
    progress: Option<ProgressFn>,
    state: OperationState,
    cancel_sent: bool,
}

impl AsyncOperation {
    /// Issues the starting call and wraps the returned `strRequestId`.
    pub async fn start(
        ctx: &Context,
        session: &Session,
        service: &str,
        method: &str,
        params: Params,
        spec: AsyncSpec,
    ) -> Result<Self> {
        let reply = session.call(ctx, service, method, params).await?;
        let key = spec.request_id_param.clone();
        let request_id = match reply.lookup(&key) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(KscError::MissingField { field: key });
            }
            Some(other) => {
                return Err(KscError::Decode(
                    CodecError::new(format!(
                        "request id must be a string, found {}",
                        other.kind_name()
                    ))
                    .within_key(&key),
                ));
            }
        };
        tracing::debug!(service, method, request_id = %request_id, "started async request");
        Ok(AsyncOperation::new(session.clone(), spec, request_id))
    }

    /// Wraps a request id the caller already holds.
    pub fn new(session: Session, spec: AsyncSpec, request_id: impl Into<String>) -> Self {
        AsyncOperation {
            session,
            spec,
            request_id: request_id.into(),
            config: PollConfig::default(),
            progress: None,
            state: OperationState::Submitted,
            cancel_sent: false,
        }
    }

    #[must_use]
    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn on_progress(mut self, f: impl FnMut(u64, u64) + Send + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Polls until the final payload arrives and returns every chunk
    /// concatenated in order.
    ///
    /// # Errors
    ///
    /// - `KscError::Cancelled` — `ctx` fired; the canceller was sent once.
    /// - `KscError::PollTimeout` — the poll budget ran out.
    /// - `KscError::AsyncCancelled` — the server reports the request as
    ///   cancelled.
    /// - any error of the data getter call, which leaves the operation
    ///   `Failed`.
    pub async fn wait(mut self, ctx: &Context) -> Result<Bytes> {
        let started = Instant::now();
        let mut interval = self.config.initial;
        let mut payload: Vec<u8> = Vec::new();
        let mut last_rest: Option<u64> = None;
        let mut first = true;

        loop {
            if !first {
                let pause = self.config.jittered(interval);
                if let Err(err) = ctx.sleep(pause).await {
                    return Err(self.abort(err).await);
                }
            }
            first = false;

            // Check the budget before the next poll, so no request is sent
            // once it is spent.
            if let Some(budget) = self.config.budget {
                if started.elapsed() >= budget {
                    self.state = OperationState::Failed;
                    return Err(KscError::PollTimeout {
                        elapsed: started.elapsed(),
                        request_id: self.request_id.clone(),
                    });
                }
            }

            self.state = OperationState::Pending;
            let reply = match self.poll(ctx).await {
                Ok(reply) => reply,
                Err(err) => return Err(self.abort(err).await),
            };
            let chunk = match read_chunk(&reply, &self.spec) {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.state = OperationState::Failed;
                    return Err(err);
                }
            };

            match chunk {
                Chunk::NotReady => {
                    self.report(payload.len() as u64, last_rest.unwrap_or(0));
                    interval = self.config.after_poll(interval, false);
                }
                Chunk::Partial { data, rest } => {
                    let progressed = made_progress(last_rest, data.len(), rest);
                    payload.extend_from_slice(&data);
                    last_rest = Some(rest);
                    self.report(payload.len() as u64, rest);
                    interval = self.config.after_poll(interval, progressed);
                }
                Chunk::Final(data) => {
                    payload.extend_from_slice(&data);
                    self.report(payload.len() as u64, 0);
                    self.state = OperationState::Completed;
                    tracing::debug!(
                        request_id = %self.request_id,
                        bytes = payload.len(),
                        "async request completed"
                    );
                    return Ok(Bytes::from(payload));
                }
            }
        }
    }

    /// Sends the canceller under `ctx`. Idempotent: only the first call on
    /// a non-terminal operation reaches the server.
    pub async fn cancel(&mut self, ctx: &Context) -> Result<()> {
        if self.cancel_sent || self.state.is_terminal() {
            return Ok(());
        }
        self.send_cancel(ctx).await
    }

    async fn poll(&self, ctx: &Context) -> Result<Reply> {
        let mut params =
            Params::new().with(self.spec.request_id_param.clone(), self.request_id.clone());
        if let Some((param, n)) = &self.spec.chunk {
            params.insert(param.clone(), *n);
        }
        tracing::trace!(request_id = %self.request_id, method = %self.spec.data_method, "polling");
        self.session
            .call(ctx, &self.spec.service, &self.spec.data_method, params)
            .await
    }

    /// Settles the state for an error raised while waiting and returns the
    /// error to surface.
    async fn abort(&mut self, err: KscError) -> KscError {
        match err {
            KscError::Cancelled => {
                if !self.cancel_sent {
                    // Best effort: the caller already gave up, so a failed
                    // cancel changes nothing for them.
                    let _ = self.send_cancel(&Context::detached(CANCEL_TIMEOUT)).await;
                }
                self.state = OperationState::Cancelled;
                KscError::Cancelled
            }
            KscError::Server(e) if self.session.error_codes().is_async_cancelled(&e) => {
                self.state = OperationState::Cancelled;
                KscError::AsyncCancelled {
                    request_id: self.request_id.clone(),
                }
            }
            other => {
                self.state = OperationState::Failed;
                other
            }
        }
    }

    async fn send_cancel(&mut self, ctx: &Context) -> Result<()> {
        self.cancel_sent = true;
        self.state = OperationState::Cancelling;
        tracing::debug!(
            request_id = %self.request_id,
            method = %self.spec.cancel_method,
            "cancelling async request"
        );
        let params =
            Params::new().with(self.spec.request_id_param.clone(), self.request_id.clone());
        let result = self
            .session
            .call(ctx, &self.spec.service, &self.spec.cancel_method, params)
            .await;
        self.state = OperationState::Cancelled;
        result.map(|_| ())
    }

    fn report(&mut self, so_far: u64, remaining: u64) {
        if let Some(f) = self.progress.as_mut() {
            f(so_far, remaining);
        }
    }
}

impl fmt::Debug for AsyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("service", &self.spec.service)
            .field("request_id", &self.request_id)
            .field("state", &self.state)
            .finish()
    }
}

// ── Reply interpretation ───────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Chunk {
    NotReady,
    Partial { data: Vec<u8>, rest: u64 },
    Final(Vec<u8>),
}

/// A partial reply counts as progress when it carries data or the
/// remaining-size hint went down since the previous one.
fn made_progress(previous_rest: Option<u64>, chunk_len: usize, rest: u64) -> bool {
    chunk_len > 0 || previous_rest.is_some_and(|prev| rest < prev)
}

/// Sorts one getter reply into not-ready, partial or final.
///
/// An absent or null payload is not ready. With a remaining-size hint,
/// a positive hint means partial and zero means final. Without one, a
/// non-empty payload is final and an empty one is not ready.
fn read_chunk(reply: &Reply, spec: &AsyncSpec) -> Result<Chunk> {
    let data = match reply.lookup(&spec.data_key) {
        None => return Ok(Chunk::NotReady),
        Some(Value::String(s)) => s.as_bytes().to_vec(),
        Some(Value::Binary(b)) => b.clone(),
        Some(other) => {
            return Err(KscError::Decode(
                CodecError::new(format!(
                    "payload chunk must be a string or binary, found {}",
                    other.kind_name()
                ))
                .within_key(&spec.data_key),
            ));
        }
    };
    let rest = match reply.lookup(&spec.rest_key) {
        None => None,
        Some(v) => Some(v.as_i64().ok_or_else(|| {
            KscError::Decode(
                CodecError::new(format!(
                    "remaining-size hint must be an int, found {}",
                    v.kind_name()
                ))
                .within_key(&spec.rest_key),
            )
        })?),
    };
    Ok(match rest {
        Some(n) if n > 0 => Chunk::Partial {
            data,
            rest: n.unsigned_abs(),
        },
        Some(_) => Chunk::Final(data),
        None if data.is_empty() => Chunk::NotReady,
        None => Chunk::Final(data),
    })
}
