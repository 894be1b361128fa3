//! Forward iterators over server-side result sets.
//!
//! Large result sets are never returned inline. The server instead follows
//! one uniform pattern:
//!
//! 1. A `Reset…Iterator` / `Find…` call prepares the result set and returns
//!    an opaque iterator id (as `PxgRetVal` or as a companion field such as
//!    `strHostIteratorId`), sometimes with a total count.
//! 2. Records are pulled with `Get…RecordRange(id, start, end)`,
//!    `GetItemsChunk(id, start, count)` or `GetNext…(id, count)`. A
//!    `Get…Count(id)` method may report the total up front.
//! 3. `Release…Iterator(id)` frees the server-side cursor. The server also
//!    drops it on its own once the iterator's lifetime elapses.
//!
//! [`RecordIterator`] owns the id and turns that pattern into a single-pass
//! lazy sequence:
//! - each advance issues at most one fetch RPC, for a window of
//!   [`IteratorSpec::window`] records (default 1000);
//! - when a count method is configured it is queried once, otherwise the
//!   iterator probes until a window comes back empty;
//! - the id is released exactly once on every exit path: normal end,
//!   error, cancellation, explicit [`RecordIterator::release`], or drop;
//! - if the server reports `IteratorExpired`, nothing is held server-side
//!   any more and no release is sent.
//!
//! Restarting is not supported. Re-issue the reset call instead.

use std::collections::VecDeque;
use std::time::Duration;

use crate::context::Context;
use crate::error::{CodecError, KscError, Result};
use crate::session::Session;
use crate::transport::{RET_VAL, Reply};
use crate::value::{Params, Value};

/// Records requested per fetch unless an `IteratorSpec` overrides it.
pub const DEFAULT_WINDOW: u32 = 1000;

/// Budget for a release RPC issued after the caller's context has fired.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

// ── IteratorSpec ───────────────────────────────────────────────────────────────

/// How records are pulled from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStyle {
    /// `method(id, start, end)` with an exclusive end.
    Range {
        method: String,
        start_param: String,
        end_param: String,
    },
    /// `method(id, start, count)`.
    Chunk {
        method: String,
        start_param: String,
        count_param: String,
    },
    /// `method(id[, count])` returning the next records. `eof_key`, when set,
    /// names a boolean reply field that marks the last batch.
    Next {
        method: String,
        count_param: Option<String>,
        eof_key: Option<String>,
    },
}

impl FetchStyle {
    /// `method(id, nStart, nEnd)`.
    pub fn range(method: impl Into<String>) -> Self {
        FetchStyle::Range {
            method: method.into(),
            start_param: "nStart".to_owned(),
            end_param: "nEnd".to_owned(),
        }
    }

    /// `method(id, nStart, nCount)`.
    pub fn chunk(method: impl Into<String>) -> Self {
        FetchStyle::Chunk {
            method: method.into(),
            start_param: "nStart".to_owned(),
            count_param: "nCount".to_owned(),
        }
    }

    /// `method(id, nCount)`.
    pub fn next(method: impl Into<String>) -> Self {
        FetchStyle::Next {
            method: method.into(),
            count_param: Some("nCount".to_owned()),
            eof_key: None,
        }
    }

    /// Sets the boolean reply field that marks the last batch of a
    /// [`FetchStyle::Next`] iterator. No effect on the other styles.
    #[must_use]
    pub fn with_eof_key(mut self, key: impl Into<String>) -> Self {
        if let FetchStyle::Next { eof_key, .. } = &mut self {
            *eof_key = Some(key.into());
        }
        self
    }

    pub fn method(&self) -> &str {
        match self {
            FetchStyle::Range { method, .. }
            | FetchStyle::Chunk { method, .. }
            | FetchStyle::Next { method, .. } => method,
        }
    }
}

/// The methods and field names one iterator family uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorSpec {
    service: String,
    id_param: String,
    count_method: Option<String>,
    fetch: FetchStyle,
    records_path: Vec<String>,
    release_method: String,
    window: u32,
    total_key: Option<String>,
}

impl IteratorSpec {
    /// `id_param` is the request key carrying the iterator id in fetch,
    /// count and release calls (e.g. `strHostIteratorId`, `strAccessor`).
    pub fn new(
        service: impl Into<String>,
        id_param: impl Into<String>,
        fetch: FetchStyle,
        release_method: impl Into<String>,
    ) -> Self {
        IteratorSpec {
            service: service.into(),
            id_param: id_param.into(),
            count_method: None,
            fetch,
            records_path: vec![RET_VAL.to_owned()],
            release_method: release_method.into(),
            window: DEFAULT_WINDOW,
            total_key: None,
        }
    }

    /// Method returning the total record count as `PxgRetVal`.
    #[must_use]
    pub fn count_method(mut self, method: impl Into<String>) -> Self {
        self.count_method = Some(method.into());
        self
    }

    /// Field of the opening call's reply holding the total count, for
    /// openers such as `FindHosts` that return it alongside the id.
    #[must_use]
    pub fn total_in_reply(mut self, key: impl Into<String>) -> Self {
        self.total_key = Some(key.into());
        self
    }

    /// Key path from the fetch reply to the record array, e.g.
    /// `["pChunk", "KLCSP_ITERATOR_ARRAY"]`. Defaults to `["PxgRetVal"]`.
    #[must_use]
    pub fn records_at(mut self, path: &[&str]) -> Self {
        self.records_path = path.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    /// Records requested per fetch. Clamped to at least 1.
    #[must_use]
    pub fn window(mut self, window: u32) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn id_param(&self) -> &str {
        &self.id_param
    }

    pub fn release_method(&self) -> &str {
        &self.release_method
    }

    pub fn window_size(&self) -> u32 {
        self.window
    }
}

// ── Iterator ───────────────────────────────────────────────────────────

/// Single-pass lazy sequence over a server-side iterator.
///
/// Not safe for concurrent advance: every method takes `&mut self`.
#[derive(Debug)]
pub struct RecordIterator {
    session: Session,
    spec: IteratorSpec,
    id: String,
    lifetime: Option<Duration>,
    total: Option<u64>,
    count_queried: bool,
    position: u64,
    buffer: VecDeque<Value>,
    exhausted: bool,
    released: bool,
}

impl RecordIterator {
    /// Wraps an iterator id the caller already obtained.
    pub fn new(session: Session, spec: IteratorSpec, id: impl Into<String>) -> Self {
        RecordIterator {
            session,
            spec,
            id: id.into(),
            lifetime: None,
            total: None,
            count_queried: false,
            position: 0,
            buffer: VecDeque::new(),
            exhausted: false,
            released: false,
        }
    }

    /// Issues the `Reset…`/`Find…` call and wraps the returned id.
    ///
    /// `id_key` names the companion reply field holding the id; `None`
    /// means the id is `PxgRetVal` itself.
    pub async fn open(
        ctx: &Context,
        session: &Session,
        service: &str,
        method: &str,
        params: Params,
        id_key: Option<&str>,
        spec: IteratorSpec,
    ) -> Result<Self> {
        let reply = session.call(ctx, service, method, params).await?;
        let id = iterator_id(&reply, id_key)?;
        let total_key = spec.total_key.clone();
        let mut iter = RecordIterator::new(session.clone(), spec, id);
        let Some(key) = total_key else {
            tracing::trace!(service, method, iterator = %iter.id, "opened iterator");
            return Ok(iter);
        };
        match count_at(&reply, &key) {
            Ok(total) => {
                tracing::trace!(service, method, iterator = %iter.id, total, "opened iterator");
                Ok(iter.with_total(total))
            }
            Err(err) => {
                // The id is live server-side even though the reply is unusable.
                let _ = iter.release(&Context::detached(RELEASE_TIMEOUT)).await;
                Err(err)
            }
        }
    }

    /// Records a total already known from the opening call. Skips the
    /// count query.
    #[must_use]
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self.count_queried = true;
        self
    }

    /// Records the lifetime the iterator was opened with.
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    /// Total record count, once known.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Records fetched from the server so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Next record, or `None` at the end of the sequence.
    pub async fn next(&mut self, ctx: &Context) -> Result<Option<Value>> {
        if self.buffer.is_empty() {
            match self.advance(ctx).await? {
                Some(batch) => self.buffer.extend(batch),
                None => return Ok(None),
            }
        }
        Ok(self.buffer.pop_front())
    }

    /// Next window of records, or `None` at the end of the sequence.
    ///
    /// Records buffered by an earlier [`RecordIterator::next`] are returned
    /// first.
    pub async fn next_batch(&mut self, ctx: &Context) -> Result<Option<Vec<Value>>> {
        if !self.buffer.is_empty() {
            return Ok(Some(self.buffer.drain(..).collect()));
        }
        self.advance(ctx).await
    }

    /// Drains every remaining record.
    pub async fn collect_all(mut self, ctx: &Context) -> Result<Vec<Value>> {
        let mut records: Vec<Value> = self.buffer.drain(..).collect();
        while let Some(batch) = self.advance(ctx).await? {
            records.extend(batch);
        }
        Ok(records)
    }

    /// Frees the server-side iterator. Idempotent: only the first call
    /// sends a release RPC.
    pub async fn release(&mut self, ctx: &Context) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.buffer.clear();
        let params = self.id_params();
        let result = self
            .session
            .call(ctx, &self.spec.service, &self.spec.release_method, params)
            .await;
        tracing::trace!(
            service = %self.spec.service,
            iterator = %self.id,
            ok = result.is_ok(),
            "released iterator"
        );
        result.map(|_| ())
    }

    /// One step: fetch a window, or finish and release.
    ///
    /// Errors release the iterator on the way out, except `IteratorExpired`
    /// where the server no longer holds it.
    async fn advance(&mut self, ctx: &Context) -> Result<Option<Vec<Value>>> {
        if self.released {
            return Ok(None);
        }
        if self.exhausted {
            self.release(&Context::detached(RELEASE_TIMEOUT)).await?;
            return Ok(None);
        }
        match self.fetch_window(ctx).await {
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                self.release(&Context::detached(RELEASE_TIMEOUT)).await?;
                Ok(None)
            }
            Err(err @ KscError::IteratorExpired(_)) => {
                self.released = true;
                self.buffer.clear();
                Err(err)
            }
            Err(err) => {
                // The original failure matters more than a failed cleanup.
                let _ = self.release(&Context::detached(RELEASE_TIMEOUT)).await;
                Err(err)
            }
        }
    }

    /// Fetches the next window. `Ok(None)` means the sequence is over.
    async fn fetch_window(&mut self, ctx: &Context) -> Result<Option<Vec<Value>>> {
        if !self.count_queried {
            self.count_queried = true;
            if let Some(method) = self.spec.count_method.clone() {
                let reply = self
                    .session
                    .call(ctx, &self.spec.service, &method, self.id_params())
                    .await?;
                self.total = Some(count_at(&reply, RET_VAL)?);
            }
        }

        let want = match self.total {
            Some(total) if self.position >= total => return Ok(None),
            Some(total) => (total - self.position).min(u64::from(self.spec.window)),
            None => u64::from(self.spec.window),
        };
        let start = to_param(self.position)?;
        let want_param = to_param(want)?;

        let mut params = self.id_params();
        match &self.spec.fetch {
            FetchStyle::Range {
                start_param,
                end_param,
                ..
            } => {
                params.insert(start_param.clone(), start);
                params.insert(end_param.clone(), start + want_param);
            }
            FetchStyle::Chunk {
                start_param,
                count_param,
                ..
            } => {
                params.insert(start_param.clone(), start);
                params.insert(count_param.clone(), want_param);
            }
            FetchStyle::Next { count_param, .. } => {
                if let Some(count_param) = count_param {
                    params.insert(count_param.clone(), want_param);
                }
            }
        }

        let reply = self
            .session
            .call(ctx, &self.spec.service, self.spec.fetch.method(), params)
            .await?;

        if let FetchStyle::Next {
            eof_key: Some(key), ..
        } = &self.spec.fetch
        {
            if reply.lookup(key).and_then(Value::as_bool) == Some(true) {
                self.exhausted = true;
            }
        }

        let batch = records_from(&reply, &self.spec.records_path).map_err(KscError::Decode)?;
        if batch.is_empty() {
            return Ok(None);
        }
        self.position += batch.len() as u64;
        Ok(Some(batch))
    }

    fn id_params(&self) -> Params {
        Params::new().with(self.spec.id_param.clone(), self.id.clone())
    }
}

/// Releases on drop when the caller stopped early without calling
/// [`RecordIterator::release`]. Needs a Tokio runtime; without one the id
/// is left for the server to expire.
impl Drop for RecordIterator {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = self.session.clone();
        let service = self.spec.service.clone();
        let method = self.spec.release_method.clone();
        let params = self.id_params();
        let id = std::mem::take(&mut self.id);
        handle.spawn(async move {
            let ctx = Context::detached(RELEASE_TIMEOUT);
            let result = session.call(&ctx, &service, &method, params).await;
            tracing::trace!(service = %service, iterator = %id, ok = result.is_ok(), "released dropped iterator");
        });
    }
}

// ── Reply helpers ──────────────────────────────────────────────────────

fn iterator_id(reply: &Reply, id_key: Option<&str>) -> Result<String> {
    let key = id_key.unwrap_or(RET_VAL);
    let value = reply.lookup(key).ok_or_else(|| KscError::MissingField {
        field: key.to_owned(),
    })?;
    match value.as_str() {
        Some(id) if !id.is_empty() => Ok(id.to_owned()),
        Some(_) => Err(KscError::MissingField {
            field: key.to_owned(),
        }),
        None => Err(KscError::Decode(
            CodecError::new(format!("iterator id must be a string, found {}", value.kind_name()))
                .within_key(key),
        )),
    }
}

fn count_at(reply: &Reply, key: &str) -> Result<u64> {
    let value = reply.lookup(key).ok_or_else(|| KscError::MissingField {
        field: key.to_owned(),
    })?;
    let count = value.as_i64().ok_or_else(|| {
        KscError::Decode(
            CodecError::new(format!("record count must be an int, found {}", value.kind_name()))
                .within_key(key),
        )
    })?;
    u64::try_from(count).map_err(|_| {
        KscError::Decode(CodecError::new(format!("record count {count} is negative")).within_key(key))
    })
}

fn to_param(n: u64) -> Result<i64> {
    i64::try_from(n).map_err(|_| {
        KscError::Encode(CodecError::new(format!("iterator position {n} exceeds i64")))
    })
}

/// Walks `path` through the reply and returns the record array. A missing
/// or null array is an empty window.
fn records_from(reply: &Reply, path: &[String]) -> std::result::Result<Vec<Value>, CodecError> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(Vec::new());
    };
    let mut current = match reply.get(first) {
        Some(value) => value,
        None => return Ok(Vec::new()),
    };
    let mut walked = vec![first.as_str()];
    for key in rest {
        let bag = current.as_params().ok_or_else(|| {
            at_path(
                &walked,
                CodecError::new(format!("expected params, found {}", current.kind_name())),
            )
        })?;
        current = match bag.get(key) {
            Some(value) => value,
            None => return Ok(Vec::new()),
        };
        walked.push(key.as_str());
    }
    match current {
        Value::Array(items) => Ok(items.clone()),
        other => Err(at_path(
            &walked,
            CodecError::new(format!("expected record array, found {}", other.kind_name())),
        )),
    }
}

fn at_path(keys: &[&str], err: CodecError) -> CodecError {
    keys.iter().rev().fold(err, |e, key| e.within_key(key))
}
