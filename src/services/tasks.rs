//! `Tasks` service: per-host status of group tasks.
//!
//! [`reset_host_iterator_for_task_status_ex`] prepares a result set of
//! host statuses for one task and returns a [`RecordIterator`] over it.
//! Records are fetched with `GetHostStatusRecordRange` in windows, the
//! total comes from `GetHostStatusRecordsCount`, and the iterator is freed
//! with `ReleaseHostStatusIterator`.

use std::time::Duration;

use crate::context::Context;
use crate::error::Result;
use crate::iterator::{FetchStyle, IteratorSpec, RecordIterator};
use crate::session::Session;
use crate::value::{Params, Value};

const SERVICE: &str = "Tasks";
const ITERATOR_ID: &str = "strHostIteratorId";

/// Options for a host-status query beyond the task and fields.
#[derive(Debug, Clone, PartialEq)]
pub struct HostStatusQuery {
    /// Sort order, as `{Name, Asc}` bags. Empty leaves the order to the
    /// server.
    pub order: Vec<Params>,
    /// Bitmask of host states to include. `None` sends no mask.
    pub state_mask: Option<i64>,
    /// Server-side lifetime of the iterator.
    pub lifetime: Duration,
    /// Records per fetch.
    pub window: u32,
}

impl Default for HostStatusQuery {
    fn default() -> Self {
        HostStatusQuery {
            order: Vec::new(),
            state_mask: None,
            lifetime: Duration::from_secs(300),
            window: crate::iterator::DEFAULT_WINDOW,
        }
    }
}

/// The iterator family behind `ResetHostIteratorForTaskStatus[Ex]`.
pub fn host_status_spec(window: u32) -> IteratorSpec {
    IteratorSpec::new(
        SERVICE,
        ITERATOR_ID,
        FetchStyle::range("GetHostStatusRecordRange"),
        "ReleaseHostStatusIterator",
    )
    .count_method("GetHostStatusRecordsCount")
    .records_at(&["pParHostStatus", "KLCSP_ITERATOR_ARRAY"])
    .window(window)
}

/// Opens an iterator over the per-host status of `task_id`, returning
/// `fields` for each host.
///
/// The returned iterator must be drained or released. Dropping it early
/// releases in the background.
pub async fn reset_host_iterator_for_task_status_ex(
    ctx: &Context,
    session: &Session,
    task_id: &str,
    fields: &[&str],
    query: HostStatusQuery,
) -> Result<RecordIterator> {
    let order: Vec<Value> = query.order.into_iter().map(Value::Params).collect();
    let params = Params::new()
        .with("strTask", task_id)
        .with("pFields2Return", Value::strings(fields.iter().copied()))
        .with("pFields2Order", order)
        .with("nHostStateMask", query.state_mask)
        .with("nLifetime", lifetime_secs(query.lifetime));
    let iter = RecordIterator::open(
        ctx,
        session,
        SERVICE,
        "ResetHostIteratorForTaskStatusEx",
        params,
        Some(ITERATOR_ID),
        host_status_spec(query.window),
    )
    .await?;
    Ok(iter.with_lifetime(query.lifetime))
}

/// Reads every host-status record of `task_id` and releases the iterator.
pub async fn host_status_records(
    ctx: &Context,
    session: &Session,
    task_id: &str,
    fields: &[&str],
) -> Result<Vec<Params>> {
    let iter = reset_host_iterator_for_task_status_ex(
        ctx,
        session,
        task_id,
        fields,
        HostStatusQuery::default(),
    )
    .await?;
    super::records_as_params(iter.collect_all(ctx).await?)
}

fn lifetime_secs(lifetime: Duration) -> i64 {
    i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX)
}
