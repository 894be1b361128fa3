//! `HostGroup` service: host search.
//!
//! `HostGroup.FindHosts` returns a chunk accessor (`strAccessor`) plus the
//! match count as `PxgRetVal`. Records are read through the generic
//! `ChunkAccessor` service and the accessor is freed with
//! `ChunkAccessor.Release`.

use std::time::Duration;

use crate::context::Context;
use crate::error::Result;
use crate::iterator::{FetchStyle, IteratorSpec, RecordIterator};
use crate::session::Session;
use crate::transport::RET_VAL;
use crate::value::{Params, Value};

const SERVICE: &str = "HostGroup";
const ACCESSOR: &str = "strAccessor";

/// The `ChunkAccessor` iterator family.
pub fn chunk_accessor_spec(window: u32) -> IteratorSpec {
    IteratorSpec::new(
        "ChunkAccessor",
        ACCESSOR,
        FetchStyle::chunk("GetItemsChunk"),
        "Release",
    )
    .count_method("GetItemsCount")
    .records_at(&["pChunk", "KLCSP_ITERATOR_ARRAY"])
    .total_in_reply(RET_VAL)
    .window(window)
}

/// Searches hosts matching `filter`, a server search expression such as
/// `(KLHST_WKS_DN = "WKS-01")`.
pub async fn find_hosts(
    ctx: &Context,
    session: &Session,
    filter: &str,
    fields: &[&str],
    lifetime: Duration,
) -> Result<RecordIterator> {
    let params = Params::new()
        .with("wstrFilter", filter)
        .with("vecFieldsToReturn", Value::strings(fields.iter().copied()))
        .with("vecFieldsToOrder", Vec::<Value>::new())
        .with("pParams", Params::new())
        .with(
            "lMaxLifeTime",
            i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX),
        );
    let iter = RecordIterator::open(
        ctx,
        session,
        SERVICE,
        "FindHosts",
        params,
        Some(ACCESSOR),
        chunk_accessor_spec(crate::iterator::DEFAULT_WINDOW),
    )
    .await?;
    Ok(iter.with_lifetime(lifetime))
}
