//! `ReportManager` service: report generation.
//!
//! Reports are generated asynchronously. [`execute_report_async`] starts
//! generation and returns the [`AsyncOperation`]; [`execute_report`] also
//! waits for the finished report.

use bytes::Bytes;

use crate::async_op::{AsyncOperation, AsyncSpec};
use crate::context::Context;
use crate::error::Result;
use crate::session::Session;
use crate::value::Params;

const SERVICE: &str = "ReportManager";

/// Getter and canceller paired with `ExecuteReportAsync`.
pub fn execute_report_spec() -> AsyncSpec {
    AsyncSpec::new(
        SERVICE,
        "ExecuteReportAsyncGetData",
        "ExecuteReportAsyncCancel",
    )
}

/// Starts generating report `report_id`. `options` is passed through as
/// `pOptions`.
pub async fn execute_report_async(
    ctx: &Context,
    session: &Session,
    report_id: i64,
    options: Params,
) -> Result<AsyncOperation> {
    let params = Params::new()
        .with("lReportId", report_id)
        .with("pOptions", options);
    AsyncOperation::start(
        ctx,
        session,
        SERVICE,
        "ExecuteReportAsync",
        params,
        execute_report_spec(),
    )
    .await
}

/// Generates report `report_id` and returns its XML once complete.
pub async fn execute_report(
    ctx: &Context,
    session: &Session,
    report_id: i64,
    options: Params,
) -> Result<Bytes> {
    execute_report_async(ctx, session, report_id, options)
        .await?
        .wait(ctx)
        .await
}
