//! `OAuth2` service: registered OAuth2 clients.
//!
//! - [`get_clients`] — list registered clients, optionally filtered by state.
//! - [`get_client`] — read one client by its identifier.

use crate::context::Context;
use crate::error::Result;
use crate::session::Session;
use crate::value::Params;

const SERVICE: &str = "OAuth2";

/// `nFilterByState` value matching clients in every state.
pub const ALL_STATES: i64 = -1;

/// Lists registered OAuth2 clients. Pass [`ALL_STATES`] for no filter.
///
/// Returns the `PxgRetVal` bag as sent by the server.
pub async fn get_clients(ctx: &Context, session: &Session, filter_by_state: i64) -> Result<Params> {
    let params = Params::new().with("nFilterByState", filter_by_state);
    let reply = session.call(ctx, SERVICE, "GetClients", params).await?;
    super::ret_params(reply)
}

/// Reads one client by id. The id travels as an ordinary string value, so
/// quotes and control characters in it reach the server intact.
pub async fn get_client(ctx: &Context, session: &Session, client_id: &str) -> Result<Params> {
    let params = Params::new().with("wstrClientId", client_id);
    let reply = session.call(ctx, SERVICE, "GetClient", params).await?;
    super::ret_params(reply)
}
