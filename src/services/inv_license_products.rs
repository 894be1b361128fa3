//! `InvLicenseProducts` service: license keys of inventoried products.

use crate::context::Context;
use crate::error::Result;
use crate::session::Session;
use crate::value::Params;

const SERVICE: &str = "InvLicenseProducts";

/// Deletes a license key. Key ids may exceed 2^53; the codec sends those
/// as `long` envelopes.
pub async fn delete_license_key(ctx: &Context, session: &Session, lic_key_id: i64) -> Result<()> {
    let params = Params::new().with("nLicKeyId", lic_key_id);
    session
        .call(ctx, SERVICE, "DeleteLicenseKey", params)
        .await
        .map(|_| ())
}
