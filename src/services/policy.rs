//! `Policy` service: group policies.
//!
//! - [`get_policy_data`] — read a policy's attributes.
//! - [`delete_policy`] — delete a policy.
//!
//! Policy attributes come back as a bag keyed by `KLPOL_*` names. The
//! commonly used ones are lifted into [`PolicyData`]; the full bag stays
//! available in [`PolicyData::attributes`].

use crate::context::Context;
use crate::error::Result;
use crate::session::Session;
use crate::value::{Params, Value};

const SERVICE: &str = "Policy";

/// A policy as returned by `Policy.GetPolicyData`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyData {
    /// Policy id (`KLPOL_ID`).
    pub id: i64,
    /// Display name (`KLPOL_DN`).
    pub display_name: Option<String>,
    /// Product the policy configures (`KLPOL_PRODUCT`).
    pub product: Option<String>,
    /// Product version (`KLPOL_VERSION`).
    pub version: Option<String>,
    /// Whether the policy is active (`KLPOL_ACTIVE`).
    pub active: Option<bool>,
    /// Whether the policy is inherited from a parent group (`KLPOL_INHERITED`).
    pub inherited: Option<bool>,
    /// Every attribute the server sent.
    pub attributes: Params,
}

impl PolicyData {
    /// Builds from the `PxgRetVal` bag. Only `KLPOL_ID` is required.
    pub fn from_params(attributes: Params) -> Result<Self> {
        let text = |key: &str| attributes.get(key).and_then(Value::as_str).map(str::to_owned);
        let flag = |key: &str| attributes.get(key).and_then(Value::as_bool);
        Ok(PolicyData {
            id: attributes.require_i64("KLPOL_ID")?,
            display_name: text("KLPOL_DN"),
            product: text("KLPOL_PRODUCT"),
            version: text("KLPOL_VERSION"),
            active: flag("KLPOL_ACTIVE"),
            inherited: flag("KLPOL_INHERITED"),
            attributes,
        })
    }
}

/// Reads a policy's attributes.
///
/// # Errors
///
/// `KscError::Server` when the policy does not exist, `MissingField` when
/// the reply lacks `KLPOL_ID`, plus the usual transport kinds.
pub async fn get_policy_data(ctx: &Context, session: &Session, policy_id: i64) -> Result<PolicyData> {
    let params = Params::new().with("nPolicy", policy_id);
    let reply = session.call(ctx, SERVICE, "GetPolicyData", params).await?;
    PolicyData::from_params(super::ret_params(reply)?)
}

pub async fn delete_policy(ctx: &Context, session: &Session, policy_id: i64) -> Result<()> {
    let params = Params::new().with("nPolicy", policy_id);
    session
        .call(ctx, SERVICE, "DeletePolicy", params)
        .await
        .map(|_| ())
}
