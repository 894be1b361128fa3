//! Service facades: typed entry points for individual remote methods.
//!
//! Each facade function takes the caller's [`Context`](crate::Context)
//! first and the [`Session`](crate::Session) second, builds exactly one
//! parameter bag, and hands it to [`Session::call`](crate::Session::call).
//! Errors are returned unchanged. Methods that open a server-side iterator
//! return a [`RecordIterator`](crate::RecordIterator); methods that start a
//! long-running request return an [`AsyncOperation`](crate::AsyncOperation).
//!
//! | Module                   | Server service        |
//! |--------------------------|-----------------------|
//! | [`oauth2`]               | `OAuth2`              |
//! | [`inv_license_products`] | `InvLicenseProducts`  |
//! | [`policy`]               | `Policy`              |
//! | [`tasks`]                | `Tasks`               |
//! | [`report_manager`]       | `ReportManager`       |
//! | [`host_group`]           | `HostGroup`, `ChunkAccessor` |

pub mod host_group;
pub mod inv_license_products;
pub mod oauth2;
pub mod policy;
pub mod report_manager;
pub mod tasks;

use crate::error::{CodecError, KscError, Result};
use crate::transport::{RET_VAL, Reply};
use crate::value::{Params, Value};

/// The `PxgRetVal` bag of a reply. An absent return value reads as an
/// empty bag.
pub(crate) fn ret_params(reply: Reply) -> Result<Params> {
    match reply.into_ret_val() {
        Value::Null => Ok(Params::new()),
        Value::Params(bag) => Ok(bag),
        other => Err(KscError::Decode(
            CodecError::new(format!("expected params, found {}", other.kind_name()))
                .within_key(RET_VAL),
        )),
    }
}

/// Turns iterator records into parameter bags, reporting the index of the
/// first record that is not one.
pub(crate) fn records_as_params(records: Vec<Value>) -> Result<Vec<Params>> {
    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| match record {
            Value::Params(bag) => Ok(bag),
            other => Err(KscError::Decode(
                CodecError::new(format!("expected a record bag, found {}", other.kind_name()))
                    .within_index(i),
            )),
        })
        .collect()
}
