//! Async Rust client for the Kaspersky Security Center JSON-over-HTTP
//! administration API.
//!
//! Every remote method is a POST to `<base>/api/v1.0/<Service>.<Method>`
//! with a tag-typed JSON parameter bag as the body. This crate provides the
//! value model and codec for that wire form, an authenticated transport,
//! a typed error taxonomy, and helpers for the server's two recurring
//! idioms: forward iterators and long-running async requests.
//!
//! # Modules
//!
//! - [`value`] — in-memory value tree (`Value`, `Params`).
//! - [`codec`] — encode/decode between values and the tag-typed wire form.
//! - [`auth`] — credential variants and `Authorization` header formatting.
//! - [`session`] — `Session`, its builder, and the debug sink.
//! - [`transport`] — `Session::call` and the `Reply` it returns.
//! - [`context`] — cancellation token plus deadline for each call.
//! - [`config`] — TOML-loadable session settings.
//! - [`error`] — typed error hierarchy (`KscError`).
//! - [`iterator`] — `RecordIterator` over server-side result sets.
//! - [`async_op`] — `AsyncOperation` polling for long-running requests.
//! - [`idiom`] — method-name classification.
//! - [`services`] — typed facades for individual services.
//!
//! # Quick Start
//!
//! ```ignore
//! use ksc_api::{Auth, Session};
//! use ksc_api::services::{oauth2, policy};
//!
//! let session = Session::builder("https://ksc.example.com:13299")
//!     .auth(Auth::basic("admin", "secret"))
//!     .accept_invalid_certs(true)
//!     .build()?;
//! let ctx = session.context();
//!
//! let clients = oauth2::get_clients(&ctx, &session, oauth2::ALL_STATES).await?;
//! let policy = policy::get_policy_data(&ctx, &session, 42).await?;
//! session.close();
//! ```

pub mod async_op;
pub mod auth;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod idiom;
pub mod iterator;
pub mod services;
pub mod session;
pub mod transport;
pub mod value;

pub use async_op::{AsyncOperation, AsyncSpec, OperationState, PollConfig};
pub use auth::Auth;
pub use config::SessionConfig;
pub use context::Context;
pub use error::{CodecError, ErrorCodes, KscError, Result, ServerError};
pub use iterator::{FetchStyle, IteratorSpec, RecordIterator};
pub use session::{DebugSink, Session, SessionBuilder, TracingSink};
pub use transport::Reply;
pub use value::{Params, Value};
