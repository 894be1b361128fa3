//! TOML-loadable session settings.
//!
//! The library reads no files and no environment on its own; callers load
//! a `SessionConfig` however they like (file, secret store, embedded string)
//! and turn it into a [`Session`].
//!
//! ```toml
//! server = "https://ksc.example.com:13299"
//! vserver = "vs-tenant-a"
//! debug = false
//! default_deadline_ms = 30000
//! accept_invalid_certs = true
//!
//! [auth]
//! kind = "basic"
//! user = "admin"
//! password = "secret"
//!
//! [error_codes]
//! iterator_expired = [1183]
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::auth::Auth;
use crate::error::{ErrorCodes, KscError, Result};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Base URL, scheme and port included.
    pub server: String,
    pub auth: Auth,
    #[serde(default)]
    pub vserver: Option<String>,
    #[serde(default)]
    pub debug: bool,
    /// Deadline applied to calls whose context carries none.
    #[serde(default)]
    pub default_deadline_ms: Option<u64>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub error_codes: ErrorCodes,
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| KscError::InvalidSession(format!("bad config: {e}")))
    }

    pub fn build(self) -> Result<Session> {
        let mut builder = Session::builder(self.server)
            .auth(self.auth)
            .debug(self.debug)
            .accept_invalid_certs(self.accept_invalid_certs)
            .error_codes(self.error_codes);
        if let Some(vserver) = self.vserver {
            builder = builder.vserver(vserver);
        }
        if let Some(ms) = self.default_deadline_ms {
            builder = builder.default_deadline(Duration::from_millis(ms));
        }
        if let Some(ms) = self.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        builder.build()
    }
}
