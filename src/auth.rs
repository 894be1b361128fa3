//! Credential descriptors and `Authorization` header formatting.
//!
//! The server accepts four authentication schemes. A session holds exactly
//! one of them and attaches exactly one `Authorization` header per call:
//!
//! | Descriptor  | Header value                                                                  |
//! |-------------|-------------------------------------------------------------------------------|
//! | `Basic`     | `Basic <base64(user:password)>`                                               |
//! | `Domain`    | `KSCBasic user="<user>", pass="<b64pass>", internal="<0|1>", domain-desc="<domain>"` |
//! | `Bearer`    | `Bearer <token>`                                                              |
//! | `TwoFactor` | `Bearer <token>; TOTP=<6 digits>`                                             |
//!
//! The header is rendered once when the session is built (or re-credentialed
//! via `Session::with_auth`), so malformed credentials fail early with
//! `KscError::InvalidSession` instead of on the first call.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::HeaderValue;
use serde::Deserialize;

use crate::error::{KscError, Result};

/// Authentication material for a session.
///
/// Deserializes from configuration as an internally tagged table:
///
/// ```toml
/// [auth]
/// kind = "domain"
/// user = "operator"
/// password = "secret"
/// domain = "CORP"
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Auth {
    /// Plain HTTP Basic against a server-local account.
    Basic { user: String, password: String },
    /// Server account resolved against a domain. An empty `domain` marks
    /// an internal (server-local) account.
    Domain {
        user: String,
        password: String,
        domain: String,
    },
    /// Pre-issued bearer token.
    Bearer { token: String },
    /// Bearer token plus a time-based one-time code.
    TwoFactor { token: String, totp_code: String },
}

impl Auth {
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Basic {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn domain(
        user: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Auth::Domain {
            user: user.into(),
            password: password.into(),
            domain: domain.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Auth::Bearer {
            token: token.into(),
        }
    }

    pub fn two_factor(token: impl Into<String>, totp_code: impl Into<String>) -> Self {
        Auth::TwoFactor {
            token: token.into(),
            totp_code: totp_code.into(),
        }
    }

    /// Short name of the scheme, safe to show in diagnostics.
    pub fn scheme(&self) -> &'static str {
        match self {
            Auth::Basic { .. } => "basic",
            Auth::Domain { .. } => "domain",
            Auth::Bearer { .. } => "bearer",
            Auth::TwoFactor { .. } => "two_factor",
        }
    }

    /// Renders the `Authorization` header value, marked sensitive so it
    /// never shows up in `reqwest`/`http` debug output.
    pub fn header_value(&self) -> Result<HeaderValue> {
        let rendered = self.render()?;
        let mut value = HeaderValue::from_str(&rendered).map_err(|_| {
            KscError::InvalidSession(format!(
                "{} credentials contain characters not allowed in an HTTP header",
                self.scheme()
            ))
        })?;
        value.set_sensitive(true);
        Ok(value)
    }

    fn render(&self) -> Result<String> {
        match self {
            Auth::Basic { user, password } => {
                if user.is_empty() {
                    return Err(invalid("basic auth requires a user name"));
                }
                // RFC 7617: the user-id cannot contain a colon.
                if user.contains(':') {
                    return Err(invalid("basic auth user name must not contain ':'"));
                }
                Ok(format!(
                    "Basic {}",
                    STANDARD.encode(format!("{user}:{password}"))
                ))
            }
            Auth::Domain {
                user,
                password,
                domain,
            } => {
                if user.is_empty() {
                    return Err(invalid("domain auth requires a user name"));
                }
                ensure_quotable("user", user)?;
                ensure_quotable("domain", domain)?;
                let internal = if domain.is_empty() { "1" } else { "0" };
                Ok(format!(
                    "KSCBasic user=\"{user}\", pass=\"{}\", internal=\"{internal}\", domain-desc=\"{domain}\"",
                    STANDARD.encode(password)
                ))
            }
            Auth::Bearer { token } => {
                ensure_token(token)?;
                Ok(format!("Bearer {token}"))
            }
            Auth::TwoFactor { token, totp_code } => {
                ensure_token(token)?;
                if totp_code.len() != 6 || !totp_code.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid("TOTP code must be exactly 6 digits"));
                }
                Ok(format!("Bearer {token}; TOTP={totp_code}"))
            }
        }
    }
}

/// Credentials are redacted; only the scheme and non-secret identity show.
impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Auth::Domain { user, domain, .. } => f
                .debug_struct("Domain")
                .field("user", user)
                .field("password", &"<redacted>")
                .field("domain", domain)
                .finish(),
            Auth::Bearer { .. } => f.debug_struct("Bearer").field("token", &"<redacted>").finish(),
            Auth::TwoFactor { .. } => f
                .debug_struct("TwoFactor")
                .field("token", &"<redacted>")
                .field("totp_code", &"<redacted>")
                .finish(),
        }
    }
}

fn invalid(message: &str) -> KscError {
    KscError::InvalidSession(message.to_owned())
}

/// Values placed inside a quoted header parameter must not close the quote.
fn ensure_quotable(field: &str, value: &str) -> Result<()> {
    if value.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return Err(KscError::InvalidSession(format!(
            "domain auth {field} must not contain quotes, backslashes or control characters"
        )));
    }
    Ok(())
}

fn ensure_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(invalid("bearer token must not be empty"));
    }
    if token.chars().any(|c| c.is_whitespace() || c.is_control() || c == ';') {
        return Err(invalid(
            "bearer token must not contain whitespace, ';' or control characters",
        ));
    }
    Ok(())
}
