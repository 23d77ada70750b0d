//! Authentication material for resource requests.
//!
//! A [`Credentials`] value is built once and shared by reference (usually an
//! `Arc`) across every resource that needs it. It turns into at most one
//! request header: Basic `authorization` when a password is present, else the
//! session `cookie` verbatim.
//!
//! Basic auth is sent as-is. Whether the channel is encrypted is up to the
//! deployment, not this crate.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::Zeroize;

/// A secret string that is wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
struct Secret(String);

impl Secret {
    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A principal plus an optional password and/or session cookie.
///
/// Equality, `Debug`, and `Display` only look at the principal.
#[derive(Clone)]
pub struct Credentials {
    principal: String,
    password: Option<Secret>,
    cookie: Option<Secret>,
}

impl Credentials {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            password: None,
            cookie: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret(password.into()));
        self
    }

    /// Session token sent as the `cookie` header, e.g. `USERTOKEN: value`.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(Secret(cookie.into()));
        self
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.is_some()
    }

    /// The single auth header these credentials produce, if any. A password
    /// wins over a cookie.
    pub fn headers(&self) -> Vec<(String, String)> {
        if let Some(password) = &self.password {
            let token = STANDARD.encode(format!("{}:{}", self.principal, password.expose()));
            return vec![("authorization".to_string(), format!("Basic {token}"))];
        }
        if let Some(cookie) = &self.cookie {
            return vec![("cookie".to_string(), cookie.expose().to_string())];
        }
        Vec::new()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.principal == other.principal
    }
}

impl Eq for Credentials {}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Credentials: {}>", self.principal)
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.principal)
    }
}
