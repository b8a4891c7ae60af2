//! Download session collaborator.
//!
//! Archives are served only to signed-in developer accounts. Signing in is
//! handled outside this crate; what arrives here is a cookie string that has
//! to be attached to download requests.

use tracing::debug;

use crate::error::{InstallError, InstallResult};

/// Environment variable that overrides the configured session cookie.
pub const SESSION_COOKIE_ENV: &str = "XCODES_SESSION_COOKIE";

/// Source of the authenticated download session.
pub trait SessionProvider: Send + Sync {
    /// Confirm the session is usable, or fail with
    /// [`InstallError::MissingCredential`].
    fn validate(&self) -> InstallResult<()>;

    /// `Cookie` header value to send with a request for `url`.
    fn cookies_for(&self, url: &str) -> Option<String>;
}

/// A session made from a fixed cookie string.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    cookie: Option<String>,
}

impl StaticSession {
    pub fn new(cookie: Option<String>) -> Self {
        let cookie = cookie
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Self { cookie }
    }

    /// Prefer [`SESSION_COOKIE_ENV`] over the configured value.
    pub fn from_env_or(configured: Option<String>) -> Self {
        match std::env::var(SESSION_COOKIE_ENV) {
            Ok(value) if !value.trim().is_empty() => {
                debug!("Using session cookie from {}", SESSION_COOKIE_ENV);
                Self::new(Some(value))
            }
            _ => Self::new(configured),
        }
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.is_some()
    }
}

impl SessionProvider for StaticSession {
    fn validate(&self) -> InstallResult<()> {
        if self.cookie.is_some() {
            Ok(())
        } else {
            Err(InstallError::MissingCredential)
        }
    }

    fn cookies_for(&self, url: &str) -> Option<String> {
        if url.starts_with("https://") || url.starts_with("http://") {
            self.cookie.clone()
        } else {
            None
        }
    }
}
