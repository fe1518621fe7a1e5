//! Core traits for filesync
//!
//! Seams to collaborators that live outside the sync core.

use std::fmt;

#[cfg(feature = "async")]
use crate::Result;
#[cfg(feature = "async")]
use async_trait::async_trait;
#[cfg(feature = "async")]
use std::path::Path;

/// Credentials for a network-backed replica root
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    /// Account name
    pub user: String,
    /// Account secret
    pub password: String,
    /// Optional authentication domain
    pub domain: Option<String>,
}

impl RemoteCredentials {
    /// Create credentials without a domain
    pub fn new<U: Into<String>, P: Into<String>>(user: U, password: P) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            domain: None,
        }
    }

    /// Set the authentication domain
    pub fn with_domain<D: Into<String>>(mut self, domain: D) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Establishes and tears down access to a network share.
///
/// Implementations must tolerate `disconnect` being called after a failed or
/// partial `connect`.
#[cfg(feature = "async")]
#[async_trait]
pub trait ShareConnector: Send + Sync {
    /// Make `path` accessible using `credentials`
    async fn connect(&self, path: &Path, credentials: &RemoteCredentials) -> Result<()>;

    /// Release access to `path`
    async fn disconnect(&self, path: &Path) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = RemoteCredentials::new("svc-sync", "hunter2").with_domain("CORP");
        let rendered = format!("{:?}", creds);

        assert!(rendered.contains("svc-sync"));
        assert!(rendered.contains("CORP"));
        assert!(!rendered.contains("hunter2"));
    }
}
