//! Identity resolution and the static access policy

use std::collections::HashSet;
use async_trait::async_trait;

use crate::engine::{AccessPolicy, Identity, IdentityProvider};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Always resolves to the same caller
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    identity: Identity,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identity: Identity { user_id: user_id.into(), display_name: display_name.into() },
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn resolve_identity(&self) -> anyhow::Result<Identity> {
        Ok(self.identity.clone())
    }
}

/// Identity carried by request headers, built once per HTTP request
#[derive(Debug, Clone, Default)]
pub struct HeaderIdentity {
    user_id: Option<String>,
    display_name: Option<String>,
}

impl HeaderIdentity {
    pub fn new(user_id: Option<&str>, display_name: Option<&str>) -> Self {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);
        Self { user_id: clean(user_id), display_name: clean(display_name) }
    }
}

#[async_trait]
impl IdentityProvider for HeaderIdentity {
    async fn resolve_identity(&self) -> anyhow::Result<Identity> {
        let user_id = self
            .user_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("missing {} header", USER_ID_HEADER))?;
        let display_name = self.display_name.clone().unwrap_or_else(|| user_id.clone());
        Ok(Identity { user_id, display_name })
    }
}

/// Everyone except the listed users, compared case-insensitively
#[derive(Debug, Clone, Default)]
pub struct DenyListPolicy {
    denied: HashSet<String>,
}

impl DenyListPolicy {
    pub fn new<I, S>(denied: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            denied: denied
                .into_iter()
                .map(|u| u.as_ref().trim().to_lowercase())
                .filter(|u| !u.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.denied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.denied.is_empty()
    }
}

impl AccessPolicy for DenyListPolicy {
    fn is_allowed(&self, user_id: &str) -> bool {
        !self.denied.contains(&user_id.trim().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_header_identity_defaults_display_name() {
        let identity = HeaderIdentity::new(Some("alice@example.com"), None)
            .resolve_identity()
            .await
            .unwrap();
        assert_eq!(identity.display_name, "alice@example.com");
    }

    #[tokio::test]
    async fn test_missing_header_is_an_error() {
        assert!(HeaderIdentity::new(None, Some("Alice")).resolve_identity().await.is_err());
        assert!(HeaderIdentity::new(Some("  "), None).resolve_identity().await.is_err());
    }

    #[tokio::test]
    async fn test_static_identity() {
        let identity = StaticIdentity::new("svc", "Service").resolve_identity().await.unwrap();
        assert_eq!(identity.user_id, "svc");
    }

    #[test]
    fn test_deny_list_is_case_insensitive() {
        let policy = DenyListPolicy::new(["Mallory@Example.com", " "]);
        assert_eq!(policy.len(), 1);
        assert!(!policy.is_allowed("mallory@example.com"));
        assert!(policy.is_allowed("alice@example.com"));
    }
}
