//! Access control list of authorized driver tokens

use async_trait::async_trait;
use dashmap::DashSet;

use crate::error::Result;

/// Source of truth for which driver tokens may charge
///
/// Implementations may be slow or fail; the engine bounds every lookup with a
/// timeout and, optionally, a circuit breaker.
#[async_trait]
pub trait AclStore: Send + Sync {
    /// Whether `driver_token` is authorized
    async fn contains(&self, driver_token: &str) -> Result<bool>;
}

/// Concurrent in-memory ACL
#[derive(Debug, Default)]
pub struct InMemoryAcl {
    tokens: DashSet<String>,
}

impl InMemoryAcl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let acl = Self::new();
        for token in tokens {
            acl.tokens.insert(token.into());
        }
        acl
    }

    pub fn insert(&self, token: impl Into<String>) -> bool {
        self.tokens.insert(token.into())
    }

    pub fn remove(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl AclStore for InMemoryAcl {
    async fn contains(&self, driver_token: &str) -> Result<bool> {
        Ok(self.tokens.contains(driver_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup() {
        let acl = InMemoryAcl::from_tokens(["ABCD-efgh1234567890_~valid.token"]);

        assert!(acl.contains("ABCD-efgh1234567890_~valid.token").await.unwrap());
        assert!(!acl.contains("unknownToken12345678901234").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_remove() {
        let acl = InMemoryAcl::new();
        assert!(acl.is_empty());

        assert!(acl.insert("token-a"));
        assert!(!acl.insert("token-a"));
        assert_eq!(acl.len(), 1);
        assert!(acl.contains("token-a").await.unwrap());

        assert!(acl.remove("token-a"));
        assert!(!acl.contains("token-a").await.unwrap());
    }

    #[test]
    fn test_lookup_is_ready_without_a_runtime() {
        let acl = InMemoryAcl::from_tokens(["token-a", "token-b"]);

        let mut lookup = tokio_test::task::spawn(acl.contains("token-b"));
        match lookup.poll() {
            std::task::Poll::Ready(found) => assert!(found.unwrap()),
            std::task::Poll::Pending => panic!("in-memory lookup should never be pending"),
        }
    }
}
