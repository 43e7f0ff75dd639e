//! Interfaces implemented by the integrator.
//!
//! Every call may do I/O. The engine awaits them once and never retries.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::claims::ClaimSet;
use crate::error::Result;
use crate::subject::Subject;
use crate::transport::RequestContext;

/// Port for credential verification.
#[async_trait]
pub trait Authenticate: Send + Sync {
    /// Check the credentials carried by `request`.
    ///
    /// Rejections should use [`Error::AuthenticationFailed`](crate::Error::AuthenticationFailed);
    /// they are returned to the caller untouched.
    async fn authenticate(&self, request: &RequestContext) -> Result<Box<dyn Subject>>;
}

/// Port for the identity lookup endpoint.
#[async_trait]
pub trait RetrieveUser: Send + Sync {
    async fn retrieve_user(
        &self,
        request: &RequestContext,
        claims: &ClaimSet,
    ) -> Result<Option<Box<dyn Subject>>>;
}

/// Port for refresh token persistence.
///
/// Storing a token for a subject must overwrite any previous record.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn store(&self, user_id: &str, refresh_token: &str) -> Result<()>;

    async fn retrieve(&self, user_id: &str) -> Result<Option<String>>;

    /// Replace `expected` by `replacement` if it is still the current token.
    ///
    /// The default runs retrieve, compare and store in sequence, which is only
    /// race free if the store is linearizable per subject. Stores able to do
    /// an atomic compare-and-swap should override it.
    async fn rotate(&self, user_id: &str, expected: &str, replacement: &str) -> Result<bool> {
        let Some(current) = self.retrieve(user_id).await? else {
            return Ok(false);
        };
        if !same_token(&current, expected) {
            return Ok(false);
        }

        self.store(user_id, replacement).await?;
        Ok(true)
    }
}

/// Port for scope resolution.
#[async_trait]
pub trait ScopeProvider: Send + Sync {
    async fn scopes(&self, subject: &dyn Subject) -> Result<Vec<String>>;
}

/// Port adding claims to every access token.
#[async_trait]
pub trait PayloadExtender: Send + Sync {
    async fn extend(&self, subject: &dyn Subject) -> Result<Map<String, Value>>;
}

/// Compare tokens through their digests so timing does not reveal a prefix.
pub fn same_token(left: &str, right: &str) -> bool {
    Sha256::digest(left.as_bytes()) == Sha256::digest(right.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct PlainStore {
        tokens: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl RefreshTokenStore for PlainStore {
        async fn store(&self, user_id: &str, refresh_token: &str) -> Result<()> {
            self.tokens
                .lock()
                .unwrap()
                .insert(user_id.to_owned(), refresh_token.to_owned());
            Ok(())
        }

        async fn retrieve(&self, user_id: &str) -> Result<Option<String>> {
            Ok(self.tokens.lock().unwrap().get(user_id).cloned())
        }
    }

    #[tokio::test]
    async fn test_default_rotate() {
        let store = PlainStore::default();
        assert!(!store.rotate("alice", "r1", "r2").await.unwrap());

        store.store("alice", "r1").await.unwrap();
        assert!(store.rotate("alice", "r1", "r2").await.unwrap());
        assert!(!store.rotate("alice", "r1", "r3").await.unwrap());
        assert_eq!(store.retrieve("alice").await.unwrap().as_deref(), Some("r2"));
    }

    #[test]
    fn test_same_token() {
        assert!(same_token("abc", "abc"));
        assert!(!same_token("abc", "abd"));
        assert!(!same_token("", "abc"));
    }
}
