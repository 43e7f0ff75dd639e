//! In-process refresh token store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::ports::{RefreshTokenStore, same_token};

/// Keeps one refresh token per subject in memory.
///
/// Rotation holds the lock across compare and store, so concurrent renewals
/// of the same token cannot both succeed. Records are lost on restart.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tokens: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn store(&self, user_id: &str, refresh_token: &str) -> Result<()> {
        self.tokens
            .lock()
            .await
            .insert(user_id.to_owned(), refresh_token.to_owned());
        Ok(())
    }

    async fn retrieve(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.tokens.lock().await.get(user_id).cloned())
    }

    async fn rotate(&self, user_id: &str, expected: &str, replacement: &str) -> Result<bool> {
        let mut tokens = self.tokens.lock().await;

        match tokens.get_mut(user_id) {
            Some(current) if same_token(current, expected) => {
                replacement.clone_into(current);
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}
