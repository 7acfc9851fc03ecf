//! User directory: resolves a command target to an internal user record.
//!
//! The directory is owned by another system. Intake treats "not found" as a
//! transient condition because the user record may not have synced yet.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;

use commandrelay_core::{TargetId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: TargetId,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, target: &TargetId) -> Result<Option<User>, DirectoryError>;
}

#[async_trait]
impl<T> UserDirectory for Arc<T>
where
    T: UserDirectory + ?Sized,
{
    async fn resolve(&self, target: &TargetId) -> Result<Option<User>, DirectoryError> {
        (**self).resolve(target).await
    }
}

/// In-memory directory for tests/dev.
///
/// In permissive mode every target resolves, with a stable id minted on
/// first lookup.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<TargetId, User>>,
    permissive: bool,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissive() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            permissive: true,
        }
    }

    pub fn register(&self, email: TargetId) -> User {
        let user = User {
            id: UserId::new(),
            email: email.clone(),
        };
        if let Ok(mut users) = self.users.write() {
            return users.entry(email).or_insert(user).clone();
        }
        user
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn resolve(&self, target: &TargetId) -> Result<Option<User>, DirectoryError> {
        let found = self
            .users
            .read()
            .map_err(|_| DirectoryError::Unavailable("lock poisoned".to_string()))?
            .get(target)
            .cloned();

        match found {
            Some(user) => Ok(Some(user)),
            None if self.permissive => Ok(Some(self.register(target.clone()))),
            None => Ok(None),
        }
    }
}

/// Looks users up in the shared `users` table by email.
#[derive(Debug, Clone)]
pub struct PostgresUserDirectory {
    pool: Arc<PgPool>,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    #[instrument(skip(self), fields(target = %target), err)]
    async fn resolve(&self, target: &TargetId) -> Result<Option<User>, DirectoryError> {
        let row = sqlx::query("SELECT id FROM users WHERE lower(email) = $1 LIMIT 1")
            .bind(target.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("user lookup failed: {}", e)))?;

        row.map(|row| {
            row.try_get::<uuid::Uuid, _>("id")
                .map(|id| User {
                    id: UserId::from_uuid(id),
                    email: target.clone(),
                })
                .map_err(|e| DirectoryError::Unavailable(format!("failed to read user row: {}", e)))
        })
        .transpose()
    }
}
