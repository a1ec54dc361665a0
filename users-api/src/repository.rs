use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::users::{CreateUserRequest, PatchUserRequest, UpdateUserRequest, User};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn list(&self) -> Vec<User>;
    async fn get(&self, id: u64) -> Option<User>;
    async fn create(&self, request: CreateUserRequest) -> User;
    async fn update(&self, request: UpdateUserRequest) -> Option<User>;
    async fn patch(&self, id: u64, request: PatchUserRequest) -> Option<User>;
    /// Returns whether a user was removed.
    async fn delete(&self, id: u64) -> bool;
}

#[derive(Default)]
struct Users {
    next_id: u64,
    by_id: BTreeMap<u64, User>,
}

/// Process-local user table. Ids start at 1 and are never reused.
#[derive(Default)]
pub struct InMemoryUserRepository {
    inner: RwLock<Users>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn list(&self) -> Vec<User> {
        self.inner.read().await.by_id.values().cloned().collect()
    }

    async fn get(&self, id: u64) -> Option<User> {
        self.inner.read().await.by_id.get(&id).cloned()
    }

    async fn create(&self, request: CreateUserRequest) -> User {
        let mut users = self.inner.write().await;
        users.next_id += 1;
        let user = User {
            id: users.next_id,
            name: request.name,
            email: request.email,
            created_at: Utc::now(),
        };
        users.by_id.insert(user.id, user.clone());
        user
    }

    async fn update(&self, request: UpdateUserRequest) -> Option<User> {
        let mut users = self.inner.write().await;
        let user = users.by_id.get_mut(&request.id)?;
        user.name = request.name;
        user.email = request.email;
        Some(user.clone())
    }

    async fn patch(&self, id: u64, request: PatchUserRequest) -> Option<User> {
        let mut users = self.inner.write().await;
        let user = users.by_id.get_mut(&id)?;
        if let Some(name) = request.name {
            user.name = name;
        }
        if let Some(email) = request.email {
            user.email = email;
        }
        Some(user.clone())
    }

    async fn delete(&self, id: u64) -> bool {
        self.inner.write().await.by_id.remove(&id).is_some()
    }
}
