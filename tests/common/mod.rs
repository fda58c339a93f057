//! In-memory collaborators for router-level tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fotujo::api::{
    limiter::{IpRateLimiter, LimiterConfig},
    mailer::Mailer,
    permissions::Permissions,
    state::AppState,
    store::{Photo, Store, StoreError, User},
    tokens::{Scope, Token},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

#[derive(Clone)]
struct TokenRow {
    hash: Vec<u8>,
    user_id: i64,
    expiry: DateTime<Utc>,
    scope: Scope,
}

#[derive(Default)]
struct Inner {
    users: Vec<(User, String)>,
    tokens: Vec<TokenRow>,
    grants: HashMap<i64, HashSet<String>>,
    photos: Vec<Photo>,
    next_user_id: i64,
    next_photo_id: i64,
}

/// Store double that counts every call so tests can assert which paths
/// avoid storage entirely.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Seed an account without counting a store call.
    pub fn seed_user(&self, name: &str, email: &str, password_hash: &str, activated: bool) -> User {
        let mut inner = self.inner.lock();
        inner.next_user_id += 1;
        let user = User {
            id: inner.next_user_id,
            created_at: Utc::now(),
            name: name.to_string(),
            email: email.to_string(),
            activated,
            version: 1,
        };
        inner.users.push((user.clone(), password_hash.to_string()));
        user
    }

    /// Seed a capability grant without counting a store call.
    pub fn seed_grant(&self, user_id: i64, code: &str) {
        self.inner
            .lock()
            .grants
            .entry(user_id)
            .or_default()
            .insert(code.to_string());
    }

    pub fn user(&self, id: i64) -> Option<User> {
        self.inner
            .lock()
            .users
            .iter()
            .find(|(user, _)| user.id == id)
            .map(|(user, _)| user.clone())
    }

    pub fn token_count(&self, scope: Scope) -> usize {
        self.inner
            .lock()
            .tokens
            .iter()
            .filter(|row| row.scope == scope)
            .count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        self.tick();
        let mut inner = self.inner.lock();
        if inner.users.iter().any(|(user, _)| user.email == email) {
            return Err(StoreError::DuplicateEmail);
        }
        inner.next_user_id += 1;
        let user = User {
            id: inner.next_user_id,
            created_at: Utc::now(),
            name: name.to_string(),
            email: email.to_string(),
            activated: false,
            version: 1,
        };
        inner.users.push((user.clone(), password_hash.to_string()));
        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> Result<(User, String), StoreError> {
        self.tick();
        self.inner
            .lock()
            .users
            .iter()
            .find(|(user, _)| user.email == email)
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }

    async fn update_user(&self, user: &User) -> Result<User, StoreError> {
        self.tick();
        let mut inner = self.inner.lock();
        let found = inner
            .users
            .iter_mut()
            .find(|(existing, _)| existing.id == user.id && existing.version == user.version);
        match found {
            Some((existing, _)) => {
                existing.name = user.name.clone();
                existing.email = user.email.clone();
                existing.activated = user.activated;
                existing.version += 1;
                Ok(existing.clone())
            }
            None => Err(StoreError::EditConflict),
        }
    }

    async fn insert_token(&self, token: &Token) -> Result<(), StoreError> {
        self.tick();
        self.inner.lock().tokens.push(TokenRow {
            hash: token.hash.clone(),
            user_id: token.user_id,
            expiry: token.expiry,
            scope: token.scope,
        });
        Ok(())
    }

    async fn user_for_token(
        &self,
        scope: Scope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        self.tick();
        let inner = self.inner.lock();
        let row = inner
            .tokens
            .iter()
            .find(|row| row.scope == scope && row.hash == hash && row.expiry > now)
            .ok_or(StoreError::RecordNotFound)?;
        inner
            .users
            .iter()
            .find(|(user, _)| user.id == row.user_id)
            .map(|(user, _)| user.clone())
            .ok_or(StoreError::RecordNotFound)
    }

    async fn delete_tokens(&self, scope: Scope, user_id: i64) -> Result<(), StoreError> {
        self.tick();
        self.inner
            .lock()
            .tokens
            .retain(|row| !(row.scope == scope && row.user_id == user_id));
        Ok(())
    }

    async fn capabilities_for(&self, user_id: i64) -> Result<Permissions, StoreError> {
        self.tick();
        Ok(self
            .inner
            .lock()
            .grants
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect())
    }

    async fn grant_capability(&self, user_id: i64, code: &str) -> Result<(), StoreError> {
        self.tick();
        self.inner
            .lock()
            .grants
            .entry(user_id)
            .or_default()
            .insert(code.to_string());
        Ok(())
    }

    async fn list_photos(&self) -> Result<Vec<Photo>, StoreError> {
        self.tick();
        Ok(self.inner.lock().photos.clone())
    }

    async fn photo(&self, id: i64) -> Result<Photo, StoreError> {
        self.tick();
        self.inner
            .lock()
            .photos
            .iter()
            .find(|photo| photo.id == id)
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }

    async fn insert_photo(&self, title: &str, caption: &str) -> Result<Photo, StoreError> {
        self.tick();
        let mut inner = self.inner.lock();
        inner.next_photo_id += 1;
        let photo = Photo {
            id: inner.next_photo_id,
            created_at: Utc::now(),
            title: title.to_string(),
            caption: caption.to_string(),
            version: 1,
        };
        inner.photos.push(photo.clone());
        Ok(photo)
    }

    async fn delete_photo(&self, id: i64) -> Result<(), StoreError> {
        self.tick();
        let mut inner = self.inner.lock();
        let before = inner.photos.len();
        inner.photos.retain(|photo| photo.id != id);
        if inner.photos.len() == before {
            return Err(StoreError::RecordNotFound);
        }
        Ok(())
    }
}

/// Mailer double that records every message.
#[derive(Default)]
pub struct CapturingMailer {
    sent: Mutex<Vec<(String, String, Value)>>,
}

impl CapturingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(String, String, Value)> {
        self.sent.lock().clone()
    }
}

impl Mailer for CapturingMailer {
    fn send(&self, recipient: &str, template: &str, payload: &Value) -> anyhow::Result<()> {
        self.sent
            .lock()
            .push((recipient.to_string(), template.to_string(), payload.clone()));
        Ok(())
    }
}

pub fn disabled_limiter() -> LimiterConfig {
    LimiterConfig::new(2.0, 4, false)
}

pub fn state_with(
    store: Arc<MemoryStore>,
    mailer: Arc<CapturingMailer>,
    config: LimiterConfig,
) -> AppState {
    AppState::new(store, Arc::new(IpRateLimiter::new(config)), mailer)
}
