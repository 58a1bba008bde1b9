use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{SingleUseToken, TokenPurpose, User, UserAddress, UserProfile};
use crate::db::{CredentialStore, StoreResult};
use crate::error::DatabaseError;

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    profiles: HashMap<Uuid, UserProfile>,
    addresses: HashMap<Uuid, UserAddress>,
    tokens: HashMap<(TokenPurpose, Uuid), SingleUseToken>,
}

/// In-process credential store with the same observable contract as `DbOperations`.
/// Every multi-row write runs under a single write lock, which gives it the
/// all-or-nothing behaviour of a transaction.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: RwLock<MemoryState>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: rewrites a token's expiry.
    pub async fn set_token_expiry(
        &self,
        purpose: TokenPurpose,
        id: Uuid,
        expires_at: chrono::DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let token = state
            .tokens
            .get_mut(&(purpose, id))
            .ok_or(DatabaseError::NotFound)?;
        token.expires_at = expires_at;
        Ok(())
    }

    /// All tokens of one purpose issued to a user, oldest first.
    pub async fn tokens_for_user(&self, purpose: TokenPurpose, user_id: Uuid) -> Vec<SingleUseToken> {
        let state = self.state.read().await;
        let mut tokens: Vec<_> = state
            .tokens
            .iter()
            .filter(|((p, _), t)| *p == purpose && t.user_id == user_id)
            .map(|(_, t)| t.clone())
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        tokens
    }

    /// Test hook: promotes a user to another role.
    pub async fn set_role(&self, user_id: Uuid, role: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state.users.get_mut(&user_id).ok_or(DatabaseError::NotFound)?;
        user.role = role.to_string();
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create_user(&self, user: &User) -> StoreResult<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(DatabaseError::Duplicate("email".into()));
        }
        if state.users.values().any(|u| u.username == user.username) {
            return Err(DatabaseError::Duplicate("username".into()));
        }
        if state.users.contains_key(&user.id) {
            return Err(DatabaseError::Duplicate("id".into()));
        }
        state.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
        let state = self.state.read().await;
        state.users.get(&id).cloned().ok_or(DatabaseError::NotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let state = self.state.read().await;
        state
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(DatabaseError::NotFound)
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        let state = self.state.read().await;
        state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(DatabaseError::NotFound)
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let mut state = self.state.write().await;
        let stored = state.users.get_mut(&user.id).ok_or(DatabaseError::NotFound)?;
        stored.first_name = user.first_name.clone();
        stored.last_name = user.last_name.clone();
        stored.phone = user.phone.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn mark_verified(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let stored = state.users.get_mut(&id).ok_or(DatabaseError::NotFound)?;
        match stored.status.verify() {
            Ok(status) => {
                stored.status = status;
                stored.updated_at = Utc::now();
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let stored = state.users.get_mut(&user_id).ok_or(DatabaseError::NotFound)?;
        stored.password_hash = password_hash.to_string();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn deactivate_user(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let stored = state.users.get_mut(&id).ok_or(DatabaseError::NotFound)?;
        stored.status = stored.status.deactivate();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn list_active_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<_> = state
            .users
            .values()
            .filter(|u| u.status.is_active())
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_last_login(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let stored = state.users.get_mut(&id).ok_or(DatabaseError::NotFound)?;
        stored.last_login_at = Some(Utc::now());
        Ok(())
    }

    async fn create_profile(&self, profile: &UserProfile) -> StoreResult<UserProfile> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&profile.user_id) {
            return Err(DatabaseError::QueryError("user does not exist".into()));
        }
        if state.profiles.contains_key(&profile.user_id) {
            return Err(DatabaseError::Duplicate("profile".into()));
        }
        state.profiles.insert(profile.user_id, profile.clone());
        Ok(profile.clone())
    }

    async fn get_profile(&self, user_id: Uuid) -> StoreResult<UserProfile> {
        let state = self.state.read().await;
        state.profiles.get(&user_id).cloned().ok_or(DatabaseError::NotFound)
    }

    async fn update_profile(&self, profile: &UserProfile) -> StoreResult<UserProfile> {
        let mut state = self.state.write().await;
        let stored = state
            .profiles
            .get_mut(&profile.user_id)
            .ok_or(DatabaseError::NotFound)?;
        *stored = UserProfile {
            created_at: stored.created_at,
            updated_at: Utc::now(),
            ..profile.clone()
        };
        Ok(stored.clone())
    }

    async fn create_address(&self, address: &UserAddress) -> StoreResult<UserAddress> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&address.user_id) {
            return Err(DatabaseError::QueryError("user does not exist".into()));
        }
        if state.addresses.contains_key(&address.id) {
            return Err(DatabaseError::Duplicate("address".into()));
        }
        if address.is_default {
            clear_defaults(&mut state, address);
        }
        state.addresses.insert(address.id, address.clone());
        Ok(address.clone())
    }

    async fn get_addresses(&self, user_id: Uuid) -> StoreResult<Vec<UserAddress>> {
        let state = self.state.read().await;
        let mut addresses: Vec<_> = state
            .addresses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        addresses.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(addresses)
    }

    async fn get_address(&self, id: Uuid) -> StoreResult<UserAddress> {
        let state = self.state.read().await;
        state.addresses.get(&id).cloned().ok_or(DatabaseError::NotFound)
    }

    async fn update_address(&self, address: &UserAddress) -> StoreResult<UserAddress> {
        let mut state = self.state.write().await;
        let created_at = state
            .addresses
            .get(&address.id)
            .map(|a| a.created_at)
            .ok_or(DatabaseError::NotFound)?;
        if address.is_default {
            clear_defaults(&mut state, address);
        }
        let updated = UserAddress {
            created_at,
            updated_at: Utc::now(),
            ..address.clone()
        };
        state.addresses.insert(address.id, updated.clone());
        Ok(updated)
    }

    async fn delete_address(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .addresses
            .remove(&id)
            .map(|_| ())
            .ok_or(DatabaseError::NotFound)
    }

    async fn create_token(&self, purpose: TokenPurpose, token: &SingleUseToken) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&token.user_id) {
            return Err(DatabaseError::QueryError("user does not exist".into()));
        }
        if state.tokens.values().any(|t| t.token == token.token) {
            return Err(DatabaseError::Duplicate("token".into()));
        }
        state.tokens.insert((purpose, token.id), token.clone());
        Ok(())
    }

    async fn find_valid_token(&self, purpose: TokenPurpose, token: &str) -> StoreResult<SingleUseToken> {
        let state = self.state.read().await;
        let now = Utc::now();
        state
            .tokens
            .iter()
            .find(|((p, _), t)| *p == purpose && t.token == token && t.is_valid_at(now))
            .map(|(_, t)| t.clone())
            .ok_or(DatabaseError::NotFound)
    }

    async fn claim_token(&self, purpose: TokenPurpose, token: &str) -> StoreResult<SingleUseToken> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let claimed = state
            .tokens
            .iter_mut()
            .find(|((p, _), t)| *p == purpose && t.token == token && t.is_valid_at(now))
            .map(|(_, t)| t)
            .ok_or(DatabaseError::NotFound)?;
        claimed.used_at = Some(now);
        Ok(claimed.clone())
    }

    async fn mark_token_used(&self, purpose: TokenPurpose, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let token = state
            .tokens
            .get_mut(&(purpose, id))
            .ok_or(DatabaseError::NotFound)?;
        if token.used_at.is_none() {
            token.used_at = Some(Utc::now());
        }
        Ok(())
    }
}

fn clear_defaults(state: &mut MemoryState, keep: &UserAddress) {
    let now = Utc::now();
    for other in state.addresses.values_mut() {
        if other.id != keep.id
            && other.user_id == keep.user_id
            && other.address_type == keep.address_type
            && other.is_default
        {
            other.is_default = false;
            other.updated_at = now;
        }
    }
}
