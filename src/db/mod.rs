//! Credential store for the user service
//!
//! Persists users, profiles, addresses and single-use tokens. `DbOperations`
//! is the Postgres implementation; `MemoryCredentialStore` keeps the same
//! contract in process for tests and local runs.

pub mod memory;
pub mod models;
pub mod operations;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;

pub use memory::MemoryCredentialStore;
pub use models::{
    AccountStatus, AddressInput, AddressType, SingleUseToken, TokenPurpose, User, UserAddress,
    UserProfile, UserPublicView,
};
pub use operations::{DbOperations, DbPoolStatus};

pub type StoreResult<T> = std::result::Result<T, DatabaseError>;

/// Storage contract consumed by the authentication service.
///
/// Lookups return `DatabaseError::NotFound` for missing rows, unique violations
/// surface as `DatabaseError::Duplicate` naming the field.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_user(&self, user: &User) -> StoreResult<User>;
    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User>;
    async fn get_user_by_email(&self, email: &str) -> StoreResult<User>;
    async fn get_user_by_username(&self, username: &str) -> StoreResult<User>;

    /// Writes names and phone only. Status flags, password and role are
    /// changed through their own operations.
    async fn update_user(&self, user: &User) -> StoreResult<User>;

    /// Flips an unverified account to verified. `Ok(false)` when it already was.
    async fn mark_verified(&self, id: Uuid) -> StoreResult<bool>;
    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> StoreResult<()>;
    async fn deactivate_user(&self, id: Uuid) -> StoreResult<()>;

    /// Active users only, newest first.
    async fn list_active_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>>;
    async fn update_last_login(&self, id: Uuid) -> StoreResult<()>;

    async fn create_profile(&self, profile: &UserProfile) -> StoreResult<UserProfile>;
    async fn get_profile(&self, user_id: Uuid) -> StoreResult<UserProfile>;
    async fn update_profile(&self, profile: &UserProfile) -> StoreResult<UserProfile>;

    /// Clearing other defaults of the same (user, type) and writing the row
    /// happen atomically.
    async fn create_address(&self, address: &UserAddress) -> StoreResult<UserAddress>;
    async fn get_addresses(&self, user_id: Uuid) -> StoreResult<Vec<UserAddress>>;
    async fn get_address(&self, id: Uuid) -> StoreResult<UserAddress>;
    async fn update_address(&self, address: &UserAddress) -> StoreResult<UserAddress>;
    async fn delete_address(&self, id: Uuid) -> StoreResult<()>;

    async fn create_token(&self, purpose: TokenPurpose, token: &SingleUseToken) -> StoreResult<()>;

    /// Returns the token only while it is unused and unexpired.
    async fn find_valid_token(&self, purpose: TokenPurpose, token: &str) -> StoreResult<SingleUseToken>;

    /// Marks the token used and returns it, but only if it was unused and
    /// unexpired at that moment. Of two concurrent claims at most one succeeds.
    async fn claim_token(&self, purpose: TokenPurpose, token: &str) -> StoreResult<SingleUseToken>;

    /// Idempotent: an already-used token keeps its original `used_at`.
    async fn mark_token_used(&self, purpose: TokenPurpose, id: Uuid) -> StoreResult<()>;
}
