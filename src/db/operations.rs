use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::models::{
    AccountStatus, AddressType, SingleUseToken, TokenPurpose, User, UserAddress, UserProfile,
};
use crate::db::{CredentialStore, StoreResult};
use crate::error::DatabaseError;

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, phone, \
     is_active, is_verified, role, created_at, updated_at, last_login_at";

const ADDRESS_COLUMNS: &str = "id, user_id, type AS address_type, first_name, last_name, company, \
     address_line1, address_line2, city, state, postal_code, country, phone, is_default, \
     created_at, updated_at";

const PROFILE_COLUMNS: &str =
    "user_id, avatar_url, date_of_birth, gender, bio, preferences, created_at, updated_at";

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    is_active: bool,
    is_verified: bool,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            status: AccountStatus::from_flags(row.is_active, row.is_verified),
            role: row.role,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login_at: row.last_login_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AddressRow {
    id: Uuid,
    user_id: Uuid,
    address_type: String,
    first_name: String,
    last_name: String,
    company: Option<String>,
    address_line1: String,
    address_line2: Option<String>,
    city: String,
    state: Option<String>,
    postal_code: String,
    country: String,
    phone: Option<String>,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AddressRow> for UserAddress {
    type Error = DatabaseError;

    fn try_from(row: AddressRow) -> Result<Self, Self::Error> {
        let address_type = AddressType::from_str(&row.address_type)
            .map_err(DatabaseError::QueryError)?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            address_type,
            first_name: row.first_name,
            last_name: row.last_name,
            company: row.company,
            address_line1: row.address_line1,
            address_line2: row.address_line2,
            city: row.city,
            state: row.state,
            postal_code: row.postal_code,
            country: row.country,
            phone: row.phone,
            is_default: row.is_default,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    user_id: Uuid,
    avatar_url: Option<String>,
    date_of_birth: Option<NaiveDate>,
    gender: Option<String>,
    bio: Option<String>,
    preferences: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            avatar_url: row.avatar_url,
            date_of_birth: row.date_of_birth,
            gender: row.gender,
            bio: row.bio,
            preferences: row.preferences,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Postgres-backed credential store.
#[derive(Clone)]
pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Builds the pool with bounded acquire and statement timeouts.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let options = PgConnectOptions::from_str(&config.url)?
            .options([("statement_timeout", format!("{}s", config.statement_timeout_secs))]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!(max_connections = config.max_connections, "Database pool established");
        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool_status(&self) -> DbPoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        DbPoolStatus {
            total_connections: size,
            active_connections: size.saturating_sub(idle),
            idle_connections: idle,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn begin_transaction(&self) -> StoreResult<Transaction<'_, Postgres>> {
        Ok(self.pool.as_ref().begin().await?)
    }

    async fn create_address_with_transaction(
        &self,
        address: &UserAddress,
        transaction: &mut Transaction<'_, Postgres>,
    ) -> StoreResult<UserAddress> {
        if address.is_default {
            sqlx::query(
                "UPDATE user_addresses SET is_default = false, updated_at = NOW() \
                 WHERE user_id = $1 AND type = $2 AND is_default",
            )
            .bind(address.user_id)
            .bind(address.address_type.as_str())
            .execute(&mut **transaction)
            .await?;
        }

        let row = sqlx::query_as::<_, AddressRow>(&format!(
            r#"
            INSERT INTO user_addresses
                (id, user_id, type, first_name, last_name, company, address_line1, address_line2,
                 city, state, postal_code, country, phone, is_default, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {}
            "#,
            ADDRESS_COLUMNS
        ))
        .bind(address.id)
        .bind(address.user_id)
        .bind(address.address_type.as_str())
        .bind(&address.first_name)
        .bind(&address.last_name)
        .bind(&address.company)
        .bind(&address.address_line1)
        .bind(&address.address_line2)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.postal_code)
        .bind(&address.country)
        .bind(&address.phone)
        .bind(address.is_default)
        .bind(address.created_at)
        .bind(address.updated_at)
        .fetch_one(&mut **transaction)
        .await?;

        row.try_into()
    }

    async fn update_address_with_transaction(
        &self,
        address: &UserAddress,
        transaction: &mut Transaction<'_, Postgres>,
    ) -> StoreResult<UserAddress> {
        if address.is_default {
            sqlx::query(
                "UPDATE user_addresses SET is_default = false, updated_at = NOW() \
                 WHERE user_id = $1 AND type = $2 AND id <> $3 AND is_default",
            )
            .bind(address.user_id)
            .bind(address.address_type.as_str())
            .bind(address.id)
            .execute(&mut **transaction)
            .await?;
        }

        let row = sqlx::query_as::<_, AddressRow>(&format!(
            r#"
            UPDATE user_addresses
            SET type = $2, first_name = $3, last_name = $4, company = $5, address_line1 = $6,
                address_line2 = $7, city = $8, state = $9, postal_code = $10, country = $11,
                phone = $12, is_default = $13, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ADDRESS_COLUMNS
        ))
        .bind(address.id)
        .bind(address.address_type.as_str())
        .bind(&address.first_name)
        .bind(&address.last_name)
        .bind(&address.company)
        .bind(&address.address_line1)
        .bind(&address.address_line2)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.postal_code)
        .bind(&address.country)
        .bind(&address.phone)
        .bind(address.is_default)
        .fetch_optional(&mut **transaction)
        .await?
        .ok_or(DatabaseError::NotFound)?;

        row.try_into()
    }

    async fn fetch_user(&self, column: &str, value: &str) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE {} = $1",
            USER_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(row.into())
    }
}

#[async_trait]
impl CredentialStore for DbOperations {
    async fn create_user(&self, user: &User) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, first_name, last_name, phone,
                               is_active, is_verified, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(user.status.is_active())
        .bind(user.status.is_verified())
        .bind(&user.role)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(row.into())
    }

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(row.into())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        self.fetch_user("email", email).await
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        self.fetch_user("username", username).await
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET first_name = $2, last_name = $3, phone = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(row.into())
    }

    async fn mark_verified(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET is_verified = true, updated_at = NOW() WHERE id = $1 AND NOT is_verified",
        )
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Nothing flipped: either already verified or no such user.
        self.get_user_by_id(id).await?;
        Ok(false)
    }

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(password_hash)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    async fn deactivate_user(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET is_active = false, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    async fn list_active_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {}
            FROM users
            WHERE is_active = true
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
            USER_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn update_last_login(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn create_profile(&self, profile: &UserProfile) -> StoreResult<UserProfile> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            r#"
            INSERT INTO user_profiles (user_id, avatar_url, date_of_birth, gender, bio, preferences,
                                       created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(profile.user_id)
        .bind(&profile.avatar_url)
        .bind(profile.date_of_birth)
        .bind(&profile.gender)
        .bind(&profile.bio)
        .bind(&profile.preferences)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(row.into())
    }

    async fn get_profile(&self, user_id: Uuid) -> StoreResult<UserProfile> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {} FROM user_profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(row.into())
    }

    async fn update_profile(&self, profile: &UserProfile) -> StoreResult<UserProfile> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            r#"
            UPDATE user_profiles
            SET avatar_url = $2, date_of_birth = $3, gender = $4, bio = $5, preferences = $6,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(profile.user_id)
        .bind(&profile.avatar_url)
        .bind(profile.date_of_birth)
        .bind(&profile.gender)
        .bind(&profile.bio)
        .bind(&profile.preferences)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(row.into())
    }

    async fn create_address(&self, address: &UserAddress) -> StoreResult<UserAddress> {
        let mut transaction = self.begin_transaction().await?;

        let result = self.create_address_with_transaction(address, &mut transaction).await;

        match result {
            Ok(address) => {
                transaction.commit().await?;
                Ok(address)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn get_addresses(&self, user_id: Uuid) -> StoreResult<Vec<UserAddress>> {
        let rows = sqlx::query_as::<_, AddressRow>(&format!(
            r#"
            SELECT {}
            FROM user_addresses
            WHERE user_id = $1
            ORDER BY is_default DESC, created_at DESC
            "#,
            ADDRESS_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(UserAddress::try_from).collect()
    }

    async fn get_address(&self, id: Uuid) -> StoreResult<UserAddress> {
        let row = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {} FROM user_addresses WHERE id = $1",
            ADDRESS_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        row.try_into()
    }

    async fn update_address(&self, address: &UserAddress) -> StoreResult<UserAddress> {
        let mut transaction = self.begin_transaction().await?;

        let result = self.update_address_with_transaction(address, &mut transaction).await;

        match result {
            Ok(address) => {
                transaction.commit().await?;
                Ok(address)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn delete_address(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM user_addresses WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    async fn create_token(&self, purpose: TokenPurpose, token: &SingleUseToken) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (id, user_id, token, expires_at, created_at) VALUES ($1, $2, $3, $4, $5)",
            purpose.table()
        ))
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn find_valid_token(&self, purpose: TokenPurpose, token: &str) -> StoreResult<SingleUseToken> {
        let found = sqlx::query_as::<_, SingleUseToken>(&format!(
            r#"
            SELECT id, user_id, token, expires_at, used_at, created_at
            FROM {}
            WHERE token = $1 AND used_at IS NULL AND expires_at > NOW()
            "#,
            purpose.table()
        ))
        .bind(token)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(found)
    }

    async fn claim_token(&self, purpose: TokenPurpose, token: &str) -> StoreResult<SingleUseToken> {
        let claimed = sqlx::query_as::<_, SingleUseToken>(&format!(
            r#"
            UPDATE {}
            SET used_at = NOW()
            WHERE token = $1 AND used_at IS NULL AND expires_at > NOW()
            RETURNING id, user_id, token, expires_at, used_at, created_at
            "#,
            purpose.table()
        ))
        .bind(token)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(claimed)
    }

    async fn mark_token_used(&self, purpose: TokenPurpose, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET used_at = COALESCE(used_at, NOW()) WHERE id = $1",
            purpose.table()
        ))
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}
