use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AuthError;

pub const DEFAULT_ROLE: &str = "customer";
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    Unverified,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Active,
    Deactivated,
}

/// Account lifecycle state. Persisted as the `is_verified` / `is_active` columns,
/// but only changed through the transitions below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub verification: Verification,
    pub activity: Activity,
}

impl AccountStatus {
    /// State of a freshly registered account.
    pub const fn registered() -> Self {
        Self {
            verification: Verification::Unverified,
            activity: Activity::Active,
        }
    }

    pub fn from_flags(is_active: bool, is_verified: bool) -> Self {
        Self {
            verification: if is_verified { Verification::Verified } else { Verification::Unverified },
            activity: if is_active { Activity::Active } else { Activity::Deactivated },
        }
    }

    pub fn is_active(&self) -> bool {
        self.activity == Activity::Active
    }

    pub fn is_verified(&self) -> bool {
        self.verification == Verification::Verified
    }

    pub fn verify(self) -> Result<Self, AuthError> {
        match self.verification {
            Verification::Verified => Err(AuthError::AlreadyVerified),
            Verification::Unverified => Ok(Self { verification: Verification::Verified, ..self }),
        }
    }

    pub fn deactivate(self) -> Self {
        Self { activity: Activity::Deactivated, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub status: AccountStatus,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            first_name: None,
            last_name: None,
            phone: None,
            status: AccountStatus::registered(),
            role: DEFAULT_ROLE.to_string(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    pub fn to_public(&self) -> UserPublicView {
        UserPublicView {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            is_active: self.status.is_active(),
            is_verified: self.status.is_verified(),
            role: self.role.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_login_at: self.last_login_at,
        }
    }
}

/// What callers outside the service get to see of a user. Never carries the hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPublicView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub avatar_url: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub bio: Option<String>,
    pub preferences: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn empty(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            avatar_url: None,
            date_of_birth: None,
            gender: None,
            bio: None,
            preferences: serde_json::Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Shipping,
    Billing,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::Shipping => "shipping",
            AddressType::Billing => "billing",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shipping" => Ok(AddressType::Shipping),
            "billing" => Ok(AddressType::Billing),
            other => Err(format!("unknown address type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub address_type: AddressType,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied address fields; ids, ownership and timestamps are assigned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressInput {
    #[serde(rename = "type")]
    pub address_type: AddressType,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl AddressInput {
    pub fn into_address(self, id: Uuid, user_id: Uuid) -> UserAddress {
        let now = Utc::now();
        UserAddress {
            id,
            user_id,
            address_type: self.address_type,
            first_name: self.first_name,
            last_name: self.last_name,
            company: self.company,
            address_line1: self.address_line1,
            address_line2: self.address_line2,
            city: self.city,
            state: self.state,
            postal_code: self.postal_code,
            country: self.country,
            phone: self.phone,
            is_default: self.is_default,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Which single-use token table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    PasswordReset,
    EmailVerification,
}

impl TokenPurpose {
    pub fn table(&self) -> &'static str {
        match self {
            TokenPurpose::PasswordReset => "password_reset_tokens",
            TokenPurpose::EmailVerification => "email_verification_tokens",
        }
    }
}

/// Password-reset or email-verification token row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SingleUseToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SingleUseToken {
    pub fn new(user_id: Uuid, token: String, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            token,
            expires_at: now + ttl,
            used_at: None,
            created_at: now,
        }
    }

    /// Consumable iff never used and not yet expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}
