use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::TokenError;

pub const ACCESS_AUDIENCE: &str = "commercium";
pub const REFRESH_AUDIENCE: &str = "commercium-refresh";
pub const TOKEN_TYPE: &str = "Bearer";

const REQUIRED_CLAIMS: [&str; 5] = ["exp", "nbf", "sub", "aud", "iss"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub username: String,
    pub role: String,
    pub aud: String,
    pub iss: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Invalid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl RefreshClaims {
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Mints and verifies HS256 access/refresh pairs. Access and refresh tokens
/// carry different audiences so one can never stand in for the other.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    leeway: u64,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
            leeway: config.leeway_seconds,
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_pair(
        &self,
        user_id: Uuid,
        email: &str,
        username: &str,
        role: &str,
    ) -> Result<TokenPair, TokenError> {
        let now = Utc::now().timestamp();
        let subject = user_id.to_string();

        let access = AccessClaims {
            sub: subject.clone(),
            email: email.to_string(),
            username: username.to_string(),
            role: role.to_string(),
            aud: ACCESS_AUDIENCE.to_string(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp: now + self.access_ttl.num_seconds(),
        };
        let refresh = RefreshClaims {
            sub: subject,
            aud: REFRESH_AUDIENCE.to_string(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp: now + self.refresh_ttl.num_seconds(),
        };

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    pub fn validate_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify(token, ACCESS_AUDIENCE)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.verify(token, REFRESH_AUDIENCE)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn verify<T: DeserializeOwned>(&self, token: &str, audience: &str) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);
        validation.validate_nbf = true;
        validation.leeway = self.leeway;

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, audience, "token rejected");
                TokenError::Invalid
            })
    }
}
