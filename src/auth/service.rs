use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::auth::models::{ChangePasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest};
use crate::auth::password::PasswordHasher;
use crate::auth::token::{AccessClaims, TokenPair, TokenService};
use crate::auth::validation;
use crate::cache::SessionCache;
use crate::config::AuthConfig;
use crate::db::{CredentialStore, SingleUseToken, TokenPurpose, User, UserProfile, UserPublicView};
use crate::error::{AppError, AuthError, DatabaseError};

const SINGLE_USE_TOKEN_BYTES: usize = 32;

/// Orchestrates registration, login, token refresh and the password and
/// email-verification flows over the credential store, token service and
/// session cache.
pub struct AuthService {
    pub(crate) store: Arc<dyn CredentialStore>,
    cache: Arc<dyn SessionCache>,
    tokens: TokenService,
    passwords: PasswordHasher,
    config: AuthConfig,
}

pub(crate) fn conflict(field: &str) -> AppError {
    let label = match field {
        "email" => "Email",
        "username" => "Username",
        _ => "Record",
    };
    AuthError::Conflict(label.to_string()).into()
}

/// Maps a store miss onto the caller-facing `NotFound`; everything else stays a
/// persistence failure.
pub(crate) fn not_found(entity: &'static str) -> impl FnOnce(DatabaseError) -> AppError {
    move |e| match e {
        DatabaseError::NotFound => AuthError::NotFound(entity).into(),
        other => other.into(),
    }
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn SessionCache>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            store,
            cache,
            tokens: TokenService::new(config),
            passwords: PasswordHasher::new(config.bcrypt_cost),
            config: config.clone(),
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Verifies a bearer token presented on an authenticated request.
    pub fn authenticate(&self, access_token: &str) -> Result<AccessClaims, AppError> {
        Ok(self.tokens.validate_access(access_token)?)
    }

    #[instrument(skip(self, req), fields(username = %req.username))]
    pub async fn register(&self, req: RegisterRequest) -> Result<UserPublicView, AppError> {
        validation::validate_registration(&req)?;

        match self.store.get_user_by_email(&req.email).await {
            Ok(_) => return Err(conflict("email")),
            Err(DatabaseError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        match self.store.get_user_by_username(&req.username).await {
            Ok(_) => return Err(conflict("username")),
            Err(DatabaseError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let password_hash = self.passwords.hash(&req.password).await?;
        let mut user = User::new(req.username, req.email, password_hash);
        user.first_name = req.first_name;
        user.last_name = req.last_name;
        user.phone = req.phone;

        // Unique constraints still decide when two registrations race past the checks above.
        let user = match self.store.create_user(&user).await {
            Ok(user) => user,
            Err(DatabaseError::Duplicate(field)) => return Err(conflict(&field)),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.store.create_profile(&UserProfile::empty(user.id)).await {
            warn!(error = %e, user_id = %user.id, "Failed to create user profile");
        }

        if let Err(e) = self
            .mint_token(TokenPurpose::EmailVerification, user.id)
            .await
        {
            warn!(error = %e, user_id = %user.id, "Failed to generate email verification token");
        }

        info!(user_id = %user.id, "User registered successfully");
        Ok(user.to_public())
    }

    /// `identifier` is tried as an email first, then as a username.
    ///
    /// The password is checked before the active flag so that only a caller
    /// holding the password learns an account is deactivated. An unknown
    /// identifier still pays for one bcrypt verification.
    #[instrument(skip(self, req))]
    pub async fn login(&self, req: LoginRequest) -> Result<TokenPair, AppError> {
        let user = match self.store.get_user_by_email(&req.username).await {
            Ok(user) => user,
            Err(DatabaseError::NotFound) => match self.store.get_user_by_username(&req.username).await {
                Ok(user) => user,
                Err(DatabaseError::NotFound) => {
                    self.passwords.verify_absent(&req.password).await?;
                    return Err(AuthError::InvalidCredentials.into());
                }
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };

        if !self.passwords.verify(&req.password, &user.password_hash).await? {
            return Err(AuthError::InvalidCredentials.into());
        }
        if !user.status.is_active() {
            return Err(AuthError::AccountDeactivated.into());
        }

        let pair = self
            .tokens
            .issue_pair(user.id, &user.email, &user.username, &user.role)?;

        if let Err(e) = self.store.update_last_login(user.id).await {
            warn!(error = %e, user_id = %user.id, "Failed to update last login");
        }
        self.cache_refresh_token(user.id, &pair.refresh_token).await;

        info!(user_id = %user.id, "User logged in successfully");
        Ok(pair)
    }

    /// Exchanges a refresh token for a new pair. The presented token must
    /// match the one cached for its subject; a miss, mismatch or cache failure
    /// rejects it.
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = self.tokens.validate_refresh(refresh_token)?;
        let user_id = claims.user_id()?;

        match self.cache.get(user_id).await {
            Ok(Some(cached)) if cached == refresh_token => {}
            Ok(_) => return Err(AuthError::InvalidOrExpiredToken.into()),
            Err(e) => {
                warn!(error = %e, user_id = %user_id, "Session cache lookup failed");
                return Err(AuthError::InvalidOrExpiredToken.into());
            }
        }

        let user = match self.store.get_user_by_id(user_id).await {
            Ok(user) => user,
            Err(DatabaseError::NotFound) => return Err(AuthError::InvalidOrExpiredToken.into()),
            Err(e) => return Err(e.into()),
        };
        if !user.status.is_active() {
            return Err(AuthError::AccountDeactivated.into());
        }

        let pair = self
            .tokens
            .issue_pair(user.id, &user.email, &user.username, &user.role)?;
        self.cache_refresh_token(user.id, &pair.refresh_token).await;

        debug!(user_id = %user.id, "Token pair refreshed");
        Ok(pair)
    }

    #[instrument(skip(self, req))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        req: ChangePasswordRequest,
    ) -> Result<(), AppError> {
        validation::validate_password(&req.new_password)?;

        let user = self
            .store
            .get_user_by_id(user_id)
            .await
            .map_err(not_found("User"))?;

        if !self.passwords.verify(&req.current_password, &user.password_hash).await? {
            return Err(AuthError::IncorrectPassword.into());
        }

        let password_hash = self.passwords.hash(&req.new_password).await?;
        self.store.update_password_hash(user.id, &password_hash).await?;

        info!(user_id = %user.id, "User password changed");
        Ok(())
    }

    /// Succeeds whether or not `email` belongs to an account.
    #[instrument(skip_all)]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AppError> {
        let user = match self.store.get_user_by_email(email).await {
            Ok(user) => user,
            Err(DatabaseError::NotFound) => {
                info!("Password reset requested for unknown email");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.mint_token(TokenPurpose::PasswordReset, user.id).await?;
        info!(user_id = %user.id, "Password reset token generated");
        Ok(())
    }

    /// The token is claimed before the new hash is written, so of two
    /// concurrent resets with one token only the first proceeds.
    #[instrument(skip_all)]
    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<(), AppError> {
        validation::validate_password(&req.new_password)?;

        let token = self.claim_token(TokenPurpose::PasswordReset, &req.token).await?;
        let password_hash = self.passwords.hash(&req.new_password).await?;
        match self.store.update_password_hash(token.user_id, &password_hash).await {
            Ok(()) => {}
            Err(DatabaseError::NotFound) => return Err(AuthError::InvalidOrExpiredToken.into()),
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.cache.evict(token.user_id).await {
            warn!(error = %e, user_id = %token.user_id, "Failed to evict session after password reset");
        }

        info!(user_id = %token.user_id, "Password reset successfully");
        Ok(())
    }

    /// Consumes a verification token. A token for an account that is already
    /// verified is still consumed, and the call reports `AlreadyVerified`.
    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> Result<(), AppError> {
        let token = self
            .claim_token(TokenPurpose::EmailVerification, token)
            .await?;

        match self.store.mark_verified(token.user_id).await {
            Ok(true) => {
                info!(user_id = %token.user_id, "Email verified successfully");
                Ok(())
            }
            Ok(false) => Err(AuthError::AlreadyVerified.into()),
            Err(DatabaseError::NotFound) => Err(AuthError::InvalidOrExpiredToken.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Earlier verification tokens stay valid until each expires or is used.
    #[instrument(skip(self))]
    pub async fn resend_email_verification(&self, user_id: Uuid) -> Result<(), AppError> {
        let user = self
            .store
            .get_user_by_id(user_id)
            .await
            .map_err(not_found("User"))?;
        if user.status.is_verified() {
            return Err(AuthError::AlreadyVerified.into());
        }

        self.mint_token(TokenPurpose::EmailVerification, user.id).await?;
        Ok(())
    }

    /// Drops the cached refresh token so no outstanding refresh token can be exchanged.
    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AppError> {
        self.cache.evict(user_id).await?;
        info!(user_id = %user_id, "User logged out");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn deactivate_account(&self, user_id: Uuid) -> Result<(), AppError> {
        self.store
            .deactivate_user(user_id)
            .await
            .map_err(not_found("User"))?;

        if let Err(e) = self.cache.evict(user_id).await {
            warn!(error = %e, user_id = %user_id, "Failed to evict session after deactivation");
        }

        info!(user_id = %user_id, "Account deactivated");
        Ok(())
    }

    async fn cache_refresh_token(&self, user_id: Uuid, refresh_token: &str) {
        let ttl = self
            .tokens
            .refresh_ttl()
            .to_std()
            .unwrap_or_default();
        if let Err(e) = self.cache.put(user_id, refresh_token, ttl).await {
            warn!(error = %e, user_id = %user_id, "Failed to cache refresh token");
        }
    }

    async fn claim_token(
        &self,
        purpose: TokenPurpose,
        token: &str,
    ) -> Result<SingleUseToken, AppError> {
        match self.store.claim_token(purpose, token).await {
            Ok(token) => Ok(token),
            Err(DatabaseError::NotFound) => Err(AuthError::InvalidOrExpiredToken.into()),
            Err(e) => Err(e.into()),
        }
    }

    async fn mint_token(&self, purpose: TokenPurpose, user_id: Uuid) -> Result<SingleUseToken, AppError> {
        let ttl = match purpose {
            TokenPurpose::PasswordReset => self.config.password_reset_ttl(),
            TokenPurpose::EmailVerification => self.config.email_verification_ttl(),
        };
        let token = SingleUseToken::new(user_id, generate_secure_token(), ttl);
        self.store.create_token(purpose, &token).await?;

        // Delivery is out of band; the value itself is never logged.
        debug!(user_id = %user_id, token_id = %token.id, ?purpose, "Single-use token created");
        Ok(token)
    }
}

fn generate_secure_token() -> String {
    let mut bytes = [0u8; SINGLE_USE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
