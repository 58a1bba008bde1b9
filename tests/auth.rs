use chrono::{Duration, Utc};
use commercium_user_service::{
    auth::{
        models::{ChangePasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest},
        AuthService,
    },
    cache::{MemorySessionCache, SessionCache},
    config::Settings,
    db::{AddressInput, AddressType, CredentialStore, MemoryCredentialStore, TokenPurpose},
    error::{AppError, AuthError},
};
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    service: AuthService,
    store: Arc<MemoryCredentialStore>,
    cache: Arc<MemorySessionCache>,
}

fn setup() -> Harness {
    let settings = Settings::new_for_test().expect("Failed to load test config");
    let store = Arc::new(MemoryCredentialStore::new());
    let cache = Arc::new(MemorySessionCache::new());
    let service = AuthService::new(store.clone(), cache.clone(), &settings.auth);
    Harness { service, store, cache }
}

fn registration(username: &str, email: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        username: username.to_string(),
        email: email.to_string(),
        password: password.to_string(),
        first_name: None,
        last_name: None,
        phone: None,
    }
}

fn login(identifier: &str, password: &str) -> LoginRequest {
    LoginRequest {
        username: identifier.to_string(),
        password: password.to_string(),
    }
}

fn address(address_type: AddressType, is_default: bool) -> AddressInput {
    AddressInput {
        address_type,
        first_name: "Alice".into(),
        last_name: "Smith".into(),
        company: None,
        address_line1: "1 Main St".into(),
        address_line2: None,
        city: "Springfield".into(),
        state: Some("IL".into()),
        postal_code: "62701".into(),
        country: "US".into(),
        phone: None,
        is_default,
    }
}

fn tamper(token: &str) -> String {
    let (head, sig) = token.rsplit_once('.').unwrap();
    let mut chars: Vec<char> = sig.chars().collect();
    chars[0] = if chars[0] == 'x' { 'y' } else { 'x' };
    format!("{}.{}", head, chars.into_iter().collect::<String>())
}

fn auth_error(err: AppError) -> AuthError {
    match err {
        AppError::AuthError(e) => e,
        other => panic!("expected an auth error, got {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn test_alice_scenario() {
    let h = setup();

    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    assert_eq!(view.username, "alice");
    let json = serde_json::to_value(&view).unwrap();
    assert!(json.get("password_hash").is_none());
    assert!(!json.to_string().contains("$2"));

    let pair = h.service.login(login("alice", "Secret123!")).await.unwrap();
    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 900);

    let err = h.service.login(login("alice", "wrong")).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidCredentials);
}

#[tokio::test]
async fn test_login_by_email_and_unknown_identifier() {
    let h = setup();
    h.service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();

    let pair = h.service.login(login("alice@x.com", "Secret123!")).await.unwrap();
    let claims = h.service.tokens().validate_access(&pair.access_token).unwrap();
    assert_eq!(claims.username, "alice");

    let err = h.service.login(login("bob", "Secret123!")).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidCredentials);

    let user = h.store.get_user_by_username("alice").await.unwrap();
    assert!(user.last_login_at.is_some());
}

#[tokio::test]
async fn test_duplicate_email_and_username_conflict() {
    let h = setup();
    h.service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();

    let err = h
        .service
        .register(registration("alice2", "alice@x.com", "Secret123!"))
        .await
        .unwrap_err();
    assert_eq!(auth_error(err), AuthError::Conflict("Email".into()));

    let err = h
        .service
        .register(registration("alice", "other@x.com", "Secret123!"))
        .await
        .unwrap_err();
    assert_eq!(auth_error(err), AuthError::Conflict("Username".into()));
}

#[tokio::test]
async fn test_register_creates_profile_and_verification_token() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();

    assert!(view.is_active);
    assert!(!view.is_verified);
    assert_eq!(view.role, "customer");
    assert!(h.store.get_profile(view.id).await.is_ok());

    let tokens = h
        .store
        .tokens_for_user(TokenPurpose::EmailVerification, view.id)
        .await;
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].token.len(), 64);
}

#[tokio::test]
async fn test_invalid_registration_is_rejected() {
    let h = setup();
    let err = h
        .service
        .register(registration("al", "alice@x.com", "Secret123!"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    let err = h
        .service
        .register(registration("alice", "alice@x.com", "short"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn test_token_audiences_do_not_cross() {
    let h = setup();
    h.service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    let pair = h.service.login(login("alice", "Secret123!")).await.unwrap();
    let tokens = h.service.tokens();

    assert!(tokens.validate_access(&pair.access_token).is_ok());
    assert!(tokens.validate_refresh(&pair.refresh_token).is_ok());
    assert!(tokens.validate_access(&pair.refresh_token).is_err());
    assert!(tokens.validate_refresh(&pair.access_token).is_err());

    // An access token cannot be exchanged as a refresh token.
    let err = h.service.refresh_token(&pair.access_token).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidOrExpiredToken);
}

#[tokio::test]
async fn test_deactivated_account_cannot_login() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    h.service.deactivate_account(view.id).await.unwrap();

    let err = h.service.login(login("alice", "Secret123!")).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::AccountDeactivated);

    // Wrong password still reads as bad credentials.
    let err = h.service.login(login("alice", "nope-nope")).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidCredentials);
}

#[tokio::test]
async fn test_refresh_rotates_and_rejects_replay() {
    let h = setup();
    h.service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    let original = h.service.login(login("alice", "Secret123!")).await.unwrap();

    let rotated = h.service.refresh_token(&original.refresh_token).await.unwrap();
    assert_ne!(rotated.access_token, original.access_token);
    assert_ne!(rotated.refresh_token, original.refresh_token);

    // The original refresh token still verifies but is no longer the cached one.
    assert!(h.service.tokens().validate_refresh(&original.refresh_token).is_ok());
    let err = h.service.refresh_token(&original.refresh_token).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidOrExpiredToken);

    assert!(h.service.refresh_token(&rotated.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_tampered_refresh_token_rejected() {
    let h = setup();
    h.service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    let pair = h.service.login(login("alice", "Secret123!")).await.unwrap();

    let err = h
        .service
        .refresh_token(&tamper(&pair.refresh_token))
        .await
        .unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidOrExpiredToken);
}

#[tokio::test]
async fn test_logout_and_cache_miss_block_refresh() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    let pair = h.service.login(login("alice", "Secret123!")).await.unwrap();
    assert_eq!(
        h.cache.get(view.id).await.unwrap().as_deref(),
        Some(pair.refresh_token.as_str())
    );

    h.service.logout(view.id).await.unwrap();
    assert_eq!(h.cache.get(view.id).await.unwrap(), None);

    let err = h.service.refresh_token(&pair.refresh_token).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidOrExpiredToken);
}

#[tokio::test]
async fn test_refresh_rejected_after_deactivation() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    let pair = h.service.login(login("alice", "Secret123!")).await.unwrap();

    // Deactivate in the store only, leaving the cached token in place.
    h.store.deactivate_user(view.id).await.unwrap();

    let err = h.service.refresh_token(&pair.refresh_token).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::AccountDeactivated);
}

#[tokio::test]
async fn test_change_password() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();

    let err = h
        .service
        .change_password(
            view.id,
            ChangePasswordRequest {
                current_password: "not-my-password".into(),
                new_password: "NewSecret456!".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(auth_error(err), AuthError::IncorrectPassword);

    h.service
        .change_password(
            view.id,
            ChangePasswordRequest {
                current_password: "Secret123!".into(),
                new_password: "NewSecret456!".into(),
            },
        )
        .await
        .unwrap();

    assert!(h.service.login(login("alice", "Secret123!")).await.is_err());
    assert!(h.service.login(login("alice", "NewSecret456!")).await.is_ok());
}

#[tokio::test]
async fn test_forgot_password_does_not_reveal_accounts() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();

    assert!(h.service.forgot_password("nobody@x.com").await.is_ok());
    assert!(h.service.forgot_password("alice@x.com").await.is_ok());

    let tokens = h
        .store
        .tokens_for_user(TokenPurpose::PasswordReset, view.id)
        .await;
    assert_eq!(tokens.len(), 1);
    let ttl = tokens[0].expires_at - tokens[0].created_at;
    assert_eq!(ttl, Duration::hours(1));
}

#[tokio::test]
async fn test_reset_token_is_single_use() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    h.service.forgot_password("alice@x.com").await.unwrap();
    let token = h
        .store
        .tokens_for_user(TokenPurpose::PasswordReset, view.id)
        .await
        .remove(0)
        .token;

    h.service
        .reset_password(ResetPasswordRequest {
            token: token.clone(),
            new_password: "NewSecret456!".into(),
        })
        .await
        .unwrap();
    assert!(h.service.login(login("alice", "NewSecret456!")).await.is_ok());

    let err = h
        .service
        .reset_password(ResetPasswordRequest {
            token,
            new_password: "Another789!".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidOrExpiredToken);
    assert!(h.service.login(login("alice", "NewSecret456!")).await.is_ok());
}

#[tokio::test]
async fn test_reset_password_revokes_refresh() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    let pair = h.service.login(login("alice", "Secret123!")).await.unwrap();

    h.service.forgot_password("alice@x.com").await.unwrap();
    let token = h
        .store
        .tokens_for_user(TokenPurpose::PasswordReset, view.id)
        .await
        .remove(0)
        .token;
    h.service
        .reset_password(ResetPasswordRequest {
            token,
            new_password: "NewSecret456!".into(),
        })
        .await
        .unwrap();

    assert!(h.service.refresh_token(&pair.refresh_token).await.is_err());
}

#[tokio::test]
async fn test_expired_reset_token_rejected() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    h.service.forgot_password("alice@x.com").await.unwrap();
    let token = h
        .store
        .tokens_for_user(TokenPurpose::PasswordReset, view.id)
        .await
        .remove(0);
    h.store
        .set_token_expiry(TokenPurpose::PasswordReset, token.id, Utc::now() - Duration::seconds(1))
        .await
        .unwrap();

    let err = h
        .service
        .reset_password(ResetPasswordRequest {
            token: token.token,
            new_password: "NewSecret456!".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidOrExpiredToken);
}

#[tokio::test]
async fn test_unknown_token_rejected() {
    let h = setup();
    let err = h.service.verify_email("deadbeef").await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidOrExpiredToken);

    let err = h
        .service
        .reset_password(ResetPasswordRequest {
            token: "deadbeef".into(),
            new_password: "NewSecret456!".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidOrExpiredToken);
}

#[tokio::test]
async fn test_verify_email_flow() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();

    // Resend leaves the first token valid too.
    h.service.resend_email_verification(view.id).await.unwrap();
    let tokens = h
        .store
        .tokens_for_user(TokenPurpose::EmailVerification, view.id)
        .await;
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].expires_at - tokens[0].created_at, Duration::hours(24));

    h.service.verify_email(&tokens[1].token).await.unwrap();
    let user = h.service.get_profile(view.id).await.unwrap();
    assert!(user.is_verified);

    let err = h.service.verify_email(&tokens[1].token).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::InvalidOrExpiredToken);

    let err = h.service.verify_email(&tokens[0].token).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::AlreadyVerified);

    let err = h.service.resend_email_verification(view.id).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::AlreadyVerified);
}

#[tokio::test]
async fn test_single_default_address_per_type() {
    let h = setup();
    let view = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();

    let first = h
        .service
        .create_address(view.id, address(AddressType::Shipping, true))
        .await
        .unwrap();
    let second = h
        .service
        .create_address(view.id, address(AddressType::Shipping, true))
        .await
        .unwrap();
    let billing = h
        .service
        .create_address(view.id, address(AddressType::Billing, true))
        .await
        .unwrap();

    let addresses = h.service.list_addresses(view.id).await.unwrap();
    let shipping_defaults: Vec<_> = addresses
        .iter()
        .filter(|a| a.address_type == AddressType::Shipping && a.is_default)
        .collect();
    assert_eq!(shipping_defaults.len(), 1);
    assert_eq!(shipping_defaults[0].id, second.id);
    assert!(addresses.iter().any(|a| a.id == first.id && !a.is_default));
    assert!(addresses.iter().any(|a| a.id == billing.id && a.is_default));
}

#[tokio::test]
async fn test_address_ownership_reads_as_not_found() {
    let h = setup();
    let alice = h
        .service
        .register(registration("alice", "alice@x.com", "Secret123!"))
        .await
        .unwrap();
    let bob = h
        .service
        .register(registration("bob", "bob@x.com", "Secret123!"))
        .await
        .unwrap();

    let address_id = h
        .service
        .create_address(alice.id, address(AddressType::Shipping, false))
        .await
        .unwrap()
        .id;

    let err = h
        .service
        .update_address(bob.id, address_id, address(AddressType::Shipping, true))
        .await
        .unwrap_err();
    assert_eq!(auth_error(err), AuthError::NotFound("Address"));

    let err = h.service.delete_address(bob.id, address_id).await.unwrap_err();
    assert_eq!(auth_error(err), AuthError::NotFound("Address"));

    let err = h
        .service
        .delete_address(alice.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(auth_error(err), AuthError::NotFound("Address"));

    h.service.delete_address(alice.id, address_id).await.unwrap();
    assert!(h.service.list_addresses(alice.id).await.unwrap().is_empty());
}
