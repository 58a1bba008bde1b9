use actix_web::{test, web, App};
use commercium_user_service::{auth::handlers, json_config, AppState, Settings};
use serde_json::{json, Value};

macro_rules! test_app {
    () => {{
        let config = Settings::new_for_test().expect("Failed to load test config");
        let state = AppState::new(config).await.unwrap();
        test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .app_data(json_config())
                .configure(handlers::configure),
        )
        .await
    }};
}

/// Registers `$username` with password `password123` and returns the login response body.
macro_rules! register_and_login {
    ($app:expr, $username:expr) => {{
        let username: &str = $username;
        let response = test::TestRequest::post()
            .uri("/api/v1/auth/register")
            .set_json(json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": "password123",
                "first_name": "Test"
            }))
            .send_request($app)
            .await;
        assert_eq!(response.status(), 201);

        let response = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .set_json(json!({
                "username": username,
                "password": "password123"
            }))
            .send_request($app)
            .await;
        assert_eq!(response.status(), 200);
        let body: Value = test::read_body_json(response).await;
        body
    }};
}

fn bearer(tokens: &Value) -> (&'static str, String) {
    (
        "Authorization",
        format!("Bearer {}", tokens["access_token"].as_str().unwrap()),
    )
}

#[actix_rt::test]
async fn test_register_and_login() {
    let app = test_app!();

    let response = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({
            "username": "alice",
            "email": "alice@x.com",
            "password": "Secret123!"
        }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 201);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["username"], "alice");
    assert_eq!(body["role"], "customer");
    assert_eq!(body["is_verified"], false);
    assert!(body.get("password_hash").is_none());

    let response = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({
            "username": "alice@x.com",
            "password": "Secret123!"
        }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
}

#[actix_rt::test]
async fn test_invalid_login() {
    let app = test_app!();

    let response = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({
            "username": "nonexistent@example.com",
            "password": "wrongpassword"
        }))
        .send_request(&app)
        .await;

    assert_eq!(response.status(), 401);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["error"]["status"], 401);
    assert_eq!(body["error"]["message"], "Invalid credentials");
}

#[actix_rt::test]
async fn test_invalid_registration() {
    let app = test_app!();

    let response = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({
            "username": "alice",
            "email": "alice@x.com",
            "password": ""
        }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 400);

    // Missing fields fail at deserialization with the same error envelope.
    let response = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({ "email": "alice@x.com" }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["error"]["status"], 400);
}

#[actix_rt::test]
async fn test_duplicate_registration_conflict() {
    let app = test_app!();
    register_and_login!(&app, "alice");

    let response = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({
            "username": "someone",
            "email": "alice@example.com",
            "password": "password123"
        }))
        .send_request(&app)
        .await;

    assert_eq!(response.status(), 409);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["error"]["message"], "Email already exists");
}

#[actix_rt::test]
async fn test_protected_routes_require_bearer() {
    let app = test_app!();

    let response = test::TestRequest::get()
        .uri("/api/v1/users/profile")
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);

    let response = test::TestRequest::get()
        .uri("/api/v1/users/profile")
        .insert_header(("Authorization", "Bearer not.a.token"))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);

    // A refresh token is not an access credential.
    let tokens = register_and_login!(&app, "alice");
    let response = test::TestRequest::get()
        .uri("/api/v1/users/profile")
        .insert_header((
            "Authorization",
            format!("Bearer {}", tokens["refresh_token"].as_str().unwrap()),
        ))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);
}

#[actix_rt::test]
async fn test_profile_round_trip() {
    let app = test_app!();
    let tokens = register_and_login!(&app, "alice");

    let response = test::TestRequest::put()
        .uri("/api/v1/users/profile")
        .insert_header(bearer(&tokens))
        .set_json(json!({ "last_name": "Smith", "phone": "555-0100" }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);

    let response = test::TestRequest::get()
        .uri("/api/v1/users/profile")
        .insert_header(bearer(&tokens))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["first_name"], "Test");
    assert_eq!(body["last_name"], "Smith");
    assert_eq!(body["phone"], "555-0100");

    let response = test::TestRequest::put()
        .uri("/api/v1/users/profile/details")
        .insert_header(bearer(&tokens))
        .set_json(json!({ "bio": "Hi", "date_of_birth": "1990-04-01" }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);

    let response = test::TestRequest::get()
        .uri("/api/v1/users/profile/details")
        .insert_header(bearer(&tokens))
        .send_request(&app)
        .await;
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["bio"], "Hi");
    assert_eq!(body["date_of_birth"], "1990-04-01");
}

#[actix_rt::test]
async fn test_refresh_and_logout() {
    let app = test_app!();
    let tokens = register_and_login!(&app, "alice");

    let response = test::TestRequest::post()
        .uri("/api/v1/auth/refresh")
        .set_json(json!({ "refresh_token": tokens["refresh_token"] }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);
    let rotated: Value = test::read_body_json(response).await;
    assert_ne!(rotated["access_token"], tokens["access_token"]);

    let response = test::TestRequest::post()
        .uri("/api/v1/users/logout")
        .insert_header(bearer(&rotated))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 200);

    let response = test::TestRequest::post()
        .uri("/api/v1/auth/refresh")
        .set_json(json!({ "refresh_token": rotated["refresh_token"] }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);
}

#[actix_rt::test]
async fn test_change_password_wrong_current() {
    let app = test_app!();
    let tokens = register_and_login!(&app, "alice");

    let response = test::TestRequest::post()
        .uri("/api/v1/users/change-password")
        .insert_header(bearer(&tokens))
        .set_json(json!({
            "current_password": "not-the-password",
            "new_password": "newpassword123"
        }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["error"]["message"], "Current password is incorrect");
}

#[actix_rt::test]
async fn test_forgot_password_always_succeeds() {
    let app = test_app!();
    register_and_login!(&app, "alice");

    for email in ["alice@example.com", "nobody@example.com"] {
        let response = test::TestRequest::post()
            .uri("/api/v1/auth/forgot-password")
            .set_json(json!({ "email": email }))
            .send_request(&app)
            .await;
        assert_eq!(response.status(), 200);
    }

    let response = test::TestRequest::post()
        .uri("/api/v1/auth/reset-password")
        .set_json(json!({ "token": "bogus", "new_password": "newpassword123" }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);

    let response = test::TestRequest::get()
        .uri("/api/v1/auth/verify-email?token=bogus")
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);
}

#[actix_rt::test]
async fn test_address_crud() {
    let app = test_app!();
    let alice = register_and_login!(&app, "alice");
    let bob = register_and_login!(&app, "bob");

    let new_address = json!({
        "type": "shipping",
        "first_name": "Alice",
        "last_name": "Smith",
        "address_line1": "1 Main St",
        "city": "Springfield",
        "postal_code": "62701",
        "country": "US",
        "is_default": true
    });

    let response = test::TestRequest::post()
        .uri("/api/v1/users/addresses")
        .insert_header(bearer(&alice))
        .set_json(&new_address)
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 201);
    let created: Value = test::read_body_json(response).await;
    assert_eq!(created["type"], "shipping");
    let id = created["id"].as_str().unwrap().to_string();

    // Someone else's address looks missing.
    let response = test::TestRequest::put()
        .uri(&format!("/api/v1/users/addresses/{}", id))
        .insert_header(bearer(&bob))
        .set_json(&new_address)
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 404);

    let response = test::TestRequest::delete()
        .uri(&format!("/api/v1/users/addresses/{}", id))
        .insert_header(bearer(&bob))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 404);

    let response = test::TestRequest::get()
        .uri("/api/v1/users/addresses")
        .insert_header(bearer(&alice))
        .send_request(&app)
        .await;
    let listed: Value = test::read_body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let response = test::TestRequest::delete()
        .uri(&format!("/api/v1/users/addresses/{}", id))
        .insert_header(bearer(&alice))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 204);

    let mut bad_type = new_address.clone();
    bad_type["type"] = json!("warehouse");
    let response = test::TestRequest::post()
        .uri("/api/v1/users/addresses")
        .insert_header(bearer(&alice))
        .set_json(&bad_type)
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 400);
}

#[actix_rt::test]
async fn test_deactivate_account() {
    let app = test_app!();
    let tokens = register_and_login!(&app, "alice");

    let response = test::TestRequest::delete()
        .uri("/api/v1/users/profile")
        .insert_header(bearer(&tokens))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 204);

    let response = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({ "username": "alice", "password": "password123" }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 403);
}

#[actix_rt::test]
async fn test_list_users_is_admin_only() {
    let app = test_app!();
    let tokens = register_and_login!(&app, "alice");

    let response = test::TestRequest::get()
        .uri("/api/v1/users?limit=10")
        .insert_header(bearer(&tokens))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 403);
}
