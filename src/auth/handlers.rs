use actix_web::{web, HttpResponse, ResponseError};
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::extractor::AuthenticatedUser;
use crate::auth::models::{
    ChangePasswordRequest, ForgotPasswordRequest, ListUsersQuery, LoginRequest, MessageResponse,
    RefreshRequest, RegisterRequest, ResetPasswordRequest, UpdateProfileDetailsRequest,
    UpdateUserRequest, VerifyEmailQuery,
};
use crate::db::AddressInput;
use crate::error::AppError;
use crate::AppState;

/// Mounts the `/api/v1` auth and user routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/forgot-password", web::post().to(forgot_password))
                    .route("/reset-password", web::post().to(reset_password))
                    .route("/verify-email", web::get().to(verify_email)),
            )
            .service(
                web::scope("/users")
                    .route("", web::get().to(list_users))
                    .route("/profile", web::get().to(get_profile))
                    .route("/profile", web::put().to(update_profile))
                    .route("/profile", web::delete().to(deactivate_account))
                    .route("/profile/details", web::get().to(get_profile_details))
                    .route("/profile/details", web::put().to(update_profile_details))
                    .route("/change-password", web::post().to(change_password))
                    .route("/resend-verification", web::post().to(resend_verification))
                    .route("/logout", web::post().to(logout))
                    .route("/addresses", web::get().to(list_addresses))
                    .route("/addresses", web::post().to(create_address))
                    .route("/addresses/{id}", web::put().to(update_address))
                    .route("/addresses/{id}", web::delete().to(delete_address)),
            ),
    );
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth_service.register(req.into_inner()).await?;
    Ok(HttpResponse::Created().json(user))
}

pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    match state.auth_service.login(req.into_inner()).await {
        Ok(tokens) => Ok(HttpResponse::Ok().json(tokens)),
        Err(e) => {
            if e.status_code().is_server_error() {
                error!("Login failed: {}", e);
            } else {
                info!("Login rejected: {}", e);
            }
            Err(e)
        }
    }
}

pub async fn refresh(
    req: web::Json<RefreshRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tokens = state.auth_service.refresh_token(&req.refresh_token).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

pub async fn forgot_password(
    req: web::Json<ForgotPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.forgot_password(&req.email).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "If the email exists, a password reset link has been sent",
    )))
}

pub async fn reset_password(
    req: web::Json<ResetPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.reset_password(req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Password reset successfully")))
}

pub async fn verify_email(
    query: web::Query<VerifyEmailQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.verify_email(&query.token).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Email verified successfully")))
}

pub async fn get_profile(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let profile = state.auth_service.get_profile(user.user_id).await?;
    Ok(HttpResponse::Ok().json(profile))
}

pub async fn update_profile(
    user: AuthenticatedUser,
    req: web::Json<UpdateUserRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let profile = state
        .auth_service
        .update_profile(user.user_id, req.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(profile))
}

pub async fn deactivate_account(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.deactivate_account(user.user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn get_profile_details(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let details = state.auth_service.get_user_profile(user.user_id).await?;
    Ok(HttpResponse::Ok().json(details))
}

pub async fn update_profile_details(
    user: AuthenticatedUser,
    req: web::Json<UpdateProfileDetailsRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let details = state
        .auth_service
        .update_user_profile(user.user_id, req.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(details))
}

pub async fn change_password(
    user: AuthenticatedUser,
    req: web::Json<ChangePasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state
        .auth_service
        .change_password(user.user_id, req.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Password changed successfully")))
}

pub async fn resend_verification(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state
        .auth_service
        .resend_email_verification(user.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Verification email sent")))
}

pub async fn logout(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.logout(user.user_id).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Successfully logged out")))
}

pub async fn list_addresses(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let addresses = state.auth_service.list_addresses(user.user_id).await?;
    Ok(HttpResponse::Ok().json(addresses))
}

pub async fn create_address(
    user: AuthenticatedUser,
    req: web::Json<AddressInput>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let address = state
        .auth_service
        .create_address(user.user_id, req.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(address))
}

pub async fn update_address(
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    req: web::Json<AddressInput>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let address = state
        .auth_service
        .update_address(user.user_id, path.into_inner(), req.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(address))
}

pub async fn delete_address(
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state
        .auth_service
        .delete_address(user.user_id, path.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_users(
    user: AuthenticatedUser,
    query: web::Query<ListUsersQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let users = state
        .auth_service
        .list_users(user.user_id, query.limit, query.offset)
        .await?;
    Ok(HttpResponse::Ok().json(users))
}
