//! Input rules applied before any request reaches the store.

use crate::auth::models::{RegisterRequest, UpdateProfileDetailsRequest, UpdateUserRequest};
use crate::auth::password::MAX_PASSWORD_BYTES;
use crate::db::AddressInput;
use crate::error::AppError;

pub const MIN_PASSWORD_LEN: usize = 8;
const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=50;
const MAX_NAME_LEN: usize = 100;
const MAX_PHONE_LEN: usize = 20;
const MAX_EMAIL_LEN: usize = 255;
const MAX_URL_LEN: usize = 500;
const MAX_GENDER_LEN: usize = 20;

fn invalid(msg: impl Into<String>) -> AppError {
    AppError::ValidationError(msg.into())
}

fn max_chars(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    if value.chars().count() > max {
        return Err(invalid(format!("{} must be at most {} characters", field, max)));
    }
    Ok(())
}

fn required(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{} is required", field)));
    }
    max_chars(field, value, max)
}

fn optional(field: &str, value: Option<&String>, max: usize) -> Result<(), AppError> {
    match value {
        Some(v) => max_chars(field, v, max),
        None => Ok(()),
    }
}

pub fn validate_username(username: &str) -> Result<(), AppError> {
    let len = username.chars().count();
    if !USERNAME_LEN.contains(&len) {
        return Err(invalid("username must be between 3 and 50 characters"));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(invalid("username must not contain whitespace"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    max_chars("email", email, MAX_EMAIL_LEN)?;
    let mut parts = email.split('@');
    let valid = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        _ => false,
    };
    if !valid {
        return Err(invalid("email must be a valid email address"));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(invalid("password must be at least 8 characters"));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(invalid("password must be at most 72 bytes"));
    }
    Ok(())
}

pub fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    validate_username(&req.username)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;
    optional("first_name", req.first_name.as_ref(), MAX_NAME_LEN)?;
    optional("last_name", req.last_name.as_ref(), MAX_NAME_LEN)?;
    optional("phone", req.phone.as_ref(), MAX_PHONE_LEN)
}

pub fn validate_user_update(req: &UpdateUserRequest) -> Result<(), AppError> {
    optional("first_name", req.first_name.as_ref(), MAX_NAME_LEN)?;
    optional("last_name", req.last_name.as_ref(), MAX_NAME_LEN)?;
    optional("phone", req.phone.as_ref(), MAX_PHONE_LEN)
}

pub fn validate_profile_details(req: &UpdateProfileDetailsRequest) -> Result<(), AppError> {
    optional("avatar_url", req.avatar_url.as_ref(), MAX_URL_LEN)?;
    optional("gender", req.gender.as_ref(), MAX_GENDER_LEN)?;
    if let Some(prefs) = &req.preferences {
        if !prefs.is_object() {
            return Err(invalid("preferences must be a JSON object"));
        }
    }
    Ok(())
}

pub fn validate_address(input: &AddressInput) -> Result<(), AppError> {
    required("first_name", &input.first_name, MAX_NAME_LEN)?;
    required("last_name", &input.last_name, MAX_NAME_LEN)?;
    optional("company", input.company.as_ref(), MAX_NAME_LEN)?;
    required("address_line1", &input.address_line1, 255)?;
    optional("address_line2", input.address_line2.as_ref(), 255)?;
    required("city", &input.city, MAX_NAME_LEN)?;
    optional("state", input.state.as_ref(), MAX_NAME_LEN)?;
    required("postal_code", &input.postal_code, MAX_PHONE_LEN)?;
    required("country", &input.country, MAX_NAME_LEN)?;
    optional("phone", input.phone.as_ref(), MAX_PHONE_LEN)
}
