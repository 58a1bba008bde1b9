//! Authentication module for the user service
//!
//! Registration, login, token issuance and refresh, password and
//! email-verification flows, plus the profile and address operations that
//! sit behind an authenticated caller.

mod account;
pub mod extractor;
pub mod handlers;
pub mod models;
pub mod password;
mod service;
pub mod token;
pub mod validation;

pub use account::MAX_PAGE_SIZE;
pub use extractor::AuthenticatedUser;
pub use password::PasswordHasher;
pub use service::AuthService;
pub use token::{AccessClaims, RefreshClaims, TokenPair, TokenService};
