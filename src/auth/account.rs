//! Profile, address and administrative operations on `AuthService`.
//!
//! Address mutations check ownership and answer `NotFound` for addresses that
//! belong to someone else, so a caller cannot probe for other users' ids.

use tracing::{info, instrument};
use uuid::Uuid;

use super::service::{not_found, AuthService};
use crate::auth::models::{UpdateProfileDetailsRequest, UpdateUserRequest};
use crate::auth::validation;
use crate::db::{AddressInput, UserAddress, UserProfile, UserPublicView};
use crate::error::{AppError, AuthError, DatabaseError};

pub const MAX_PAGE_SIZE: i64 = 100;

impl AuthService {
    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserPublicView, AppError> {
        let user = self
            .store
            .get_user_by_id(user_id)
            .await
            .map_err(not_found("User"))?;
        Ok(user.to_public())
    }

    #[instrument(skip(self, req))]
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        req: UpdateUserRequest,
    ) -> Result<UserPublicView, AppError> {
        validation::validate_user_update(&req)?;

        let mut user = self
            .store
            .get_user_by_id(user_id)
            .await
            .map_err(not_found("User"))?;
        if let Some(first_name) = req.first_name {
            user.first_name = Some(first_name);
        }
        if let Some(last_name) = req.last_name {
            user.last_name = Some(last_name);
        }
        if let Some(phone) = req.phone {
            user.phone = Some(phone);
        }

        let user = self.store.update_user(&user).await.map_err(not_found("User"))?;
        info!(user_id = %user_id, "User profile updated");
        Ok(user.to_public())
    }

    #[instrument(skip(self))]
    pub async fn get_user_profile(&self, user_id: Uuid) -> Result<UserProfile, AppError> {
        self.store
            .get_profile(user_id)
            .await
            .map_err(not_found("Profile"))
    }

    /// Applies the provided fields, creating the profile record if registration
    /// never got to write one.
    #[instrument(skip(self, req))]
    pub async fn update_user_profile(
        &self,
        user_id: Uuid,
        req: UpdateProfileDetailsRequest,
    ) -> Result<UserProfile, AppError> {
        validation::validate_profile_details(&req)?;

        let (mut profile, exists) = match self.store.get_profile(user_id).await {
            Ok(profile) => (profile, true),
            Err(DatabaseError::NotFound) => (UserProfile::empty(user_id), false),
            Err(e) => return Err(e.into()),
        };

        if req.avatar_url.is_some() {
            profile.avatar_url = req.avatar_url;
        }
        if req.date_of_birth.is_some() {
            profile.date_of_birth = req.date_of_birth;
        }
        if req.gender.is_some() {
            profile.gender = req.gender;
        }
        if req.bio.is_some() {
            profile.bio = req.bio;
        }
        if let Some(preferences) = req.preferences {
            profile.preferences = preferences;
        }

        let profile = if exists {
            self.store.update_profile(&profile).await
        } else {
            self.store.create_profile(&profile).await
        };
        profile.map_err(|e| match e {
            DatabaseError::QueryError(_) if !exists => AuthError::NotFound("User").into(),
            other => other.into(),
        })
    }

    #[instrument(skip(self, input))]
    pub async fn create_address(
        &self,
        user_id: Uuid,
        input: AddressInput,
    ) -> Result<UserAddress, AppError> {
        validation::validate_address(&input)?;

        let address = input.into_address(Uuid::new_v4(), user_id);
        let address = self.store.create_address(&address).await?;

        info!(user_id = %user_id, address_id = %address.id, "Address created");
        Ok(address)
    }

    #[instrument(skip(self))]
    pub async fn list_addresses(&self, user_id: Uuid) -> Result<Vec<UserAddress>, AppError> {
        Ok(self.store.get_addresses(user_id).await?)
    }

    #[instrument(skip(self, input))]
    pub async fn update_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
        input: AddressInput,
    ) -> Result<UserAddress, AppError> {
        validation::validate_address(&input)?;

        let existing = self.owned_address(user_id, address_id).await?;
        let mut address = input.into_address(existing.id, user_id);
        address.created_at = existing.created_at;

        let address = self
            .store
            .update_address(&address)
            .await
            .map_err(not_found("Address"))?;

        info!(user_id = %user_id, address_id = %address_id, "Address updated");
        Ok(address)
    }

    #[instrument(skip(self))]
    pub async fn delete_address(&self, user_id: Uuid, address_id: Uuid) -> Result<(), AppError> {
        self.owned_address(user_id, address_id).await?;
        self.store
            .delete_address(address_id)
            .await
            .map_err(not_found("Address"))?;

        info!(user_id = %user_id, address_id = %address_id, "Address deleted");
        Ok(())
    }

    /// Active users, newest first. Only callers whose stored role is admin may list.
    #[instrument(skip(self))]
    pub async fn list_users(
        &self,
        caller_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserPublicView>, AppError> {
        let caller = match self.store.get_user_by_id(caller_id).await {
            Ok(user) => user,
            Err(DatabaseError::NotFound) => return Err(AuthError::Unauthorized.into()),
            Err(e) => return Err(e.into()),
        };
        if !caller.is_admin() || !caller.status.is_active() {
            return Err(AuthError::Forbidden.into());
        }

        let users = self
            .store
            .list_active_users(limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
            .await?;
        Ok(users.iter().map(|u| u.to_public()).collect())
    }

    async fn owned_address(&self, user_id: Uuid, address_id: Uuid) -> Result<UserAddress, AppError> {
        let address = self
            .store
            .get_address(address_id)
            .await
            .map_err(not_found("Address"))?;
        if address.user_id != user_id {
            return Err(AuthError::NotFound("Address").into());
        }
        Ok(address)
    }
}
