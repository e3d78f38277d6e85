use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::dto::{
    ChangePasswordRequest, LoginRequest, RegisterRequest, TokenPair, UpdateDetailsRequest,
};
use crate::auth::jwt::TokenError;
use crate::auth::password::{hash_password_blocking, verify_password_blocking, MIN_PASSWORD_LEN};
use crate::auth::repo_types::{NewUser, User, UserUpdate};
use crate::error::{AppError, AppResult};
use crate::images::services::{check_image, discard, upload_image, ImageSlot, StoredImage, UploadItem};
use crate::state::AppState;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9]+$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Trimmed value, or `None` when missing or blank.
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, PartialEq, Eq)]
pub struct ValidRegistration {
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub password: String,
}

pub fn validate_registration(req: RegisterRequest) -> AppResult<ValidRegistration> {
    let (Some(username), Some(email), Some(fullname), Some(password)) = (
        present(req.username),
        present(req.email),
        present(req.fullname),
        req.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::bad_request("All fields are required"));
    };

    if !is_valid_username(&username) {
        return Err(AppError::bad_request(
            "Username must contain only letters and numbers",
        ));
    }
    let email = normalize_email(&email);
    if !is_valid_email(&email) {
        return Err(AppError::bad_request("Invalid email address"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }

    Ok(ValidRegistration {
        username: username.to_lowercase(),
        email,
        fullname,
        password,
    })
}

async fn ensure_identity_free(st: &AppState, username: &str, email: &str) -> AppResult<()> {
    if st.users.find_by_username(username).await?.is_some() {
        warn!(username = %username, "username already registered");
        return Err(AppError::conflict("User with this username already exists"));
    }
    if st.users.find_by_email(email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::conflict("User with this email already exists"));
    }
    Ok(())
}

async fn upload_optional(
    st: &AppState,
    user_id: Uuid,
    slot: ImageSlot,
    item: Option<UploadItem>,
) -> AppResult<Option<StoredImage>> {
    match item {
        Some(item) => upload_image(st, user_id, slot, item).await.map(Some),
        None => Ok(None),
    }
}

/// Creates a user, uploading the optional profile images first.
///
/// Uploaded objects are removed again if the user row cannot be written.
pub async fn register(
    st: &AppState,
    req: RegisterRequest,
    avatar: Option<UploadItem>,
    cover_image: Option<UploadItem>,
) -> AppResult<User> {
    let reg = validate_registration(req)?;
    if let Some(item) = &avatar {
        check_image(ImageSlot::Avatar, item)?;
    }
    if let Some(item) = &cover_image {
        check_image(ImageSlot::CoverImage, item)?;
    }
    ensure_identity_free(st, &reg.username, &reg.email).await?;

    let password_hash = hash_password_blocking(reg.password).await?;
    let id = Uuid::new_v4();

    let mut uploaded: Vec<StoredImage> = Vec::new();
    let avatar = upload_optional(st, id, ImageSlot::Avatar, avatar).await?;
    uploaded.extend(avatar.clone());
    let cover_image = match upload_optional(st, id, ImageSlot::CoverImage, cover_image).await {
        Ok(img) => img,
        Err(e) => {
            for img in &uploaded {
                discard(st, img).await;
            }
            return Err(e);
        }
    };
    uploaded.extend(cover_image.clone());

    let new = NewUser {
        id,
        username: reg.username,
        email: reg.email,
        fullname: reg.fullname,
        password_hash,
        avatar: avatar.map(|i| i.url),
        cover_image: cover_image.map(|i| i.url),
    };
    match st.users.create(new).await {
        Ok(user) => {
            info!(user_id = %user.id, username = %user.username, "user registered");
            Ok(user)
        }
        Err(e) => {
            for img in &uploaded {
                discard(st, img).await;
            }
            Err(e.into())
        }
    }
}

/// Signs a new pair and stores its refresh token on the user, replacing any previous one.
pub async fn issue_pair(st: &AppState, user: &User) -> AppResult<TokenPair> {
    let generation_failed = || AppError::internal("Error while generating tokens");

    let access_token = st.keys.sign_access(user).map_err(|e| {
        error!(error = %e, user_id = %user.id, "jwt sign access failed");
        generation_failed()
    })?;
    let refresh_token = st.keys.sign_refresh(user).map_err(|e| {
        error!(error = %e, user_id = %user.id, "jwt sign refresh failed");
        generation_failed()
    })?;

    match st.users.set_refresh_token(user.id, Some(&refresh_token)).await {
        Ok(true) => Ok(TokenPair {
            access_token,
            refresh_token,
        }),
        Ok(false) => {
            error!(user_id = %user.id, "user vanished while storing refresh token");
            Err(generation_failed())
        }
        Err(e) => {
            error!(error = %e, user_id = %user.id, "storing refresh token failed");
            Err(generation_failed())
        }
    }
}

pub async fn login(st: &AppState, req: LoginRequest) -> AppResult<(User, TokenPair)> {
    let email = present(req.email)
        .map(|e| normalize_email(&e))
        .ok_or_else(|| AppError::bad_request("email is required"))?;
    let password = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::bad_request("password is required"))?;

    let Some(user) = st.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::not_found("User not found"));
    };

    if !verify_password_blocking(password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized("Invalid user credentials"));
    }

    let pair = issue_pair(st, &user).await?;
    info!(user_id = %user.id, "user logged in");
    Ok((user, pair))
}

/// Exchanges the stored refresh token for a new pair.
///
/// The presented token must verify under the refresh secret and equal the
/// value currently stored on the user; anything else needs a fresh login.
pub async fn refresh_session(st: &AppState, incoming: Option<String>) -> AppResult<TokenPair> {
    let incoming = present(incoming).ok_or_else(|| AppError::unauthorized("Unauthorized request"))?;

    let claims = st.keys.verify_refresh(&incoming).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        match e {
            TokenError::Expired => AppError::unauthorized("Refresh token expired"),
            _ => AppError::unauthorized("Invalid refresh token"),
        }
    })?;

    let Some(user) = st.users.find_by_id(claims.sub).await? else {
        warn!(user_id = %claims.sub, "refresh for unknown user");
        return Err(AppError::not_found("User not found"));
    };

    if user.refresh_token.as_deref() != Some(incoming.as_str()) {
        warn!(user_id = %user.id, "refresh token does not match stored token");
        return Err(AppError::unauthorized("Refresh token is expired or used"));
    }

    let pair = issue_pair(st, &user).await?;
    info!(user_id = %user.id, "session refreshed");
    Ok(pair)
}

pub async fn logout(st: &AppState, user_id: Uuid) -> AppResult<()> {
    if !st.users.set_refresh_token(user_id, None).await? {
        return Err(AppError::not_found("User not found"));
    }
    info!(%user_id, "user logged out");
    Ok(())
}

pub async fn change_password(
    st: &AppState,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> AppResult<()> {
    let (Some(old_password), Some(new_password)) = (
        req.old_password.filter(|p| !p.is_empty()),
        req.new_password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::bad_request("oldPassword and newPassword are required"));
    };
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }

    let user = get_details(st, user_id).await?;
    if !verify_password_blocking(old_password, user.password_hash.clone()).await? {
        warn!(%user_id, "change password with wrong old password");
        return Err(AppError::unauthorized("Invalid old password"));
    }

    let hash = hash_password_blocking(new_password).await?;
    if !st.users.set_password_hash(user_id, &hash).await? {
        return Err(AppError::not_found("User not found"));
    }
    info!(%user_id, "password changed");
    Ok(())
}

pub async fn update_details(
    st: &AppState,
    user_id: Uuid,
    req: UpdateDetailsRequest,
) -> AppResult<User> {
    let fullname = present(req.fullname);
    let email = present(req.email).map(|e| normalize_email(&e));
    if fullname.is_none() && email.is_none() {
        return Err(AppError::bad_request("fullname or email is required"));
    }
    if let Some(email) = &email {
        if !is_valid_email(email) {
            return Err(AppError::bad_request("Invalid email address"));
        }
    }

    let update = UserUpdate {
        fullname,
        email,
        ..UserUpdate::default()
    };
    let user = st
        .users
        .update_fields(user_id, update)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    info!(%user_id, "user details updated");
    Ok(user)
}

/// Replaces the avatar or cover image. The previous object is left on the media host.
pub async fn update_image(
    st: &AppState,
    user_id: Uuid,
    slot: ImageSlot,
    item: Option<UploadItem>,
) -> AppResult<User> {
    let item = item.ok_or_else(|| AppError::bad_request(format!("{} file is missing", slot.label())))?;
    let stored = upload_image(st, user_id, slot, item).await?;

    let update = match slot {
        ImageSlot::Avatar => UserUpdate {
            avatar: Some(stored.url.clone()),
            ..UserUpdate::default()
        },
        ImageSlot::CoverImage => UserUpdate {
            cover_image: Some(stored.url.clone()),
            ..UserUpdate::default()
        },
    };

    match st.users.update_fields(user_id, update).await {
        Ok(Some(user)) => {
            info!(%user_id, slot = slot.label(), "profile image updated");
            Ok(user)
        }
        Ok(None) => {
            discard(st, &stored).await;
            Err(AppError::not_found("User not found"))
        }
        Err(e) => {
            discard(st, &stored).await;
            Err(e.into())
        }
    }
}

pub async fn get_details(st: &AppState, user_id: Uuid) -> AppResult<User> {
    st.users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}
