use std::collections::HashMap;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        cookies::{expired_cookie, read_cookie, session_cookie, ACCESS_COOKIE, REFRESH_COOKIE},
        dto::{
            ChangePasswordRequest, LoginRequest, LoginResponse, RefreshRequest, RegisterRequest,
            TokenPair, UpdateDetailsRequest,
        },
        extractors::AuthUser,
        repo_types::User,
        services,
    },
    config::CookieConfig,
    error::AppResult,
    images::services::{ImageSlot, UploadItem},
    response::{ApiResponse, Empty},
    state::AppState,
};

const UPLOAD_BODY_LIMIT: usize = 20 * 1024 * 1024; // 20MB

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/logout", get(logout))
        .route("/change-password", post(change_password))
        .route("/update-user-details", post(update_user_details))
        .route("/get-user-details", get(get_user_details))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/update-avatar", post(update_avatar))
        .route("/update-coverimage", post(update_cover_image))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

/// Text fields and named file parts of a multipart body.
#[derive(Default)]
struct FormParts {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadItem>,
}

async fn read_multipart(mut mp: Multipart, file_fields: &[&str]) -> AppResult<FormParts> {
    let mut parts = FormParts::default();
    while let Some(field) = mp.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if file_fields.contains(&name.as_str()) {
            // unselected file inputs arrive as `filename=""` with no content
            if field.file_name().map_or(true, str::is_empty) {
                continue;
            }
            let content_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field.bytes().await?;
            if body.is_empty() {
                continue;
            }
            parts.files.insert(name, UploadItem { body, content_type });
        } else {
            let value = field.text().await?;
            parts.fields.insert(name, value);
        }
    }
    Ok(parts)
}

fn session_cookies(cfg: &CookieConfig, pair: &TokenPair) -> AppendHeaders<[(axum::http::HeaderName, String); 2]> {
    AppendHeaders([
        (SET_COOKIE, session_cookie(cfg, ACCESS_COOKIE, &pair.access_token)),
        (SET_COOKIE, session_cookie(cfg, REFRESH_COOKIE, &pair.refresh_token)),
    ])
}

/// POST /register (multipart: username, email, fullname, password, avatar?, coverImage?)
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    mp: Multipart,
) -> AppResult<ApiResponse<User>> {
    let avatar_field = ImageSlot::Avatar.field_name();
    let cover_field = ImageSlot::CoverImage.field_name();
    let mut form = read_multipart(mp, &[avatar_field, cover_field]).await?;

    let req = RegisterRequest {
        username: form.fields.remove("username"),
        email: form.fields.remove("email"),
        fullname: form.fields.remove("fullname"),
        password: form.fields.remove("password"),
    };
    let user = services::register(
        &state,
        req,
        form.files.remove(avatar_field),
        form.files.remove(cover_field),
    )
    .await?;
    Ok(ApiResponse::created(user, "User registered successfully"))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(req) = payload?;
    let (user, pair) = services::login(&state, req).await?;
    Ok((
        session_cookies(&state.config.cookies, &pair),
        ApiResponse::ok(
            LoginResponse {
                user,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

/// POST /refresh-token. The `refreshToken` cookie wins over the JSON body.
#[instrument(skip_all)]
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let incoming = read_cookie(&headers, REFRESH_COOKIE).or_else(|| {
        payload
            .ok()
            .and_then(|Json(body)| body.refresh_token)
    });
    let pair = services::refresh_session(&state, incoming).await?;
    Ok((
        session_cookies(&state.config.cookies, &pair),
        ApiResponse::ok(pair, "Access token refreshed"),
    ))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> AppResult<impl IntoResponse> {
    services::logout(&state, claims.sub).await?;
    let cfg = &state.config.cookies;
    Ok((
        AppendHeaders([
            (SET_COOKIE, expired_cookie(cfg, ACCESS_COOKIE)),
            (SET_COOKIE, expired_cookie(cfg, REFRESH_COOKIE)),
        ]),
        ApiResponse::ok(Empty {}, "User logged out"),
    ))
}

#[instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Empty>> {
    let Json(req) = payload?;
    services::change_password(&state, claims.sub, req).await?;
    Ok(ApiResponse::ok(Empty {}, "Password changed successfully"))
}

#[instrument(skip_all)]
pub async fn update_user_details(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<UpdateDetailsRequest>, JsonRejection>,
) -> AppResult<ApiResponse<User>> {
    let Json(req) = payload?;
    let user = services::update_details(&state, claims.sub, req).await?;
    Ok(ApiResponse::ok(user, "User details updated"))
}

async fn update_image(
    state: AppState,
    auth: AuthUser,
    mp: Multipart,
    slot: ImageSlot,
) -> AppResult<User> {
    let mut form = read_multipart(mp, &[slot.field_name()]).await?;
    services::update_image(&state, auth.0.sub, slot, form.files.remove(slot.field_name())).await
}

#[instrument(skip_all)]
pub async fn update_avatar(
    State(state): State<AppState>,
    auth: AuthUser,
    mp: Multipart,
) -> AppResult<ApiResponse<User>> {
    let user = update_image(state, auth, mp, ImageSlot::Avatar).await?;
    Ok(ApiResponse::ok(user, "User avatar updated"))
}

#[instrument(skip_all)]
pub async fn update_cover_image(
    State(state): State<AppState>,
    auth: AuthUser,
    mp: Multipart,
) -> AppResult<ApiResponse<User>> {
    let user = update_image(state, auth, mp, ImageSlot::CoverImage).await?;
    Ok(ApiResponse::ok(user, "Cover image updated"))
}

#[instrument(skip_all)]
pub async fn get_user_details(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> AppResult<ApiResponse<User>> {
    let user = services::get_details(&state, claims.sub).await?;
    Ok(ApiResponse::ok(user, "User details found"))
}
