use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::accounts::{self, NewUser};
use crate::auth::cookies::{get_cookie_value, REFRESH_COOKIE};
use crate::auth::tokens::{self, TokenKind};
use crate::auth::{cleared_cookies, password, session_cookies, start_session};
use crate::db::models::PublicUser;
use crate::error::{AppError, AppResult};
use crate::extractors::Principal;
use crate::media::{read_form, FileRule};
use crate::response::ApiResponse;
use crate::state::AppState;

pub const AVATAR_RULE: FileRule = FileRule {
    field: "avatar",
    max_count: 1,
    images_only: true,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub user: PublicUser,
    pub access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// POST /auth/register (multipart: fullName, username, email, password, bio?, avatar)
pub async fn register(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Response> {
    let mut form = read_form(
        multipart?,
        &state.config.media_temp_dir(),
        state.config.media.max_upload_bytes,
        &[AVATAR_RULE],
    )
    .await?;

    let (Some(full_name), Some(username), Some(email), Some(plain_password)) = (
        form.trimmed("fullName").map(str::to_string),
        form.trimmed("username").map(accounts::normalize_handle),
        form.trimmed("email").map(accounts::normalize_handle),
        form.text("password")
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string),
    ) else {
        return Err(AppError::BadRequest("All fields are required".into()));
    };
    let bio = form.trimmed("bio").unwrap_or_default().to_string();
    let avatar_file = form
        .take_file("avatar")
        .ok_or_else(|| AppError::BadRequest("Avatar file is required".into()))?;

    accounts::validate_bio(&bio)?;
    password::validate_new(&plain_password)?;

    {
        let conn = state.db.get()?;
        if accounts::exists_with(&conn, &email, &username)? {
            return Err(AppError::Conflict("User already exists".into()));
        }
    }

    let password_hash = password::hash_blocking(plain_password, state.config.auth.bcrypt_cost).await?;
    let avatar = state
        .media
        .upload(avatar_file)
        .await
        .ok_or(AppError::UploadFailed)?;

    let inserted = state.db.get().map_err(AppError::from).and_then(|conn| {
        let user = accounts::insert(
            &conn,
            &NewUser {
                full_name: &full_name,
                username: &username,
                email: &email,
                bio: &bio,
                password_hash: &password_hash,
                avatar: &avatar,
            },
        )?;
        let pair = start_session(&conn, &user.id, &state.config)?;
        Ok((user, pair))
    });

    let (user, pair) = match inserted {
        Ok(done) => done,
        Err(e) => {
            // Lost a race on username/email or the insert failed outright.
            state.media.remove(&avatar.storage_id).await;
            return Err(e);
        }
    };

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    Ok((
        session_cookies(&pair, &state.config),
        ApiResponse::created(
            "User registered successfully",
            SessionPayload {
                user: user.into(),
                access_token: pair.access,
            },
        ),
    )
        .into_response())
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(req) = payload?;
    let plain_password = req
        .password
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Username or email and password are required".into()))?;
    if req.username.as_deref().map_or(true, |u| u.trim().is_empty())
        && req.email.as_deref().map_or(true, |e| e.trim().is_empty())
    {
        return Err(AppError::BadRequest(
            "Username or email and password are required".into(),
        ));
    }

    let user = {
        let conn = state.db.get()?;
        accounts::find_by_login(&conn, req.username.as_deref(), req.email.as_deref())?
    }
    .ok_or_else(|| AppError::BadRequest("Invalid credentials".into()))?;

    if !password::verify_blocking(plain_password, user.password_hash.clone()).await? {
        return Err(AppError::BadRequest("Invalid credentials".into()));
    }

    let pair = {
        let conn = state.db.get()?;
        start_session(&conn, &user.id, &state.config)?
    };

    tracing::info!(user_id = %user.id, "User logged in");

    Ok((
        session_cookies(&pair, &state.config),
        ApiResponse::ok(
            "Login successful",
            SessionPayload {
                user: user.into(),
                access_token: pair.access,
            },
        ),
    )
        .into_response())
}

/// POST /auth/refresh-token
///
/// Rotates both tokens. A refresh token that verifies but is not the one
/// stored for its user (already rotated, or the user logged out) is refused.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let presented = get_cookie_value(&headers, REFRESH_COOKIE)
        .ok_or_else(|| AppError::Unauthorized("Refresh token missing".into()))?;

    let invalid = || AppError::Forbidden("Invalid or expired refresh token".into());

    let claims = tokens::verify(TokenKind::Refresh, presented, &state.config).map_err(|e| {
        tracing::debug!("refresh token rejected: {}", e);
        invalid()
    })?;

    let conn = state.db.get()?;
    let user = accounts::find_by_id(&conn, &claims.sub)?
        .ok_or_else(|| AppError::NotFound("User does not exist".into()))?;
    let stored = user.refresh_token.as_deref().ok_or_else(invalid)?;
    if !tokens::tokens_match(presented, stored) {
        tracing::warn!(user_id = %user.id, "Stale refresh token presented");
        return Err(invalid());
    }

    let pair = start_session(&conn, &user.id, &state.config)?;

    Ok((
        session_cookies(&pair, &state.config),
        ApiResponse::ok(
            "Access token refreshed",
            RefreshPayload {
                access_token: pair.access,
            },
        ),
    )
        .into_response())
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, principal: Principal) -> AppResult<Response> {
    {
        let conn = state.db.get()?;
        accounts::set_refresh_token(&conn, &principal.id, None)?;
    }

    tracing::info!(user_id = %principal.id, "User logged out");

    Ok((
        cleared_cookies(&state.config),
        ApiResponse::message(StatusCode::OK, "Logged out successfully"),
    )
        .into_response())
}
