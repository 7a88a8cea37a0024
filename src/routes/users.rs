use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::accounts::{self, ProfileUpdate};
use crate::auth::handlers::AVATAR_RULE;
use crate::auth::{cleared_cookies, password, session_cookies, start_session};
use crate::db::models::{PublicUser, StoredMedia};
use crate::error::{AppError, AppResult};
use crate::extractors::Principal;
use crate::feed::{self, FeedPage, Scope};
use crate::graph::{self, Direction, FollowEntry, FollowState};
use crate::media::read_form;
use crate::response::{ApiResponse, Page, PageQuery, Pagination};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(me).patch(update_me).delete(delete_me))
        .route("/users/me/change-password", put(change_password))
        .route("/users/{username}", get(profile))
        .route("/users/{username}/follow", patch(toggle_follow))
        .route("/users/{username}/followers", get(followers))
        .route("/users/{username}/following", get(following))
        .route("/users/{username}/chirps", get(user_chirps))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnProfile {
    #[serde(flatten)]
    pub user: PublicUser,
    pub followers_count: i64,
    pub following_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub full_name: String,
    pub username: String,
    pub avatar: Option<StoredMedia>,
    pub bio: String,
    pub created_at: String,
    pub followers_count: i64,
    pub following_count: i64,
    /// The viewer follows this user
    pub is_following: bool,
    /// This user follows the viewer
    pub follows_you: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionList {
    pub users: Vec<FollowEntry>,
    pub is_following_user: bool,
    pub is_followed_by_user: bool,
    pub count: i64,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenPayload {
    pub access_token: String,
}

async fn me(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<ApiResponse<OwnProfile>> {
    let conn = state.db.get()?;
    let user = accounts::find_by_id(&conn, &principal.id)?
        .ok_or_else(|| AppError::NotFound("User does not exist".into()))?;

    Ok(ApiResponse::ok(
        "User fetched successfully",
        OwnProfile {
            followers_count: graph::followers_count(&conn, &user.id)?,
            following_count: graph::following_count(&conn, &user.id)?,
            user: user.into(),
        },
    ))
}

async fn profile(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
) -> AppResult<ApiResponse<PublicProfile>> {
    let conn = state.db.get()?;
    let user = accounts::require_by_username(&conn, &username)?;

    Ok(ApiResponse::ok(
        "User profile fetched successfully",
        PublicProfile {
            followers_count: graph::followers_count(&conn, &user.id)?,
            following_count: graph::following_count(&conn, &user.id)?,
            is_following: graph::is_following(&conn, &principal.id, &user.id)?,
            follows_you: graph::is_following(&conn, &user.id, &principal.id)?,
            full_name: user.full_name,
            username: user.username,
            avatar: user.avatar,
            bio: user.bio,
            created_at: user.created_at,
        },
    ))
}

async fn toggle_follow(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
) -> AppResult<ApiResponse<FollowState>> {
    let conn = state.db.get()?;
    let target = accounts::require_by_username(&conn, &username)?;
    let follow = graph::toggle_follow(&conn, &principal.id, &target.id)?;

    let message = if follow.following {
        "Followed user successfully"
    } else {
        "Unfollowed user successfully"
    };
    Ok(ApiResponse::ok(message, follow))
}

async fn followers(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<ApiResponse<ConnectionList>> {
    connections(&state, &principal, &username, Direction::Followers, query.into())
        .map(|list| ApiResponse::ok("Followers fetched successfully", list))
}

async fn following(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<ApiResponse<ConnectionList>> {
    connections(&state, &principal, &username, Direction::Following, query.into())
        .map(|list| ApiResponse::ok("Following fetched successfully", list))
}

fn connections(
    state: &AppState,
    viewer: &Principal,
    username: &str,
    direction: Direction,
    page: Page,
) -> AppResult<ConnectionList> {
    let conn = state.db.get()?;
    let subject = accounts::require_by_username(&conn, username)?;
    let listed = graph::list_connections(&conn, &subject.id, &viewer.id, direction, page)?;

    Ok(ConnectionList {
        users: listed.users,
        is_following_user: graph::is_following(&conn, &viewer.id, &subject.id)?,
        is_followed_by_user: graph::is_following(&conn, &subject.id, &viewer.id)?,
        count: listed.total,
        pagination: page.meta(listed.total),
    })
}

async fn user_chirps(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<ApiResponse<FeedPage>> {
    let conn = state.db.get()?;
    let user = accounts::require_by_username(&conn, &username)?;
    let page = feed::load(&conn, &principal.id, Scope::Author(&user.id), query.into())?;
    Ok(ApiResponse::ok("User chirps fetched successfully", page))
}

/// PATCH /users/me (multipart: fullName?, bio?, avatar?)
async fn update_me(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let mut form = read_form(
        multipart?,
        &state.config.media_temp_dir(),
        state.config.media.max_upload_bytes,
        &[AVATAR_RULE],
    )
    .await?;

    let full_name = form.trimmed("fullName").map(str::to_string);
    let bio = form.text("bio").map(|b| b.trim().to_string());
    if let Some(bio) = &bio {
        accounts::validate_bio(bio)?;
    }
    let avatar_file = form.take_file("avatar");
    if full_name.is_none() && bio.is_none() && avatar_file.is_none() {
        return Err(AppError::BadRequest("Nothing to update".into()));
    }

    let avatar = match avatar_file {
        Some(file) => Some(state.media.upload(file).await.ok_or(AppError::UploadFailed)?),
        None => None,
    };
    let new_storage_id = avatar.as_ref().map(|a| a.storage_id.clone());

    let updated = state.db.get().map_err(AppError::from).and_then(|conn| {
        accounts::update_profile(
            &conn,
            &principal.id,
            ProfileUpdate {
                full_name,
                bio,
                avatar,
            },
        )
    });

    let (user, replaced) = match updated {
        Ok(done) => done,
        Err(e) => {
            if let Some(id) = new_storage_id {
                state.media.remove(&id).await;
            }
            return Err(e);
        }
    };

    if let Some(old) = replaced {
        state.media.remove(&old.storage_id).await;
    }

    Ok(ApiResponse::ok("Profile updated successfully", user.into()))
}

/// PUT /users/me/change-password
///
/// Rotates the token pair, so refresh tokens held by other sessions stop working.
async fn change_password(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(req) = payload?;
    let (Some(old_password), Some(new_password)) = (
        req.old_password.filter(|p| !p.is_empty()),
        req.new_password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "Old and new passwords are required".into(),
        ));
    };
    password::validate_new(&new_password)?;

    let current_hash = {
        let conn = state.db.get()?;
        accounts::find_by_id(&conn, &principal.id)?
            .ok_or_else(|| AppError::NotFound("User does not exist".into()))?
            .password_hash
    };
    if !password::verify_blocking(old_password, current_hash).await? {
        return Err(AppError::BadRequest("Old password is incorrect".into()));
    }

    let new_hash = password::hash_blocking(new_password, state.config.auth.bcrypt_cost).await?;
    let pair = {
        let conn = state.db.get()?;
        accounts::set_password(&conn, &principal.id, &new_hash)?;
        start_session(&conn, &principal.id, &state.config)?
    };

    tracing::info!(user_id = %principal.id, "Password changed");

    Ok((
        session_cookies(&pair, &state.config),
        ApiResponse::ok(
            "Password changed successfully",
            AccessTokenPayload {
                access_token: pair.access,
            },
        ),
    )
        .into_response())
}

/// DELETE /users/me
///
/// The user row goes first (its failure fails the request); stored media
/// is removed afterwards, best-effort.
async fn delete_me(State(state): State<AppState>, principal: Principal) -> AppResult<Response> {
    let storage_ids = {
        let conn = state.db.get()?;
        let storage_ids = accounts::owned_storage_ids(&conn, &principal.id)?;
        if !accounts::delete(&conn, &principal.id)? {
            return Err(AppError::NotFound("User does not exist".into()));
        }
        storage_ids
    };

    let failed = state.media.remove_all(&storage_ids).await;
    tracing::info!(
        user_id = %principal.id,
        media = storage_ids.len(),
        failed,
        "Account deleted"
    );

    Ok((
        cleared_cookies(&state.config),
        ApiResponse::message(StatusCode::OK, "Account deleted successfully"),
    )
        .into_response())
}
