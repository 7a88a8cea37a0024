use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::content::chirps::{self, LikeState, RechirpOutcome, MAX_MEDIA_PER_CHIRP};
use crate::content::comments::{self, CommentView};
use crate::db::models::Chirp;
use crate::error::{AppError, AppResult};
use crate::extractors::Principal;
use crate::feed::{self, FeedPage, Scope};
use crate::media::{read_form, FileRule};
use crate::response::{ApiResponse, Page, PageQuery, Pagination};
use crate::state::AppState;

const MEDIA_RULE: FileRule = FileRule {
    field: "media",
    max_count: MAX_MEDIA_PER_CHIRP,
    images_only: false,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chirps", get(global_feed).post(create_chirp))
        .route("/chirps/me", get(own_feed))
        .route("/chirps/{id}", delete(delete_chirp))
        .route("/chirps/{id}/like", patch(toggle_like))
        .route("/chirps/{id}/rechirp", post(toggle_rechirp))
        .route("/chirps/{id}/comments", get(list_comments).post(add_comment))
        .route("/chirps/comments/{comment_id}", delete(delete_comment))
}

#[derive(Debug, Deserialize)]
pub struct ContentRequest {
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPage {
    pub comments: Vec<CommentView>,
    pub pagination: Pagination,
}

async fn global_feed(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<PageQuery>,
) -> AppResult<ApiResponse<FeedPage>> {
    let conn = state.db.get()?;
    let page = feed::load(&conn, &principal.id, Scope::Global, query.into())?;
    Ok(ApiResponse::ok("Chirps fetched successfully", page))
}

async fn own_feed(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<PageQuery>,
) -> AppResult<ApiResponse<FeedPage>> {
    let conn = state.db.get()?;
    let page = feed::load(&conn, &principal.id, Scope::Author(&principal.id), query.into())?;
    Ok(ApiResponse::ok("Your chirps fetched successfully", page))
}

/// POST /chirps (multipart: content, media[0..4])
async fn create_chirp(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<ApiResponse<Chirp>> {
    let mut form = read_form(
        multipart?,
        &state.config.media_temp_dir(),
        state.config.media.max_upload_bytes,
        &[MEDIA_RULE],
    )
    .await?;

    // Validate before anything reaches the media store.
    let content = chirps::validate_content(form.text("content"), true)?;
    let media = state.media.upload_all(form.take_files("media")).await?;

    let created = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| chirps::create(&conn, &principal.id, &content, &media));

    match created {
        Ok(chirp) => {
            tracing::info!(
                chirp_id = %chirp.id,
                author = %principal.username,
                media = chirp.media.len(),
                "Chirp created"
            );
            Ok(ApiResponse::created("Chirp created successfully", chirp))
        }
        Err(e) => {
            state.media.compensate(&media).await;
            Err(e)
        }
    }
}

async fn toggle_like(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<LikeState>> {
    let conn = state.db.get()?;
    let like = chirps::toggle_like(&conn, &principal.id, &id)?;
    let message = if like.liked_by_me {
        "Chirp liked"
    } else {
        "Chirp unliked"
    };
    Ok(ApiResponse::ok(message, like))
}

/// POST /chirps/{id}/rechirp. The body is optional; when present it is
/// JSON `{content}` used as the rechirp caption.
async fn toggle_rechirp(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<ApiResponse<Chirp>> {
    let caption = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<ContentRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?
            .content
    };

    let conn = state.db.get()?;
    match chirps::toggle_rechirp(&conn, &principal.id, &id, caption.as_deref())? {
        RechirpOutcome::Created(chirp) => Ok(ApiResponse::created("Rechirped successfully", chirp)),
        RechirpOutcome::Removed => Ok(ApiResponse::with_status(
            StatusCode::OK,
            "Rechirp removed",
            None,
        )),
    }
}

async fn delete_chirp(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    let deleted = {
        let conn = state.db.get()?;
        chirps::delete(&conn, &principal.id, &id)?
    };

    if deleted.was_rechirp {
        return Ok(ApiResponse::message(StatusCode::OK, "Rechirp deleted successfully"));
    }

    let failed = state.media.remove_all(&deleted.storage_ids).await;
    tracing::info!(
        chirp_id = %id,
        comments = deleted.comments_removed,
        media = deleted.storage_ids.len(),
        failed,
        "Chirp deleted"
    );

    Ok(ApiResponse::message(StatusCode::OK, "Chirp deleted successfully"))
}

async fn add_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    payload: Result<Json<ContentRequest>, JsonRejection>,
) -> AppResult<ApiResponse<CommentView>> {
    let Json(req) = payload?;
    let conn = state.db.get()?;
    let comment = comments::add(&conn, &principal.id, &id, req.content.as_deref())?;
    Ok(ApiResponse::created("Comment added successfully", comment))
}

async fn list_comments(
    State(state): State<AppState>,
    _principal: Principal,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<ApiResponse<CommentPage>> {
    let page = Page::from(query);
    let conn = state.db.get()?;
    let (comments, total) = comments::list(&conn, &id, page)?;
    Ok(ApiResponse::ok(
        "Comments fetched successfully",
        CommentPage {
            comments,
            pagination: page.meta(total),
        },
    ))
}

async fn delete_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(comment_id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    let conn = state.db.get()?;
    comments::delete(&conn, &principal.id, &comment_id)?;
    Ok(ApiResponse::message(StatusCode::OK, "Comment deleted successfully"))
}
