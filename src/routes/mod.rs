pub mod auth;
pub mod chirps;
pub mod users;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::content::chirps::MAX_MEDIA_PER_CHIRP;
use crate::error::AppError;
use crate::state::AppState;

/// The full HTTP surface with its layers applied.
pub fn app(state: AppState) -> Router {
    // Room for every file of the largest form plus its text fields.
    let body_limit = state.config.media.max_upload_bytes * (MAX_MEDIA_PER_CHIRP + 1);

    Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(chirps::router())
        .method_not_allowed_fallback(|| async { AppError::MethodNotAllowed })
        .nest_service("/media", ServeDir::new(state.config.media_local_dir()))
        .fallback(|| async { AppError::NotFound("Route not found".into()) })
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&state.config.server.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = match origin {
        "*" => AllowOrigin::mirror_request(),
        exact => match HeaderValue::from_str(exact) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!("Invalid CORS origin {:?}, mirroring request origin", exact);
                AllowOrigin::mirror_request()
            }
        },
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
