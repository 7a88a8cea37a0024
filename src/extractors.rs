use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::accounts;
use crate::auth::cookies::{get_cookie_value, ACCESS_COOKIE};
use crate::auth::tokens::{self, TokenKind};
use crate::db::models::{Role, User};
use crate::error::AppError;
use crate::state::AppState;

/// The authenticated caller. Passed explicitly into every store call that
/// acts on someone's behalf.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Principal {
            id: user.id.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
        }
    }
}

/// Requires a valid access token, from the `accessToken` cookie or an
/// `Authorization: Bearer` header.
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_access_token(parts).ok_or_else(|| {
            AppError::Unauthorized("Unauthorized: Access token is required but missing.".into())
        })?;

        let claims = tokens::verify(TokenKind::Access, token, &state.config).map_err(|e| {
            tracing::debug!("access token rejected: {}", e);
            AppError::Forbidden("Invalid or expired access token".into())
        })?;

        let conn = state.db.get()?;
        let user = accounts::find_by_id(&conn, &claims.sub)?
            .ok_or_else(|| AppError::NotFound("User does not exist".into()))?;

        Ok(Principal::from(&user))
    }
}

fn extract_access_token(parts: &Parts) -> Option<&str> {
    if let Some(token) = get_cookie_value(&parts.headers, ACCESS_COOKIE) {
        return Some(token);
    }
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn cookie_wins_over_bearer() {
        let p = parts(&[
            ("cookie", "theme=dark; accessToken=from-cookie"),
            ("authorization", "Bearer from-header"),
        ]);
        assert_eq!(extract_access_token(&p), Some("from-cookie"));
    }

    #[test]
    fn bearer_is_a_fallback() {
        let p = parts(&[("authorization", "Bearer abc.def")]);
        assert_eq!(extract_access_token(&p), Some("abc.def"));
    }

    #[test]
    fn nothing_usable() {
        assert_eq!(extract_access_token(&parts(&[])), None);
        assert_eq!(extract_access_token(&parts(&[("cookie", "accessToken=")])), None);
        assert_eq!(extract_access_token(&parts(&[("authorization", "Basic xyz")])), None);
        assert_eq!(extract_access_token(&parts(&[("authorization", "Bearer ")])), None);
    }
}
