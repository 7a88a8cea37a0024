pub mod cookies;
pub mod handlers;
pub mod password;
pub mod tokens;

use axum::http::{header, HeaderName};
use axum::response::AppendHeaders;
use rusqlite::Connection;

use crate::accounts;
use crate::config::Config;
use crate::error::AppResult;

use self::tokens::TokenPair;

pub type CookieHeaders = AppendHeaders<[(HeaderName, String); 2]>;

/// Issue a fresh token pair and persist its refresh token as the user's
/// only live one. Any previously issued refresh token stops working.
pub fn start_session(conn: &Connection, user_id: &str, config: &Config) -> AppResult<TokenPair> {
    let pair = tokens::issue_pair(user_id, config)?;
    accounts::set_refresh_token(conn, user_id, Some(&pair.refresh))?;
    Ok(pair)
}

pub fn session_cookies(pair: &TokenPair, config: &Config) -> CookieHeaders {
    AppendHeaders([
        (header::SET_COOKIE, cookies::access_cookie(&pair.access, config)),
        (header::SET_COOKIE, cookies::refresh_cookie(&pair.refresh, config)),
    ])
}

pub fn cleared_cookies(config: &Config) -> CookieHeaders {
    AppendHeaders([
        (header::SET_COOKIE, cookies::clear_access_cookie(config)),
        (header::SET_COOKIE, cookies::clear_refresh_cookie(config)),
    ])
}
