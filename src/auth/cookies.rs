use axum::http::{header, HeaderMap};

use crate::config::Config;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn cookie(name: &str, value: &str, max_age_secs: i64, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly{}; SameSite=Strict; Path=/; Max-Age={}",
        name, value, secure, max_age_secs
    )
}

pub fn access_cookie(token: &str, config: &Config) -> String {
    cookie(
        ACCESS_COOKIE,
        token,
        config.auth.access_token_minutes * 60,
        config.auth.secure_cookies,
    )
}

pub fn refresh_cookie(token: &str, config: &Config) -> String {
    cookie(
        REFRESH_COOKIE,
        token,
        config.auth.refresh_token_days * 24 * 3600,
        config.auth.secure_cookies,
    )
}

pub fn clear_access_cookie(config: &Config) -> String {
    cookie(ACCESS_COOKIE, "", 0, config.auth.secure_cookies)
}

pub fn clear_refresh_cookie(config: &Config) -> String {
    cookie(REFRESH_COOKIE, "", 0, config.auth.secure_cookies)
}

pub fn get_cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}
