//! User records: creation, lookup, credential rotation, profile edits, removal.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{StoredMedia, User, USER_COLUMNS};
use crate::db::{new_id, now_timestamp};
use crate::error::{conflict_on_unique, AppError, AppResult};

pub const MAX_BIO_LEN: usize = 160;

pub struct NewUser<'a> {
    pub full_name: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub bio: &'a str,
    pub password_hash: &'a str,
    pub avatar: &'a StoredMedia,
}

/// Usernames and emails are stored trimmed and lower-cased.
pub fn normalize_handle(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn validate_bio(bio: &str) -> AppResult<()> {
    if bio.chars().count() > MAX_BIO_LEN {
        return Err(AppError::BadRequest(format!(
            "Bio cannot exceed {} characters",
            MAX_BIO_LEN
        )));
    }
    Ok(())
}

pub fn insert(conn: &Connection, user: &NewUser<'_>) -> AppResult<User> {
    let id = new_id();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO users (id, full_name, username, email, bio, password_hash,
                            avatar_name, avatar_type, avatar_url, avatar_storage_id,
                            role, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'user', ?11, ?11)",
        params![
            id,
            user.full_name,
            user.username,
            user.email,
            user.bio,
            user.password_hash,
            user.avatar.name,
            user.avatar.kind.as_str(),
            user.avatar.url,
            user.avatar.storage_id,
            now
        ],
    )
    .map_err(|e| conflict_on_unique(e, "User already exists"))?;

    find_by_id(conn, &id)?.ok_or_else(|| AppError::Internal("inserted user vanished".into()))
}

pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, params![id], User::from_row).optional()?)
}

pub fn find_by_username(conn: &Connection, username: &str) -> AppResult<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
    Ok(conn
        .query_row(&sql, params![normalize_handle(username)], User::from_row)
        .optional()?)
}

/// Resolve a username, failing with 404 when absent.
pub fn require_by_username(conn: &Connection, username: &str) -> AppResult<User> {
    find_by_username(conn, username)?.ok_or_else(|| AppError::NotFound("User not found".into()))
}

/// Login lookup: match on whichever of username / email was supplied.
pub fn find_by_login(
    conn: &Connection,
    username: Option<&str>,
    email: Option<&str>,
) -> AppResult<Option<User>> {
    let username = username.map(normalize_handle).filter(|s| !s.is_empty());
    let email = email.map(normalize_handle).filter(|s| !s.is_empty());
    let sql = format!(
        "SELECT {} FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
        USER_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![username, email], User::from_row)
        .optional()?)
}

pub fn exists_with(conn: &Connection, email: &str, username: &str) -> AppResult<bool> {
    Ok(conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE email = ?1 OR username = ?2",
        params![email, username],
        |r| r.get(0),
    )?)
}

/// Persist (or clear) the single live refresh token for a user.
pub fn set_refresh_token(conn: &Connection, id: &str, token: Option<&str>) -> AppResult<()> {
    conn.execute(
        "UPDATE users SET refresh_token = ?2 WHERE id = ?1",
        params![id, token],
    )?;
    Ok(())
}

pub fn set_password(conn: &Connection, id: &str, password_hash: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, password_hash, now_timestamp()],
    )?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<StoredMedia>,
}

/// Apply a partial profile edit. Returns the updated user and the avatar it replaced.
pub fn update_profile(
    conn: &Connection,
    id: &str,
    update: ProfileUpdate,
) -> AppResult<(User, Option<StoredMedia>)> {
    let current =
        find_by_id(conn, id)?.ok_or_else(|| AppError::NotFound("User does not exist".into()))?;

    let full_name = update.full_name.unwrap_or(current.full_name);
    let bio = update.bio.unwrap_or(current.bio);
    let (avatar, replaced) = match update.avatar {
        Some(new_avatar) => (Some(new_avatar), current.avatar),
        None => (current.avatar, None),
    };

    conn.execute(
        "UPDATE users SET full_name = ?2, bio = ?3,
                avatar_name = ?4, avatar_type = ?5, avatar_url = ?6, avatar_storage_id = ?7,
                updated_at = ?8
         WHERE id = ?1",
        params![
            id,
            full_name,
            bio,
            avatar.as_ref().map(|a| a.name.clone()),
            avatar.as_ref().map(|a| a.kind.as_str()),
            avatar.as_ref().map(|a| a.url.clone()),
            avatar.as_ref().map(|a| a.storage_id.clone()),
            now_timestamp()
        ],
    )?;

    let user =
        find_by_id(conn, id)?.ok_or_else(|| AppError::NotFound("User does not exist".into()))?;
    Ok((user, replaced))
}

/// Storage ids of every external file the user owns: avatar plus chirp media.
pub fn owned_storage_ids(conn: &Connection, id: &str) -> AppResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT avatar_storage_id FROM users WHERE id = ?1 AND avatar_storage_id IS NOT NULL
         UNION ALL
         SELECT m.storage_id FROM chirp_media m
         JOIN chirps c ON c.id = m.chirp_id
         WHERE c.author_id = ?1",
    )?;
    let ids = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Hard-delete a user. Chirps, reshares, likes, comments and follow edges
/// go with it through the schema's cascades.
pub fn delete(conn: &Connection, id: &str) -> AppResult<bool> {
    let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}
