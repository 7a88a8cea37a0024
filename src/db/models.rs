use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "video" => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }

    /// Map an upload's declared MIME type to a media kind.
    pub fn from_mime(mime: &str) -> AppResult<Self> {
        match mime {
            "image/jpeg" | "image/png" | "image/gif" => Ok(MediaKind::Image),
            "video/mp4" | "video/quicktime" => Ok(MediaKind::Video),
            other => Err(AppError::BadRequest(format!(
                "Unsupported file type: {}",
                other
            ))),
        }
    }
}

/// A file held by the external media store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMedia {
    pub name: String,
    pub kind: MediaKind,
    pub url: String,
    pub storage_id: String,
}

/// Full user row. Never serialized to clients; see [`PublicUser`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub password_hash: String,
    pub avatar: Option<StoredMedia>,
    pub role: Role,
    pub refresh_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub const USER_COLUMNS: &str = "id, full_name, username, email, bio, password_hash, \
     avatar_name, avatar_type, avatar_url, avatar_storage_id, role, refresh_token, \
     created_at, updated_at";

impl User {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            full_name: row.get(1)?,
            username: row.get(2)?,
            email: row.get(3)?,
            bio: row.get(4)?,
            password_hash: row.get(5)?,
            avatar: avatar_from_columns(row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?),
            role: Role::parse(&row.get::<_, String>(10)?),
            refresh_token: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

pub fn avatar_from_columns(
    name: Option<String>,
    kind: Option<String>,
    url: Option<String>,
    storage_id: Option<String>,
) -> Option<StoredMedia> {
    match (url, storage_id) {
        (Some(url), Some(storage_id)) => Some(StoredMedia {
            name: name.unwrap_or_default(),
            kind: kind.as_deref().map(MediaKind::parse).unwrap_or(MediaKind::Image),
            url,
            storage_id,
        }),
        _ => None,
    }
}

/// Sanitized user: no password hash, no refresh token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub avatar: Option<StoredMedia>,
    pub role: Role,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            full_name: u.full_name,
            username: u.username,
            email: u.email,
            bio: u.bio,
            avatar: u.avatar,
            role: u.role,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Minimal author/profile snippet embedded in feeds and lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnippet {
    pub full_name: String,
    pub username: String,
    pub avatar: Option<StoredMedia>,
}

impl UserSnippet {
    /// Read a snippet from six consecutive columns starting at `start`:
    /// full_name, username, avatar_name, avatar_type, avatar_url, avatar_storage_id.
    pub fn from_columns(row: &rusqlite::Row<'_>, start: usize) -> rusqlite::Result<Self> {
        Ok(UserSnippet {
            full_name: row.get(start)?,
            username: row.get(start + 1)?,
            avatar: avatar_from_columns(
                row.get(start + 2)?,
                row.get(start + 3)?,
                row.get(start + 4)?,
                row.get(start + 5)?,
            ),
        })
    }
}

/// Column list matching [`UserSnippet::from_columns`] for a table alias.
pub fn snippet_columns(alias: &str) -> String {
    format!(
        "{a}.full_name, {a}.username, {a}.avatar_name, {a}.avatar_type, {a}.avatar_url, {a}.avatar_storage_id",
        a = alias
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chirp {
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub media: Vec<StoredMedia>,
    pub original_id: Option<String>,
    pub is_rechirp: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub chirp_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
}
