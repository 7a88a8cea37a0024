//! Read model for chirp timelines.
//!
//! A page of chirps is chosen first, then enriched: author and original
//! snippets come from joins, counts from correlated subqueries, media and
//! comment previews from one batched query each. Every enrichment is
//! bounded by the page size, not by the size of the table.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::content::comments::{self, CommentView, PREVIEW_COMMENTS};
use crate::content::media_for;
use crate::db::models::{snippet_columns, StoredMedia, UserSnippet};
use crate::error::AppResult;
use crate::response::{Page, Pagination};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Global,
    /// Chirps and rechirps authored by one user.
    Author(&'a str),
}

impl<'a> Scope<'a> {
    fn author(&self) -> Option<&'a str> {
        match self {
            Scope::Global => None,
            Scope::Author(id) => Some(*id),
        }
    }
}

/// The chirp a rechirp points at.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalChirp {
    pub id: String,
    pub content: String,
    pub media: Vec<StoredMedia>,
    pub created_at: String,
    pub author: UserSnippet,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: String,
    pub content: String,
    pub media: Vec<StoredMedia>,
    pub is_rechirp: bool,
    pub created_at: String,
    pub author: UserSnippet,
    pub original: Option<OriginalChirp>,
    pub comments_count: i64,
    pub likes_count: i64,
    pub liked_by_me: bool,
    pub latest_comments: Vec<CommentView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub chirps: Vec<FeedItem>,
    pub pagination: Pagination,
}

pub fn total(conn: &Connection, scope: Scope<'_>) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM chirps WHERE ?1 IS NULL OR author_id = ?1",
        params![scope.author()],
        |r| r.get(0),
    )?)
}

/// One page of chirps, newest first, as seen by `viewer_id`.
pub fn load(conn: &Connection, viewer_id: &str, scope: Scope<'_>, page: Page) -> AppResult<FeedPage> {
    let sql = format!(
        "SELECT c.id, c.content, c.is_rechirp, c.created_at, {author},
                o.id, o.content, o.created_at, {original_author},
                (SELECT COUNT(*) FROM comments cm WHERE cm.chirp_id = c.id),
                (SELECT COUNT(*) FROM likes l WHERE l.chirp_id = c.id),
                EXISTS(SELECT 1 FROM likes l WHERE l.chirp_id = c.id AND l.user_id = ?1)
         FROM (
             SELECT rowid AS seq, id, author_id, content, original_id, is_rechirp, created_at
             FROM chirps
             WHERE ?2 IS NULL OR author_id = ?2
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3 OFFSET ?4
         ) c
         JOIN users a ON a.id = c.author_id
         LEFT JOIN chirps o ON o.id = c.original_id
         LEFT JOIN users ou ON ou.id = o.author_id
         ORDER BY c.created_at DESC, c.seq DESC",
        author = snippet_columns("a"),
        original_author = snippet_columns("ou"),
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut items = stmt
        .query_map(
            params![viewer_id, scope.author(), page.limit, page.offset()],
            |row| {
                let original_id: Option<String> = row.get(10)?;
                // An original whose author row is gone is treated as missing.
                let original_author: Option<String> = row.get(14)?;
                let original = match (original_id, original_author) {
                    (Some(id), Some(_)) => Some(OriginalChirp {
                        id,
                        content: row.get(11)?,
                        media: Vec::new(),
                        created_at: row.get(12)?,
                        author: UserSnippet::from_columns(row, 13)?,
                    }),
                    _ => None,
                };

                Ok(FeedItem {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    media: Vec::new(),
                    is_rechirp: row.get(2)?,
                    created_at: row.get(3)?,
                    author: UserSnippet::from_columns(row, 4)?,
                    original,
                    comments_count: row.get(19)?,
                    likes_count: row.get(20)?,
                    liked_by_me: row.get(21)?,
                    latest_comments: Vec::new(),
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let page_ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    let mut media_ids = page_ids.clone();
    media_ids.extend(items.iter().filter_map(|i| i.original.as_ref().map(|o| o.id.clone())));

    let mut media = media_for(conn, &media_ids)?;
    let mut previews = comments::latest_for(conn, &page_ids, PREVIEW_COMMENTS)?;

    for item in &mut items {
        if let Some(original) = item.original.as_mut() {
            original.media = media.get(&original.id).cloned().unwrap_or_default();
        }
        item.media = media.remove(&item.id).unwrap_or_default();
        item.latest_comments = previews.remove(&item.id).unwrap_or_default();
    }

    Ok(FeedPage {
        chirps: items,
        pagination: page.meta(total(conn, scope)?),
    })
}
