use std::collections::HashMap;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use crate::content::chirps;
use crate::db::models::{snippet_columns, Comment, UserSnippet};
use crate::db::{new_id, now_timestamp};
use crate::error::{AppError, AppResult};
use crate::response::Page;

pub const MAX_COMMENT_LEN: usize = 500;

/// How many recent comments a feed item previews.
pub const PREVIEW_COMMENTS: usize = 3;

/// A comment with its author resolved for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub chirp_id: String,
    pub content: String,
    pub created_at: String,
    pub author: UserSnippet,
}

fn view_select() -> String {
    format!(
        "SELECT cm.id, cm.chirp_id, cm.content, cm.created_at, {}
         FROM comments cm JOIN users u ON u.id = cm.author_id",
        snippet_columns("u")
    )
}

fn view_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentView> {
    Ok(CommentView {
        id: row.get(0)?,
        chirp_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        author: UserSnippet::from_columns(row, 4)?,
    })
}

pub fn add(
    conn: &Connection,
    author_id: &str,
    chirp_id: &str,
    content: Option<&str>,
) -> AppResult<CommentView> {
    let content = content.map(str::trim).unwrap_or_default();
    if content.is_empty() {
        return Err(AppError::BadRequest("Comment content is required".into()));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::BadRequest(format!(
            "Comment cannot exceed {} characters",
            MAX_COMMENT_LEN
        )));
    }
    chirps::require(conn, chirp_id)?;

    let comment = Comment {
        id: new_id(),
        chirp_id: chirp_id.to_string(),
        author_id: author_id.to_string(),
        content: content.to_string(),
        created_at: now_timestamp(),
    };
    conn.execute(
        "INSERT INTO comments (id, chirp_id, author_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            comment.id,
            comment.chirp_id,
            comment.author_id,
            comment.content,
            comment.created_at
        ],
    )?;

    find_view(conn, &comment.id)?
        .ok_or_else(|| AppError::Internal("comment vanished after insert".into()))
}

pub fn find_view(conn: &Connection, comment_id: &str) -> AppResult<Option<CommentView>> {
    let sql = format!("{} WHERE cm.id = ?1", view_select());
    Ok(conn
        .query_row(&sql, params![comment_id], view_from_row)
        .optional()?)
}

/// Delete a comment the requester wrote. Someone else's comment and a
/// missing comment are indistinguishable to the caller.
pub fn delete(conn: &Connection, requester_id: &str, comment_id: &str) -> AppResult<()> {
    let removed = conn.execute(
        "DELETE FROM comments WHERE id = ?1 AND author_id = ?2",
        params![comment_id, requester_id],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound("Comment not found".into()));
    }
    Ok(())
}

pub fn count_for(conn: &Connection, chirp_id: &str) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE chirp_id = ?1",
        params![chirp_id],
        |r| r.get(0),
    )?)
}

/// A chirp's comments, oldest first, with the total for pagination.
pub fn list(conn: &Connection, chirp_id: &str, page: Page) -> AppResult<(Vec<CommentView>, i64)> {
    chirps::require(conn, chirp_id)?;

    let sql = format!(
        "{} WHERE cm.chirp_id = ?1
         ORDER BY cm.created_at ASC, cm.rowid ASC
         LIMIT ?2 OFFSET ?3",
        view_select()
    );
    let mut stmt = conn.prepare(&sql)?;
    let comments = stmt
        .query_map(params![chirp_id, page.limit, page.offset()], view_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((comments, count_for(conn, chirp_id)?))
}

/// Up to `per_chirp` newest comments for each chirp, newest first.
pub fn latest_for(
    conn: &Connection,
    chirp_ids: &[String],
    per_chirp: usize,
) -> AppResult<HashMap<String, Vec<CommentView>>> {
    let mut out: HashMap<String, Vec<CommentView>> = HashMap::new();
    if chirp_ids.is_empty() || per_chirp == 0 {
        return Ok(out);
    }

    let placeholders = vec!["?"; chirp_ids.len()].join(", ");
    let sql = format!(
        "SELECT id, chirp_id, content, created_at,
                full_name, username, avatar_name, avatar_type, avatar_url, avatar_storage_id
         FROM (
             SELECT cm.id, cm.chirp_id, cm.content, cm.created_at, {cols},
                    ROW_NUMBER() OVER (
                        PARTITION BY cm.chirp_id ORDER BY cm.created_at DESC, cm.rowid DESC
                    ) AS seq
             FROM comments cm JOIN users u ON u.id = cm.author_id
             WHERE cm.chirp_id IN ({placeholders})
         )
         WHERE seq <= {limit}
         ORDER BY chirp_id, seq",
        cols = snippet_columns("u"),
        placeholders = placeholders,
        limit = per_chirp,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(chirp_ids.iter()), view_from_row)?;
    for row in rows {
        let comment = row?;
        out.entry(comment.chirp_id.clone()).or_default().push(comment);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::testing::seed_user;
    use crate::content::chirps::testing::seed_chirp;
    use crate::db::test_connection;

    #[test]
    fn blank_comment_is_rejected() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let chirp = seed_chirp(&conn, &a.id, "hi");
        for blank in [None, Some(""), Some("  \n ")] {
            let err = add(&conn, &a.id, &chirp.id, blank).unwrap_err();
            assert_eq!(err.to_string(), "Comment content is required");
        }
    }

    #[test]
    fn comment_on_missing_chirp_is_404() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let err = add(&conn, &a.id, "ghost", Some("hello")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn add_returns_author_snippet() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let chirp = seed_chirp(&conn, &a.id, "hi");
        let view = add(&conn, &b.id, &chirp.id, Some("  nice  ")).unwrap();
        assert_eq!(view.content, "nice");
        assert_eq!(view.author.username, "b");
        assert_eq!(view.author.full_name, "B");
    }

    #[test]
    fn only_author_can_delete() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let chirp = seed_chirp(&conn, &a.id, "hi");
        let view = add(&conn, &b.id, &chirp.id, Some("mine")).unwrap();

        // Even the chirp's author cannot remove someone else's comment
        let err = delete(&conn, &a.id, &view.id).unwrap_err();
        assert_eq!(err.to_string(), "Comment not found");

        delete(&conn, &b.id, &view.id).unwrap();
        assert_eq!(count_for(&conn, &chirp.id).unwrap(), 0);
        assert!(delete(&conn, &b.id, &view.id).is_err());
    }

    #[test]
    fn list_is_oldest_first_and_paginated() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let chirp = seed_chirp(&conn, &a.id, "hi");
        for i in 0..5 {
            add(&conn, &a.id, &chirp.id, Some(&format!("c{i}"))).unwrap();
        }

        let (first, total) = list(&conn, &chirp.id, Page::new(1, 2)).unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.iter().map(|c| c.content.as_str()).collect::<Vec<_>>(), ["c0", "c1"]);

        let (last, _) = list(&conn, &chirp.id, Page::new(3, 2)).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].content, "c4");
    }

    #[test]
    fn latest_previews_are_capped_per_chirp() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let busy = seed_chirp(&conn, &a.id, "busy");
        let quiet = seed_chirp(&conn, &a.id, "quiet");
        let silent = seed_chirp(&conn, &a.id, "silent");
        for i in 0..5 {
            add(&conn, &a.id, &busy.id, Some(&format!("b{i}"))).unwrap();
        }
        add(&conn, &a.id, &quiet.id, Some("q0")).unwrap();

        let ids = vec![busy.id.clone(), quiet.id.clone(), silent.id.clone()];
        let latest = latest_for(&conn, &ids, PREVIEW_COMMENTS).unwrap();

        let busy_preview: Vec<_> = latest[&busy.id].iter().map(|c| c.content.as_str()).collect();
        assert_eq!(busy_preview, ["b4", "b3", "b2"]);
        assert_eq!(latest[&quiet.id].len(), 1);
        assert!(!latest.contains_key(&silent.id));
    }
}
