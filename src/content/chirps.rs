use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::content::media_for;
use crate::db::models::{snippet_columns, Chirp, StoredMedia, UserSnippet};
use crate::db::{new_id, now_timestamp};
use crate::error::{AppError, AppResult};

pub const MAX_CHIRP_LEN: usize = 280;
pub const MAX_MEDIA_PER_CHIRP: usize = 4;

/// Trim and length-check chirp text. Blank text is only allowed when
/// `required` is false (rechirp captions), in which case it becomes "".
pub fn validate_content(raw: Option<&str>, required: bool) -> AppResult<String> {
    let content = raw.map(str::trim).unwrap_or_default();
    if content.is_empty() && required {
        return Err(AppError::BadRequest("Chirp content is required".into()));
    }
    if content.chars().count() > MAX_CHIRP_LEN {
        return Err(AppError::BadRequest(format!(
            "Chirp cannot exceed {} characters",
            MAX_CHIRP_LEN
        )));
    }
    Ok(content.to_string())
}

pub fn find(conn: &Connection, id: &str) -> AppResult<Option<Chirp>> {
    let chirp = conn
        .query_row(
            "SELECT id, author_id, content, original_id, is_rechirp, created_at
             FROM chirps WHERE id = ?1",
            params![id],
            |row| {
                Ok(Chirp {
                    id: row.get(0)?,
                    author_id: row.get(1)?,
                    content: row.get(2)?,
                    media: Vec::new(),
                    original_id: row.get(3)?,
                    is_rechirp: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()?;

    match chirp {
        Some(mut chirp) => {
            chirp.media = media_for(conn, std::slice::from_ref(&chirp.id))?
                .remove(&chirp.id)
                .unwrap_or_default();
            Ok(Some(chirp))
        }
        None => Ok(None),
    }
}

pub fn require(conn: &Connection, id: &str) -> AppResult<Chirp> {
    find(conn, id)?.ok_or_else(|| AppError::NotFound("Chirp not found".into()))
}

/// Insert an original chirp together with its already-uploaded media.
pub fn create(
    conn: &Connection,
    author_id: &str,
    content: &str,
    media: &[StoredMedia],
) -> AppResult<Chirp> {
    let id = new_id();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO chirps (id, author_id, content, is_rechirp, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![id, author_id, content, now_timestamp()],
    )?;
    for (position, m) in media.iter().enumerate() {
        tx.execute(
            "INSERT INTO chirp_media (chirp_id, position, name, kind, url, storage_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, position as i64, m.name, m.kind.as_str(), m.url, m.storage_id],
        )?;
    }
    tx.commit()?;

    require(conn, &id)
}

#[derive(Debug)]
pub enum RechirpOutcome {
    Created(Chirp),
    Removed,
}

/// Rechirp toggle. The target is resolved to its ultimate original first,
/// so a rechirp never points at another rechirp.
pub fn toggle_rechirp(
    conn: &Connection,
    user_id: &str,
    target_id: &str,
    caption: Option<&str>,
) -> AppResult<RechirpOutcome> {
    let target = require(conn, target_id)?;
    let original_id = match (target.is_rechirp, target.original_id) {
        (false, _) => target.id,
        (true, Some(original_id)) => original_id,
        // The rechirp outlived its original; there is nothing left to share.
        (true, None) => return Err(AppError::NotFound("Original chirp not found".into())),
    };

    let removed = conn.execute(
        "DELETE FROM chirps WHERE author_id = ?1 AND original_id = ?2",
        params![user_id, original_id],
    )?;
    if removed > 0 {
        return Ok(RechirpOutcome::Removed);
    }

    let caption = validate_content(caption, false)?;
    let id = new_id();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO chirps (id, author_id, content, original_id, is_rechirp, created_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        params![id, user_id, caption, original_id, now_timestamp()],
    )?;

    if inserted == 0 {
        // A concurrent request created the rechirp first; report that one.
        let existing: String = conn.query_row(
            "SELECT id FROM chirps WHERE author_id = ?1 AND original_id = ?2",
            params![user_id, original_id],
            |r| r.get(0),
        )?;
        return Ok(RechirpOutcome::Created(require(conn, &existing)?));
    }

    Ok(RechirpOutcome::Created(require(conn, &id)?))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub chirp_id: String,
    pub total_likes: i64,
    pub liked_by_me: bool,
    pub liked_users: Vec<UserSnippet>,
}

/// Like toggle: delete-first, else insert-or-ignore against the (chirp, user) key.
pub fn toggle_like(conn: &Connection, user_id: &str, chirp_id: &str) -> AppResult<LikeState> {
    require(conn, chirp_id)?;

    let removed = conn.execute(
        "DELETE FROM likes WHERE chirp_id = ?1 AND user_id = ?2",
        params![chirp_id, user_id],
    )?;
    if removed == 0 {
        conn.execute(
            "INSERT OR IGNORE INTO likes (chirp_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![chirp_id, user_id, now_timestamp()],
        )?;
    }

    let liked_users = liked_by(conn, chirp_id)?;
    Ok(LikeState {
        chirp_id: chirp_id.to_string(),
        total_likes: liked_users.len() as i64,
        liked_by_me: removed == 0,
        liked_users,
    })
}

pub fn likes_count(conn: &Connection, chirp_id: &str) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM likes WHERE chirp_id = ?1",
        params![chirp_id],
        |r| r.get(0),
    )?)
}

fn liked_by(conn: &Connection, chirp_id: &str) -> AppResult<Vec<UserSnippet>> {
    let sql = format!(
        "SELECT {} FROM likes l JOIN users u ON u.id = l.user_id
         WHERE l.chirp_id = ?1 ORDER BY l.created_at ASC",
        snippet_columns("u")
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params![chirp_id], |row| UserSnippet::from_columns(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

#[derive(Debug, Default)]
pub struct DeletedChirp {
    pub was_rechirp: bool,
    /// External media to remove now that nothing references it.
    pub storage_ids: Vec<String>,
    pub comments_removed: usize,
}

/// Delete a chirp owned by `requester_id`.
///
/// A rechirp only loses its own record. An original loses its comments,
/// likes and media rows in one transaction; rechirps of it by other users
/// stay and lose their reference. The caller removes the returned storage
/// ids from the media store.
pub fn delete(conn: &Connection, requester_id: &str, chirp_id: &str) -> AppResult<DeletedChirp> {
    let chirp = require(conn, chirp_id)?;
    if chirp.author_id != requester_id {
        return Err(AppError::Forbidden(
            "You're not authorized to delete this chirp".into(),
        ));
    }

    if chirp.is_rechirp {
        conn.execute("DELETE FROM chirps WHERE id = ?1", params![chirp.id])?;
        return Ok(DeletedChirp {
            was_rechirp: true,
            ..Default::default()
        });
    }

    let tx = conn.unchecked_transaction()?;
    let comments_removed =
        tx.execute("DELETE FROM comments WHERE chirp_id = ?1", params![chirp.id])?;
    tx.execute("DELETE FROM chirps WHERE id = ?1", params![chirp.id])?;
    tx.commit()?;

    Ok(DeletedChirp {
        was_rechirp: false,
        storage_ids: chirp.media.into_iter().map(|m| m.storage_id).collect(),
        comments_removed,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::accounts::testing::{avatar, seed_user};
    use crate::content::comments;
    use crate::db::test_connection;

    #[test]
    fn content_rules() {
        assert!(validate_content(None, true).is_err());
        assert!(validate_content(Some("   "), true).is_err());
        assert_eq!(validate_content(Some(" hi "), true).unwrap(), "hi");
        assert_eq!(validate_content(None, false).unwrap(), "");
        assert!(validate_content(Some(&"é".repeat(280)), true).is_ok());
        assert!(validate_content(Some(&"x".repeat(281)), false).is_err());
    }

    #[test]
    fn create_keeps_media_order() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let media = vec![avatar("one"), avatar("two"), avatar("three")];
        let chirp = create(&conn, &a.id, "hello", &media).unwrap();
        let names: Vec<_> = chirp.media.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["one.png", "two.png", "three.png"]);
        assert!(!chirp.is_rechirp);
    }

    #[test]
    fn like_then_unlike() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let p1 = seed_chirp(&conn, &a.id, "hello");

        let liked = toggle_like(&conn, &b.id, &p1.id).unwrap();
        assert_eq!(liked.total_likes, 1);
        assert!(liked.liked_by_me);
        assert_eq!(liked.liked_users[0].username, "b");

        let unliked = toggle_like(&conn, &b.id, &p1.id).unwrap();
        assert_eq!(unliked.total_likes, 0);
        assert!(!unliked.liked_by_me);
        assert_eq!(likes_count(&conn, &p1.id).unwrap(), 0);
    }

    #[test]
    fn like_missing_chirp_is_404() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        assert!(matches!(
            toggle_like(&conn, &a.id, "nope").unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn rechirp_of_rechirp_points_at_original() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let c = seed_user(&conn, "c");
        let original = seed_chirp(&conn, &a.id, "root");

        let RechirpOutcome::Created(b_share) =
            toggle_rechirp(&conn, &b.id, &original.id, None).unwrap()
        else {
            panic!("expected created");
        };
        let RechirpOutcome::Created(c_share) =
            toggle_rechirp(&conn, &c.id, &b_share.id, Some("look")).unwrap()
        else {
            panic!("expected created");
        };

        assert_eq!(b_share.original_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(c_share.original_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(c_share.content, "look");
        assert!(c_share.is_rechirp);
    }

    #[test]
    fn rechirp_toggle_twice_leaves_nothing() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let original = seed_chirp(&conn, &a.id, "root");

        let RechirpOutcome::Created(share) =
            toggle_rechirp(&conn, &b.id, &original.id, None).unwrap()
        else {
            panic!("expected created");
        };
        // Toggling through the rechirp itself undoes it too
        assert!(matches!(
            toggle_rechirp(&conn, &b.id, &share.id, None).unwrap(),
            RechirpOutcome::Removed
        ));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chirps WHERE is_rechirp = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn only_author_may_delete() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let chirp = seed_chirp(&conn, &a.id, "mine");
        assert!(matches!(
            delete(&conn, &b.id, &chirp.id).unwrap_err(),
            AppError::Forbidden(_)
        ));
        assert!(matches!(
            delete(&conn, &a.id, "missing").unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn deleting_original_removes_comments_and_returns_media() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let chirp = create(&conn, &a.id, "pics", &[avatar("p1"), avatar("p2")]).unwrap();
        for i in 0..3 {
            comments::add(&conn, &b.id, &chirp.id, Some(&format!("c{i}"))).unwrap();
        }
        toggle_like(&conn, &b.id, &chirp.id).unwrap();

        let deleted = delete(&conn, &a.id, &chirp.id).unwrap();
        assert!(!deleted.was_rechirp);
        assert_eq!(deleted.comments_removed, 3);
        assert_eq!(deleted.storage_ids, ["chirp-media/p1", "chirp-media/p2"]);

        let leftovers: i64 = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM comments) + (SELECT COUNT(*) FROM likes)
                      + (SELECT COUNT(*) FROM chirps) + (SELECT COUNT(*) FROM chirp_media)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn rechirps_by_others_survive_the_original() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let c = seed_user(&conn, "c");
        let original = seed_chirp(&conn, &a.id, "root");
        let RechirpOutcome::Created(share) =
            toggle_rechirp(&conn, &b.id, &original.id, Some("my caption")).unwrap()
        else {
            panic!("expected created");
        };
        comments::add(&conn, &a.id, &share.id, Some("on the rechirp")).unwrap();
        toggle_like(&conn, &a.id, &share.id).unwrap();

        delete(&conn, &a.id, &original.id).unwrap();

        let kept = find(&conn, &share.id).unwrap().unwrap();
        assert!(kept.is_rechirp);
        assert_eq!(kept.original_id, None);
        assert_eq!(kept.content, "my caption");
        assert_eq!(comments::count_for(&conn, &share.id).unwrap(), 1);
        assert_eq!(likes_count(&conn, &share.id).unwrap(), 1);

        // Nothing left to rechirp through it
        assert!(matches!(
            toggle_rechirp(&conn, &c.id, &share.id, None).unwrap_err(),
            AppError::NotFound(_)
        ));

        // Its author can still remove it
        assert!(delete(&conn, &b.id, &share.id).unwrap().was_rechirp);
        assert!(find(&conn, &share.id).unwrap().is_none());
    }

    #[test]
    fn deleting_rechirp_keeps_original_comments() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let original = seed_chirp(&conn, &a.id, "root");
        comments::add(&conn, &a.id, &original.id, Some("first")).unwrap();
        comments::add(&conn, &b.id, &original.id, Some("second")).unwrap();
        let RechirpOutcome::Created(share) =
            toggle_rechirp(&conn, &b.id, &original.id, None).unwrap()
        else {
            panic!("expected created");
        };

        let deleted = delete(&conn, &b.id, &share.id).unwrap();
        assert!(deleted.was_rechirp);
        assert_eq!(deleted.comments_removed, 0);
        assert!(deleted.storage_ids.is_empty());
        assert!(find(&conn, &original.id).unwrap().is_some());
        assert_eq!(comments::count_for(&conn, &original.id).unwrap(), 2);
    }
}
