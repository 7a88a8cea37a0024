//! Directed follow edges between users.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::models::{snippet_columns, UserSnippet};
use crate::db::now_timestamp;
use crate::error::{AppError, AppResult};
use crate::response::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowState {
    pub following: bool,
    pub followers_count: i64,
}

/// Flip the (follower -> followee) edge.
///
/// Delete-first, then insert-or-ignore: under a double submission the
/// primary key absorbs the duplicate instead of creating a second edge.
pub fn toggle_follow(conn: &Connection, follower_id: &str, followee_id: &str) -> AppResult<FollowState> {
    if follower_id == followee_id {
        return Err(AppError::BadRequest("You cannot follow yourself.".into()));
    }

    let removed = conn.execute(
        "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
        params![follower_id, followee_id],
    )?;

    if removed == 0 {
        conn.execute(
            "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at) VALUES (?1, ?2, ?3)",
            params![follower_id, followee_id, now_timestamp()],
        )?;
    }

    Ok(FollowState {
        following: removed == 0,
        followers_count: followers_count(conn, followee_id)?,
    })
}

pub fn is_following(conn: &Connection, follower_id: &str, followee_id: &str) -> AppResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2)",
        params![follower_id, followee_id],
        |r| r.get(0),
    )?)
}

pub fn followers_count(conn: &Connection, user_id: &str) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE followee_id = ?1",
        params![user_id],
        |r| r.get(0),
    )?)
}

pub fn following_count(conn: &Connection, user_id: &str) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE follower_id = ?1",
        params![user_id],
        |r| r.get(0),
    )?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Users who follow the subject
    Followers,
    /// Users the subject follows
    Following,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEntry {
    #[serde(flatten)]
    pub user: UserSnippet,
    /// Whether the viewer follows this listed user
    pub is_following: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectionPage {
    pub users: Vec<FollowEntry>,
    pub total: i64,
}

/// One page of a user's followers or followings, newest edge first.
pub fn list_connections(
    conn: &Connection,
    subject_id: &str,
    viewer_id: &str,
    direction: Direction,
    page: Page,
) -> AppResult<ConnectionPage> {
    let (match_col, other_col, total) = match direction {
        Direction::Followers => ("followee_id", "follower_id", followers_count(conn, subject_id)?),
        Direction::Following => ("follower_id", "followee_id", following_count(conn, subject_id)?),
    };

    let sql = format!(
        "SELECT {cols},
                EXISTS(SELECT 1 FROM follows v WHERE v.follower_id = ?2 AND v.followee_id = u.id)
         FROM follows f
         JOIN users u ON u.id = f.{other}
         WHERE f.{matched} = ?1
         ORDER BY f.created_at DESC, f.rowid DESC
         LIMIT ?3 OFFSET ?4",
        cols = snippet_columns("u"),
        other = other_col,
        matched = match_col,
    );

    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(
            params![subject_id, viewer_id, page.limit, page.offset()],
            |row| {
                Ok(FollowEntry {
                    user: UserSnippet::from_columns(row, 0)?,
                    is_following: row.get(6)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ConnectionPage { users, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::testing::seed_user;
    use crate::db::test_connection;

    #[test]
    fn self_follow_always_fails() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let err = toggle_follow(&conn, &a.id, &a.id).unwrap_err();
        assert_eq!(err.to_string(), "You cannot follow yourself.");
    }

    #[test]
    fn toggling_twice_restores_state() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");

        let first = toggle_follow(&conn, &a.id, &b.id).unwrap();
        assert_eq!(first, FollowState { following: true, followers_count: 1 });
        assert!(is_following(&conn, &a.id, &b.id).unwrap());
        assert!(!is_following(&conn, &b.id, &a.id).unwrap());

        let second = toggle_follow(&conn, &a.id, &b.id).unwrap();
        assert_eq!(second, FollowState { following: false, followers_count: 0 });
        assert!(!is_following(&conn, &a.id, &b.id).unwrap());
    }

    #[test]
    fn duplicate_insert_is_absorbed() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        for _ in 0..2 {
            conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at) VALUES (?1, ?2, 't')",
                params![a.id, b.id],
            )
            .unwrap();
        }
        assert_eq!(followers_count(&conn, &b.id).unwrap(), 1);
    }

    #[test]
    fn mutual_follow_listing_reports_viewer_state() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        toggle_follow(&conn, &a.id, &b.id).unwrap();
        toggle_follow(&conn, &b.id, &a.id).unwrap();

        // b's followers, viewed by a
        let page = list_connections(&conn, &b.id, &a.id, Direction::Followers, Page::default())
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.users[0].user.username, "a");
        assert!(!page.users[0].is_following, "a does not follow itself");

        // a's following, viewed by b
        let page = list_connections(&conn, &a.id, &b.id, Direction::Following, Page::default())
            .unwrap();
        assert_eq!(page.users[0].user.username, "b");
        assert!(!page.users[0].is_following);
    }

    #[test]
    fn listing_paginates() {
        let conn = test_connection();
        let star = seed_user(&conn, "star");
        for i in 0..5 {
            let fan = seed_user(&conn, &format!("fan{i}"));
            toggle_follow(&conn, &fan.id, &star.id).unwrap();
        }
        let viewer = seed_user(&conn, "viewer");

        let first = list_connections(&conn, &star.id, &viewer.id, Direction::Followers, Page::new(1, 2))
            .unwrap();
        let third = list_connections(&conn, &star.id, &viewer.id, Direction::Followers, Page::new(3, 2))
            .unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.users.len(), 2);
        assert_eq!(first.users[0].user.username, "fan4");
        assert_eq!(third.users.len(), 1);
        assert_eq!(third.users[0].user.username, "fan0");
    }

    #[test]
    fn deleting_user_drops_edges() {
        let conn = test_connection();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        toggle_follow(&conn, &a.id, &b.id).unwrap();
        crate::accounts::delete(&conn, &a.id).unwrap();
        assert_eq!(followers_count(&conn, &b.id).unwrap(), 0);
    }
}
