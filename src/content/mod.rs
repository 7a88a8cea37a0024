//! Chirps, rechirps, likes and comments.

pub mod chirps;
pub mod comments;

use std::collections::HashMap;

use rusqlite::{params_from_iter, Connection};

use crate::db::models::{MediaKind, StoredMedia};
use crate::error::AppResult;

/// Attachments for a set of chirps, keyed by chirp id, each list in upload order.
pub fn media_for(conn: &Connection, chirp_ids: &[String]) -> AppResult<HashMap<String, Vec<StoredMedia>>> {
    let mut out: HashMap<String, Vec<StoredMedia>> = HashMap::new();
    if chirp_ids.is_empty() {
        return Ok(out);
    }

    let placeholders = vec!["?"; chirp_ids.len()].join(", ");
    let sql = format!(
        "SELECT chirp_id, name, kind, url, storage_id FROM chirp_media
         WHERE chirp_id IN ({})
         ORDER BY chirp_id, position",
        placeholders
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(chirp_ids.iter()), |row| {
        Ok((
            row.get::<_, String>(0)?,
            StoredMedia {
                name: row.get(1)?,
                kind: MediaKind::parse(&row.get::<_, String>(2)?),
                url: row.get(3)?,
                storage_id: row.get(4)?,
            },
        ))
    })?;

    for row in rows {
        let (chirp_id, media) = row?;
        out.entry(chirp_id).or_default().push(media);
    }
    Ok(out)
}
