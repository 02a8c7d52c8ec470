//! Bookmarks synced between installations.

use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::Bookmark;

impl Database {
    /// Store a bookmark if it is unknown or its clock is strictly newer than
    /// the stored copy. Returns whether the row changed.
    pub fn save_bookmark_if_newer(&self, bookmark: &Bookmark) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT INTO bookmarks (url, name, image_url, removed, clock)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(url) DO UPDATE SET
                name      = excluded.name,
                image_url = excluded.image_url,
                removed   = excluded.removed,
                clock     = excluded.clock
             WHERE excluded.clock > bookmarks.clock",
            params![
                bookmark.url,
                bookmark.name,
                bookmark.image_url,
                bookmark.removed,
                bookmark.clock as i64,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn find_bookmark(&self, url: &str) -> Result<Option<Bookmark>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT url, name, image_url, removed, clock FROM bookmarks WHERE url = ?1",
                params![url],
                row_to_bookmark,
            )
            .optional()?)
    }

    /// All bookmarks, including removed ones, ordered by url.
    pub fn list_bookmarks(&self) -> Result<Vec<Bookmark>> {
        let mut stmt = self.conn().prepare(
            "SELECT url, name, image_url, removed, clock FROM bookmarks ORDER BY url ASC",
        )?;

        let rows = stmt.query_map([], row_to_bookmark)?;

        let mut bookmarks = Vec::new();
        for row in rows {
            bookmarks.push(row?);
        }
        Ok(bookmarks)
    }
}

fn row_to_bookmark(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bookmark> {
    let clock: i64 = row.get(4)?;
    Ok(Bookmark {
        url: row.get(0)?,
        name: row.get(1)?,
        image_url: row.get(2)?,
        removed: row.get(3)?,
        clock: clock as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookmark(removed: bool, clock: u64) -> Bookmark {
        Bookmark {
            url: "https://example.org".to_string(),
            name: "example".to_string(),
            image_url: String::new(),
            removed,
            clock,
        }
    }

    #[test]
    fn newer_removal_wins() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.save_bookmark_if_newer(&bookmark(false, 1)).unwrap());
        assert!(db.save_bookmark_if_newer(&bookmark(true, 2)).unwrap());

        let stored = db.find_bookmark("https://example.org").unwrap().unwrap();
        assert!(stored.removed);
    }

    #[test]
    fn older_update_ignored() {
        let db = Database::open_in_memory().unwrap();
        db.save_bookmark_if_newer(&bookmark(true, 5)).unwrap();
        assert!(!db.save_bookmark_if_newer(&bookmark(false, 4)).unwrap());
        assert!(!db.save_bookmark_if_newer(&bookmark(false, 5)).unwrap());

        let all = db.list_bookmarks().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].removed);
    }
}
