//! CRUD operations for [`CommunityRecord`] rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use concord_shared::description::SignedDescription;
use concord_shared::types::CommunityId;

use crate::database::{conversion_error, not_found, Database};
use crate::error::Result;
use crate::models::CommunityRecord;

const COLUMNS: &str = "id, description, clock, private_key, joined, created_at, joined_clock";

impl Database {
    /// Insert a new community or overwrite every column of an existing one.
    ///
    /// Used by the controlling node, which serializes its own edits.
    pub fn save_community(&self, community: &CommunityRecord) -> Result<()> {
        let description = community.description.to_bytes()?;
        self.conn().execute(
            "INSERT INTO communities
                (id, description, clock, private_key, joined, created_at, joined_clock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                description  = excluded.description,
                clock        = excluded.clock,
                private_key  = excluded.private_key,
                joined       = excluded.joined,
                joined_clock = excluded.joined_clock",
            params![
                community.id.to_hex(),
                description,
                community.clock as i64,
                community.private_key.map(|k| k.to_vec()),
                community.joined,
                community.created_at.to_rfc3339(),
                community.joined_clock as i64,
            ],
        )?;
        Ok(())
    }

    /// Store a description only if its clock is strictly greater than the
    /// stored one (or the community is unknown). Returns whether a row
    /// changed. Key material and the joined flag are left untouched.
    pub fn save_community_description_if_newer(
        &self,
        id: &CommunityId,
        description: &SignedDescription,
        clock: u64,
    ) -> Result<bool> {
        let encoded = description.to_bytes()?;
        let affected = self.conn().execute(
            "INSERT INTO communities (id, description, clock, private_key, joined, created_at)
             VALUES (?1, ?2, ?3, NULL, 0, ?4)
             ON CONFLICT(id) DO UPDATE SET
                description = excluded.description,
                clock       = excluded.clock
             WHERE excluded.clock > communities.clock",
            params![id.to_hex(), encoded, clock as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Set the joined flag if `clock` is newer than its last change. Returns
    /// whether a row changed.
    pub fn set_community_joined(&self, id: &CommunityId, joined: bool, clock: u64) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE communities SET joined = ?2, joined_clock = ?3
             WHERE id = ?1 AND joined_clock < ?3",
            params![id.to_hex(), joined, clock as i64],
        )?;
        Ok(affected > 0)
    }

    /// Attach the controlling key to a community (replay from a sibling device).
    pub fn set_community_private_key(&self, id: &CommunityId, key: &[u8; 32]) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE communities SET private_key = ?2 WHERE id = ?1",
            params![id.to_hex(), key.to_vec()],
        )?;
        Ok(affected > 0)
    }

    pub fn get_community(&self, id: &CommunityId) -> Result<CommunityRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM communities WHERE id = ?1"),
                params![id.to_hex()],
                row_to_community,
            )
            .map_err(not_found)
    }

    pub fn find_community(&self, id: &CommunityId) -> Result<Option<CommunityRecord>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM communities WHERE id = ?1"),
                params![id.to_hex()],
                row_to_community,
            )
            .optional()?)
    }

    /// All communities, ordered by id so the listing is stable.
    pub fn list_communities(&self) -> Result<Vec<CommunityRecord>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {COLUMNS} FROM communities ORDER BY id ASC"))?;

        let rows = stmt.query_map([], row_to_community)?;

        let mut communities = Vec::new();
        for row in rows {
            communities.push(row?);
        }
        Ok(communities)
    }
}

fn row_to_community(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommunityRecord> {
    let id_str: String = row.get(0)?;
    let description_bytes: Vec<u8> = row.get(1)?;
    let clock: i64 = row.get(2)?;
    let private_key: Option<Vec<u8>> = row.get(3)?;
    let joined: bool = row.get(4)?;
    let created_str: String = row.get(5)?;
    let joined_clock: i64 = row.get(6)?;

    let id = CommunityId::from_hex(&id_str).map_err(|e| conversion_error(0, e))?;
    let description =
        SignedDescription::from_bytes(&description_bytes).map_err(|e| conversion_error(1, e))?;

    let private_key = private_key
        .map(|bytes| <[u8; 32]>::try_from(bytes.as_slice()))
        .transpose()
        .map_err(|e| conversion_error(3, e))?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(5, e))?;

    Ok(CommunityRecord {
        id,
        description,
        clock: clock as u64,
        private_key,
        joined,
        joined_clock: joined_clock as u64,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_shared::description::{AccessMode, CommunityDescription};
    use concord_shared::identity::Identity;

    fn signed(key: &Identity, clock: u64, name: &str) -> SignedDescription {
        let mut description = CommunityDescription::new(
            name.to_string(),
            "desc".to_string(),
            AccessMode::NoMembership,
            Identity::generate().user_id(),
        );
        description.clock = clock;
        SignedDescription::sign(key, &description).unwrap()
    }

    fn record(key: &Identity) -> CommunityRecord {
        CommunityRecord {
            id: CommunityId(key.public_key_bytes()),
            description: signed(key, 1, "first"),
            clock: 1,
            private_key: Some(*key.secret_bytes()),
            joined: true,
            joined_clock: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn save_and_get() {
        let db = Database::open_in_memory().unwrap();
        let key = Identity::generate();
        let community = record(&key);

        db.save_community(&community).unwrap();
        let loaded = db.get_community(&community.id).unwrap();

        assert_eq!(loaded.description, community.description);
        assert_eq!(loaded.private_key, community.private_key);
        assert!(loaded.joined);
    }

    #[test]
    fn joined_flag_only_moves_forward() {
        let db = Database::open_in_memory().unwrap();
        let community = record(&Identity::generate());
        db.save_community(&community).unwrap();

        assert!(db.set_community_joined(&community.id, false, 10).unwrap());
        assert!(!db.set_community_joined(&community.id, true, 5).unwrap());
        assert!(!db.set_community_joined(&community.id, true, 10).unwrap());

        let loaded = db.get_community(&community.id).unwrap();
        assert!(!loaded.joined);
        assert_eq!(loaded.joined_clock, 10);
        assert!(!db
            .set_community_joined(&CommunityId([0u8; 32]), true, 99)
            .unwrap());
    }

    #[test]
    fn missing_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.get_community(&CommunityId([0u8; 32])).unwrap_err();
        assert!(matches!(err, crate::StoreError::NotFound));
        assert!(db.find_community(&CommunityId([0u8; 32])).unwrap().is_none());
    }

    #[test]
    fn conditional_save_never_regresses() {
        let db = Database::open_in_memory().unwrap();
        let key = Identity::generate();
        let community = record(&key);
        db.save_community(&community).unwrap();

        let newer = signed(&key, 3, "third");
        assert!(db
            .save_community_description_if_newer(&community.id, &newer, 3)
            .unwrap());

        let older = signed(&key, 2, "second");
        assert!(!db
            .save_community_description_if_newer(&community.id, &older, 2)
            .unwrap());

        let same = signed(&key, 3, "third again");
        assert!(!db
            .save_community_description_if_newer(&community.id, &same, 3)
            .unwrap());

        let loaded = db.get_community(&community.id).unwrap();
        assert_eq!(loaded.clock, 3);
        assert_eq!(loaded.description, newer);
        // Key material survives remote updates.
        assert_eq!(loaded.private_key, community.private_key);
    }

    #[test]
    fn conditional_save_inserts_unknown() {
        let db = Database::open_in_memory().unwrap();
        let key = Identity::generate();
        let id = CommunityId(key.public_key_bytes());

        assert!(db
            .save_community_description_if_newer(&id, &signed(&key, 5, "mirror"), 5)
            .unwrap());
        let loaded = db.get_community(&id).unwrap();
        assert!(loaded.private_key.is_none());
        assert!(!loaded.joined);
    }

    #[test]
    fn list_is_ordered_by_id() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..4 {
            db.save_community(&record(&Identity::generate())).unwrap();
        }
        let ids: Vec<String> = db
            .list_communities()
            .unwrap()
            .iter()
            .map(|c| c.id.to_hex())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 4);
    }
}
