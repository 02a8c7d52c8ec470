//! CRUD operations for [`Installation`] rows.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use concord_shared::types::{InstallationId, UserId};

use crate::database::{conversion_error, not_found, Database};
use crate::error::Result;
use crate::models::{Installation, InstallationMetadata};

const COLUMNS: &str = "id, identity, name, device_type, enabled, last_synced, timestamp";

impl Database {
    /// Register an installation, or refresh its metadata if the pairing
    /// message is newer than the stored one. The enabled flag and sync
    /// watermark of an existing row are never touched here.
    ///
    /// Returns `true` if a row was inserted or updated.
    pub fn upsert_installation(&self, installation: &Installation) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT INTO installations (id, identity, name, device_type, enabled, last_synced, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name        = excluded.name,
                device_type = excluded.device_type,
                timestamp   = excluded.timestamp
             WHERE excluded.timestamp > installations.timestamp",
            params![
                installation.id.0.to_string(),
                installation.identity.to_hex(),
                installation.metadata.name,
                installation.metadata.device_type,
                installation.enabled,
                installation.last_synced as i64,
                installation.timestamp as i64,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn get_installation(&self, id: &InstallationId) -> Result<Installation> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM installations WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_installation,
            )
            .map_err(not_found)
    }

    pub fn find_installation(&self, id: &InstallationId) -> Result<Option<Installation>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM installations WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_installation,
            )
            .optional()?)
    }

    /// All installations of an identity, ordered by id.
    pub fn list_installations(&self, identity: &UserId) -> Result<Vec<Installation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM installations WHERE identity = ?1 ORDER BY id ASC"
        ))?;

        let rows = stmt.query_map(params![identity.to_hex()], row_to_installation)?;

        let mut installations = Vec::new();
        for row in rows {
            installations.push(row?);
        }
        Ok(installations)
    }

    /// Returns `true` if the installation exists.
    pub fn set_installation_enabled(&self, id: &InstallationId, enabled: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE installations SET enabled = ?2 WHERE id = ?1",
            params![id.0.to_string(), enabled],
        )?;
        Ok(affected > 0)
    }

    /// Advance the sync watermark. Older values are ignored.
    pub fn set_installation_synced(&self, id: &InstallationId, synced_at: u64) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE installations SET last_synced = ?2 WHERE id = ?1 AND last_synced < ?2",
            params![id.0.to_string(), synced_at as i64],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_installation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Installation> {
    let id_str: String = row.get(0)?;
    let identity_str: String = row.get(1)?;
    let name: String = row.get(2)?;
    let device_type: String = row.get(3)?;
    let enabled: bool = row.get(4)?;
    let last_synced: i64 = row.get(5)?;
    let timestamp: i64 = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_error(0, e))?;
    let identity = UserId::from_hex(&identity_str).map_err(|e| conversion_error(1, e))?;

    Ok(Installation {
        id: InstallationId(id),
        identity,
        metadata: InstallationMetadata { name, device_type },
        enabled,
        last_synced: last_synced as u64,
        timestamp: timestamp as u64,
    })
}
