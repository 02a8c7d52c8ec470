//! CRUD operations for [`JoinRequest`] rows.

use rusqlite::{params, OptionalExtension};

use concord_shared::types::{CommunityId, RequestId, UserId};

use crate::database::{conversion_error, not_found, Database};
use crate::error::Result;
use crate::models::{JoinRequest, JoinRequestState};

impl Database {
    /// Insert a join request or refresh an existing one with the same id.
    pub fn save_join_request(&self, request: &JoinRequest) -> Result<()> {
        self.conn().execute(
            "INSERT INTO join_requests (id, community_id, requester, ens_name, clock, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                ens_name = excluded.ens_name,
                clock    = excluded.clock,
                state    = excluded.state",
            params![
                request.id.to_hex(),
                request.community_id.to_hex(),
                request.requester.to_hex(),
                request.ens_name,
                request.clock as i64,
                request.state as u8,
            ],
        )?;
        Ok(())
    }

    pub fn get_join_request(&self, id: &RequestId) -> Result<JoinRequest> {
        self.conn()
            .query_row(
                "SELECT id, community_id, requester, ens_name, clock, state
                 FROM join_requests WHERE id = ?1",
                params![id.to_hex()],
                row_to_join_request,
            )
            .map_err(not_found)
    }

    pub fn find_join_request(&self, id: &RequestId) -> Result<Option<JoinRequest>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, community_id, requester, ens_name, clock, state
                 FROM join_requests WHERE id = ?1",
                params![id.to_hex()],
                row_to_join_request,
            )
            .optional()?)
    }

    /// Requests for a community in the given state, oldest clock first.
    pub fn list_join_requests(
        &self,
        community_id: &CommunityId,
        state: JoinRequestState,
    ) -> Result<Vec<JoinRequest>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, community_id, requester, ens_name, clock, state
             FROM join_requests
             WHERE community_id = ?1 AND state = ?2
             ORDER BY clock ASC, id ASC",
        )?;

        let rows = stmt.query_map(
            params![community_id.to_hex(), state as u8],
            row_to_join_request,
        )?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    /// Returns `true` if a row was updated.
    pub fn set_join_request_state(&self, id: &RequestId, state: JoinRequestState) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE join_requests SET state = ?2 WHERE id = ?1",
            params![id.to_hex(), state as u8],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_join_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<JoinRequest> {
    let id_str: String = row.get(0)?;
    let community_str: String = row.get(1)?;
    let requester_str: String = row.get(2)?;
    let ens_name: Option<String> = row.get(3)?;
    let clock: i64 = row.get(4)?;
    let state_byte: u8 = row.get(5)?;

    let state = JoinRequestState::from_byte(state_byte).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(5, i64::from(state_byte))
    })?;

    Ok(JoinRequest {
        id: RequestId::from_hex(&id_str).map_err(|e| conversion_error(0, e))?,
        community_id: CommunityId::from_hex(&community_str).map_err(|e| conversion_error(1, e))?,
        requester: UserId::from_hex(&requester_str).map_err(|e| conversion_error(2, e))?,
        ens_name,
        clock: clock as u64,
        state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommunityRecord;
    use chrono::Utc;
    use concord_shared::description::{AccessMode, CommunityDescription, SignedDescription};
    use concord_shared::identity::Identity;

    fn seed_community(db: &Database) -> CommunityId {
        let key = Identity::generate();
        let description = CommunityDescription::new(
            "c".to_string(),
            "d".to_string(),
            AccessMode::RequestToJoin,
            Identity::generate().user_id(),
        );
        let record = CommunityRecord {
            id: CommunityId(key.public_key_bytes()),
            description: SignedDescription::sign(&key, &description).unwrap(),
            clock: 1,
            private_key: Some(*key.secret_bytes()),
            joined: true,
            joined_clock: 1,
            created_at: Utc::now(),
        };
        db.save_community(&record).unwrap();
        record.id
    }

    fn pending(community_id: CommunityId, requester: UserId, clock: u64) -> JoinRequest {
        JoinRequest {
            id: RequestId::derive(&community_id, &requester),
            community_id,
            requester,
            ens_name: None,
            clock,
            state: JoinRequestState::Pending,
        }
    }

    #[test]
    fn save_list_and_transition() {
        let db = Database::open_in_memory().unwrap();
        let community = seed_community(&db);

        let alice = pending(community, UserId([1u8; 32]), 2);
        let bob = pending(community, UserId([2u8; 32]), 1);
        db.save_join_request(&alice).unwrap();
        db.save_join_request(&bob).unwrap();

        let listed = db
            .list_join_requests(&community, JoinRequestState::Pending)
            .unwrap();
        assert_eq!(listed, vec![bob.clone(), alice.clone()]);

        assert!(db
            .set_join_request_state(&alice.id, JoinRequestState::Approved)
            .unwrap());
        assert_eq!(
            db.get_join_request(&alice.id).unwrap().state,
            JoinRequestState::Approved
        );
        assert_eq!(
            db.list_join_requests(&community, JoinRequestState::Pending)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn repeated_request_collapses() {
        let db = Database::open_in_memory().unwrap();
        let community = seed_community(&db);
        let requester = UserId([7u8; 32]);

        db.save_join_request(&pending(community, requester, 1)).unwrap();
        db.save_join_request(&pending(community, requester, 4)).unwrap();

        let listed = db
            .list_join_requests(&community, JoinRequestState::Pending)
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].clock, 4);
    }

    #[test]
    fn unknown_request_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_join_request(&RequestId([0u8; 32])),
            Err(crate::StoreError::NotFound)
        ));
        assert!(db.find_join_request(&RequestId([0u8; 32])).unwrap().is_none());
        assert!(!db
            .set_join_request_state(&RequestId([0u8; 32]), JoinRequestState::Rejected)
            .unwrap());
    }
}
