//! Admission policy and the join request workflow.
//!
//! [`decide`] is a pure function over a cached description. It may be one
//! version behind a remote edit in flight; a decision made on such a
//! description is accepted as is.

use std::sync::Arc;

use tracing::{debug, info, warn};

use concord_shared::description::{AccessMode, CommunityDescription};
use concord_shared::identity::Identity;
use concord_shared::protocol::{RequestToJoin, RequestToJoinResponse};
use concord_shared::types::{CommunityId, RequestId, UserId};
use concord_store::{JoinRequest, JoinRequestState};

use crate::communities::{parse_community_id, ApplyOutcome, Community, CommunityManager};
use crate::error::CoreError;
use crate::now_ms;
use crate::requests::RequestToJoinCommunity;
use crate::SharedDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Post,
    RequestToJoin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
    /// A join request is waiting for the key holder.
    Pending,
}

pub fn decide(
    description: &CommunityDescription,
    actor: &UserId,
    action: Action,
    has_pending_request: bool,
) -> Decision {
    let member = description.has_member(actor);

    match (description.access(), action) {
        (AccessMode::NoMembership, Action::Read | Action::Post) => Decision::Allowed,
        (AccessMode::NoMembership, Action::RequestToJoin) => Decision::Denied,

        (AccessMode::InviteOnly, Action::Read) => Decision::Allowed,
        (AccessMode::InviteOnly, Action::Post) if member => Decision::Allowed,
        (AccessMode::InviteOnly, Action::Post | Action::RequestToJoin) => Decision::Denied,

        (AccessMode::RequestToJoin, Action::Read) => Decision::Allowed,
        (AccessMode::RequestToJoin, Action::Post) if member => Decision::Allowed,
        (AccessMode::RequestToJoin, Action::RequestToJoin) if member => Decision::Denied,
        (AccessMode::RequestToJoin, Action::Post | Action::RequestToJoin) => {
            if has_pending_request {
                Decision::Pending
            } else if action == Action::RequestToJoin {
                Decision::Allowed
            } else {
                Decision::Denied
            }
        }
    }
}

fn rejection_reason(access: AccessMode) -> &'static str {
    match access {
        AccessMode::NoMembership => "community has no membership",
        AccessMode::InviteOnly => "community is invite only",
        AccessMode::RequestToJoin => "already a member",
    }
}

pub struct MembershipEngine {
    db: SharedDatabase,
    communities: Arc<CommunityManager>,
}

impl MembershipEngine {
    pub fn new(db: SharedDatabase, communities: Arc<CommunityManager>) -> Self {
        Self { db, communities }
    }

    async fn find_pending(&self, id: &RequestId) -> Result<Option<JoinRequest>, CoreError> {
        Ok(self
            .db
            .lock()
            .await
            .find_join_request(id)?
            .filter(|r| r.state == JoinRequestState::Pending))
    }

    // -----------------------------------------------------------------------
    // Requester side
    // -----------------------------------------------------------------------

    /// Record an outgoing join request. Communities that do not take
    /// requests are refused without writing anything.
    pub async fn request_to_join(
        &self,
        request: &RequestToJoinCommunity,
        requester: UserId,
    ) -> Result<JoinRequest, CoreError> {
        request.validate()?;
        let community_id = parse_community_id(&request.community_id)?;
        let community = self.communities.get(&community_id).await?;

        let request_id = RequestId::derive(&community_id, &requester);
        let pending = self.find_pending(&request_id).await?;

        match decide(
            &community.description,
            &requester,
            Action::RequestToJoin,
            pending.is_some(),
        ) {
            Decision::Denied => Err(CoreError::JoinRejected {
                community: community_id,
                reason: rejection_reason(community.description.access()),
            }),
            Decision::Pending | Decision::Allowed => {
                let join_request = JoinRequest {
                    id: request_id,
                    community_id,
                    requester,
                    ens_name: Some(request.ens_name.clone()).filter(|n| !n.is_empty()),
                    clock: now_ms(),
                    state: JoinRequestState::Pending,
                };
                self.db.lock().await.save_join_request(&join_request)?;

                info!(community = %community_id.short(), "Requested to join community");
                Ok(join_request)
            }
        }
    }

    /// Process the key holder's answer to our own request.
    ///
    /// Answers not signed by the community key, addressed to someone else,
    /// or without a matching pending request are dropped. Returns the updated
    /// request when the answer was taken into account.
    pub async fn handle_response(
        &self,
        own: &UserId,
        response: &RequestToJoinResponse,
    ) -> Result<Option<JoinRequest>, CoreError> {
        if response.requester != *own {
            debug!(community = %response.community_id.short(), "Join response for another user");
            return Ok(None);
        }
        if let Err(e) = response.verify() {
            warn!(community = %response.community_id.short(), error = %e, "Discarding unsigned join response");
            return Ok(None);
        }

        let request_id = RequestId::derive(&response.community_id, own);
        let Some(mut request) = self.find_pending(&request_id).await? else {
            debug!(community = %response.community_id.short(), "Unsolicited join response");
            return Ok(None);
        };

        if response.accepted {
            let Some(signed) = response
                .description
                .as_ref()
                .filter(|d| d.community_id == response.community_id)
            else {
                return Ok(None);
            };
            if self.communities.apply_remote(signed).await? == ApplyOutcome::Rejected {
                return Ok(None);
            }
            let community = self.communities.get(&response.community_id).await?;
            if !community.description.has_member(own) {
                debug!(community = %community.id.short(), "Acceptance without membership");
                return Ok(None);
            }
            self.communities.join(&response.community_id).await?;
            request.state = JoinRequestState::Approved;
        } else {
            request.state = JoinRequestState::Rejected;
        }

        self.db
            .lock()
            .await
            .set_join_request_state(&request.id, request.state)?;
        info!(
            community = %response.community_id.short(),
            accepted = response.accepted,
            "Join request answered"
        );
        Ok(Some(request))
    }

    // -----------------------------------------------------------------------
    // Key holder side
    // -----------------------------------------------------------------------

    /// Record a request received from the network. Requests for communities
    /// we do not control, that do not take requests, or from existing
    /// members are dropped.
    pub async fn handle_remote_request(
        &self,
        requester: UserId,
        message: &RequestToJoin,
    ) -> Result<Option<JoinRequest>, CoreError> {
        let community = match self.communities.get(&message.community_id).await {
            Ok(c) if c.is_controlled() => c,
            Ok(_) | Err(CoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if decide(&community.description, &requester, Action::RequestToJoin, false)
            == Decision::Denied
        {
            debug!(community = %community.id.short(), "Dropping inadmissible join request");
            return Ok(None);
        }

        let id = RequestId::derive(&community.id, &requester);
        let db = self.db.lock().await;
        if let Some(existing) = db.find_join_request(&id)? {
            if existing.state != JoinRequestState::Pending || existing.clock >= message.clock {
                return Ok(None);
            }
        }

        let request = JoinRequest {
            id,
            community_id: community.id,
            requester,
            ens_name: message.ens_name.clone(),
            clock: message.clock,
            state: JoinRequestState::Pending,
        };
        db.save_join_request(&request)?;

        info!(community = %community.id.short(), requester = %requester.short(), "Join request received");
        Ok(Some(request))
    }

    /// Admit the requester. The membership change goes through the
    /// community store and bumps the description version.
    pub async fn approve(&self, request_id: &RequestId) -> Result<(JoinRequest, Community), CoreError> {
        let mut request = self.pending_for_admin(request_id).await?;

        let community = self
            .communities
            .add_members(&request.community_id, &[request.requester])
            .await?;

        request.state = JoinRequestState::Approved;
        self.db
            .lock()
            .await
            .set_join_request_state(&request.id, request.state)?;

        info!(community = %community.id.short(), requester = %request.requester.short(), "Join request approved");
        Ok((request, community))
    }

    /// Decline the requester. The community is not touched.
    pub async fn reject(&self, request_id: &RequestId) -> Result<JoinRequest, CoreError> {
        let mut request = self.pending_for_admin(request_id).await?;

        request.state = JoinRequestState::Rejected;
        self.db
            .lock()
            .await
            .set_join_request_state(&request.id, request.state)?;

        info!(community = %request.community_id.short(), requester = %request.requester.short(), "Join request rejected");
        Ok(request)
    }

    /// The signed answer for a request that was approved or rejected here.
    pub async fn response_for(&self, request: &JoinRequest) -> Result<RequestToJoinResponse, CoreError> {
        let community = self.communities.get(&request.community_id).await?;
        let key = community.private_key.ok_or_else(|| {
            CoreError::Unauthorized(format!("no private key for community {}", community.id.short()))
        })?;

        let accepted = request.state == JoinRequestState::Approved;
        Ok(RequestToJoinResponse::sign(
            &Identity::from_secret_bytes(&key),
            request.requester,
            accepted,
            accepted.then(|| community.signed.clone()),
            if accepted { community.clock() } else { request.clock },
        )?)
    }

    async fn pending_for_admin(&self, request_id: &RequestId) -> Result<JoinRequest, CoreError> {
        let request = self
            .find_pending(request_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("pending join request {}", request_id.short())))?;

        let community = self.communities.get(&request.community_id).await?;
        if !community.is_controlled() {
            return Err(CoreError::Unauthorized(format!(
                "no private key for community {}",
                community.id.short()
            )));
        }
        Ok(request)
    }

    pub async fn pending_requests(&self, community_id: &CommunityId) -> Result<Vec<JoinRequest>, CoreError> {
        Ok(self
            .db
            .lock()
            .await
            .list_join_requests(community_id, JoinRequestState::Pending)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_shared::description::SignedDescription;
    use concord_store::Database;
    use tokio::sync::Mutex;

    use crate::requests::CreateCommunity;

    struct Fixture {
        db: SharedDatabase,
        communities: Arc<CommunityManager>,
        engine: MembershipEngine,
    }

    fn fixture() -> Fixture {
        let db: SharedDatabase = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let communities = Arc::new(CommunityManager::new(
            Arc::clone(&db),
            Arc::new(Identity::generate()),
        ));
        let engine = MembershipEngine::new(Arc::clone(&db), Arc::clone(&communities));
        Fixture {
            db,
            communities,
            engine,
        }
    }

    async fn community(fixture: &Fixture, access: AccessMode) -> Community {
        fixture
            .communities
            .create_community(&CreateCommunity {
                name: "c".to_string(),
                description: "d".to_string(),
                access,
            })
            .await
            .unwrap()
    }

    fn join_request(id: &CommunityId) -> RequestToJoinCommunity {
        RequestToJoinCommunity {
            community_id: id.0.to_vec(),
            ens_name: String::new(),
        }
    }

    fn wire_request(id: &CommunityId, clock: u64) -> RequestToJoin {
        RequestToJoin {
            community_id: *id,
            ens_name: None,
            clock,
        }
    }

    #[test]
    fn decisions_per_mode() {
        let member = UserId([1u8; 32]);
        let outsider = UserId([2u8; 32]);
        let mut description = CommunityDescription::new(
            "c".to_string(),
            "d".to_string(),
            AccessMode::NoMembership,
            member,
        );

        assert_eq!(decide(&description, &outsider, Action::Post, false), Decision::Allowed);
        assert_eq!(
            decide(&description, &outsider, Action::RequestToJoin, false),
            Decision::Denied
        );

        description.permissions.access = AccessMode::InviteOnly;
        assert_eq!(decide(&description, &outsider, Action::Read, false), Decision::Allowed);
        assert_eq!(decide(&description, &outsider, Action::Post, false), Decision::Denied);
        assert_eq!(decide(&description, &member, Action::Post, false), Decision::Allowed);
        assert_eq!(
            decide(&description, &outsider, Action::RequestToJoin, false),
            Decision::Denied
        );

        description.permissions.access = AccessMode::RequestToJoin;
        assert_eq!(
            decide(&description, &outsider, Action::RequestToJoin, false),
            Decision::Allowed
        );
        assert_eq!(decide(&description, &outsider, Action::Post, true), Decision::Pending);
        assert_eq!(decide(&description, &outsider, Action::Post, false), Decision::Denied);
        assert_eq!(decide(&description, &member, Action::Post, false), Decision::Allowed);
        assert_eq!(
            decide(&description, &member, Action::RequestToJoin, false),
            Decision::Denied
        );
    }

    #[tokio::test]
    async fn request_against_open_community_leaves_no_record() {
        let fixture = fixture();
        let open = community(&fixture, AccessMode::NoMembership).await;

        let err = fixture
            .engine
            .request_to_join(&join_request(&open.id), UserId([9u8; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::JoinRejected { .. }));

        let id = RequestId::derive(&open.id, &UserId([9u8; 32]));
        assert!(fixture.db.lock().await.find_join_request(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn request_against_invite_only_is_rejected() {
        let fixture = fixture();
        let closed = community(&fixture, AccessMode::InviteOnly).await;

        assert!(matches!(
            fixture
                .engine
                .request_to_join(&join_request(&closed.id), UserId([9u8; 32]))
                .await,
            Err(CoreError::JoinRejected { .. })
        ));
    }

    #[tokio::test]
    async fn request_to_unknown_community_is_not_found() {
        let fixture = fixture();
        assert!(matches!(
            fixture
                .engine
                .request_to_join(&join_request(&CommunityId([4u8; 32])), UserId([9u8; 32]))
                .await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn approve_adds_member_and_bumps_version() {
        let fixture = fixture();
        let gated = community(&fixture, AccessMode::RequestToJoin).await;
        let requester = UserId([9u8; 32]);

        let received = fixture
            .engine
            .handle_remote_request(requester, &wire_request(&gated.id, 10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            fixture.engine.pending_requests(&gated.id).await.unwrap(),
            vec![received.clone()]
        );

        let (approved, updated) = fixture.engine.approve(&received.id).await.unwrap();
        assert_eq!(approved.state, JoinRequestState::Approved);
        assert!(updated.description.has_member(&requester));
        assert!(updated.clock() > gated.clock());
        assert!(fixture.engine.pending_requests(&gated.id).await.unwrap().is_empty());

        // A second approval finds nothing pending.
        assert!(matches!(
            fixture.engine.approve(&received.id).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reject_leaves_community_untouched() {
        let fixture = fixture();
        let gated = community(&fixture, AccessMode::RequestToJoin).await;

        let received = fixture
            .engine
            .handle_remote_request(UserId([9u8; 32]), &wire_request(&gated.id, 10))
            .await
            .unwrap()
            .unwrap();
        let rejected = fixture.engine.reject(&received.id).await.unwrap();

        assert_eq!(rejected.state, JoinRequestState::Rejected);
        assert_eq!(fixture.communities.get(&gated.id).await.unwrap(), gated);
    }

    #[tokio::test]
    async fn remote_requests_for_foreign_or_closed_communities_are_dropped() {
        let fixture = fixture();
        let key = Identity::generate();
        let mirrored = SignedDescription::sign(
            &key,
            &CommunityDescription::new(
                "m".to_string(),
                "m".to_string(),
                AccessMode::RequestToJoin,
                UserId([1u8; 32]),
            ),
        )
        .unwrap();
        fixture.communities.apply_remote(&mirrored).await.unwrap();
        let open = community(&fixture, AccessMode::NoMembership).await;

        for id in [mirrored.community_id, open.id, CommunityId([8u8; 32])] {
            assert!(fixture
                .engine
                .handle_remote_request(UserId([9u8; 32]), &wire_request(&id, 1))
                .await
                .unwrap()
                .is_none());
        }
    }

    #[tokio::test]
    async fn approval_response_joins_requester() {
        // Key holder and requester share nothing but the wire messages.
        let admin = fixture();
        let gated = community(&admin, AccessMode::RequestToJoin).await;

        let requester_fixture = fixture();
        let me = UserId([9u8; 32]);
        requester_fixture
            .communities
            .apply_remote(&gated.signed)
            .await
            .unwrap();

        let outgoing = requester_fixture
            .engine
            .request_to_join(&join_request(&gated.id), me)
            .await
            .unwrap();
        assert_eq!(outgoing.state, JoinRequestState::Pending);

        let received = admin
            .engine
            .handle_remote_request(me, &wire_request(&gated.id, outgoing.clock))
            .await
            .unwrap()
            .unwrap();
        let (approved, _) = admin.engine.approve(&received.id).await.unwrap();
        let response = admin.engine.response_for(&approved).await.unwrap();
        assert!(response.accepted);

        let answered = requester_fixture
            .engine
            .handle_response(&me, &response)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answered.state, JoinRequestState::Approved);

        let local = requester_fixture.communities.get(&gated.id).await.unwrap();
        assert!(local.joined);
        assert!(local.description.has_member(&me));
    }

    #[tokio::test]
    async fn unsolicited_response_is_dropped() {
        let fixture = fixture();
        let me = UserId([9u8; 32]);
        let response =
            RequestToJoinResponse::sign(&Identity::generate(), me, false, None, 1).unwrap();
        assert!(fixture
            .engine
            .handle_response(&me, &response)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rejection_not_signed_by_community_key_is_dropped() {
        let admin = fixture();
        let gated = community(&admin, AccessMode::RequestToJoin).await;

        let requester_fixture = fixture();
        let me = UserId([9u8; 32]);
        requester_fixture
            .communities
            .apply_remote(&gated.signed)
            .await
            .unwrap();
        let outgoing = requester_fixture
            .engine
            .request_to_join(&join_request(&gated.id), me)
            .await
            .unwrap();

        let mut forged =
            RequestToJoinResponse::sign(&Identity::generate(), me, false, None, 5).unwrap();
        forged.community_id = gated.id;
        assert!(requester_fixture
            .engine
            .handle_response(&me, &forged)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            requester_fixture.engine.pending_requests(&gated.id).await.unwrap(),
            vec![outgoing.clone()]
        );

        // The real answer still goes through afterwards.
        let received = admin
            .engine
            .handle_remote_request(me, &wire_request(&gated.id, outgoing.clock))
            .await
            .unwrap()
            .unwrap();
        let (approved, _) = admin.engine.approve(&received.id).await.unwrap();
        let response = admin.engine.response_for(&approved).await.unwrap();

        let answered = requester_fixture
            .engine
            .handle_response(&me, &response)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answered.state, JoinRequestState::Approved);
        assert!(requester_fixture.communities.get(&gated.id).await.unwrap().joined);
    }

    #[tokio::test]
    async fn response_for_someone_else_is_dropped() {
        let admin = fixture();
        let gated = community(&admin, AccessMode::RequestToJoin).await;
        let received = admin
            .engine
            .handle_remote_request(UserId([7u8; 32]), &wire_request(&gated.id, 1))
            .await
            .unwrap()
            .unwrap();
        let rejected = admin.engine.reject(&received.id).await.unwrap();
        let response = admin.engine.response_for(&rejected).await.unwrap();
        assert!(!response.accepted);
        assert!(response.description.is_none());

        let other = fixture();
        assert!(other
            .engine
            .handle_response(&UserId([8u8; 32]), &response)
            .await
            .unwrap()
            .is_none());
    }
}
