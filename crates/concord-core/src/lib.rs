//! Protocol core of a Concord node: community state, membership, reliable
//! delivery and multi-device sync, behind the [`Messenger`] facade.

use std::sync::Arc;

use tokio::sync::Mutex;

use concord_store::Database;

pub mod communities;
pub mod delivery;
pub mod error;
pub mod membership;
pub mod messenger;
pub mod multidevice;
pub mod requests;
pub mod transport;

pub use communities::{ApplyOutcome, Community, CommunityManager};
pub use delivery::{DeliveryPolicy, DeliveryQueue, SweepReport};
pub use error::{CoreError, ErrorKind, ValidationError};
pub use membership::{decide, Action, Decision, MembershipEngine};
pub use messenger::{InboundEvent, Messenger};
pub use multidevice::SyncCoordinator;
pub use transport::{Encryptor, InMemoryTransport, SymmetricEncryptor, Transport};

/// The database handle every component is constructed with.
pub type SharedDatabase = Arc<Mutex<Database>>;

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
