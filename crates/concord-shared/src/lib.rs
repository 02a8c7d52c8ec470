//! Types shared by every Concord crate: identity and signing, payload
//! encryption, identifiers, the signed community description and the wire
//! protocol exchanged between peers and between a user's own installations.

pub mod constants;
pub mod crypto;
pub mod description;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::{ConcordError, CryptoError, IdentityError};
