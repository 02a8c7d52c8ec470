/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/concord/1.0.0";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Maximum wire message size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4101;

/// Topic prefixes
pub const TOPIC_PREFIX_COMMUNITY: &str = "community";
pub const TOPIC_PREFIX_CHAT: &str = "chat";
pub const TOPIC_PREFIX_PERSONAL: &str = "contact";
pub const TOPIC_PREFIX_INSTALLATIONS: &str = "installations";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_TOPIC_KEY: &str = "concord-topic-key-v1";
pub const KDF_CONTEXT_DB_KEY: &str = "concord-db-key-v1";
pub const KDF_CONTEXT_INSTALLATIONS_TOPIC: &str = "concord-installations-topic-v1";
pub const KDF_CONTEXT_JOIN_REQUEST_ID: &str = "concord-join-request-id-v1";
pub const KDF_CONTEXT_LIBP2P_KEYPAIR: &str = "concord-libp2p-keypair-v1";
pub const KDF_CONTEXT_NETWORK_SECRET: &str = "concord-network-secret-v1";

/// Message ids remembered for inbound de-duplication
pub const SEEN_MESSAGES_CAPACITY: usize = 4096;
