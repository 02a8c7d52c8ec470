//! Identity key file: the Ed25519 identity shared by every installation,
//! plus the id of this installation.
//!
//! A missing file is created with fresh keys. A file that exists but cannot
//! be read back is fatal; the node never silently replaces an identity.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::info;

use concord_shared::constants::KDF_CONTEXT_LIBP2P_KEYPAIR;
use concord_shared::identity::{Identity, IdentityExport};
use concord_shared::types::InstallationId;

#[derive(Serialize, Deserialize)]
struct KeyFile {
    identity: IdentityExport,
    installation_id: InstallationId,
}

pub struct NodeKeys {
    pub identity: Identity,
    pub installation_id: InstallationId,
}

impl NodeKeys {
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let keys = Self {
            identity: Identity::generate(),
            installation_id: InstallationId::new(),
        };
        keys.save(path)?;
        info!(path = %path.display(), "Created new identity");
        Ok(keys)
    }

    fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading key file {}", path.display()))?;
        let file: KeyFile = serde_json::from_str(&raw)
            .with_context(|| format!("key file {} is corrupt", path.display()))?;
        let identity = Identity::from_export(&file.identity)
            .with_context(|| format!("key file {} is corrupt", path.display()))?;

        Ok(Self {
            identity,
            installation_id: file.installation_id,
        })
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = KeyFile {
            identity: self.identity.to_export(),
            installation_id: self.installation_id,
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("writing key file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// The libp2p keypair of this installation. Installations of one identity
    /// get distinct peer ids.
    pub fn libp2p_keypair(&self) -> anyhow::Result<libp2p::identity::Keypair> {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_LIBP2P_KEYPAIR);
        hasher.update(self.identity.secret_bytes());
        hasher.update(self.installation_id.0.as_bytes());
        let seed: [u8; 32] = *hasher.finalize().as_bytes();

        match libp2p::identity::Keypair::ed25519_from_bytes(seed) {
            Ok(keypair) => Ok(keypair),
            Err(e) => bail!("failed to create libp2p keypair: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("identity.json");

        let created = NodeKeys::load_or_create(&path).unwrap();
        let loaded = NodeKeys::load_or_create(&path).unwrap();

        assert_eq!(created.identity.user_id(), loaded.identity.user_id());
        assert_eq!(created.installation_id, loaded.installation_id);
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(NodeKeys::load_or_create(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_mismatched_public_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let mut export = Identity::generate().to_export();
        export.public_key = Identity::generate().public_key_bytes();
        let file = KeyFile {
            identity: export,
            installation_id: InstallationId::new(),
        };
        fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        assert!(NodeKeys::load_or_create(&path).is_err());
    }

    #[test]
    fn test_peer_id_per_installation() {
        let identity = Identity::generate();
        let secret = *identity.secret_bytes();
        let a = NodeKeys {
            identity,
            installation_id: InstallationId::new(),
        };
        let b = NodeKeys {
            identity: Identity::from_secret_bytes(&secret),
            installation_id: InstallationId::new(),
        };

        let a1 = a.libp2p_keypair().unwrap().public().to_peer_id();
        let a2 = a.libp2p_keypair().unwrap().public().to_peer_id();
        let b1 = b.libp2p_keypair().unwrap().public().to_peer_id();
        assert_eq!(a1, a2);
        assert_ne!(a1, b1);
    }
}
