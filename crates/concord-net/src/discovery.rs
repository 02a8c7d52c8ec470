//! Bootstrap peer loading.

use std::fs;
use std::path::Path;

use libp2p::Multiaddr;
use tracing::{debug, info, warn};

/// Load bootstrap multiaddrs from a file, one per line.
///
/// Empty lines and lines starting with `#` are ignored. A missing file or a
/// malformed line is logged and skipped; the node can still run alone.
///
/// ```text
/// # Concord bootstrap nodes
/// /ip4/198.51.100.10/udp/4101/quic-v1/p2p/12D3KooW...
/// ```
pub fn load_bootstrap_peers(path: &Path) -> Vec<Multiaddr> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read bootstrap peers file");
            return Vec::new();
        }
    };

    let addrs: Vec<Multiaddr> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.parse::<Multiaddr>() {
            Ok(addr) => {
                debug!(addr = %addr, "Loaded bootstrap peer");
                Some(addr)
            }
            Err(e) => {
                warn!(line = %line, error = %e, "Skipping invalid multiaddr");
                None
            }
        })
        .collect();

    info!(count = addrs.len(), path = %path.display(), "Loaded bootstrap peers");

    addrs
}

/// Parse a comma separated list of multiaddrs, as given in `BOOTSTRAP_PEERS`.
pub fn parse_multiaddrs(raw: &str) -> Vec<Multiaddr> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            s.parse::<Multiaddr>().ok().or_else(|| {
                warn!(addr = %s, "Could not parse multiaddr");
                None
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_nonexistent_file() {
        let peers = load_bootstrap_peers(Path::new("/nonexistent/bootstrap.txt"));
        assert!(peers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("peers.txt");

        let mut f = fs::File::create(&file_path).unwrap();
        writeln!(f, "# bootstrap nodes").unwrap();
        writeln!(f, "/ip4/127.0.0.1/udp/4101/quic-v1").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "invalid-addr").unwrap();
        writeln!(f, "/ip4/127.0.0.2/udp/4101/quic-v1").unwrap();
        drop(f);

        assert_eq!(load_bootstrap_peers(&file_path).len(), 2);
    }

    #[test]
    fn test_parse_multiaddrs() {
        let addrs = parse_multiaddrs(
            "/ip4/127.0.0.1/udp/4101/quic-v1, not-a-multiaddr,,/ip4/10.0.0.1/udp/4101/quic-v1",
        );
        assert_eq!(addrs.len(), 2);
    }
}
