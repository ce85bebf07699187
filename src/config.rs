//! Configuration loading: a node identity, a listen address,
//! and a static roster of peer identity/address tuples, parsed from a
//! roster file and fronted by a small CLI.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::identity::NodeId;

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub id: NodeId,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub self_id: NodeId,
    pub self_addr: SocketAddr,
    pub peers: Vec<PeerConfig>,
    pub election_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub log_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("roster file not found at {0} (pass --single for a one-node cluster)")]
    RosterMissing(PathBuf),
    #[error("local identity {0} not found in roster file")]
    SelfNotInRoster(String),
    #[error("malformed roster line {line}: {text}")]
    MalformedLine { line: usize, text: String },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed, non-blank, non-comment roster line:
/// `<identity> <ip:port> [flags...]`. Trailing flags
/// are reserved for future extension and are accepted but ignored.
struct RosterLine {
    id: String,
    addr: SocketAddr,
}

fn parse_roster_text(text: &str) -> Result<Vec<RosterLine>, ConfigError> {
    let mut lines = Vec::new();
    for (line_no, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let id = parts
            .next()
            .ok_or_else(|| ConfigError::MalformedLine {
                line: line_no + 1,
                text: raw.to_string(),
            })?
            .to_string();
        let addr_str = parts.next().ok_or_else(|| ConfigError::MalformedLine {
            line: line_no + 1,
            text: raw.to_string(),
        })?;
        let addr: SocketAddr = addr_str.parse().map_err(|_| ConfigError::MalformedLine {
            line: line_no + 1,
            text: raw.to_string(),
        })?;
        lines.push(RosterLine { id, addr });
    }
    Ok(lines)
}

/// Loads the roster file and splits out the local node from its peers.
pub fn load_roster(
    path: &Path,
    self_identity: &str,
) -> Result<(SocketAddr, Vec<PeerConfig>), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::RosterMissing(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    let lines = parse_roster_text(&text)?;

    let mut self_addr = None;
    let mut peers = Vec::new();
    for line in lines {
        if line.id == self_identity {
            self_addr = Some(line.addr);
        } else {
            peers.push(PeerConfig {
                id: NodeId::from_str_padded(&line.id),
                addr: line.addr,
            });
        }
    }

    match self_addr {
        Some(addr) => Ok((addr, peers)),
        None => Err(ConfigError::SelfNotInRoster(self_identity.to_string())),
    }
}

#[derive(Debug, Parser)]
#[command(name = "raft-node", about = "Single-threaded Raft consensus node")]
pub struct Cli {
    /// This node's identity; must match a line in the roster file.
    #[arg(long, env = "RAFT_NODE_ID")]
    pub id: String,

    /// Path to the roster file.
    #[arg(long, env = "RAFT_ROSTER")]
    pub roster: Option<PathBuf>,

    /// Runs as a single-node cluster without a roster file.
    #[arg(long)]
    pub single: bool,

    /// Directory for the append-only persisted log.
    #[arg(long, env = "RAFT_LOG_DIR", default_value = ".")]
    pub log_dir: PathBuf,

    #[arg(long, default_value_t = 150)]
    pub election_timeout_ms: u64,

    #[arg(long, default_value_t = 75)]
    pub heartbeat_interval_ms: u64,

    /// Only used with --single, since there's no roster line to read an
    /// address from.
    #[arg(long, default_value = "127.0.0.1:9000")]
    pub listen_addr: SocketAddr,
}

impl Cli {
    pub fn into_cluster_config(self) -> Result<ClusterConfig, ConfigError> {
        let self_id = NodeId::from_str_padded(&self.id);
        let log_path = self.log_dir.join(format!("raft-{}.log", self.id));

        let (self_addr, peers) = if self.single {
            (self.listen_addr, Vec::new())
        } else {
            let roster_path = self
                .roster
                .ok_or_else(|| ConfigError::RosterMissing(PathBuf::from("<none given>")))?;
            load_roster(&roster_path, &self.id)?
        };

        Ok(ClusterConfig {
            self_id,
            self_addr,
            peers,
            election_timeout: Duration::from_millis(self.election_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            log_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_well_formed_roster() {
        let text = "a 127.0.0.1:9001\nb 127.0.0.1:9002 voting\n# comment\n\nc 127.0.0.1:9003\n";
        let lines = parse_roster_text(text).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].id, "a");
        assert_eq!(lines[1].addr.port(), 9002);
    }

    #[test]
    fn load_roster_splits_self_from_peers() {
        let dir = std::env::temp_dir().join(format!("raft-core-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roster.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "a 127.0.0.1:9001").unwrap();
        writeln!(f, "b 127.0.0.1:9002").unwrap();
        writeln!(f, "c 127.0.0.1:9003").unwrap();
        drop(f);

        let (addr, peers) = load_roster(&path, "b").unwrap();
        assert_eq!(addr.port(), 9002);
        assert_eq!(peers.len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_self_identity_is_an_error() {
        let dir = std::env::temp_dir().join(format!("raft-core-cfg2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roster.conf");
        std::fs::write(&path, "a 127.0.0.1:9001\n").unwrap();

        let err = load_roster(&path, "nope").unwrap_err();
        assert!(matches!(err, ConfigError::SelfNotInRoster(_)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
