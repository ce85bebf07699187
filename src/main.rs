use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use log::{error, info};

use raft_core::config::{Cli, ClusterConfig};
use raft_core::consensus::{ConsensusEngine, EngineConfig};
use raft_core::log::{FileLog, LogView};
use raft_core::state_machine::KeyValueStore;
use raft_core::tick::Node;
use raft_core::transport::Transport;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config: ClusterConfig = cli.into_cluster_config()?;

    info!(
        "starting {} (peers={}, log={})",
        config.self_id,
        config.peers.len(),
        config.log_path.display()
    );

    let persistent = FileLog::open(&config.log_path)?;
    let log = LogView::load(persistent)?;

    let now = Instant::now();
    let engine_config = EngineConfig {
        id: config.self_id,
        peers: config.peers.iter().map(|p| p.id).collect(),
        election_timeout: config.election_timeout,
        heartbeat_interval: config.heartbeat_interval,
    };
    let engine = ConsensusEngine::new(engine_config, log, now)?;

    let transport = Transport::bind(config.self_addr, config.peers.clone())?;
    let state_machine = KeyValueStore::default();
    let mut node = Node::new(engine, transport, state_machine, config.self_addr.port());

    node.run_forever()
}
