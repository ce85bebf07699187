//! A single-threaded Raft consensus core: election, log replication, and
//! commit-index advancement over a cooperative `mio` reactor, with no
//! locks and no worker threads. `ConsensusEngine` is transport-agnostic
//! (it returns outbound messages rather than sending them); `Transport`
//! and `Node` wire it to real sockets.

pub mod client;
pub mod codec;
pub mod config;
pub mod consensus;
pub mod error;
pub mod identity;
pub mod log;
pub mod peer;
pub mod state_machine;
pub mod tick;
pub mod transport;

pub use consensus::{ConsensusEngine, EngineConfig, Outbound, Role};
pub use error::RaftError;
pub use identity::NodeId;
pub use tick::Node;
