//! The reactor-driven tick loop: on every turn, reconnect
//! missing peer links, dispatch arrived frames into the engine, apply
//! newly committed entries, and fire elections/heartbeats whose deadline
//! has passed. This is the only module that touches both `Transport` and
//! `ConsensusEngine`.

use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::client::ClientRequest;
use crate::codec::{encode_frame, Message};
use crate::consensus::{ConsensusEngine, Outbound};
use crate::error::RaftError;
use crate::log::PersistentLog;
use crate::state_machine::StateMachine;
use crate::transport::{Arrival, Transport};

/// Upper bound on how long a single reactor turn blocks when nothing is
/// scheduled sooner, so the process stays responsive to new client
/// submissions arriving between deadlines.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Every `RaftError` the engine can return originates from the persistent
/// log (`append`, `append_batch`'s truncate, or `sync`). A failure there
/// means the persisted and in-memory logs may have diverged, so the
/// process aborts rather than limping on with unprovable durability.
fn abort_on_durability_failure(e: &RaftError) {
    match e {
        RaftError::Durability(msg) => {
            error!("fatal log durability failure, aborting: {}", msg);
            std::process::abort();
        }
        RaftError::Io(err) => {
            error!("fatal log i/o failure, aborting: {}", err);
            std::process::abort();
        }
        _ => {}
    }
}

pub struct Node<P: PersistentLog, S: StateMachine> {
    engine: ConsensusEngine<P>,
    transport: Transport,
    state_machine: S,
    self_port: u16,
}

impl<P: PersistentLog, S: StateMachine> Node<P, S> {
    pub fn new(
        engine: ConsensusEngine<P>,
        transport: Transport,
        state_machine: S,
        self_port: u16,
    ) -> Node<P, S> {
        Node {
            engine,
            transport,
            state_machine,
            self_port,
        }
    }

    pub fn engine(&self) -> &ConsensusEngine<P> {
        &self.engine
    }

    /// Hands a parsed client command to the engine. Fails fast with
    /// `NotLeader` if this node isn't currently leader.
    pub fn submit(&mut self, request: ClientRequest) -> Result<u64, RaftError> {
        let result =
            self.engine
                .submit(request.command_name, request.command_payload, request.handle);
        if let Err(e) = &result {
            abort_on_durability_failure(e);
        }
        result
    }

    fn send_outbound(&mut self, outbound: Vec<Outbound>) {
        for msg in outbound {
            let frame = encode_frame(self.engine.id(), self.self_port, &msg.message);
            self.transport.send(msg.to, frame);
        }
    }

    /// Drains entries the engine has marked ready-to-apply, running each
    /// through the state machine and completing any waiting client
    /// handle.
    fn apply_ready(&mut self) {
        for job in self.engine.take_ready_to_apply() {
            let index = job.entry.index;
            let outcome = self
                .state_machine
                .apply(&job.entry)
                .map_err(|e| RaftError::Applicator(e.0));
            self.engine.finish_apply(index, outcome);
        }
    }

    /// Computes how long the next reactor turn may block: the sooner of
    /// the election deadline, the next heartbeat deadline (if leader), or
    /// the fallback cap, so the loop never sleeps through a submission
    /// racing in between deadlines.
    fn next_poll_timeout(&self, now: Instant) -> Duration {
        let mut deadline = now + MAX_POLL_INTERVAL;
        let election = self.engine.election_deadline();
        if election < deadline {
            deadline = election;
        }
        if let Some(heartbeat) = self.engine.next_heartbeat_deadline() {
            if heartbeat < deadline {
                deadline = heartbeat;
            }
        }
        deadline.saturating_duration_since(now)
    }

    /// One full turn of the loop: redial missing peers, block for up to
    /// the nearest deadline, dispatch whatever arrived, then check
    /// election/heartbeat timers and apply newly committed entries.
    pub fn tick(&mut self, now: Instant) {
        self.transport.reconnect_missing(now);

        let timeout = self.next_poll_timeout(now);
        let arrivals = self.transport.poll(timeout);
        let turn_now = Instant::now();

        for arrival in arrivals {
            match arrival {
                Arrival::Frame { from, frame } => self.handle_frame(from, frame.message, turn_now),
                Arrival::PeerDisconnected(id) => {
                    info!("link to {} dropped, will redial", id);
                }
            }
        }

        if self.engine.should_start_election(turn_now) {
            match self.engine.start_election(turn_now) {
                Ok(out) => self.send_outbound(out),
                Err(e) => {
                    abort_on_durability_failure(&e);
                    warn!("failed to persist term/vote starting an election: {}", e);
                }
            }
        } else {
            let out = self.engine.maybe_become_leader(turn_now);
            self.send_outbound(out);
        }

        let heartbeats = self.engine.replication_round(turn_now, false);
        self.send_outbound(heartbeats);

        self.apply_ready();
    }

    fn handle_frame(
        &mut self,
        from: crate::identity::NodeId,
        message: Message,
        now: Instant,
    ) {
        match message {
            Message::RequestVote {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
            } => {
                match self
                    .engine
                    .on_request_vote(candidate_id, term, last_log_index, last_log_term, now)
                {
                    Ok(response) => self.send_outbound(vec![Outbound {
                        to: from,
                        message: response,
                    }]),
                    Err(e) => {
                        abort_on_durability_failure(&e);
                        warn!(
                            "failed to persist term/vote before replying to {}: {}",
                            from, e
                        );
                    }
                }
            }
            Message::RequestVoteResponse { term, vote_granted } => {
                let out = self.engine.on_request_vote_response(term, vote_granted, now);
                self.send_outbound(out);
            }
            Message::AppendEntries {
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                leader_commit_index,
                entries,
            } => {
                match self.engine.on_append_entries(
                    leader_id,
                    term,
                    prev_log_index,
                    prev_log_term,
                    leader_commit_index,
                    entries,
                    now,
                ) {
                    Ok(response) => self.send_outbound(vec![Outbound {
                        to: from,
                        message: response,
                    }]),
                    Err(e) => {
                        abort_on_durability_failure(&e);
                        warn!("append_entries from {} failed: {}", from, e);
                    }
                }
            }
            Message::AppendEntriesResponse {
                term,
                index: _,
                commit_index: _,
                ok,
            } => {
                if let Err(e) = self.engine.on_append_entries_response(from, term, ok, now) {
                    abort_on_durability_failure(&e);
                    warn!("commit-index sync after response from {} failed: {}", from, e);
                }
            }
        }
    }

    /// Runs the reactor loop until the process is killed. `main` is the
    /// only caller; everything else drives `tick` directly for testing.
    pub fn run_forever(&mut self) -> ! {
        loop {
            self.tick(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::net::SocketAddr;
    use std::rc::Rc;

    use crate::client::CommandHandle;
    use crate::consensus::EngineConfig;
    use crate::log::{LogView, MemoryPersistentLog};
    use crate::state_machine::KeyValueStore;

    fn single_node(now: Instant) -> Node<MemoryPersistentLog, KeyValueStore> {
        let id = crate::identity::NodeId::from_str_padded("solo");
        let log = LogView::load(MemoryPersistentLog::default()).unwrap();
        let engine = ConsensusEngine::new(
            EngineConfig {
                id,
                peers: vec![],
                election_timeout: Duration::from_millis(50),
                heartbeat_interval: Duration::from_millis(25),
            },
            log,
            now,
        )
        .unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let transport = Transport::bind(addr, vec![]).unwrap();
        Node::new(engine, transport, KeyValueStore::default(), addr.port())
    }

    #[test]
    fn single_node_command_applies_after_becoming_leader() {
        let now = Instant::now();
        let mut node = single_node(now);

        let out = node.engine.start_election(now).unwrap();
        assert!(out.is_empty()); // no peers to vote-request
        let _ = node.engine.maybe_become_leader(now);

        let seen: Rc<RefCell<Option<crate::client::CommandOutcome>>> = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        let handle = CommandHandle::new(move |outcome| *seen2.borrow_mut() = Some(outcome));
        node.submit(ClientRequest {
            command_name: "SET".into(),
            command_payload: b"k v".to_vec(),
            handle,
        })
        .unwrap();

        node.apply_ready();
        assert_eq!(seen.borrow().as_ref().unwrap().as_ref().unwrap(), b"OK");
    }
}
