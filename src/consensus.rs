//! The role state machine: term/vote bookkeeping, election, replication,
//! and commit-index advancement. This module knows nothing
//! about sockets; it consumes inbound `Message`s and produces an outbox
//! of `Message`s to send, so it can be driven and tested without a real
//! transport.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::Rng;

use crate::client::{CommandHandle, CommandOutcome};
use crate::codec::Message;
use crate::error::RaftError;
use crate::identity::NodeId;
use crate::log::{LogEntry, LogView, PersistentLog, PrefixCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A message this node wants sent to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: NodeId,
    pub message: Message,
}

/// Per-peer replication bookkeeping. The
/// transport/session side of a peer (buffers, socket) lives in `peer.rs`;
/// this is only what the consensus engine needs to drive replication.
#[derive(Debug, Clone)]
struct PeerReplicationState {
    next_index: u64,
    match_index: u64,
    /// Highest entry included in the most recently sent AppendEntries to
    /// this peer; `None` for a pure heartbeat.
    last_sent_entry: Option<(u64, u64)>,
    last_heartbeat_sent: Instant,
}

impl PeerReplicationState {
    fn new(next_index: u64, now: Instant) -> PeerReplicationState {
        PeerReplicationState {
            next_index,
            match_index: 0,
            last_sent_entry: None,
            last_heartbeat_sent: now,
        }
    }
}

pub struct EngineConfig {
    pub id: NodeId,
    pub peers: Vec<NodeId>,
    pub election_timeout: Duration,
    pub heartbeat_interval: Duration,
}

/// Entries the tick loop should hand to the state machine, in order.
pub struct ApplyJob {
    pub entry: LogEntry,
}

pub struct ConsensusEngine<P: PersistentLog> {
    id: NodeId,
    role: Role,
    current_term: u64,
    voted_for: Option<NodeId>,
    leader: Option<NodeId>,
    votes_granted: usize,
    last_applied: u64,
    last_activity_time: Instant,
    election_deadline: Instant,
    election_timeout: Duration,
    heartbeat_interval: Duration,
    quorum_size: usize,
    log: LogView<P>,
    peers: HashMap<NodeId, PeerReplicationState>,
    pending: HashMap<u64, CommandHandle>,
}

impl<P: PersistentLog> ConsensusEngine<P> {
    /// Restores `current_term`/`voted_for` from the persisted term/vote
    /// record before entering the reactor loop, alongside the persisted
    /// log entries `log` already replayed. Without this, a vote granted
    /// just before a crash would be forgotten on restart, letting the
    /// node vote twice in the same term.
    pub fn new(config: EngineConfig, mut log: LogView<P>, now: Instant) -> Result<ConsensusEngine<P>, RaftError> {
        let quorum_size = (config.peers.len() + 1) / 2 + 1;
        let mut peers = HashMap::new();
        for peer in &config.peers {
            peers.insert(*peer, PeerReplicationState::new(1, now));
        }
        let (persisted_term, persisted_voted_for) = log.load_term_vote()?;
        let log_term = log.current_term();
        // The persisted term/vote record and the persisted log entries are
        // written independently; take whichever observed the higher term,
        // and only trust the restored vote if it was cast in that term.
        let current_term = persisted_term.max(log_term);
        let voted_for = if persisted_term >= log_term {
            persisted_voted_for
        } else {
            None
        };
        let mut engine = ConsensusEngine {
            id: config.id,
            role: Role::Follower,
            current_term,
            voted_for,
            leader: None,
            votes_granted: 0,
            last_applied: 0,
            last_activity_time: now,
            election_deadline: now,
            election_timeout: config.election_timeout,
            heartbeat_interval: config.heartbeat_interval,
            quorum_size,
            log,
            peers,
            pending: HashMap::new(),
        };
        engine.election_deadline = engine.new_election_deadline(now);
        Ok(engine)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.leader
    }

    pub fn commit_index(&self) -> u64 {
        self.log.commit_index()
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// When the next election timeout fires, absent other activity
    /// resetting it first. Used by the tick loop to bound its poll
    /// timeout.
    pub fn election_deadline(&self) -> Instant {
        self.election_deadline
    }

    /// When the next heartbeat/replication round is due, if this node is
    /// leader. `None` for followers and candidates, who have no
    /// heartbeats to send.
    pub fn next_heartbeat_deadline(&self) -> Option<Instant> {
        if self.role != Role::Leader {
            return None;
        }
        self.peers
            .values()
            .map(|s| s.last_heartbeat_sent + self.heartbeat_interval)
            .min()
    }

    fn new_election_deadline(&self, now: Instant) -> Instant {
        let base_ms = self.election_timeout.as_millis().max(1) as u64;
        let extra = rand::thread_rng().gen_range(0..base_ms);
        now + Duration::from_millis(base_ms + extra)
    }

    fn touch_activity(&mut self, now: Instant) {
        self.last_activity_time = now;
        self.election_deadline = self.new_election_deadline(now);
    }

    fn quorum_of_one(&self) -> bool {
        self.peers.is_empty()
    }

    // ---- Election ----

    /// Starts a new election: term bump, self-vote, broadcast RequestVote.
    /// Persists the new term/self-vote before any RequestVote goes out, per
    /// the durability rule a candidate's own vote must obey.
    pub fn start_election(&mut self, now: Instant) -> Result<Vec<Outbound>, RaftError> {
        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.votes_granted = 1; // self-vote
        self.leader = None;
        self.touch_activity(now);

        info!(
            "{} starting election for term {}",
            self.id, self.current_term
        );

        self.log.persist_term_vote(self.current_term, self.voted_for)?;

        let msg = Message::RequestVote {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.log.current_index(),
            last_log_term: self.log.current_term(),
        };
        Ok(self
            .peers
            .keys()
            .map(|&to| Outbound {
                to,
                message: msg.clone(),
            })
            .collect())
    }

    /// Whether a follower/candidate's election timer has elapsed.
    pub fn should_start_election(&self, now: Instant) -> bool {
        self.role != Role::Leader && now >= self.election_deadline
    }

    fn is_log_up_to_date(&self, last_log_index: u64, last_log_term: u64) -> bool {
        let my_term = self.log.current_term();
        let my_index = self.log.current_index();
        !(my_index > last_log_index || my_term > last_log_term)
    }

    /// Adopts a higher term if present, stepping down to Follower. Mirrors
    /// the any-role-steps-down-on-higher-term rule.
    fn maybe_adopt_term(&mut self, term: u64) -> bool {
        if term > self.current_term {
            self.current_term = term;
            self.role = Role::Follower;
            self.voted_for = None;
            self.leader = None;
            self.fail_pending_non_leader();
            true
        } else {
            false
        }
    }

    fn fail_pending_non_leader(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.complete(Err(RaftError::NotLeader));
        }
    }

    /// Persists the (possibly unchanged) term/vote before the response
    /// leaves this node, so a crash right after granting a vote can never
    /// resurrect the pre-grant `voted_for` on restart.
    pub fn on_request_vote(
        &mut self,
        from: NodeId,
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
        now: Instant,
    ) -> Result<Message, RaftError> {
        self.maybe_adopt_term(term);

        let vote_granted = if term < self.current_term {
            false
        } else {
            let already_voted_elsewhere = matches!(self.voted_for, Some(v) if v != from);
            let up_to_date = self.is_log_up_to_date(last_log_index, last_log_term);

            if already_voted_elsewhere || !up_to_date {
                debug!(
                    "{} denies vote to {} (voted_for={:?}, up_to_date={})",
                    self.id, from, self.voted_for, up_to_date
                );
                false
            } else {
                self.voted_for = Some(from);
                self.touch_activity(now);
                info!("{} grants vote to {} for term {}", self.id, from, term);
                true
            }
        };

        self.log.persist_term_vote(self.current_term, self.voted_for)?;

        Ok(Message::RequestVoteResponse {
            term: self.current_term,
            vote_granted,
        })
    }

    pub fn on_request_vote_response(
        &mut self,
        term: u64,
        vote_granted: bool,
        now: Instant,
    ) -> Vec<Outbound> {
        if term > self.current_term {
            self.maybe_adopt_term(term);
            return Vec::new();
        }
        if self.role != Role::Candidate || term != self.current_term {
            return Vec::new();
        }
        if vote_granted {
            self.votes_granted += 1;
            if self.votes_granted >= self.quorum_size {
                return self.become_leader(now);
            }
        }
        Vec::new()
    }

    /// Re-checks the win condition; idempotent if already leader.
    pub fn maybe_become_leader(&mut self, now: Instant) -> Vec<Outbound> {
        if self.role == Role::Candidate && self.votes_granted >= self.quorum_size {
            self.become_leader(now)
        } else {
            Vec::new()
        }
    }

    fn become_leader(&mut self, now: Instant) -> Vec<Outbound> {
        self.role = Role::Leader;
        self.leader = Some(self.id);
        let next = self.log.current_index() + 1;
        for state in self.peers.values_mut() {
            *state = PeerReplicationState::new(next, now);
        }
        info!("{} became leader for term {}", self.id, self.current_term);
        self.replication_round(now, true)
    }

    // ---- AppendEntries ----

    pub fn on_append_entries(
        &mut self,
        from: NodeId,
        term: u64,
        prev_log_index: u64,
        prev_log_term: u64,
        leader_commit_index: u64,
        entries: Vec<LogEntry>,
        now: Instant,
    ) -> Result<Message, RaftError> {
        if term < self.current_term {
            return Ok(Message::AppendEntriesResponse {
                term: self.current_term,
                index: self.log.current_index(),
                commit_index: self.log.commit_index(),
                ok: false,
            });
        }

        self.touch_activity(now);
        if self.role == Role::Candidate {
            self.fail_pending_non_leader();
            self.role = Role::Follower;
        }
        self.maybe_adopt_term(term);
        self.role = Role::Follower;
        self.leader = Some(from);

        if self.log.verify_prev(prev_log_index, prev_log_term) == PrefixCheck::Mismatch {
            return Ok(Message::AppendEntriesResponse {
                term: self.current_term,
                index: self.log.current_index(),
                commit_index: self.log.commit_index(),
                ok: false,
            });
        }

        self.log.append_batch(&entries)?;
        self.log.commit_to(leader_commit_index);
        self.log.sync()?;

        Ok(Message::AppendEntriesResponse {
            term: self.current_term,
            index: self.log.current_index(),
            commit_index: self.log.commit_index(),
            ok: true,
        })
    }

    pub fn on_append_entries_response(
        &mut self,
        from: NodeId,
        term: u64,
        ok: bool,
        now: Instant,
    ) -> Result<(), RaftError> {
        if term > self.current_term {
            self.maybe_adopt_term(term);
            return Ok(());
        }
        if self.role != Role::Leader {
            return Ok(());
        }
        let Some(state) = self.peers.get_mut(&from) else {
            return Ok(());
        };
        if ok {
            if let Some((index, _)) = state.last_sent_entry.take() {
                state.next_index = index + 1;
                state.match_index = index;
            }
        } else {
            state.next_index = state.next_index.saturating_sub(1).max(1);
            warn!(
                "{} log mismatch with {}, retrying at next_index={}",
                self.id, from, state.next_index
            );
        }
        let _ = now;
        self.advance_commit_index()
    }

    fn advance_commit_index(&mut self) -> Result<(), RaftError> {
        if self.role != Role::Leader {
            return Ok(());
        }
        let mut match_indices: Vec<u64> = self.peers.values().map(|s| s.match_index).collect();
        match_indices.push(self.log.current_index());
        match_indices.sort_unstable_by(|a, b| b.cmp(a)); // descending
        let n = match_indices[self.quorum_size - 1];
        if n > self.log.commit_index() && self.log.term_at(n) == Some(self.current_term) {
            self.log.set_commit_index(n);
            self.log.sync()?;
            info!("{} advanced commit_index to {}", self.id, n);
        }
        Ok(())
    }

    // ---- Replication / heartbeats ----

    /// Sends AppendEntries to every peer whose heartbeat interval has
    /// elapsed (or all peers, if `force`), carrying new entries when the
    /// peer's `next_index` is behind.
    pub fn replication_round(&mut self, now: Instant, force: bool) -> Vec<Outbound> {
        if self.role != Role::Leader {
            return Vec::new();
        }
        let current_term = self.current_term;
        let leader_commit = self.log.commit_index();
        let current_index = self.log.current_index();

        let mut outbound = Vec::new();
        for (&peer, state) in self.peers.iter_mut() {
            if !force && now.duration_since(state.last_heartbeat_sent) < self.heartbeat_interval {
                continue;
            }
            let prev_log_index = state.next_index.saturating_sub(1);
            let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);

            let entries = if state.next_index <= current_index {
                let mut batch = self.log.entries_from(state.next_index);
                batch.truncate(crate::codec::MAX_ENTRIES_PER_APPEND);
                batch
            } else {
                Vec::new()
            };

            state.last_sent_entry = entries.last().map(|e| (e.index, e.term));
            state.last_heartbeat_sent = now;

            outbound.push(Outbound {
                to: peer,
                message: Message::AppendEntries {
                    term: current_term,
                    leader_id: self.id,
                    prev_log_index,
                    prev_log_term,
                    leader_commit_index: leader_commit,
                    entries,
                },
            });
        }
        outbound
    }

    // ---- Client submission ----

    pub fn submit(
        &mut self,
        command_name: String,
        command_payload: Vec<u8>,
        handle: CommandHandle,
    ) -> Result<u64, RaftError> {
        if self.role != Role::Leader {
            handle.complete(Err(RaftError::NotLeader));
            return Err(RaftError::NotLeader);
        }
        let entry = LogEntry {
            index: self.log.current_index() + 1,
            term: self.current_term,
            command_name,
            command_payload,
        };
        let index = entry.index;
        self.log.append(entry)?;
        self.log.sync()?;
        self.pending.insert(index, handle);

        if self.quorum_of_one() {
            self.log.set_commit_index(self.log.current_index());
        }
        Ok(index)
    }

    // ---- Apply loop ----

    /// Returns, in order, the committed-but-unapplied entries. The caller
    /// applies each via the state machine and reports the result with
    /// `finish_apply`.
    pub fn take_ready_to_apply(&mut self) -> Vec<ApplyJob> {
        let mut jobs = Vec::new();
        while self.last_applied < self.log.commit_index() {
            let next_index = self.last_applied + 1;
            if let Some(entry) = self.log.entry_at(next_index) {
                jobs.push(ApplyJob {
                    entry: entry.clone(),
                });
                self.last_applied = next_index;
            } else {
                break;
            }
        }
        jobs
    }

    /// Completes the pending client handle for `index`, if this node was
    /// the leader that accepted it. Errors surface to the caller; last_applied
    /// is never rewound.
    pub fn finish_apply(&mut self, index: u64, outcome: CommandOutcome) {
        if let Some(handle) = self.pending.remove(&index) {
            handle.complete(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryPersistentLog;

    fn id(s: &str) -> NodeId {
        NodeId::from_str_padded(s)
    }

    fn engine(peers: &[&str]) -> ConsensusEngine<MemoryPersistentLog> {
        let now = Instant::now();
        let log = LogView::load(MemoryPersistentLog::default()).unwrap();
        let config = EngineConfig {
            id: id("self"),
            peers: peers.iter().map(|s| id(s)).collect(),
            election_timeout: Duration::from_millis(150),
            heartbeat_interval: Duration::from_millis(75),
        };
        ConsensusEngine::new(config, log, now).unwrap()
    }

    #[test]
    fn starts_as_follower_at_term_zero() {
        let e = engine(&["b", "c"]);
        assert_eq!(e.role(), Role::Follower);
        assert_eq!(e.current_term(), 0);
    }

    #[test]
    fn election_from_cold_start_wins_with_quorum() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        let out = e.start_election(now).unwrap();
        assert_eq!(e.role(), Role::Candidate);
        assert_eq!(e.current_term(), 1);
        assert_eq!(out.len(), 2);

        // quorum_size = 2 for N=3; self-vote already counts as 1, so a
        // single granted vote reaches quorum.
        let became_leader = e.on_request_vote_response(1, true, now);
        assert_eq!(e.role(), Role::Leader);
        assert_eq!(became_leader.len(), 2); // initial heartbeats to both peers
    }

    #[test]
    fn higher_term_response_steps_down_even_if_granted() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        e.start_election(now).unwrap();
        e.on_request_vote_response(5, true, now);
        assert_eq!(e.role(), Role::Follower);
        assert_eq!(e.current_term(), 5);
    }

    #[test]
    fn vote_request_with_stale_term_is_denied() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        e.start_election(now).unwrap(); // term 1
        e.start_election(now).unwrap(); // term 2
        let resp = e.on_request_vote(id("b"), 1, 0, 0, now).unwrap();
        match resp {
            Message::RequestVoteResponse { vote_granted, .. } => assert!(!vote_granted),
            _ => panic!(),
        }
    }

    #[test]
    fn re_grant_to_same_candidate_is_idempotent() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        let r1 = e.on_request_vote(id("b"), 1, 0, 0, now).unwrap();
        let r2 = e.on_request_vote(id("b"), 1, 0, 0, now).unwrap();
        assert_eq!(r1, Message::RequestVoteResponse { term: 1, vote_granted: true });
        assert_eq!(r2, Message::RequestVoteResponse { term: 1, vote_granted: true });
    }

    #[test]
    fn denies_second_candidate_after_voting() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        e.on_request_vote(id("b"), 1, 0, 0, now).unwrap();
        let resp = e.on_request_vote(id("c"), 1, 0, 0, now).unwrap();
        match resp {
            Message::RequestVoteResponse { vote_granted, .. } => assert!(!vote_granted),
            _ => panic!(),
        }
    }

    #[test]
    fn vote_grant_is_durably_persisted_before_the_response_is_built() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        e.on_request_vote(id("b"), 1, 0, 0, now).unwrap();

        // A crash right after this point must not be able to forget the
        // grant: the term/vote record backing the log view has to already
        // reflect it, not just the in-memory `voted_for`.
        let (term, voted_for) = e.log.load_term_vote().unwrap();
        assert_eq!(term, 1);
        assert_eq!(voted_for, Some(id("b")));
    }

    #[test]
    fn candidacy_term_and_self_vote_are_persisted_before_requesting_votes() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        e.start_election(now).unwrap();

        let (term, voted_for) = e.log.load_term_vote().unwrap();
        assert_eq!(term, 1);
        assert_eq!(voted_for, Some(id("self")));
    }

    #[test]
    fn single_node_cluster_commits_immediately() {
        let now = Instant::now();
        let mut e = engine(&[]);
        e.start_election(now).unwrap();
        e.on_request_vote_response(1, true, now); // n/a, no peers, becomes leader via maybe_become_leader
        let _ = e.maybe_become_leader(now);
        assert_eq!(e.role(), Role::Leader);

        let handle = CommandHandle::new(|_| {});
        e.submit("SET".into(), b"x 1".to_vec(), handle).unwrap();
        assert_eq!(e.commit_index(), 1);
    }

    #[test]
    fn append_entries_from_stale_term_is_rejected() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        e.start_election(now).unwrap(); // term 1
        e.start_election(now).unwrap(); // term 2
        let resp = e
            .on_append_entries(id("b"), 1, 0, 0, 0, vec![], now)
            .unwrap();
        match resp {
            Message::AppendEntriesResponse { ok, .. } => assert!(!ok),
            _ => panic!(),
        }
    }

    #[test]
    fn append_entries_replicates_and_commits_on_quorum() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        let resp = e
            .on_append_entries(
                id("leader"),
                1,
                0,
                0,
                0,
                vec![LogEntry {
                    index: 1,
                    term: 1,
                    command_name: "SET".into(),
                    command_payload: b"x 1".to_vec(),
                }],
                now,
            )
            .unwrap();
        match resp {
            Message::AppendEntriesResponse { ok, index, .. } => {
                assert!(ok);
                assert_eq!(index, 1);
            }
            _ => panic!(),
        }
        assert_eq!(e.leader(), Some(id("leader")));
    }

    #[test]
    fn candidate_steps_down_on_append_entries_with_equal_term() {
        let now = Instant::now();
        let mut e = engine(&["b", "c"]);
        e.start_election(now).unwrap(); // term 1, Candidate
        let resp = e.on_append_entries(id("b"), 1, 0, 0, 0, vec![], now).unwrap();
        assert_eq!(e.role(), Role::Follower);
        match resp {
            Message::AppendEntriesResponse { ok, .. } => assert!(ok),
            _ => panic!(),
        }
    }

    fn leader_with_quorum(peers: &[&str]) -> ConsensusEngine<MemoryPersistentLog> {
        let now = Instant::now();
        let mut e = engine(peers);
        e.start_election(now).unwrap();
        let term = e.current_term();
        e.on_request_vote_response(term, true, now);
        e
    }

    #[test]
    fn append_entries_response_success_advances_peer_cursor() {
        let now = Instant::now();
        let mut e = leader_with_quorum(&["b", "c"]);
        let term = e.current_term();

        let handle = CommandHandle::new(|_| {});
        e.submit("SET".into(), b"x 1".to_vec(), handle).unwrap();
        e.replication_round(now, true);
        assert_eq!(e.peers.get(&id("b")).unwrap().last_sent_entry, Some((1, term)));

        e.on_append_entries_response(id("b"), term, true, now).unwrap();
        let state = e.peers.get(&id("b")).unwrap();
        assert_eq!(state.next_index, 2);
        assert_eq!(state.match_index, 1);
        assert_eq!(state.last_sent_entry, None);
    }

    #[test]
    fn append_entries_response_failure_decrements_next_index() {
        let now = Instant::now();
        let mut e = leader_with_quorum(&["b", "c"]);
        let term = e.current_term();

        // Get b's next_index past 1 first, so the decrement below is
        // actually observable rather than clamped at the floor.
        let h1 = CommandHandle::new(|_| {});
        e.submit("SET".into(), b"x 1".to_vec(), h1).unwrap();
        e.replication_round(now, true);
        e.on_append_entries_response(id("b"), term, true, now).unwrap();
        assert_eq!(e.peers.get(&id("b")).unwrap().next_index, 2);

        let h2 = CommandHandle::new(|_| {});
        e.submit("SET".into(), b"x 2".to_vec(), h2).unwrap();
        e.replication_round(now, true);

        e.on_append_entries_response(id("b"), term, false, now).unwrap();
        assert_eq!(e.peers.get(&id("b")).unwrap().next_index, 1);
    }

    #[test]
    fn prior_term_entries_do_not_commit_on_replica_count_alone() {
        let now = Instant::now();
        let mut e = leader_with_quorum(&["b", "c"]);
        let term1 = e.current_term();

        // Two entries appended under term 1, acknowledged by no peer yet.
        let h1 = CommandHandle::new(|_| {});
        e.submit("SET".into(), b"x 1".to_vec(), h1).unwrap();
        let h2 = CommandHandle::new(|_| {});
        e.submit("SET".into(), b"x 2".to_vec(), h2).unwrap();
        assert_eq!(e.commit_index(), 0);

        // A later election makes this node leader again in term 2
        // without appending anything new there; the term-1 entries are
        // still the tail of its log.
        e.start_election(now).unwrap();
        let term2 = e.current_term();
        e.on_request_vote_response(term2, true, now);
        assert_eq!(e.role(), Role::Leader);
        assert_eq!(e.log.term_at(2), Some(term1));

        // Both peers "report" match at index 2 — a literal majority, but
        // it is a term-1 entry under a term-2 leader, so the guard must
        // refuse to derive a commit from it.
        for peer in ["b", "c"] {
            e.peers.get_mut(&id(peer)).unwrap().match_index = 2;
        }
        e.advance_commit_index().unwrap();
        assert_eq!(e.commit_index(), 0);
    }
}
