//! Glues `PeerSession`s to an `mio` reactor: accepts inbound connections,
//! dials missing outbound ones, and multiplexes readiness across every
//! peer socket plus the listener.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::codec::DecodedFrame;
use crate::config::PeerConfig;
use crate::identity::NodeId;
use crate::peer::{cluster_addr, PeerSession, RecvOutcome, SessionIdentity};

const LISTENER_TOKEN: Token = Token(0);
/// Tokens below this are reserved for roster peers (one per configured
/// peer, assigned at startup); tokens at or above it are handed out to
/// not-yet-identified inbound connections.
const INBOUND_TOKEN_BASE: usize = 1_000_000;

pub struct Transport {
    poll: Poll,
    listener: TcpListener,
    roster: Vec<PeerConfig>,
    /// Stable token per roster peer, assigned once at startup.
    roster_tokens: HashMap<NodeId, Token>,
    sessions: HashMap<Token, PeerSession>,
    next_inbound_token: usize,
}

pub enum Arrival {
    Frame { from: NodeId, frame: DecodedFrame },
    PeerDisconnected(NodeId),
}

impl Transport {
    pub fn bind(listen_addr: SocketAddr, roster: Vec<PeerConfig>) -> std::io::Result<Transport> {
        let cluster_listen = cluster_addr(listen_addr);
        let mut listener = TcpListener::bind(cluster_listen)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let roster_tokens = roster
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, Token(i + 1)))
            .collect();

        Ok(Transport {
            poll,
            listener,
            roster,
            roster_tokens,
            sessions: HashMap::new(),
            next_inbound_token: INBOUND_TOKEN_BASE,
        })
    }

    /// Attempts a non-blocking connect for every roster peer that
    /// currently has no live session.
    pub fn reconnect_missing(&mut self, now: Instant) {
        for peer in &self.roster {
            let token = self.roster_tokens[&peer.id];
            if self.sessions.contains_key(&token) {
                continue;
            }
            let target = cluster_addr(peer.addr);
            match TcpStream::connect(target) {
                Ok(mut stream) => {
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!("failed to register connecting socket to {}: {}", peer.id, e);
                        continue;
                    }
                    let session =
                        PeerSession::new(token, stream, SessionIdentity::Known(peer.id), now);
                    self.sessions.insert(token, session);
                    debug!("dialing {} at {}", peer.id, target);
                }
                Err(e) => {
                    debug!("connect to {} failed: {}", peer.id, e);
                }
            }
        }
    }

    fn accept_all(&mut self, now: Instant) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = Token(self.next_inbound_token);
                    self.next_inbound_token += 1;
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!("failed to register inbound socket from {}: {}", addr, e);
                        continue;
                    }
                    let session = PeerSession::new(token, stream, SessionIdentity::Unbound, now);
                    self.sessions.insert(token, session);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn teardown(&mut self, token: Token) -> Option<NodeId> {
        if let Some(mut session) = self.sessions.remove(&token) {
            let _ = self.poll.registry().deregister(session.stream_mut());
            session.identity()
        } else {
            None
        }
    }

    /// Sends `frame` to `to` if a live, identified session exists.
    /// Returns `false` (a no-op, not an error) if there is none yet: the
    /// next `reconnect_missing` / inbound frame will re-establish it.
    pub fn send(&mut self, to: NodeId, frame: Bytes) -> bool {
        let Some(&token) = self.roster_tokens.get(&to) else {
            return false;
        };
        match self.sessions.get_mut(&token) {
            Some(session) => {
                if !session.queue_send(frame) {
                    warn!("send buffer to {} exceeded cap, dropping link", to);
                    self.teardown(token);
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    /// One reactor turn: accepts, flushes pending writes, reads
    /// available frames, and reaps dead links. `timeout` bounds how long
    /// to block when nothing is ready (the tick loop computes this from
    /// the nearest election/heartbeat deadline).
    pub fn poll(&mut self, timeout: Duration) -> Vec<Arrival> {
        let mut events = Events::with_capacity(128);
        if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
            if e.kind() != ErrorKind::Interrupted {
                warn!("poll error: {}", e);
            }
            return Vec::new();
        }

        let now = Instant::now();
        let mut arrivals = Vec::new();
        let event_tokens: Vec<(Token, bool, bool)> = events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();

        for (token, readable, writable) in event_tokens {
            if token == LISTENER_TOKEN {
                self.accept_all(now);
                continue;
            }

            if writable {
                let flush_result = self
                    .sessions
                    .get_mut(&token)
                    .map(|s| s.flush_writes());
                if let Some(Err(_)) = flush_result {
                    if let Some(id) = self.teardown(token) {
                        arrivals.push(Arrival::PeerDisconnected(id));
                    }
                    continue;
                }
            }

            if readable {
                let outcome = self.sessions.get_mut(&token).map(|s| s.read_frames());
                match outcome {
                    Some(RecvOutcome::Frames(frames)) => {
                        for frame in frames {
                            self.route_frame(token, frame, &mut arrivals);
                        }
                    }
                    Some(RecvOutcome::Closed) => {
                        if let Some(id) = self.teardown(token) {
                            arrivals.push(Arrival::PeerDisconnected(id));
                        }
                    }
                    None => {}
                }
            }
        }
        arrivals
    }

    fn route_frame(&mut self, token: Token, frame: DecodedFrame, arrivals: &mut Vec<Arrival>) {
        let is_roster_member = self.roster.iter().any(|p| p.id == frame.sender);
        let session = match self.sessions.get_mut(&token) {
            Some(s) => s,
            None => return,
        };

        if session.identity().is_none() {
            if !is_roster_member {
                // Stray inbound session that never named a roster peer:
                // close it to avoid accumulating state.
                self.teardown(token);
                return;
            }
            session.bind_identity(frame.sender);
        }

        arrivals.push(Arrival::Frame {
            from: frame.sender,
            frame,
        });
    }
}
