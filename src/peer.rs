//! Peer session: the transport-only half of a peer connection. Owns
//! the socket, send/receive buffers, and reconnection
//! bookkeeping. Carries no consensus logic; replication cursors live in
//! `consensus::ConsensusEngine`.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use mio::net::TcpStream;
use mio::Token;

use crate::codec::{self, DecodedFrame};
use crate::identity::NodeId;

/// Caps per-peer outbound buffering; exceeding this tears the link down
/// rather than growing unboundedly.
pub const MAX_SEND_BUFFER_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug)]
pub enum SessionIdentity {
    /// An outbound session: we dialed this peer and already know who they are.
    Known(NodeId),
    /// An inbound session: identity isn't established until the first
    /// valid frame names a roster member.
    Unbound,
}

/// A live connection to one peer.
pub struct PeerSession {
    pub token: Token,
    stream: TcpStream,
    identity: SessionIdentity,
    send_queue: VecDeque<Bytes>,
    send_offset: usize,
    send_buffered_bytes: usize,
    recv_buf: BytesMut,
    pub last_activity_time: Instant,
}

pub enum RecvOutcome {
    /// Zero or more complete frames were reassembled.
    Frames(Vec<DecodedFrame>),
    /// The link is no longer usable and must be torn down.
    Closed,
}

impl PeerSession {
    pub fn new(token: Token, stream: TcpStream, identity: SessionIdentity, now: Instant) -> PeerSession {
        let _ = stream.set_nodelay(true);
        PeerSession {
            token,
            stream,
            identity,
            send_queue: VecDeque::new(),
            send_offset: 0,
            send_buffered_bytes: 0,
            recv_buf: BytesMut::with_capacity(4096),
            last_activity_time: now,
        }
    }

    pub fn identity(&self) -> Option<NodeId> {
        match self.identity {
            SessionIdentity::Known(id) => Some(id),
            SessionIdentity::Unbound => None,
        }
    }

    pub fn bind_identity(&mut self, id: NodeId) {
        self.identity = SessionIdentity::Known(id);
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Queues a frame for sending; returns `false` if this would exceed
    /// the per-peer send buffer cap, in which case the caller should tear
    /// the link down (it's safe: replication is idempotent, per §5).
    pub fn queue_send(&mut self, frame: Bytes) -> bool {
        if self.send_buffered_bytes + frame.len() > MAX_SEND_BUFFER_BYTES {
            return false;
        }
        self.send_buffered_bytes += frame.len();
        self.send_queue.push_back(frame);
        true
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.send_queue.is_empty()
    }

    /// Drains as much of the send queue as the socket will currently
    /// accept. Returns `Err` on any I/O error other than would-block,
    /// which the caller treats as a teardown signal.
    pub fn flush_writes(&mut self) -> io::Result<()> {
        while let Some(front) = self.send_queue.front() {
            let remaining = &front[self.send_offset..];
            match self.stream.write(remaining) {
                Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "peer closed for write")),
                Ok(n) => {
                    self.send_offset += n;
                    if self.send_offset >= front.len() {
                        let sent = self.send_queue.pop_front().unwrap();
                        self.send_buffered_bytes -= sent.len();
                        self.send_offset = 0;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reads available bytes and reassembles as many complete frames as
    /// are present, per the framing rule: read the 8-byte
    /// length prefix, then wait for the full declared length.
    pub fn read_frames(&mut self) -> RecvOutcome {
        let mut tmp = [0u8; 4096];
        loop {
            match self.stream.read(&mut tmp) {
                Ok(0) => return RecvOutcome::Closed,
                Ok(n) => self.recv_buf.extend_from_slice(&tmp[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return RecvOutcome::Closed,
            }
        }

        let mut frames = Vec::new();
        loop {
            let Some(total_len) = codec::peek_frame_len(&self.recv_buf) else {
                break;
            };
            let total_len = total_len as usize;
            if total_len < codec::HEADER_LEN || self.recv_buf.len() < total_len {
                break;
            }
            let frame_bytes = self.recv_buf.split_to(total_len);
            match codec::decode_frame(&frame_bytes) {
                Ok(decoded) => frames.push(decoded),
                // Any malformed frame is a protocol violation: drop the
                // link rather than accepting the rest of the stream.
                Err(_) => return RecvOutcome::Closed,
            }
        }
        RecvOutcome::Frames(frames)
    }
}

/// Where to dial a roster peer: its configured address, cluster-port
/// adjusted: cluster port = service port + fixed offset.
pub const CLUSTER_PORT_OFFSET: u16 = 10000;

pub fn cluster_addr(base: SocketAddr) -> SocketAddr {
    let mut addr = base;
    addr.set_port(base.port() + CLUSTER_PORT_OFFSET);
    addr
}
