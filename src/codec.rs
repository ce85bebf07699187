//! Wire envelope and payload framing.
//!
//! Layout, all integers big-endian:
//! `[4B "RCmb"][2B version][2B kind][4B total_len][40B sender id][2B sender port][payload]`
//!
//! `total_len` counts the entire frame, header included, so a reader can
//! learn how many more bytes to wait for after the first 8 bytes land.
//! The signature and field order trace directly to the cluster-bus header
//! this protocol is modeled on; it is reproduced byte-for-byte rather than
//! through a generic serialization crate, since the layout itself is the
//! contract peers must agree on.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::identity::{NodeId, NODE_ID_LEN};
use crate::log::LogEntry;

pub const SIGNATURE: [u8; 4] = *b"RCmb";
pub const VERSION: u16 = 0;

/// Header length: sig(4) + version(2) + kind(2) + total_len(4) + sender(40) + port(2)
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4 + NODE_ID_LEN + 2;

/// Bytes needed before `total_len` can be read off the wire (signature,
/// version, kind, and the length field itself).
pub const LENGTH_PREFIX_LEN: usize = 8;

pub const KIND_REQUEST_VOTE: u16 = 0;
pub const KIND_REQUEST_VOTE_RESPONSE: u16 = 1;
pub const KIND_APPEND_ENTRIES: u16 = 2;
pub const KIND_APPEND_ENTRIES_RESPONSE: u16 = 3;

/// Bound on entries carried by a single AppendEntries frame.
pub const MAX_ENTRIES_PER_APPEND: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RequestVote {
        term: u64,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    },
    RequestVoteResponse {
        term: u64,
        vote_granted: bool,
    },
    AppendEntries {
        term: u64,
        leader_id: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        leader_commit_index: u64,
        entries: Vec<LogEntry>,
    },
    AppendEntriesResponse {
        term: u64,
        index: u64,
        commit_index: u64,
        ok: bool,
    },
}

impl Message {
    fn kind(&self) -> u16 {
        match self {
            Message::RequestVote { .. } => KIND_REQUEST_VOTE,
            Message::RequestVoteResponse { .. } => KIND_REQUEST_VOTE_RESPONSE,
            Message::AppendEntries { .. } => KIND_APPEND_ENTRIES,
            Message::AppendEntriesResponse { .. } => KIND_APPEND_ENTRIES_RESPONSE,
        }
    }

    pub fn term(&self) -> u64 {
        match self {
            Message::RequestVote { term, .. }
            | Message::RequestVoteResponse { term, .. }
            | Message::AppendEntries { term, .. }
            | Message::AppendEntriesResponse { term, .. } => *term,
        }
    }
}

/// Encodes a full frame: header plus payload for `msg`, sent by `sender`
/// listening on `sender_port`.
pub fn encode_frame(sender: NodeId, sender_port: u16, msg: &Message) -> Bytes {
    let mut payload = BytesMut::new();
    encode_payload(&mut payload, msg);

    let total_len = (HEADER_LEN + payload.len()) as u32;

    let mut out = BytesMut::with_capacity(total_len as usize);
    out.put_slice(&SIGNATURE);
    out.put_u16(VERSION);
    out.put_u16(msg.kind());
    out.put_u32(total_len);
    out.put_slice(sender.as_bytes());
    out.put_u16(sender_port);
    out.put_slice(&payload);
    out.freeze()
}

/// Reads the declared total frame length from the first
/// `LENGTH_PREFIX_LEN` bytes of a buffer, if enough bytes are present.
pub fn peek_frame_len(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return None;
    }
    Some(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]))
}

pub struct DecodedFrame {
    pub sender: NodeId,
    pub sender_port: u16,
    pub message: Message,
}

/// Decodes one full frame. `buf` must contain exactly one frame's worth
/// of bytes (the caller is responsible for reassembly using
/// `peek_frame_len`).
pub fn decode_frame(mut buf: &[u8]) -> Result<DecodedFrame, CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::TooShort(buf.len()));
    }
    if &buf[0..4] != &SIGNATURE {
        return Err(CodecError::BadSignature);
    }
    let version = u16::from_be_bytes([buf[4], buf[5]]);
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let kind = u16::from_be_bytes([buf[6], buf[7]]);
    let total_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if total_len as usize != buf.len() {
        return Err(CodecError::LengthMismatch {
            declared: total_len,
            computed: buf.len() as u32,
        });
    }

    let mut sender_bytes = [0u8; NODE_ID_LEN];
    sender_bytes.copy_from_slice(&buf[12..12 + NODE_ID_LEN]);
    let sender = NodeId::from_bytes(sender_bytes);
    let port_off = 12 + NODE_ID_LEN;
    let sender_port = u16::from_be_bytes([buf[port_off], buf[port_off + 1]]);

    buf = &buf[HEADER_LEN..];
    let message = decode_payload(kind, buf)?;

    Ok(DecodedFrame {
        sender,
        sender_port,
        message,
    })
}

fn encode_payload(out: &mut BytesMut, msg: &Message) {
    match msg {
        Message::RequestVote {
            term,
            candidate_id,
            last_log_index,
            last_log_term,
        } => {
            out.put_u64(*term);
            out.put_slice(candidate_id.as_bytes());
            out.put_u64(*last_log_index);
            out.put_u64(*last_log_term);
        }
        Message::RequestVoteResponse { term, vote_granted } => {
            out.put_u64(*term);
            out.put_u8(if *vote_granted { 1 } else { 0 });
        }
        Message::AppendEntries {
            term,
            leader_id,
            prev_log_index,
            prev_log_term,
            leader_commit_index,
            entries,
        } => {
            out.put_u64(*term);
            out.put_slice(leader_id.as_bytes());
            out.put_u64(*prev_log_index);
            out.put_u64(*prev_log_term);
            out.put_u64(*leader_commit_index);
            out.put_u16(entries.len() as u16);
            for entry in entries {
                encode_entry(out, entry);
            }
        }
        Message::AppendEntriesResponse {
            term,
            index,
            commit_index,
            ok,
        } => {
            out.put_u64(*term);
            out.put_u64(*index);
            out.put_u64(*commit_index);
            out.put_u8(if *ok { 1 } else { 0 });
        }
    }
}

fn encode_entry(out: &mut BytesMut, entry: &LogEntry) {
    out.put_u64(entry.term);
    out.put_u64(entry.index);
    out.put_u16(entry.command_name.len() as u16);
    out.put_u32(entry.command_payload.len() as u32);
    out.put_slice(entry.command_name.as_bytes());
    out.put_slice(&entry.command_payload);
}

fn decode_entry(buf: &mut &[u8]) -> Result<LogEntry, CodecError> {
    if buf.len() < 8 + 8 + 2 + 4 {
        return Err(CodecError::Truncated);
    }
    let term = buf.get_u64();
    let index = buf.get_u64();
    let name_len = buf.get_u16() as usize;
    let payload_len = buf.get_u32() as usize;
    if buf.len() < name_len + payload_len {
        return Err(CodecError::Truncated);
    }
    let name_bytes = &buf[..name_len];
    let command_name = String::from_utf8_lossy(name_bytes).into_owned();
    buf.advance(name_len);
    let command_payload = buf[..payload_len].to_vec();
    buf.advance(payload_len);
    Ok(LogEntry {
        index,
        term,
        command_name,
        command_payload,
    })
}

fn decode_payload(kind: u16, mut buf: &[u8]) -> Result<Message, CodecError> {
    match kind {
        KIND_REQUEST_VOTE => {
            if buf.len() < 8 + NODE_ID_LEN + 8 + 8 {
                return Err(CodecError::Truncated);
            }
            let term = buf.get_u64();
            let mut candidate_bytes = [0u8; NODE_ID_LEN];
            candidate_bytes.copy_from_slice(&buf[..NODE_ID_LEN]);
            buf.advance(NODE_ID_LEN);
            let last_log_index = buf.get_u64();
            let last_log_term = buf.get_u64();
            Ok(Message::RequestVote {
                term,
                candidate_id: NodeId::from_bytes(candidate_bytes),
                last_log_index,
                last_log_term,
            })
        }
        KIND_REQUEST_VOTE_RESPONSE => {
            if buf.len() < 8 + 1 {
                return Err(CodecError::Truncated);
            }
            let term = buf.get_u64();
            let vote_granted = buf.get_u8() != 0;
            Ok(Message::RequestVoteResponse { term, vote_granted })
        }
        KIND_APPEND_ENTRIES => {
            if buf.len() < 8 + NODE_ID_LEN + 8 + 8 + 8 + 2 {
                return Err(CodecError::Truncated);
            }
            let term = buf.get_u64();
            let mut leader_bytes = [0u8; NODE_ID_LEN];
            leader_bytes.copy_from_slice(&buf[..NODE_ID_LEN]);
            buf.advance(NODE_ID_LEN);
            let prev_log_index = buf.get_u64();
            let prev_log_term = buf.get_u64();
            let leader_commit_index = buf.get_u64();
            let entries_count = buf.get_u16();
            if entries_count as usize > MAX_ENTRIES_PER_APPEND {
                return Err(CodecError::TooManyEntries(entries_count));
            }
            let mut entries = Vec::with_capacity(entries_count as usize);
            for _ in 0..entries_count {
                entries.push(decode_entry(&mut buf)?);
            }
            Ok(Message::AppendEntries {
                term,
                leader_id: NodeId::from_bytes(leader_bytes),
                prev_log_index,
                prev_log_term,
                leader_commit_index,
                entries,
            })
        }
        KIND_APPEND_ENTRIES_RESPONSE => {
            if buf.len() < 8 + 8 + 8 + 1 {
                return Err(CodecError::Truncated);
            }
            let term = buf.get_u64();
            let index = buf.get_u64();
            let commit_index = buf.get_u64();
            let ok = buf.get_u8() != 0;
            Ok(Message::AppendEntriesResponse {
                term,
                index,
                commit_index,
                ok,
            })
        }
        other => Err(CodecError::UnknownKind(other)),
    }
}
