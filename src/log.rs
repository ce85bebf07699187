//! Log view: the in-memory ordered sequence of log entries, backed by an
//! append-only persistent log.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::RaftError;
use crate::identity::{NodeId, NODE_ID_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub command_name: String,
    pub command_payload: Vec<u8>,
}

/// Result of checking whether a prefix matches.
#[derive(Debug, PartialEq, Eq)]
pub enum PrefixCheck {
    Ok,
    Mismatch,
}

/// The persistent collaborator the log view durably mirrors. Kept as a
/// trait so tests can swap in an in-memory fake; `FileLog` is the one
/// concrete, append-only, replay-on-startup implementation.
pub trait PersistentLog {
    fn append(&mut self, entry: &LogEntry) -> Result<(), RaftError>;
    fn truncate_from(&mut self, index: u64) -> Result<(), RaftError>;
    fn sync(&mut self) -> Result<(), RaftError>;
    /// Replays the full persisted log, in index order, for startup.
    fn replay(&mut self) -> Result<Vec<LogEntry>, RaftError>;
    /// Durably persists `current_term`/`voted_for`. Must complete before a
    /// vote grant or a candidate's own `RequestVote` leaves this node, so a
    /// crash/restart can never resurrect a stale vote in the same term.
    fn save_term_vote(&mut self, term: u64, voted_for: Option<NodeId>) -> Result<(), RaftError>;
    /// Reads back the last persisted term/vote pair, or `(0, None)` if
    /// nothing has ever been persisted.
    fn load_term_vote(&mut self) -> Result<(u64, Option<NodeId>), RaftError>;
}

/// An append-only file with each record framed as
/// `[4B record_len][term 8B][index 8B][name_len 2B][payload_len 4B][name][payload][1B terminator]`.
/// `truncate_from` rewrites the file from the retained prefix since a
/// plain append-only file cannot remove a suffix in place.
///
/// Alongside the entry log, a small sidecar file (`<path>.termvote`) holds
/// the most recently persisted `current_term`/`voted_for` pair. It is
/// rewritten in full on every vote grant or election start rather than
/// appended, since it only ever holds one record.
pub struct FileLog {
    path: PathBuf,
    meta_path: PathBuf,
    file: File,
}

const RECORD_TERMINATOR: u8 = 0xFF;

/// `term(8B) + has_vote(1B) + voted_for(40B, zero-padded when absent)`.
const TERM_VOTE_RECORD_LEN: usize = 8 + 1 + NODE_ID_LEN;

impl FileLog {
    pub fn open(path: impl AsRef<Path>) -> Result<FileLog, RaftError> {
        let path = path.as_ref().to_path_buf();
        let mut meta_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        meta_name.push(".termvote");
        let meta_path = path.with_file_name(meta_name);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(FileLog {
            path,
            meta_path,
            file,
        })
    }

    fn encode_record(entry: &LogEntry) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&entry.term.to_be_bytes());
        body.extend_from_slice(&entry.index.to_be_bytes());
        body.extend_from_slice(&(entry.command_name.len() as u16).to_be_bytes());
        body.extend_from_slice(&(entry.command_payload.len() as u32).to_be_bytes());
        body.extend_from_slice(entry.command_name.as_bytes());
        body.extend_from_slice(&entry.command_payload);

        let mut record = Vec::with_capacity(4 + body.len() + 1);
        record.extend_from_slice(&(body.len() as u32).to_be_bytes());
        record.extend_from_slice(&body);
        record.push(RECORD_TERMINATOR);
        record
    }

    /// Parses one record from `reader`. Returns `Ok(None)` at a clean EOF
    /// and treats a partial trailing record (a crash mid-write) as the
    /// end of the usable log rather than an error.
    fn read_record(reader: &mut impl Read) -> Result<Option<LogEntry>, RaftError> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let body_len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; body_len];
        if reader.read_exact(&mut body).is_err() {
            return Ok(None); // truncated tail, stop replay here
        }
        let mut terminator = [0u8; 1];
        if reader.read_exact(&mut terminator).is_err() || terminator[0] != RECORD_TERMINATOR {
            return Ok(None);
        }
        if body.len() < 8 + 8 + 2 + 4 {
            return Ok(None);
        }
        let term = u64::from_be_bytes(body[0..8].try_into().unwrap());
        let index = u64::from_be_bytes(body[8..16].try_into().unwrap());
        let name_len = u16::from_be_bytes(body[16..18].try_into().unwrap()) as usize;
        let payload_len = u32::from_be_bytes(body[18..22].try_into().unwrap()) as usize;
        let name_start = 22;
        let name_end = name_start + name_len;
        let payload_end = name_end + payload_len;
        if body.len() < payload_end {
            return Ok(None);
        }
        let command_name = String::from_utf8_lossy(&body[name_start..name_end]).into_owned();
        let command_payload = body[name_end..payload_end].to_vec();
        Ok(Some(LogEntry {
            index,
            term,
            command_name,
            command_payload,
        }))
    }
}

impl PersistentLog for FileLog {
    fn append(&mut self, entry: &LogEntry) -> Result<(), RaftError> {
        let record = Self::encode_record(entry);
        self.file.write_all(&record)?;
        Ok(())
    }

    fn truncate_from(&mut self, index: u64) -> Result<(), RaftError> {
        let retained = {
            let mut f = File::open(&self.path)?;
            let mut reader = BufReader::new(&mut f);
            let mut kept = Vec::new();
            while let Some(entry) = Self::read_record(&mut reader)? {
                if entry.index >= index {
                    break;
                }
                kept.push(entry);
            }
            kept
        };
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        for entry in &retained {
            self.append(entry)?;
        }
        self.file.flush()?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), RaftError> {
        self.file
            .sync_data()
            .map_err(|e| RaftError::Durability(e.to_string()))
    }

    fn replay(&mut self) -> Result<Vec<LogEntry>, RaftError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        while let Some(entry) = Self::read_record(&mut reader)? {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn save_term_vote(&mut self, term: u64, voted_for: Option<NodeId>) -> Result<(), RaftError> {
        let mut record = Vec::with_capacity(TERM_VOTE_RECORD_LEN);
        record.extend_from_slice(&term.to_be_bytes());
        match voted_for {
            Some(id) => {
                record.push(1);
                record.extend_from_slice(id.as_bytes());
            }
            None => {
                record.push(0);
                record.extend_from_slice(&[0u8; NODE_ID_LEN]);
            }
        }
        let mut meta_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.meta_path)?;
        meta_file.write_all(&record)?;
        meta_file
            .sync_data()
            .map_err(|e| RaftError::Durability(e.to_string()))
    }

    fn load_term_vote(&mut self) -> Result<(u64, Option<NodeId>), RaftError> {
        let bytes = match fs::read(&self.meta_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((0, None)),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < TERM_VOTE_RECORD_LEN {
            return Ok((0, None));
        }
        let term = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let has_vote = bytes[8] != 0;
        let voted_for = if has_vote {
            let mut id_bytes = [0u8; NODE_ID_LEN];
            id_bytes.copy_from_slice(&bytes[9..9 + NODE_ID_LEN]);
            Some(NodeId::from_bytes(id_bytes))
        } else {
            None
        };
        Ok((term, voted_for))
    }
}

/// In-memory persistent log stand-in, used by tests and `--single`
/// smoke runs where on-disk durability is not exercised.
#[derive(Default)]
pub struct MemoryPersistentLog {
    entries: Vec<LogEntry>,
    term_vote: (u64, Option<NodeId>),
}

impl PersistentLog for MemoryPersistentLog {
    fn append(&mut self, entry: &LogEntry) -> Result<(), RaftError> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn truncate_from(&mut self, index: u64) -> Result<(), RaftError> {
        self.entries.retain(|e| e.index < index);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), RaftError> {
        Ok(())
    }

    fn replay(&mut self) -> Result<Vec<LogEntry>, RaftError> {
        Ok(self.entries.clone())
    }

    fn save_term_vote(&mut self, term: u64, voted_for: Option<NodeId>) -> Result<(), RaftError> {
        self.term_vote = (term, voted_for);
        Ok(())
    }

    fn load_term_vote(&mut self) -> Result<(u64, Option<NodeId>), RaftError> {
        Ok(self.term_vote)
    }
}

/// The in-memory ordered log, mirroring `persistent`.
pub struct LogView<P: PersistentLog> {
    entries: Vec<LogEntry>,
    commit_index: u64,
    persistent: P,
}

impl<P: PersistentLog> LogView<P> {
    /// Replays `persistent` to rebuild the in-memory view, as done on
    /// startup.
    pub fn load(mut persistent: P) -> Result<LogView<P>, RaftError> {
        let entries = persistent.replay()?;
        Ok(LogView {
            entries,
            commit_index: 0,
            persistent,
        })
    }

    /// Durably persists `current_term`/`voted_for`. See `PersistentLog::save_term_vote`.
    pub fn persist_term_vote(&mut self, term: u64, voted_for: Option<NodeId>) -> Result<(), RaftError> {
        self.persistent.save_term_vote(term, voted_for)
    }

    /// Reads back the last persisted term/vote pair, for startup restore.
    pub fn load_term_vote(&mut self) -> Result<(u64, Option<NodeId>), RaftError> {
        self.persistent.load_term_vote()
    }

    pub fn current_index(&self) -> u64 {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    pub fn current_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    /// Term stored at `index`, `0` for `index == 0`, `None` if `index` is
    /// out of range (the "unknown" sentinel).
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.entries
            .iter()
            .find(|e| e.index == index)
            .map(|e| e.term)
    }

    fn position_of(&self, index: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.index == index)
    }

    pub fn entry_at(&self, index: u64) -> Option<&LogEntry> {
        self.entries.iter().find(|e| e.index == index)
    }

    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.index >= index)
            .cloned()
            .collect()
    }

    pub fn verify_prev(&self, prev_index: u64, prev_term: u64) -> PrefixCheck {
        if prev_index == 0 {
            return PrefixCheck::Ok;
        }
        match self.term_at(prev_index) {
            Some(term) if term == prev_term => PrefixCheck::Ok,
            _ => PrefixCheck::Mismatch,
        }
    }

    /// Appends a single entry; precondition is the caller's:
    /// `entry.index == current_index + 1`.
    pub fn append(&mut self, entry: LogEntry) -> Result<(), RaftError> {
        debug_assert_eq!(entry.index, self.current_index() + 1);
        self.persistent.append(&entry)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Applies a replication batch with the truncate/skip/append rule
    /// Idempotent under re-delivery of the same batch.
    pub fn append_batch(&mut self, entries: &[LogEntry]) -> Result<(), RaftError> {
        for entry in entries {
            match self.position_of(entry.index) {
                Some(pos) if self.entries[pos].term != entry.term => {
                    self.entries.truncate(pos);
                    self.persistent.truncate_from(entry.index)?;
                    self.append(entry.clone())?;
                }
                Some(_) => { /* same term already present: skip */ }
                None => {
                    self.append(entry.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Advances `commit_index`, never decreasing it.
    pub fn commit_to(&mut self, leader_commit: u64) {
        let candidate = leader_commit.min(self.current_index());
        if candidate > self.commit_index {
            self.commit_index = candidate;
        }
    }

    /// Directly sets `commit_index`, used by the leader's own quorum
    /// computation. Never decreases it.
    pub fn set_commit_index(&mut self, index: u64) {
        if index > self.commit_index {
            self.commit_index = index;
        }
    }

    pub fn sync(&mut self) -> Result<(), RaftError> {
        self.persistent.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64, term: u64) -> LogEntry {
        LogEntry {
            index,
            term,
            command_name: "SET".into(),
            command_payload: vec![],
        }
    }

    #[test]
    fn empty_log_reports_zero_zero() {
        let log = LogView::load(MemoryPersistentLog::default()).unwrap();
        assert_eq!(log.current_index(), 0);
        assert_eq!(log.current_term(), 0);
        assert_eq!(log.term_at(0), Some(0));
    }

    #[test]
    fn prev_index_zero_always_verifies() {
        let log = LogView::load(MemoryPersistentLog::default()).unwrap();
        assert_eq!(log.verify_prev(0, 0), PrefixCheck::Ok);
        assert_eq!(log.verify_prev(0, 999), PrefixCheck::Ok);
    }

    #[test]
    fn append_batch_is_idempotent_on_redelivery() {
        let mut log = LogView::load(MemoryPersistentLog::default()).unwrap();
        let batch = vec![entry(1, 1), entry(2, 1)];
        log.append_batch(&batch).unwrap();
        log.append_batch(&batch).unwrap();
        assert_eq!(log.current_index(), 2);
        assert_eq!(log.entries_from(1).len(), 2);
    }

    #[test]
    fn conflicting_entry_truncates_suffix() {
        let mut log = LogView::load(MemoryPersistentLog::default()).unwrap();
        log.append_batch(&[entry(1, 1), entry(2, 1), entry(3, 1)]).unwrap();
        log.append_batch(&[entry(2, 2)]).unwrap();
        assert_eq!(log.current_index(), 2);
        assert_eq!(log.term_at(2), Some(2));
    }

    #[test]
    fn commit_to_never_decreases() {
        let mut log = LogView::load(MemoryPersistentLog::default()).unwrap();
        log.append_batch(&[entry(1, 1), entry(2, 1)]).unwrap();
        log.commit_to(2);
        log.commit_to(1);
        assert_eq!(log.commit_index(), 2);
    }

    #[test]
    fn file_log_replays_after_reopen() {
        let dir = std::env::temp_dir().join(format!("raft-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("replay.log");
        let mut persistent = FileLog::open(&path).unwrap();
        persistent.append(&entry(1, 1)).unwrap();
        persistent.append(&entry(2, 1)).unwrap();
        persistent.sync().unwrap();
        drop(persistent);

        let reopened = FileLog::open(&path).unwrap();
        let mut log = LogView::load(reopened).unwrap();
        assert_eq!(log.current_index(), 2);
        assert_eq!(log.current_term(), 1);
        log.commit_to(2);
        assert_eq!(log.commit_index(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_log_term_vote_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("raft-core-test-tv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("termvote.log");

        let candidate = NodeId::from_str_padded("candidate");
        let mut persistent = FileLog::open(&path).unwrap();
        assert_eq!(persistent.load_term_vote().unwrap(), (0, None));
        persistent.save_term_vote(4, Some(candidate)).unwrap();
        drop(persistent);

        let mut reopened = FileLog::open(&path).unwrap();
        assert_eq!(reopened.load_term_vote().unwrap(), (4, Some(candidate)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
