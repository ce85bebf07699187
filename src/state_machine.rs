//! The command applicator boundary: out of scope for the
//! consensus core proper, but given a minimal trait plus one reference
//! implementation so the engine can be exercised end-to-end.

use std::collections::HashMap;

use crate::log::LogEntry;

pub type Reply = Vec<u8>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyError(pub String);

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Executes a committed entry's semantic effect on local state and
/// returns a reply for any waiting client.
pub trait StateMachine {
    fn apply(&mut self, entry: &LogEntry) -> Result<Reply, ApplyError>;
}

/// A toy key-value store applicator, for tests and the example binary.
/// Understands two command names: `SET key value` and `GET key`.
#[derive(Default)]
pub struct KeyValueStore {
    data: HashMap<String, Vec<u8>>,
}

impl StateMachine for KeyValueStore {
    fn apply(&mut self, entry: &LogEntry) -> Result<Reply, ApplyError> {
        match entry.command_name.as_str() {
            "SET" => {
                let text = String::from_utf8_lossy(&entry.command_payload);
                let mut parts = text.splitn(2, ' ');
                let key = parts
                    .next()
                    .ok_or_else(|| ApplyError("SET missing key".into()))?;
                let value = parts.next().unwrap_or("").as_bytes().to_vec();
                self.data.insert(key.to_string(), value);
                Ok(b"OK".to_vec())
            }
            "GET" => {
                let key = String::from_utf8_lossy(&entry.command_payload).into_owned();
                Ok(self.data.get(&key).cloned().unwrap_or_default())
            }
            other => Err(ApplyError(format!("unknown command {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, payload: &str) -> LogEntry {
        LogEntry {
            index: 1,
            term: 1,
            command_name: name.into(),
            command_payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut kv = KeyValueStore::default();
        kv.apply(&entry("SET", "x 1")).unwrap();
        let reply = kv.apply(&entry("GET", "x")).unwrap();
        assert_eq!(reply, b"1".to_vec());
    }

    #[test]
    fn get_missing_key_returns_empty() {
        let mut kv = KeyValueStore::default();
        let reply = kv.apply(&entry("GET", "missing")).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn unknown_command_is_an_error() {
        let mut kv = KeyValueStore::default();
        assert!(kv.apply(&entry("DELETE", "x")).is_err());
    }
}
