//! Opaque node identity: a fixed-length byte blob, never parsed.

use std::fmt;

pub const NODE_ID_LEN: usize = 40;

/// A cluster member identity. Treated as an opaque 40-byte blob on the
/// wire (§3, §9): equality and hashing only, no parsing of its contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Builds a `NodeId` from a human-readable string, right-padding with
    /// zero bytes. Truncates identities longer than `NODE_ID_LEN`.
    pub fn from_str_padded(s: &str) -> NodeId {
        let mut buf = [0u8; NODE_ID_LEN];
        let bytes = s.as_bytes();
        let n = bytes.len().min(NODE_ID_LEN);
        buf[..n].copy_from_slice(&bytes[..n]);
        NodeId(buf)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> NodeId {
        NodeId(bytes)
    }

    /// Trims trailing zero padding for display purposes only.
    pub fn display_str(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(NODE_ID_LEN);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.display_str())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_and_displays_round_trip() {
        let id = NodeId::from_str_padded("node-a");
        assert_eq!(id.display_str(), "node-a");
        assert_eq!(id.as_bytes().len(), NODE_ID_LEN);
    }

    #[test]
    fn equal_ids_hash_equal() {
        let a = NodeId::from_str_padded("same");
        let b = NodeId::from_str_padded("same");
        assert_eq!(a, b);
    }

    #[test]
    fn truncates_overlong_identities() {
        let long = "x".repeat(NODE_ID_LEN + 10);
        let id = NodeId::from_str_padded(&long);
        assert_eq!(id.display_str().len(), NODE_ID_LEN);
    }
}
