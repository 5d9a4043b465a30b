//! Short content hashes and identifier minting
//!
//! Digests are the first four bytes of SHA-256 rendered as eight lowercase hex
//! characters. They address content and detect changes; they are not meant to
//! resist deliberate collisions.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::delta::Change;
use crate::node::NodeType;

/// Digest returned for empty input
pub const EMPTY_DIGEST: &str = "00000000";

/// Hash arbitrary content into an 8-hex-char digest
pub fn hash(content: impl AsRef<[u8]>) -> String {
    let bytes = content.as_ref();
    if bytes.is_empty() {
        return EMPTY_DIGEST.to_string();
    }

    let digest = Sha256::digest(bytes);
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Whether `s` has the shape of a digest produced by [`hash`]
pub fn is_digest(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Hash of a node's summary and detail
pub fn content_hash(summary: &str, detail: &str) -> String {
    hash(format!("{}{}", summary, detail))
}

/// Mint a node ID: `<short_code>_<unix_secs>_<digest>`
///
/// The digest mixes in the nanosecond clock and a random salt so identical
/// content created within the same second still gets distinct IDs.
pub fn node_id(node_type: NodeType, content: Option<&str>, timestamp: i64) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seed = format!(
        "{}:{}:{}:{}",
        node_type.short_code(),
        content.unwrap_or_default(),
        nanos,
        Uuid::new_v4()
    );
    format!("{}_{}_{}", node_type.short_code(), timestamp, hash(seed))
}

/// Derive an edge ID from truncated hashes of both endpoints
pub fn edge_id(source_id: &str, target_id: &str) -> String {
    format!("e_{}{}", &hash(source_id)[..4], &hash(target_id)[..4])
}

/// Content address of a delta
pub fn delta_hash(changes: &[Change], parent: Option<&str>, timestamp: i64) -> String {
    let descriptors: Vec<String> = changes.iter().map(Change::descriptor).collect();
    hash(format!(
        "{}|{}|{}",
        parent.unwrap_or("root"),
        timestamp,
        descriptors.join(";")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::ChangeOp;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash("hello world"), hash("hello world"));
        assert_ne!(hash("hello world"), hash("hello world!"));
    }

    #[test]
    fn test_is_digest() {
        assert!(is_digest(&hash("anything")));
        assert!(is_digest(EMPTY_DIGEST));
        assert!(!is_digest("ABCDEF12"));
        assert!(!is_digest("abc"));
        assert!(!is_digest("/../../x"));
        assert!(!is_digest("abcd123g"));
    }

    #[test]
    fn test_hash_shape() {
        let digest = hash("some content");
        assert_eq!(digest.len(), 8);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_empty_input_maps_to_sentinel() {
        assert_eq!(hash(""), EMPTY_DIGEST);
        assert_eq!(hash(Vec::<u8>::new()), EMPTY_DIGEST);
    }

    #[test]
    fn test_node_id_unique_for_identical_content() {
        let a = node_id(NodeType::Pattern, Some("same"), 1_700_000_000);
        let b = node_id(NodeType::Pattern, Some("same"), 1_700_000_000);
        assert_ne!(a, b);
        assert!(a.starts_with("pat_1700000000_"));
    }

    #[test]
    fn test_edge_id_depends_on_both_ends() {
        let ab = edge_id("pat_1_aaaa", "cor_2_bbbb");
        let ba = edge_id("cor_2_bbbb", "pat_1_aaaa");
        assert_eq!(ab.len(), 10);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_delta_hash_depends_on_parent() {
        let changes = vec![Change {
            op: ChangeOp::Add,
            path: "nodes.patterns.pat_1_x".into(),
            before: None,
            after: Some("abcd1234".into()),
        }];
        let root = delta_hash(&changes, None, 100);
        let child = delta_hash(&changes, Some(&root), 100);
        assert_ne!(root, child);
        assert_eq!(root, delta_hash(&changes, None, 100));
    }
}
