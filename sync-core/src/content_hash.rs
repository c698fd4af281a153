//! Per-kind content hashes.
//!
//! After a run has caught up in both directions, both replicas hash every
//! stored kind and compare. A difference means the replicas diverged by some
//! path other than sync (an out-of-band edit, a lost write). It is reported,
//! never repaired automatically.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use sync_types::EntityKind;

/// Content hash per stored entity kind.
pub type ContentHashes = BTreeMap<EntityKind, String>;

/// Hash one kind from `(entity_id, entity_hash)` pairs.
///
/// Order-independent: pairs are sorted by entity id first.
pub fn kind_hash(mut rows: Vec<(String, String)>) -> String {
    rows.sort();
    let mut hasher = Sha256::new();
    for (entity_id, entity_hash) in &rows {
        hasher.update(entity_id.as_bytes());
        hasher.update(b":");
        hasher.update(entity_hash.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// A kind whose hashes differ between the two replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    /// The diverged kind.
    pub kind: EntityKind,
    /// Our hash, if we reported one.
    pub local: Option<String>,
    /// The peer's hash, if it reported one.
    pub remote: Option<String>,
}

/// Every kind present on either side whose hashes differ.
pub fn compare_hashes(local: &ContentHashes, remote: &ContentHashes) -> Vec<HashMismatch> {
    let kinds: BTreeSet<EntityKind> = local.keys().chain(remote.keys()).copied().collect();
    kinds
        .into_iter()
        .filter_map(|kind| {
            let ours = local.get(&kind);
            let theirs = remote.get(&kind);
            (ours != theirs).then(|| HashMismatch {
                kind,
                local: ours.cloned(),
                remote: theirs.cloned(),
            })
        })
        .collect()
}
