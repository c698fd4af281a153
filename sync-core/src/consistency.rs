//! Structural invariants of a replica's note tree and changelog.
//!
//! The checks are diagnostic: they read a [`GraphSnapshot`] and report
//! every violation they find. Nothing is repaired. Each check runs
//! independently, so one broken invariant never hides another.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use sync_types::{Branch, EntityKind, Note, ROOT_NOTE_ID};

/// Everything the checks need from a store, captured at one instant.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    /// Every note row, deleted ones included.
    pub notes: Vec<Note>,
    /// Every structural edge, deleted ones included.
    pub branches: Vec<Branch>,
    /// Every stored entity `(kind, id)`.
    pub entities: BTreeSet<(EntityKind, String)>,
    /// Every changelog row as `(kind, id, is_erased)`.
    pub changes: Vec<(EntityKind, String, bool)>,
}

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsistencyViolation {
    /// A live non-root note has no live parent edge.
    MissingParentEdge {
        /// The orphaned note.
        note_id: String,
    },
    /// A live edge points at a note that does not exist.
    DanglingEdge {
        /// The broken edge.
        branch_id: String,
        /// The missing endpoint.
        missing_note_id: String,
    },
    /// Two or more live edges join the same parent and child.
    DuplicateEdge {
        /// Shared parent.
        parent_note_id: String,
        /// Shared child.
        note_id: String,
        /// All edges involved.
        branch_ids: Vec<String>,
    },
    /// A deleted note still has a live parent edge.
    LiveEdgeToDeletedNote {
        /// The edge that should have been deleted with its note.
        branch_id: String,
        /// The deleted note.
        note_id: String,
    },
    /// Live edges form a loop.
    TreeCycle {
        /// Notes on the loop, each followed by its parent.
        path: Vec<String>,
    },
    /// A stored entity has no changelog row.
    MissingChangeLogEntry {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        entity_id: String,
    },
    /// A changelog row describes an entity that does not exist.
    DanglingChangeLogEntry {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        entity_id: String,
    },
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParentEdge { note_id } => {
                write!(f, "note {note_id} has no live parent edge")
            }
            Self::DanglingEdge {
                branch_id,
                missing_note_id,
            } => write!(f, "edge {branch_id} references missing note {missing_note_id}"),
            Self::DuplicateEdge {
                parent_note_id,
                note_id,
                branch_ids,
            } => write!(
                f,
                "note {note_id} is linked under {parent_note_id} {} times ({})",
                branch_ids.len(),
                branch_ids.join(", ")
            ),
            Self::LiveEdgeToDeletedNote { branch_id, note_id } => {
                write!(f, "edge {branch_id} is live but its note {note_id} is deleted")
            }
            Self::TreeCycle { path } => write!(f, "tree cycle: {}", path.join(" -> ")),
            Self::MissingChangeLogEntry { kind, entity_id } => {
                write!(f, "{kind} {entity_id} has no changelog entry")
            }
            Self::DanglingChangeLogEntry { kind, entity_id } => {
                write!(f, "changelog entry for missing {kind} {entity_id}")
            }
        }
    }
}

/// Result of one full pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// All violations found, in check order.
    pub violations: Vec<ConsistencyViolation>,
}

impl ConsistencyReport {
    /// Run every check over `snapshot`.
    pub fn check(snapshot: &GraphSnapshot) -> Self {
        let mut violations = Vec::new();
        violations.extend(missing_parent_edges(snapshot));
        violations.extend(dangling_edges(snapshot));
        violations.extend(duplicate_edges(snapshot));
        violations.extend(delete_cascade(snapshot));
        violations.extend(tree_cycles(snapshot));
        violations.extend(changelog_completeness(snapshot));
        Self { violations }
    }

    /// Whether no violation was found.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

fn live_branches(snapshot: &GraphSnapshot) -> impl Iterator<Item = &Branch> {
    snapshot.branches.iter().filter(|b| !b.is_deleted)
}

fn missing_parent_edges(snapshot: &GraphSnapshot) -> Vec<ConsistencyViolation> {
    let with_parent: BTreeSet<&str> = live_branches(snapshot)
        .map(|b| b.note_id.as_str())
        .collect();

    snapshot
        .notes
        .iter()
        .filter(|n| !n.is_deleted && n.note_id != ROOT_NOTE_ID)
        .filter(|n| !with_parent.contains(n.note_id.as_str()))
        .map(|n| ConsistencyViolation::MissingParentEdge {
            note_id: n.note_id.clone(),
        })
        .collect()
}

fn dangling_edges(snapshot: &GraphSnapshot) -> Vec<ConsistencyViolation> {
    let notes: BTreeSet<&str> = snapshot.notes.iter().map(|n| n.note_id.as_str()).collect();
    let mut violations = Vec::new();
    for branch in live_branches(snapshot) {
        for endpoint in [&branch.note_id, &branch.parent_note_id] {
            if !notes.contains(endpoint.as_str()) {
                violations.push(ConsistencyViolation::DanglingEdge {
                    branch_id: branch.branch_id.clone(),
                    missing_note_id: endpoint.clone(),
                });
            }
        }
    }
    violations
}

fn duplicate_edges(snapshot: &GraphSnapshot) -> Vec<ConsistencyViolation> {
    let mut by_pair: BTreeMap<(&str, &str), Vec<String>> = BTreeMap::new();
    for branch in live_branches(snapshot) {
        by_pair
            .entry((branch.parent_note_id.as_str(), branch.note_id.as_str()))
            .or_default()
            .push(branch.branch_id.clone());
    }
    by_pair
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|((parent, child), branch_ids)| ConsistencyViolation::DuplicateEdge {
            parent_note_id: parent.to_string(),
            note_id: child.to_string(),
            branch_ids,
        })
        .collect()
}

fn delete_cascade(snapshot: &GraphSnapshot) -> Vec<ConsistencyViolation> {
    let deleted: BTreeSet<&str> = snapshot
        .notes
        .iter()
        .filter(|n| n.is_deleted)
        .map(|n| n.note_id.as_str())
        .collect();
    live_branches(snapshot)
        .filter(|b| deleted.contains(b.note_id.as_str()))
        .map(|b| ConsistencyViolation::LiveEdgeToDeletedNote {
            branch_id: b.branch_id.clone(),
            note_id: b.note_id.clone(),
        })
        .collect()
}

/// Walk upward from every note along live edges with an explicit stack.
///
/// A parent already on the current path closes a loop. Each loop is
/// reported once, rotated to start at its smallest note id.
fn tree_cycles(snapshot: &GraphSnapshot) -> Vec<ConsistencyViolation> {
    let mut parents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for branch in live_branches(snapshot) {
        parents
            .entry(branch.note_id.as_str())
            .or_default()
            .push(branch.parent_note_id.as_str());
    }

    let mut finished: BTreeSet<&str> = BTreeSet::new();
    let mut cycles: BTreeSet<Vec<String>> = BTreeSet::new();

    for &start in parents.keys() {
        if finished.contains(start) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        let mut on_path: BTreeSet<&str> = BTreeSet::from([start]);

        loop {
            let Some(&(node, next)) = stack.last() else {
                break;
            };
            let node_parents = parents.get(node).map(Vec::as_slice).unwrap_or(&[]);

            if let Some(&parent) = node_parents.get(next) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if on_path.contains(parent) {
                    if let Some(pos) = stack.iter().position(|(n, _)| *n == parent) {
                        let path: Vec<String> =
                            stack[pos..].iter().map(|(n, _)| n.to_string()).collect();
                        cycles.insert(rotate_to_min(path));
                    }
                } else if !finished.contains(parent) {
                    on_path.insert(parent);
                    stack.push((parent, 0));
                }
            } else {
                on_path.remove(node);
                finished.insert(node);
                stack.pop();
            }
        }
    }

    cycles
        .into_iter()
        .map(|path| ConsistencyViolation::TreeCycle { path })
        .collect()
}

fn rotate_to_min(mut path: Vec<String>) -> Vec<String> {
    if let Some(min_pos) = path
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        path.rotate_left(min_pos);
    }
    path
}

fn changelog_completeness(snapshot: &GraphSnapshot) -> Vec<ConsistencyViolation> {
    let logged: BTreeSet<(EntityKind, &str)> = snapshot
        .changes
        .iter()
        .filter(|(kind, _, erased)| kind.is_stored() && !erased)
        .map(|(kind, id, _)| (*kind, id.as_str()))
        .collect();

    let mut violations: Vec<ConsistencyViolation> = snapshot
        .entities
        .iter()
        .filter(|(kind, id)| !logged.contains(&(*kind, id.as_str())))
        .map(|(kind, id)| ConsistencyViolation::MissingChangeLogEntry {
            kind: *kind,
            entity_id: id.clone(),
        })
        .collect();

    violations.extend(
        logged
            .iter()
            .filter(|(kind, id)| !snapshot.entities.contains(&(*kind, id.to_string())))
            .map(|(kind, id)| ConsistencyViolation::DanglingChangeLogEntry {
                kind: *kind,
                entity_id: id.to_string(),
            }),
    );
    violations
}
