//! Last-write-wins conflict resolution.
//!
//! Whole-entity LWW: an incoming row replaces the local one only when its
//! supersession stamp is strictly newer. Reorderings carry no stamp and
//! always apply. Stale incoming rows are dropped, and a conflict is
//! reported when they also differ in content.

use sync_types::{EntityKind, EntityRow, Timestamp};

/// A stale incoming value that lost to the local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictObserved {
    /// Kind of the contested entity.
    pub kind: EntityKind,
    /// Id of the contested entity.
    pub entity_id: String,
    /// Stamp of the value kept.
    pub local: Timestamp,
    /// Stamp of the value dropped.
    pub incoming: Timestamp,
}

/// What to do with an incoming row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Store the incoming row.
    Apply,
    /// Already have this exact value; nothing to do.
    Ignore,
    /// Keep the local row and report the divergence.
    ConflictLogged(ConflictObserved),
}

impl Resolution {
    /// Whether the incoming row should be written.
    pub fn is_apply(&self) -> bool {
        matches!(self, Resolution::Apply)
    }
}

/// Decides between a local and an incoming row. Pure and stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Create a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `incoming` replaces `local`.
    pub fn resolve(&self, local: Option<&EntityRow>, incoming: &EntityRow) -> Resolution {
        let Some(incoming_stamp) = incoming.supersession() else {
            return Resolution::Apply;
        };
        let Some(local) = local else {
            return Resolution::Apply;
        };
        let Some(local_stamp) = local.supersession() else {
            return Resolution::Apply;
        };

        if incoming_stamp > local_stamp {
            return Resolution::Apply;
        }

        if same_content(local, incoming) {
            Resolution::Ignore
        } else {
            Resolution::ConflictLogged(ConflictObserved {
                kind: incoming.kind(),
                entity_id: incoming.entity_id().to_string(),
                local: local_stamp,
                incoming: incoming_stamp,
            })
        }
    }
}

fn same_content(a: &EntityRow, b: &EntityRow) -> bool {
    match (a.content_hash(), b.content_hash()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use sync_types::{Note, NoteReordering};

    fn note(title: &str, modified: i64) -> EntityRow {
        EntityRow::Note(Note {
            note_id: "N1".into(),
            title: title.into(),
            note_type: "text".into(),
            mime: "text/html".into(),
            blob_id: None,
            is_protected: false,
            is_deleted: false,
            utc_date_modified: Timestamp::from_millis(modified),
        })
    }

    #[test]
    fn applies_when_nothing_local() {
        let resolver = ConflictResolver::new();
        assert_eq!(resolver.resolve(None, &note("A", 100)), Resolution::Apply);
    }

    #[test]
    fn newer_incoming_wins() {
        let resolver = ConflictResolver::new();
        let local = note("B", 150);
        assert_eq!(resolver.resolve(Some(&local), &note("A", 200)), Resolution::Apply);
    }

    #[test]
    fn older_incoming_is_conflict_logged() {
        let resolver = ConflictResolver::new();
        let local = note("A", 200);
        let resolution = resolver.resolve(Some(&local), &note("B", 150));
        assert_eq!(
            resolution,
            Resolution::ConflictLogged(ConflictObserved {
                kind: EntityKind::Note,
                entity_id: "N1".into(),
                local: Timestamp::from_millis(200),
                incoming: Timestamp::from_millis(150),
            })
        );
    }

    #[test]
    fn equal_stamp_is_not_newer() {
        let resolver = ConflictResolver::new();
        let local = note("A", 200);
        assert!(!resolver.resolve(Some(&local), &note("B", 200)).is_apply());
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let resolver = ConflictResolver::new();
        let local = note("A", 200);
        assert_eq!(resolver.resolve(Some(&local), &note("A", 200)), Resolution::Ignore);
    }

    #[test]
    fn order_of_arrival_does_not_change_winner() {
        let resolver = ConflictResolver::new();
        let newer = note("A", 200);
        let older = note("B", 150);

        // older first, then newer
        assert!(resolver.resolve(None, &older).is_apply());
        assert!(resolver.resolve(Some(&older), &newer).is_apply());

        // newer first, then older
        assert!(resolver.resolve(None, &newer).is_apply());
        assert!(!resolver.resolve(Some(&newer), &older).is_apply());
    }

    #[test]
    fn reordering_always_applies() {
        let resolver = ConflictResolver::new();
        let reorder = |pos| {
            EntityRow::NoteReordering(NoteReordering {
                parent_note_id: "root".into(),
                ordering: BTreeMap::from([("b1".to_string(), pos)]),
            })
        };
        let local = reorder(10);
        assert_eq!(resolver.resolve(Some(&local), &reorder(10)), Resolution::Apply);
        assert_eq!(resolver.resolve(Some(&local), &reorder(20)), Resolution::Apply);
    }
}
