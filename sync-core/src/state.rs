//! Sync run state machine for treesync.
//!
//! This module provides a pure, side-effect-free state machine for one sync
//! run. The state machine takes events as input and produces a new state
//! plus a list of actions to execute.
//!
//! ```text
//! Idle → LoggingIn → Pushing → Pulling → PushingAgain → CheckingHash → Idle
//!                       ↑                                    │
//!                       └────── outstanding changes ─────────┘
//! ```
//!
//! The actual I/O (login, push, pull, hashing) is performed by sync-client,
//! not by this module.

use sync_types::EntityKind;

use crate::consistency::ConsistencyViolation;
use crate::resolver::ConflictObserved;

/// How the last run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step completed.
    Success,
    /// A step failed; cursors stay where the last processed entry left them.
    Failed,
}

/// Result of the content-hash step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashCheck {
    /// Every kind hashed equal on both replicas.
    Matched,
    /// These kinds differ.
    Mismatched(Vec<EntityKind>),
    /// Changes were still outstanding after the last allowed round.
    Skipped,
}

/// Phase of a sync run - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    /// No run in progress.
    Idle {
        /// Outcome of the previous run, if any.
        last: Option<RunOutcome>,
    },
    /// Authenticating with the peer.
    LoggingIn,
    /// Sending local changes.
    Pushing {
        /// Round number, starting at 1.
        round: u32,
    },
    /// Applying peer changes.
    Pulling {
        /// Round number, starting at 1.
        round: u32,
    },
    /// Sending changes produced while pulling.
    PushingAgain {
        /// Round number, starting at 1.
        round: u32,
    },
    /// Comparing content hashes with the peer.
    CheckingHash {
        /// Round number, starting at 1.
        round: u32,
    },
}

/// The run state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMachine {
    phase: SyncPhase,
    max_rounds: u32,
}

impl SyncMachine {
    /// Create an idle machine allowing up to `max_rounds` push/pull rounds
    /// per run (at least one).
    pub fn new(max_rounds: u32) -> Self {
        Self {
            phase: SyncPhase::Idle { last: None },
            max_rounds: max_rounds.max(1),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> &SyncPhase {
        &self.phase
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        !matches!(self.phase, SyncPhase::Idle { .. })
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        let max_rounds = self.max_rounds;
        let to = |phase| Self { phase, max_rounds };

        match (self.phase, event) {
            // From Idle
            (SyncPhase::Idle { .. }, Event::Start) => (
                to(SyncPhase::LoggingIn),
                vec![Action::EmitEvent(SyncEvent::Started), Action::Login],
            ),

            // From LoggingIn
            (SyncPhase::LoggingIn, Event::LoggedIn) => {
                (to(SyncPhase::Pushing { round: 1 }), vec![Action::Push])
            }

            // From Pushing
            (SyncPhase::Pushing { round }, Event::PushDrained) => {
                (to(SyncPhase::Pulling { round }), vec![Action::Pull])
            }

            // From Pulling
            (SyncPhase::Pulling { round }, Event::PullDrained) => {
                (to(SyncPhase::PushingAgain { round }), vec![Action::Push])
            }

            // From PushingAgain
            (SyncPhase::PushingAgain { round }, Event::PushDrained) => (
                to(SyncPhase::CheckingHash { round }),
                vec![Action::CheckHashes],
            ),

            // From CheckingHash
            (SyncPhase::CheckingHash { round }, Event::HashesChecked { mismatched }) => {
                let mut actions = Vec::new();
                let check = if mismatched.is_empty() {
                    HashCheck::Matched
                } else {
                    actions.push(Action::EmitEvent(SyncEvent::HashMismatch {
                        kinds: mismatched.clone(),
                    }));
                    HashCheck::Mismatched(mismatched)
                };
                actions.push(Action::EmitEvent(SyncEvent::Completed {
                    rounds: round,
                    hash_check: check,
                }));
                (
                    to(SyncPhase::Idle {
                        last: Some(RunOutcome::Success),
                    }),
                    actions,
                )
            }
            (SyncPhase::CheckingHash { round }, Event::Outstanding) if round < max_rounds => (
                to(SyncPhase::Pushing { round: round + 1 }),
                vec![Action::Push],
            ),
            (SyncPhase::CheckingHash { round }, Event::Outstanding) => (
                to(SyncPhase::Idle {
                    last: Some(RunOutcome::Success),
                }),
                vec![Action::EmitEvent(SyncEvent::Completed {
                    rounds: round,
                    hash_check: HashCheck::Skipped,
                })],
            ),

            // Any step can fail
            (phase, Event::Failed { reason }) if !matches!(phase, SyncPhase::Idle { .. }) => (
                to(SyncPhase::Idle {
                    last: Some(RunOutcome::Failed),
                }),
                vec![Action::EmitEvent(SyncEvent::Failed { reason })],
            ),

            // Invalid transitions - stay in current state
            (phase, _) => (to(phase), vec![]),
        }
    }
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Events that drive a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A run was triggered and the sync permit acquired.
    Start,
    /// Login accepted by the peer.
    LoggedIn,
    /// No local changes left to send.
    PushDrained,
    /// No peer changes left to apply.
    PullDrained,
    /// Hashes compared with both cursors caught up.
    HashesChecked {
        /// Kinds whose hashes differ.
        mismatched: Vec<EntityKind>,
    },
    /// The hash step found changes still outstanding in either direction.
    Outstanding,
    /// The current step failed.
    Failed {
        /// Error message describing the failure.
        reason: String,
    },
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Log in to the peer.
    Login,
    /// Send local changes after `lastSyncedPush`.
    Push,
    /// Apply peer changes after `lastSyncedPull`.
    Pull,
    /// Compare content hashes with the peer.
    CheckHashes,
    /// Emit an event to the application.
    EmitEvent(SyncEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A run started.
    Started,
    /// A run finished every step.
    Completed {
        /// Push/pull rounds used.
        rounds: u32,
        /// Outcome of the hash comparison.
        hash_check: HashCheck,
    },
    /// A run failed.
    Failed {
        /// Error message describing the failure.
        reason: String,
    },
    /// Content hashes differ after a complete exchange. Soft alarm only.
    HashMismatch {
        /// Kinds that differ.
        kinds: Vec<EntityKind>,
    },
    /// A stale incoming value was dropped in favour of the local one.
    ConflictObserved(ConflictObserved),
    /// A consistency check found broken invariants. Diagnostic only.
    ConsistencyViolations {
        /// Everything found, in report order.
        violations: Vec<ConsistencyViolation>,
    },
}
