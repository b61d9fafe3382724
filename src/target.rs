//! Per-target lifecycle: untouched → queued → in-flight → translated | errored | skipped.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use crate::page::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Untouched,
    Queued,
    InFlight,
    Translated,
    Errored,
    Skipped,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetState::Untouched => write!(f, "untouched"),
            TargetState::Queued => write!(f, "queued"),
            TargetState::InFlight => write!(f, "in-flight"),
            TargetState::Translated => write!(f, "translated"),
            TargetState::Errored => write!(f, "errored"),
            TargetState::Skipped => write!(f, "skipped"),
        }
    }
}

impl TargetState {
    pub fn can_transition_to(self, next: TargetState) -> bool {
        matches!(
            (self, next),
            (TargetState::Untouched, TargetState::Queued)
                | (TargetState::Queued, TargetState::InFlight)
                | (TargetState::Queued, TargetState::Skipped) // node vanished before admission
                | (TargetState::InFlight, TargetState::Translated)
                | (TargetState::InFlight, TargetState::Errored)
                | (TargetState::InFlight, TargetState::Skipped)
                // stop/reset
                | (_, TargetState::Untouched)
        )
    }

    /// Sticky until the records are cleared.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TargetState::Translated | TargetState::Errored | TargetState::Skipped
        )
    }
}

/// What the orchestrator knows about one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetRecord {
    pub node: NodeId,
    pub state: TargetState,
    /// Text captured when the target was queued; the dedup key for its call.
    pub snapshot: String,
    /// Kept for every errored target, painted or not.
    pub error: Option<String>,
    #[serde(skip)]
    pub queued_at: Instant,
}

/// Counts by state, for the progress badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub queued: usize,
    pub in_flight: usize,
    pub translated: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl Progress {
    pub fn total(&self) -> usize {
        self.queued + self.in_flight + self.translated + self.errored + self.skipped
    }
}

/// Target records plus the FIFO admission queue. Not internally locked; the
/// scheduler owns it behind its own mutex.
#[derive(Default)]
pub struct TargetRegistry {
    records: HashMap<NodeId, TargetRecord>,
    queue: VecDeque<NodeId>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, node: NodeId) -> TargetState {
        self.records
            .get(&node)
            .map_or(TargetState::Untouched, |r| r.state)
    }

    pub fn get(&self, node: NodeId) -> Option<&TargetRecord> {
        self.records.get(&node)
    }

    /// Queue an untouched target. Returns false if it already has a state.
    pub fn enqueue(&mut self, node: NodeId, snapshot: String) -> bool {
        if self.state(node) != TargetState::Untouched {
            return false;
        }
        self.records.insert(
            node,
            TargetRecord {
                node,
                state: TargetState::Queued,
                snapshot,
                error: None,
                queued_at: Instant::now(),
            },
        );
        self.queue.push_back(node);
        true
    }

    pub fn pop_queued(&mut self) -> Option<NodeId> {
        while let Some(node) = self.queue.pop_front() {
            if self.state(node) == TargetState::Queued {
                return Some(node);
            }
        }
        None
    }

    /// Validated transition. Unknown targets and invalid moves are refused.
    pub fn transition(&mut self, node: NodeId, next: TargetState) -> bool {
        let Some(record) = self.records.get_mut(&node) else {
            return false;
        };
        if !record.state.can_transition_to(next) {
            warn!(node = node.0, from = %record.state, to = %next, "invalid_target_transition");
            return false;
        }
        record.state = next;
        true
    }

    pub fn mark_errored(&mut self, node: NodeId, error: String) -> bool {
        if !self.transition(node, TargetState::Errored) {
            return false;
        }
        if let Some(record) = self.records.get_mut(&node) {
            record.error = Some(error);
        }
        true
    }

    /// Nodes currently in the given state.
    pub fn nodes_in(&self, state: TargetState) -> Vec<NodeId> {
        self.records
            .values()
            .filter(|r| r.state == state)
            .map(|r| r.node)
            .collect()
    }

    /// Forget every target; all nodes read as untouched again.
    pub fn clear(&mut self) {
        self.records.clear();
        self.queue.clear();
    }

    pub fn progress(&self) -> Progress {
        let mut progress = Progress::default();
        for record in self.records.values() {
            match record.state {
                TargetState::Untouched => {}
                TargetState::Queued => progress.queued += 1,
                TargetState::InFlight => progress.in_flight += 1,
                TargetState::Translated => progress.translated += 1,
                TargetState::Errored => progress.errored += 1,
                TargetState::Skipped => progress.skipped += 1,
            }
        }
        progress
    }
}
