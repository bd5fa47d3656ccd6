//! Partition ownership and committed-offset bookkeeping.
//!
//! Ownership is an explicit state table instead of per-callback dispatch:
//!
//! ```text
//! Unassigned ──Assigned(p)──▶ Assigned(p)
//! Assigned(a) ──Assigned(p)──▶ Assigned(a ∪ p)
//! Assigned(a) ──Revoked(r)──▶ Revoking { retained: a \ r, revoking: a ∩ r }
//! Revoking ──finish──▶ Assigned(retained) | Unassigned
//! ```
//!
//! Both the state and the offset cursors are only touched from the delivery
//! loop, so nothing here is synchronized.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use kafka_types::InboundMessage;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn of(message: &InboundMessage) -> Self {
        Self::new(message.topic.clone(), message.partition)
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AssignmentState {
    #[default]
    Unassigned,
    Assigned(BTreeSet<TopicPartition>),
    Revoking {
        retained: BTreeSet<TopicPartition>,
        revoking: BTreeSet<TopicPartition>,
    },
}

/// Assignment state plus the per-partition offset cursors.
///
/// A cursor holds the next offset to consume, i.e. the value committed to
/// the broker. It only ever moves forward.
#[derive(Debug, Default)]
pub struct PartitionTable {
    state: AssignmentState,
    cursors: BTreeMap<TopicPartition, i64>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AssignmentState {
        &self.state
    }

    /// Add partitions to the owned set.
    pub fn assign(&mut self, partitions: impl IntoIterator<Item = TopicPartition>) {
        if matches!(self.state, AssignmentState::Revoking { .. }) {
            self.finish_revoke();
        }
        let mut owned = match std::mem::take(&mut self.state) {
            AssignmentState::Assigned(owned) => owned,
            _ => BTreeSet::new(),
        };
        owned.extend(partitions);
        self.state = if owned.is_empty() {
            AssignmentState::Unassigned
        } else {
            AssignmentState::Assigned(owned)
        };
    }

    /// Stop accepting messages for `partitions`.
    ///
    /// Returns the partitions that were actually owned. The caller finishes
    /// in-flight work for them and then calls [`Self::finish_revoke`].
    pub fn begin_revoke(
        &mut self,
        partitions: impl IntoIterator<Item = TopicPartition>,
    ) -> BTreeSet<TopicPartition> {
        if matches!(self.state, AssignmentState::Revoking { .. }) {
            self.finish_revoke();
        }
        let owned = match std::mem::take(&mut self.state) {
            AssignmentState::Assigned(owned) => owned,
            _ => return BTreeSet::new(),
        };
        let requested: BTreeSet<TopicPartition> = partitions.into_iter().collect();
        let (revoking, retained): (BTreeSet<_>, BTreeSet<_>) =
            owned.into_iter().partition(|tp| requested.contains(tp));
        self.state = AssignmentState::Revoking {
            retained,
            revoking: revoking.clone(),
        };
        revoking
    }

    /// Complete a revocation and forget the revoked partitions' cursors.
    pub fn finish_revoke(&mut self) {
        let AssignmentState::Revoking { retained, revoking } = std::mem::take(&mut self.state)
        else {
            return;
        };
        for tp in &revoking {
            self.cursors.remove(tp);
        }
        self.state = if retained.is_empty() {
            AssignmentState::Unassigned
        } else {
            AssignmentState::Assigned(retained)
        };
    }

    pub fn owns(&self, tp: &TopicPartition) -> bool {
        match &self.state {
            AssignmentState::Unassigned => false,
            AssignmentState::Assigned(owned) => owned.contains(tp),
            AssignmentState::Revoking { retained, .. } => retained.contains(tp),
        }
    }

    /// Owned, or being revoked with work still draining. Offsets of such
    /// partitions may still be committed.
    pub fn holds(&self, tp: &TopicPartition) -> bool {
        match &self.state {
            AssignmentState::Revoking { revoking, .. } => {
                revoking.contains(tp) || self.owns(tp)
            }
            _ => self.owns(tp),
        }
    }

    pub fn owned(&self) -> Vec<TopicPartition> {
        match &self.state {
            AssignmentState::Unassigned => Vec::new(),
            AssignmentState::Assigned(owned) => owned.iter().cloned().collect(),
            AssignmentState::Revoking { retained, .. } => retained.iter().cloned().collect(),
        }
    }

    /// Whether `offset` is behind what this member already committed.
    pub fn is_committed(&self, tp: &TopicPartition, offset: i64) -> bool {
        self.cursors.get(tp).is_some_and(|next| offset < *next)
    }

    pub fn cursor(&self, tp: &TopicPartition) -> Option<i64> {
        self.cursors.get(tp).copied()
    }

    /// Move the cursor past `offset`.
    ///
    /// Returns the new cursor value, or `None` if it would not move forward.
    pub fn advance(&mut self, tp: &TopicPartition, offset: i64) -> Option<i64> {
        let next = offset + 1;
        match self.cursors.get_mut(tp) {
            Some(current) if *current >= next => None,
            Some(current) => {
                *current = next;
                Some(next)
            }
            None => {
                self.cursors.insert(tp.clone(), next);
                Some(next)
            }
        }
    }
}
