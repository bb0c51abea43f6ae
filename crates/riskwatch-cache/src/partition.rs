//! The four prediction partitions
//!
//! Partitions are keyed by owner class (user or system) and kind. Each one is
//! an `Arc<Vec<_>>` that is swapped wholesale on every write, so a reader that
//! cloned the `Arc` keeps a consistent snapshot while writers move on.

use riskwatch_model::{Prediction, PredictionId, PredictionKind, Scope};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Owner class of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Personal and organization records
    User,
    /// Platform records
    System,
}

impl Owner {
    /// Partition owner for a record scope
    #[inline]
    #[must_use]
    pub fn for_scope(scope: Scope) -> Self {
        match scope {
            Scope::System => Owner::System,
            Scope::Personal | Scope::Organization => Owner::User,
        }
    }
}

/// Partition address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    /// Owner class
    pub owner: Owner,
    /// Prediction kind
    pub kind: PredictionKind,
}

impl PartitionKey {
    /// All four partitions
    pub const ALL: [PartitionKey; 4] = [
        PartitionKey::new(Owner::User, PredictionKind::Annual),
        PartitionKey::new(Owner::User, PredictionKind::Quarterly),
        PartitionKey::new(Owner::System, PredictionKind::Annual),
        PartitionKey::new(Owner::System, PredictionKind::Quarterly),
    ];

    /// Create key
    #[inline]
    #[must_use]
    pub const fn new(owner: Owner, kind: PredictionKind) -> Self {
        Self { owner, kind }
    }

    /// Key of the partition a record with `scope` belongs to
    #[inline]
    #[must_use]
    pub fn route(scope: Scope, kind: PredictionKind) -> Self {
        Self::new(Owner::for_scope(scope), kind)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = match self.owner {
            Owner::User => "user",
            Owner::System => "system",
        };
        write!(f, "{owner}-{}", self.kind)
    }
}

/// Partition sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionCounts {
    /// User annual records
    pub user_annual: usize,
    /// User quarterly records
    pub user_quarterly: usize,
    /// System annual records
    pub system_annual: usize,
    /// System quarterly records
    pub system_quarterly: usize,
}

impl PartitionCounts {
    /// Total across all partitions
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.user_annual + self.user_quarterly + self.system_annual + self.system_quarterly
    }
}

/// Snapshot of a single partition
pub type Partition = Arc<Vec<Prediction>>;

/// The four partitions
#[derive(Debug, Clone, Default)]
pub struct PartitionSet {
    user_annual: Partition,
    user_quarterly: Partition,
    system_annual: Partition,
    system_quarterly: Partition,
}

impl PartitionSet {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one partition
    #[inline]
    #[must_use]
    pub fn get(&self, key: PartitionKey) -> &Partition {
        match (key.owner, key.kind) {
            (Owner::User, PredictionKind::Annual) => &self.user_annual,
            (Owner::User, PredictionKind::Quarterly) => &self.user_quarterly,
            (Owner::System, PredictionKind::Annual) => &self.system_annual,
            (Owner::System, PredictionKind::Quarterly) => &self.system_quarterly,
        }
    }

    fn slot(&mut self, key: PartitionKey) -> &mut Partition {
        match (key.owner, key.kind) {
            (Owner::User, PredictionKind::Annual) => &mut self.user_annual,
            (Owner::User, PredictionKind::Quarterly) => &mut self.user_quarterly,
            (Owner::System, PredictionKind::Annual) => &mut self.system_annual,
            (Owner::System, PredictionKind::Quarterly) => &mut self.system_quarterly,
        }
    }

    /// Replace a partition with fetched records
    ///
    /// Records whose scope routes elsewhere are dropped, and repeated ids keep
    /// their first occurrence.
    pub fn load(&mut self, key: PartitionKey, records: Vec<Prediction>) {
        let mut seen = HashSet::with_capacity(records.len());
        let fetched = records.len();
        let kept: Vec<Prediction> = records
            .into_iter()
            .filter(|p| Owner::for_scope(p.scope) == key.owner)
            .filter(|p| seen.insert(p.id.clone()))
            .collect();
        if kept.len() != fetched {
            tracing::debug!(
                partition = %key,
                fetched,
                kept = kept.len(),
                "dropped misrouted or duplicate records"
            );
        }
        *self.slot(key) = Arc::new(kept);
    }

    /// Insert at the head of the partition routed by the record's scope
    pub fn prepend(&mut self, prediction: Prediction, kind: PredictionKind) {
        let key = PartitionKey::route(prediction.scope, kind);
        let current = self.get(key);
        let mut next = Vec::with_capacity(current.len() + 1);
        next.push(prediction);
        next.extend(current.iter().cloned());
        *self.slot(key) = Arc::new(next);
    }

    /// Replace the record with `match_id` in the partition routed by the
    /// record's scope; returns whether a record was replaced
    pub fn replace(
        &mut self,
        prediction: Prediction,
        kind: PredictionKind,
        match_id: &PredictionId,
    ) -> bool {
        let key = PartitionKey::route(prediction.scope, kind);
        let current = self.get(key);
        let Some(idx) = current.iter().position(|p| &p.id == match_id) else {
            return false;
        };
        let mut next: Vec<Prediction> = current.as_ref().clone();
        next[idx] = prediction;
        *self.slot(key) = Arc::new(next);
        true
    }

    /// Remove `id` from both the user and the system partition of `kind`;
    /// returns how many records were removed
    pub fn remove(&mut self, id: &PredictionId, kind: PredictionKind) -> usize {
        [Owner::User, Owner::System]
            .into_iter()
            .map(|owner| {
                let key = PartitionKey::new(owner, kind);
                let current = self.get(key);
                if !current.iter().any(|p| &p.id == id) {
                    return 0;
                }
                let next: Vec<Prediction> =
                    current.iter().filter(|p| &p.id != id).cloned().collect();
                let removed = current.len() - next.len();
                *self.slot(key) = Arc::new(next);
                removed
            })
            .sum()
    }

    /// Find a record by id in any partition
    #[must_use]
    pub fn find(&self, id: &PredictionId) -> Option<(PartitionKey, &Prediction)> {
        PartitionKey::ALL
            .into_iter()
            .find_map(move |key| self.get(key).iter().find(|p| &p.id == id).map(|p| (key, p)))
    }

    /// Whether either user partition holds data
    #[inline]
    #[must_use]
    pub fn has_user_data(&self) -> bool {
        !self.user_annual.is_empty() || !self.user_quarterly.is_empty()
    }

    /// Whether either system partition holds data
    #[inline]
    #[must_use]
    pub fn has_system_data(&self) -> bool {
        !self.system_annual.is_empty() || !self.system_quarterly.is_empty()
    }

    /// Partition sizes
    #[must_use]
    pub fn counts(&self) -> PartitionCounts {
        PartitionCounts {
            user_annual: self.user_annual.len(),
            user_quarterly: self.user_quarterly.len(),
            system_annual: self.system_annual.len(),
            system_quarterly: self.system_quarterly.len(),
        }
    }
}
