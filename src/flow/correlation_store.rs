use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::messaging::CorrelationId;

use super::errors::CorrelationError;

// ============================================================================
// Correlation Store - in-flight split groups
// ============================================================================
//
// Owns every CorrelationGroup. Groups are spread over shards; each shard maps
// a correlation id to its own mutex, so arrivals for different ids never wait
// on each other and arrivals for the same id serialize on the check-and-append.
//
// Lock order is always shard -> group. `record` releases the shard before it
// takes the group lock.
//
// Closed groups leave a tombstone so that a late `record` is reported as a
// late arrival rather than as an unknown id. Tombstones are bounded per shard.
//
// ============================================================================

pub const DEFAULT_SHARDS: usize = 16;
pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 1024;

/// Lifecycle of one correlation group.
///
/// `AwaitingChildren -> Complete -> Drained`, or
/// `AwaitingChildren -> Abandoned`. Nothing leaves `Drained` or `Abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupState {
    AwaitingChildren,
    Complete,
    Drained,
    Abandoned,
}

/// What a successful `record` observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Pending { received: usize, expected: usize },
    /// This arrival was the last one; the caller owns the drain.
    Complete { expected: usize },
}

impl RecordOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RecordOutcome::Complete { .. })
    }
}

/// A result the store refused, with the reason.
#[derive(Debug)]
pub struct Rejected<R> {
    pub error: CorrelationError,
    pub result: R,
}

/// Partial results taken out of a group that was abandoned.
#[derive(Debug)]
pub struct AbandonedGroup<R> {
    pub expected: usize,
    pub received: Vec<R>,
}

struct CorrelationGroup<R> {
    expected: usize,
    received: Vec<R>,
    state: GroupState,
}

enum Slot<R> {
    Live(Arc<Mutex<CorrelationGroup<R>>>),
    Closed(GroupState),
}

struct Shard<R> {
    slots: HashMap<CorrelationId, Slot<R>>,
    closed: VecDeque<CorrelationId>,
}

impl<R> Shard<R> {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            closed: VecDeque::new(),
        }
    }

    fn close(&mut self, correlation_id: CorrelationId, state: GroupState, capacity: usize) {
        self.slots.insert(correlation_id.clone(), Slot::Closed(state));
        self.closed.push_back(correlation_id);

        while self.closed.len() > capacity {
            let Some(evicted) = self.closed.pop_front() else {
                break;
            };
            // The id may have been registered again since it was closed
            if matches!(self.slots.get(&evicted), Some(Slot::Closed(_))) {
                self.slots.remove(&evicted);
            }
        }
    }
}

pub struct CorrelationStore<R> {
    shards: Box<[RwLock<Shard<R>>]>,
    tombstone_capacity: usize,
}

impl<R> CorrelationStore<R> {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS, DEFAULT_TOMBSTONE_CAPACITY)
    }

    /// `tombstone_capacity` bounds how many closed ids each shard remembers.
    pub fn with_shards(shards: usize, tombstone_capacity: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(Shard::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            tombstone_capacity,
        }
    }

    /// Create a group expecting `expected` results.
    ///
    /// A group expecting nothing is complete as soon as it exists.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        expected: usize,
    ) -> Result<(), CorrelationError> {
        let mut shard = self.write(&correlation_id);

        if let Some(Slot::Live(_)) = shard.slots.get(&correlation_id) {
            return Err(CorrelationError::DuplicateGroup(correlation_id));
        }

        let state = if expected == 0 {
            GroupState::Complete
        } else {
            GroupState::AwaitingChildren
        };

        tracing::trace!(
            correlation_id = %correlation_id,
            expected = expected,
            "Registering correlation group"
        );

        shard.slots.insert(
            correlation_id,
            Slot::Live(Arc::new(Mutex::new(CorrelationGroup {
                expected,
                received: Vec::new(),
                state,
            }))),
        );

        Ok(())
    }

    /// Append one result to a group.
    ///
    /// The append and the completion check happen under the group lock, so
    /// exactly one caller ever observes `RecordOutcome::Complete`.
    pub fn record(
        &self,
        correlation_id: &CorrelationId,
        result: R,
    ) -> Result<RecordOutcome, CorrelationError> {
        self.try_record(correlation_id, result).map_err(|rejected| rejected.error)
    }

    /// Like `record`, but hands the result back when it is refused.
    pub fn try_record(
        &self,
        correlation_id: &CorrelationId,
        result: R,
    ) -> Result<RecordOutcome, Rejected<R>> {
        let slot = {
            let shard = self.read(correlation_id);
            match shard.slots.get(correlation_id) {
                Some(Slot::Live(group)) => Arc::clone(group),
                Some(Slot::Closed(_)) => {
                    return Err(Rejected {
                        error: CorrelationError::LateArrival(correlation_id.clone()),
                        result,
                    })
                }
                None => {
                    return Err(Rejected {
                        error: CorrelationError::UnknownGroup(correlation_id.clone()),
                        result,
                    })
                }
            }
        };

        let mut group = lock(&slot);

        // Complete-but-undrained groups refuse results too
        if group.state != GroupState::AwaitingChildren {
            return Err(Rejected {
                error: CorrelationError::LateArrival(correlation_id.clone()),
                result,
            });
        }

        group.received.push(result);
        let received = group.received.len();
        let expected = group.expected;

        if received >= expected {
            group.state = GroupState::Complete;
            Ok(RecordOutcome::Complete { expected })
        } else {
            Ok(RecordOutcome::Pending { received, expected })
        }
    }

    /// Take every result out of a complete group and close it.
    pub fn drain(&self, correlation_id: &CorrelationId) -> Result<Vec<R>, CorrelationError> {
        let mut shard = self.write(correlation_id);

        let slot = match shard.slots.get(correlation_id) {
            Some(Slot::Live(group)) => Arc::clone(group),
            _ => return Err(CorrelationError::UnknownGroup(correlation_id.clone())),
        };

        let received = {
            let mut group = lock(&slot);
            if group.state != GroupState::Complete {
                return Err(CorrelationError::Incomplete {
                    correlation_id: correlation_id.clone(),
                    received: group.received.len(),
                    expected: group.expected,
                });
            }
            group.state = GroupState::Drained;
            std::mem::take(&mut group.received)
        };

        shard.close(correlation_id.clone(), GroupState::Drained, self.tombstone_capacity);
        Ok(received)
    }

    /// Close a group that is still waiting for children and hand back what arrived.
    ///
    /// Idempotent: returns `None` for unknown, already closed, or complete
    /// groups. A complete group belongs to the arrival that completed it.
    pub fn abandon(&self, correlation_id: &CorrelationId) -> Option<AbandonedGroup<R>> {
        let mut shard = self.write(correlation_id);

        let slot = match shard.slots.get(correlation_id) {
            Some(Slot::Live(group)) => Arc::clone(group),
            _ => return None,
        };

        let abandoned = {
            let mut group = lock(&slot);
            if group.state != GroupState::AwaitingChildren {
                return None;
            }
            group.state = GroupState::Abandoned;
            AbandonedGroup {
                expected: group.expected,
                received: std::mem::take(&mut group.received),
            }
        };

        shard.close(correlation_id.clone(), GroupState::Abandoned, self.tombstone_capacity);
        Some(abandoned)
    }

    /// Current state of a group, if it is live or still remembered.
    pub fn state(&self, correlation_id: &CorrelationId) -> Option<GroupState> {
        let shard = self.read(correlation_id);
        match shard.slots.get(correlation_id)? {
            Slot::Live(group) => Some(lock(group).state),
            Slot::Closed(state) => Some(*state),
        }
    }

    /// Number of groups that have not been drained or abandoned yet.
    pub fn in_flight(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .slots
                    .values()
                    .filter(|slot| matches!(slot, Slot::Live(_)))
                    .count()
            })
            .sum()
    }

    fn shard(&self, correlation_id: &CorrelationId) -> &RwLock<Shard<R>> {
        let mut hasher = DefaultHasher::new();
        correlation_id.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn read(&self, correlation_id: &CorrelationId) -> RwLockReadGuard<'_, Shard<R>> {
        self.shard(correlation_id)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, correlation_id: &CorrelationId) -> RwLockWriteGuard<'_, Shard<R>> {
        self.shard(correlation_id)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R> Default for CorrelationStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<R>(group: &Mutex<CorrelationGroup<R>>) -> MutexGuard<'_, CorrelationGroup<R>> {
    group.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Tests
// ============================================================================
