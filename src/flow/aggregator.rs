use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::LineItem;
use crate::messaging::{CorrelationId, Envelope};

use super::correlation_store::{RecordOutcome, Rejected};
use super::dead_letter::{DeadLetter, DeadLetterSink};
use super::errors::FlowError;
use super::observer::{Component, FlowEvent, FlowEventKind, FlowObserver};
use super::splitter::ChildStore;
use super::transformer::{ChildFailure, ChildOutcome};

// ============================================================================
// Aggregator - recombines a split once every child has reported
// ============================================================================
//
// Per correlation id:
//
//   AWAITING_CHILDREN --last arrival--> COMPLETE --drain--> DRAINED
//   AWAITING_CHILDREN --abandon/force_complete--> ABANDONED
//
// Aggregation is reactive: the arrival that completes a group drains it and
// emits the result. Every other arrival produces nothing.
//
// ============================================================================

/// What to do with a group in which some children failed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationPolicy {
    /// Any failed child fails the whole group
    #[default]
    RequireAll,
    /// Emit whatever was transformed, listing the failures
    BestEffort,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AggregatedResult {
    pub correlation_id: CorrelationId,
    /// `None` only for a forced completion that received no children
    pub order_id: Option<i64>,
    /// Transformed children, in split order
    pub items: Vec<Envelope<LineItem>>,
    pub failures: Vec<ChildFailure>,
    pub expected: usize,
    /// False when the group was forced to complete before every child arrived
    pub complete: bool,
}

impl AggregatedResult {
    /// Result for an order that had nothing to split.
    pub fn empty(order_id: i64) -> Self {
        Self {
            correlation_id: CorrelationId::for_order(order_id),
            order_id: Some(order_id),
            items: Vec::new(),
            failures: Vec::new(),
            expected: 0,
            complete: true,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        !self.complete || !self.failures.is_empty()
    }

    pub fn line_items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.iter().map(|item| &item.payload)
    }
}

pub struct Aggregator {
    store: Arc<ChildStore>,
    policy: AggregationPolicy,
    observer: Arc<dyn FlowObserver>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl Aggregator {
    pub fn new(
        store: Arc<ChildStore>,
        policy: AggregationPolicy,
        observer: Arc<dyn FlowObserver>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            store,
            policy,
            observer,
            dead_letters,
        }
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// Record one transformed child.
    ///
    /// Returns the aggregated result when this child completed its group and
    /// `None` otherwise. Children that cannot be correlated are dead-lettered
    /// and reported as errors.
    pub fn accept(
        &self,
        message: Envelope<ChildOutcome>,
    ) -> Result<Option<Envelope<AggregatedResult>>, FlowError> {
        let Some(correlation_id) = message.correlation_id().cloned() else {
            self.dead_letter(
                None,
                "missing_header",
                "message is missing the correlation_id header",
                message.snapshot(),
            );
            return Err(FlowError::MissingHeader("correlation_id"));
        };

        match self.store.try_record(&correlation_id, message) {
            Err(Rejected { error, result }) => {
                self.dead_letter(Some(&correlation_id), error.kind(), &error, result.snapshot());
                Err(error.into())
            }
            Ok(RecordOutcome::Pending { received, expected }) => {
                self.emit(&correlation_id, FlowEventKind::Recorded { received, expected });
                Ok(None)
            }
            Ok(RecordOutcome::Complete { expected }) => {
                self.emit(
                    &correlation_id,
                    FlowEventKind::Recorded {
                        received: expected,
                        expected,
                    },
                );
                let parts = self.store.drain(&correlation_id)?;
                self.assemble(correlation_id, parts, expected, true).map(Some)
            }
        }
    }

    /// Close a group that is still waiting and emit what it has.
    ///
    /// Under `BestEffort` this yields a partial result; under `RequireAll` it
    /// fails with `FlowError::Abandoned`. Returns `Ok(None)` when there is no
    /// waiting group, including when the group has just completed on its own.
    pub fn force_complete(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<Envelope<AggregatedResult>>, FlowError> {
        let Some(abandoned) = self.store.abandon(correlation_id) else {
            return Ok(None);
        };

        self.emit(
            correlation_id,
            FlowEventKind::Abandoned {
                received: abandoned.received.len(),
                expected: abandoned.expected,
            },
        );

        match self.policy {
            AggregationPolicy::RequireAll => Err(FlowError::Abandoned(correlation_id.clone())),
            AggregationPolicy::BestEffort => self
                .assemble(
                    correlation_id.clone(),
                    abandoned.received,
                    abandoned.expected,
                    false,
                )
                .map(Some),
        }
    }

    /// Discard a waiting group. Idempotent; returns whether a group was closed.
    pub fn abandon(&self, correlation_id: &CorrelationId) -> bool {
        match self.store.abandon(correlation_id) {
            Some(abandoned) => {
                self.emit(
                    correlation_id,
                    FlowEventKind::Abandoned {
                        received: abandoned.received.len(),
                        expected: abandoned.expected,
                    },
                );
                true
            }
            None => false,
        }
    }

    fn assemble(
        &self,
        correlation_id: CorrelationId,
        mut parts: Vec<Envelope<ChildOutcome>>,
        expected: usize,
        complete: bool,
    ) -> Result<Envelope<AggregatedResult>, FlowError> {
        parts.sort_by_key(|part| part.headers.sequence_number);

        let mut headers = parts
            .first()
            .map(|part| part.headers.clone())
            .unwrap_or_default();
        headers.message_id = Uuid::new_v4();
        headers.timestamp = Utc::now();
        headers.correlation_id = Some(correlation_id.clone());
        headers.sequence_number = None;
        headers.sequence_size = None;

        let mut items = Vec::with_capacity(parts.len());
        let mut failures = Vec::new();
        for Envelope { headers, payload } in parts {
            match payload {
                ChildOutcome::Transformed(item) => {
                    items.push(Envelope::with_headers(item, headers))
                }
                ChildOutcome::Failed(failure) => failures.push(failure),
            }
        }

        if self.policy == AggregationPolicy::RequireAll && !failures.is_empty() {
            self.emit(
                &correlation_id,
                FlowEventKind::GroupFailed {
                    failures: failures.len(),
                },
            );
            return Err(FlowError::GroupFailed {
                correlation_id,
                failures,
            });
        }

        self.emit(
            &correlation_id,
            FlowEventKind::Completed {
                items: items.len(),
                failures: failures.len(),
                complete,
            },
        );

        let result = AggregatedResult {
            order_id: headers.order_id(),
            correlation_id,
            items,
            failures,
            expected,
            complete,
        };
        Ok(Envelope::with_headers(result, headers))
    }

    fn dead_letter(
        &self,
        correlation_id: Option<&CorrelationId>,
        kind: &'static str,
        reason: impl ToString,
        payload: String,
    ) {
        let letter = DeadLetter::new(correlation_id.cloned(), kind, reason, payload);
        self.observer.on_event(
            &FlowEvent::new(
                Component::DeadLetter,
                correlation_id,
                FlowEventKind::DeadLettered { kind },
            )
            .with_summary(letter.reason.clone()),
        );
        self.dead_letters.deliver(letter);
    }

    fn emit(&self, correlation_id: &CorrelationId, kind: FlowEventKind) {
        self.observer
            .on_event(&FlowEvent::new(Component::Aggregator, Some(correlation_id), kind));
    }
}

// ============================================================================
// Tests
// ============================================================================
