use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messaging::CorrelationId;

// ============================================================================
// Dead Letter Sink
// ============================================================================
//
// Destination for child messages that could not be correlated: late arrivals
// after a drain or abandon, arrivals for unknown groups, and messages missing
// their correlation header. Dead letters are kept for inspection and are never
// re-delivered to an aggregate.
//
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeadLetter {
    pub id: Uuid,
    pub correlation_id: Option<CorrelationId>,
    /// Machine-readable failure kind, e.g. `late_arrival`
    pub kind: String,
    pub reason: String,
    /// JSON snapshot of the rejected message
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        correlation_id: Option<CorrelationId>,
        kind: impl Into<String>,
        reason: impl ToString,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id,
            kind: kind.into(),
            reason: reason.to_string(),
            payload: payload.into(),
            failed_at: Utc::now(),
        }
    }
}

pub trait DeadLetterSink: Send + Sync {
    fn deliver(&self, letter: DeadLetter);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeadLetterStats {
    pub total_messages: usize,
    pub by_kind: HashMap<String, usize>,
}

/// Process-local dead letter queue.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest `limit` dead letters.
    pub fn messages(&self, limit: usize) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> DeadLetterStats {
        let letters = self.letters.lock().unwrap_or_else(PoisonError::into_inner);

        let mut by_kind = HashMap::new();
        for letter in letters.iter() {
            *by_kind.entry(letter.kind.clone()).or_insert(0) += 1;
        }

        DeadLetterStats {
            total_messages: letters.len(),
            by_kind,
        }
    }

    pub fn len(&self) -> usize {
        self.letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for InMemoryDeadLetterQueue {
    fn deliver(&self, letter: DeadLetter) {
        tracing::error!(
            dead_letter_id = %letter.id,
            kind = %letter.kind,
            reason = %letter.reason,
            "💀 Adding message to dead letter queue"
        );

        self.letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(letter);
    }
}
