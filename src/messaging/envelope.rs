use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::Order;

// ============================================================================
// Envelope - payload plus routing headers
// ============================================================================
//
// Every message that moves between pipeline stages is an Envelope. Headers
// are copy-on-forward: a stage that derives a new message from an old one
// keeps every header it does not explicitly override.
//
// ============================================================================

/// Identifier grouping every child message derived from one parent message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Correlation id of the group split from an order.
    pub fn for_order(order_id: i64) -> Self {
        Self(format!("order-{}", order_id))
    }

    /// Correlation id of the group split from a batch of orders.
    pub fn for_batch(batch_id: Uuid) -> Self {
        Self(format!("batch-{}", batch_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageHeaders {
    // Identity
    pub message_id: Uuid,

    // Correlation
    pub correlation_id: Option<CorrelationId>,
    pub order: Option<Arc<Order>>, // Parent order a child was split from
    pub sequence_number: Option<usize>, // 1-based position within the split
    pub sequence_size: Option<usize>,

    // Timing
    pub timestamp: DateTime<Utc>,

    pub metadata: HashMap<String, String>,
}

impl MessageHeaders {
    pub fn new() -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id: None,
            order: None,
            sequence_number: None,
            sequence_size: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Id of the parent order, if this message carries one.
    pub fn order_id(&self) -> Option<i64> {
        self.order.as_ref().map(|order| order.id)
    }

    /// Fill every header this message leaves unset from `other`.
    ///
    /// Identity and timestamp are never copied.
    pub fn copy_if_absent(&mut self, other: &MessageHeaders) {
        if self.correlation_id.is_none() {
            self.correlation_id = other.correlation_id.clone();
        }
        if self.order.is_none() {
            self.order = other.order.clone();
        }
        if self.sequence_number.is_none() {
            self.sequence_number = other.sequence_number;
        }
        if self.sequence_size.is_none() {
            self.sequence_size = other.sequence_size;
        }
        for (key, value) in &other.metadata {
            self.metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    fn renewed(&self) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }
}

impl Default for MessageHeaders {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Envelope<T> {
    pub headers: MessageHeaders,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            headers: MessageHeaders::new(),
            payload,
        }
    }

    pub fn with_headers(payload: T, headers: MessageHeaders) -> Self {
        Self { headers, payload }
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.headers.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_order(mut self, order: Arc<Order>) -> Self {
        self.headers.order = Some(order);
        self
    }

    pub fn with_sequence(mut self, number: usize, size: usize) -> Self {
        self.headers.sequence_number = Some(number);
        self.headers.sequence_size = Some(size);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.metadata.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.headers.correlation_id.as_ref()
    }

    /// Derive a new message carrying `payload` and a copy of these headers.
    pub fn forward<U>(&self, payload: U) -> Envelope<U> {
        Envelope {
            headers: self.headers.renewed(),
            payload,
        }
    }

    /// Consume this message, replacing its payload and keeping its headers.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            headers: self.headers.renewed(),
            payload: f(self.payload),
        }
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize + fmt::Debug> Envelope<T> {
    /// JSON snapshot of the whole message, falling back to its debug form.
    pub fn snapshot(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

// ============================================================================
// Tests
// ============================================================================
