use crate::messaging::CorrelationId;

use super::transformer::ChildFailure;

// ============================================================================
// Flow Errors
// ============================================================================
//
// Errors are always local to one correlation id: a failure in one group never
// affects another.
//
// ============================================================================

/// Errors raised by the correlation store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("correlation group {0} is already registered")]
    DuplicateGroup(CorrelationId),

    #[error("no live correlation group for {0}")]
    UnknownGroup(CorrelationId),

    #[error("correlation group {0} is already closed")]
    LateArrival(CorrelationId),

    #[error("correlation group {correlation_id} is incomplete ({received}/{expected})")]
    Incomplete {
        correlation_id: CorrelationId,
        received: usize,
        expected: usize,
    },
}

impl CorrelationError {
    /// Short machine-readable kind, used to bucket dead letters.
    pub fn kind(&self) -> &'static str {
        match self {
            CorrelationError::DuplicateGroup(_) => "duplicate_group",
            CorrelationError::UnknownGroup(_) => "unknown_group",
            CorrelationError::LateArrival(_) => "late_arrival",
            CorrelationError::Incomplete { .. } => "incomplete",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error("order {order_id} has no line items")]
    EmptySplit { order_id: i64 },

    #[error("message is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("group {correlation_id} failed: {} child message(s) could not be transformed", failures.len())]
    GroupFailed {
        correlation_id: CorrelationId,
        failures: Vec<ChildFailure>,
    },

    #[error("group {0} was abandoned before it completed")]
    Abandoned(CorrelationId),

    #[error("transform worker failed: {0}")]
    Worker(String),

    #[error("requests channel is closed")]
    ChannelClosed,
}
