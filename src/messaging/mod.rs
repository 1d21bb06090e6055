// ============================================================================
// Messaging Module
// ============================================================================
//
// Message envelopes and the in-process channels that carry them.
//
// ============================================================================

mod channels;
mod envelope;

pub use channels::{spawn_requests_endpoint, OrderBatchRequest, RequestsChannel};
pub use envelope::{CorrelationId, Envelope, MessageHeaders};
