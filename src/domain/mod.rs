// ============================================================================
// Domain Layer
// ============================================================================
//
// Plain value types carried as message payloads. Nothing in here knows about
// envelopes, correlation or concurrency.
//
// ============================================================================

pub mod order;
