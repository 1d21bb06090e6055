// ============================================================================
// Order Domain - Values routed through the order flow
// ============================================================================
//
// An Order is the parent message of the flow; each LineItem becomes one
// child message after the split.
//
// ============================================================================

pub mod value_objects;

pub use value_objects::*;
