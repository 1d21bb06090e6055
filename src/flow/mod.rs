// ============================================================================
// Flow Module
// ============================================================================
//
// The correlated split / transform / aggregate pipeline for orders.
//
// Structure:
// - correlation_store - per-id groups of results awaiting completion
// - splitter          - order -> one child message per line item
// - transformer       - per-child transformation with retry
// - aggregator        - fires once per group, on its last arrival
// - orchestrator      - wiring, worker pool, single entry point
// - dead_letter       - sink for messages that could not be correlated
// - observer          - advisory per-stage events
//
// ============================================================================

mod aggregator;
mod config;
mod correlation_store;
mod dead_letter;
mod errors;
mod observer;
mod orchestrator;
mod splitter;
mod transformer;

pub use aggregator::{AggregatedResult, AggregationPolicy, Aggregator};
pub use config::FlowConfig;
pub use correlation_store::{
    AbandonedGroup, CorrelationStore, GroupState, RecordOutcome, Rejected, DEFAULT_SHARDS,
    DEFAULT_TOMBSTONE_CAPACITY,
};
pub use dead_letter::{DeadLetter, DeadLetterSink, DeadLetterStats, InMemoryDeadLetterQueue};
pub use errors::{CorrelationError, FlowError};
pub use observer::{
    Component, FlowEvent, FlowEventKind, FlowObserver, ObserverChain, TracingObserver,
};
pub use orchestrator::{BatchResult, OrderFlow, OrderFlowBuilder, OrderOutcome};
pub use splitter::{ChildStore, Splitter};
pub use transformer::{
    transform_child, ChildFailure, ChildOutcome, FnTransformer, LineItemTransformer,
    LoggingTransformer, TransformError,
};
