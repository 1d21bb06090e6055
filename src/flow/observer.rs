use std::sync::Arc;
use std::time::Duration;

use crate::messaging::CorrelationId;

// ============================================================================
// Flow Observer - advisory per-stage events
// ============================================================================
//
// Each stage reports what it did as a FlowEvent. Observers only watch: they
// cannot fail a stage or change what it emits.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Orchestrator,
    Splitter,
    Transformer,
    Aggregator,
    DeadLetter,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Orchestrator => "orchestrator",
            Component::Splitter => "splitter",
            Component::Transformer => "transformer",
            Component::Aggregator => "aggregator",
            Component::DeadLetter => "dead_letter",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEventKind {
    Submitted { line_items: usize },
    Split { children: usize },
    EmptySplit,
    Transformed { attempts: u32 },
    TransformFailed { attempts: u32, error: String },
    Recorded { received: usize, expected: usize },
    Completed { items: usize, failures: usize, complete: bool },
    GroupFailed { failures: usize },
    Abandoned { received: usize, expected: usize },
    Delivered { elapsed: Duration },
    DeadLettered { kind: &'static str },
}

#[derive(Debug, Clone)]
pub struct FlowEvent {
    pub component: Component,
    pub correlation_id: Option<CorrelationId>,
    pub kind: FlowEventKind,
    /// Short human-readable description of the payload involved
    pub summary: String,
}

impl FlowEvent {
    pub fn new(
        component: Component,
        correlation_id: Option<&CorrelationId>,
        kind: FlowEventKind,
    ) -> Self {
        Self {
            component,
            correlation_id: correlation_id.cloned(),
            kind,
            summary: String::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

pub trait FlowObserver: Send + Sync {
    fn on_event(&self, event: &FlowEvent);
}

/// Writes every event to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl FlowObserver for TracingObserver {
    fn on_event(&self, event: &FlowEvent) {
        let component = event.component.as_str();
        let correlation_id = event
            .correlation_id
            .as_ref()
            .map(CorrelationId::as_str)
            .unwrap_or("-");
        let summary = event.summary.as_str();

        match &event.kind {
            FlowEventKind::Submitted { line_items } => {
                tracing::info!(
                    component,
                    correlation_id,
                    line_items,
                    summary,
                    "Order submitted"
                );
            }
            FlowEventKind::Split { children } => {
                tracing::debug!(component, correlation_id, children, summary, "Order split");
            }
            FlowEventKind::EmptySplit => {
                tracing::info!(
                    component,
                    correlation_id,
                    summary,
                    "Order has no line items, nothing to aggregate"
                );
            }
            FlowEventKind::Transformed { attempts } => {
                tracing::debug!(
                    component,
                    correlation_id,
                    attempts,
                    summary,
                    "Line item transformed"
                );
            }
            FlowEventKind::TransformFailed { attempts, error } => {
                tracing::warn!(
                    component,
                    correlation_id,
                    attempts,
                    error = %error,
                    summary,
                    "Line item transform failed"
                );
            }
            FlowEventKind::Recorded { received, expected } => {
                tracing::debug!(component, correlation_id, received, expected, "Child recorded");
            }
            FlowEventKind::Completed {
                items,
                failures,
                complete,
            } => {
                tracing::info!(
                    component,
                    correlation_id,
                    items,
                    failures,
                    complete,
                    "Group aggregated"
                );
            }
            FlowEventKind::GroupFailed { failures } => {
                tracing::error!(component, correlation_id, failures, "Group failed");
            }
            FlowEventKind::Abandoned { received, expected } => {
                tracing::warn!(component, correlation_id, received, expected, "Group abandoned");
            }
            FlowEventKind::Delivered { elapsed } => {
                tracing::info!(
                    component,
                    correlation_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Aggregated result delivered"
                );
            }
            FlowEventKind::DeadLettered { kind } => {
                tracing::error!(
                    component,
                    correlation_id,
                    kind,
                    summary,
                    "Message sent to dead letter sink"
                );
            }
        }
    }
}

/// Fans each event out to several observers, in order.
#[derive(Default, Clone)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn FlowObserver>>,
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn FlowObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn push(&mut self, observer: Arc<dyn FlowObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl FlowObserver for ObserverChain {
    fn on_event(&self, event: &FlowEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
