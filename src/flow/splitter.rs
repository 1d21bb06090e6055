use std::sync::Arc;

use uuid::Uuid;

use crate::domain::order::{LineItem, Order};
use crate::messaging::{CorrelationId, Envelope};

use super::correlation_store::CorrelationStore;
use super::errors::FlowError;
use super::observer::{Component, FlowEvent, FlowEventKind, FlowObserver};
use super::transformer::ChildOutcome;

/// Store holding the outcomes of in-flight order splits.
pub type ChildStore = CorrelationStore<Envelope<ChildOutcome>>;

// ============================================================================
// Splitter - one child message per line item
// ============================================================================

pub struct Splitter {
    store: Arc<ChildStore>,
    observer: Arc<dyn FlowObserver>,
}

impl Splitter {
    pub fn new(store: Arc<ChildStore>, observer: Arc<dyn FlowObserver>) -> Self {
        Self { store, observer }
    }

    /// Split an order message into one message per line item.
    ///
    /// The correlation group is registered before any child is returned, so a
    /// child can never reach the aggregator ahead of its group. An order with
    /// no line items registers nothing and fails with `FlowError::EmptySplit`.
    pub fn split(&self, message: Envelope<Order>) -> Result<Vec<Envelope<LineItem>>, FlowError> {
        let Envelope { headers, payload } = message;
        let order = Arc::new(payload);
        let correlation_id = CorrelationId::for_order(order.id);

        if order.is_empty() {
            self.observer.on_event(
                &FlowEvent::new(
                    Component::Splitter,
                    Some(&correlation_id),
                    FlowEventKind::EmptySplit,
                )
                .with_summary(order.to_string()),
            );
            return Err(FlowError::EmptySplit { order_id: order.id });
        }

        let size = order.len();
        self.store.register(correlation_id.clone(), size)?;

        let children: Vec<Envelope<LineItem>> = order
            .line_items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let mut child_headers = headers.clone();
                child_headers.message_id = Uuid::new_v4();
                Envelope::with_headers(item.clone(), child_headers)
                    .with_correlation_id(correlation_id.clone())
                    .with_order(Arc::clone(&order))
                    .with_sequence(index + 1, size)
            })
            .collect();

        self.observer.on_event(
            &FlowEvent::new(
                Component::Splitter,
                Some(&correlation_id),
                FlowEventKind::Split { children: children.len() },
            )
            .with_summary(order.to_string()),
        );

        Ok(children)
    }
}
