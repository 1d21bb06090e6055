use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::order::LineItem;
use crate::messaging::Envelope;
use crate::utils::{retry_on_transient, IsTransient, RetryConfig};

use super::observer::{Component, FlowEvent, FlowEventKind, FlowObserver};

// ============================================================================
// Per-Item Transformer
// ============================================================================
//
// A transformer sees one child message at a time and knows nothing about its
// siblings. Workers run transformers concurrently, retry transient failures,
// and turn whatever is left into a ChildOutcome so the group always hears
// back from every child.
//
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("transient transform failure: {0}")]
    Transient(String),

    #[error("transform rejected line item: {0}")]
    Permanent(String),
}

impl IsTransient for TransformError {
    fn is_transient(&self) -> bool {
        matches!(self, TransformError::Transient(_))
    }
}

/// A child that could not be transformed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChildFailure {
    pub line_item: LineItem,
    pub sequence_number: Option<usize>,
    pub attempts: u32,
    pub error: TransformError,
}

/// What a worker reports to the aggregator for one child.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ChildOutcome {
    Transformed(LineItem),
    Failed(ChildFailure),
}

#[async_trait]
pub trait LineItemTransformer: Send + Sync {
    fn name(&self) -> &str;

    /// Transform one child message.
    ///
    /// Headers left unset on the output are copied from the input.
    async fn transform(
        &self,
        message: &Envelope<LineItem>,
    ) -> Result<Envelope<LineItem>, TransformError>;
}

/// Logs the parent order of each child and passes the line item through.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTransformer;

#[async_trait]
impl LineItemTransformer for LoggingTransformer {
    fn name(&self) -> &str {
        "logging_transformer"
    }

    async fn transform(
        &self,
        message: &Envelope<LineItem>,
    ) -> Result<Envelope<LineItem>, TransformError> {
        match &message.headers.order {
            Some(order) => tracing::info!(
                line_item = %message.payload,
                "original order: {}",
                order
            ),
            None => tracing::info!(line_item = %message.payload, "original order: <none>"),
        }

        Ok(message.forward(message.payload.clone()))
    }
}

/// Adapts a plain function over line items.
pub struct FnTransformer<F> {
    name: String,
    f: F,
}

impl<F> FnTransformer<F>
where
    F: Fn(&LineItem) -> Result<LineItem, TransformError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> LineItemTransformer for FnTransformer<F>
where
    F: Fn(&LineItem) -> Result<LineItem, TransformError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(
        &self,
        message: &Envelope<LineItem>,
    ) -> Result<Envelope<LineItem>, TransformError> {
        let item = (self.f)(&message.payload)?;
        Ok(message.forward(item))
    }
}

/// Run one child through `transformer`, retrying transient failures.
///
/// Never fails: a child that cannot be transformed comes back as
/// `ChildOutcome::Failed` carrying the child's own headers.
pub async fn transform_child(
    transformer: &dyn LineItemTransformer,
    retry: &RetryConfig,
    observer: &dyn FlowObserver,
    message: Envelope<LineItem>,
) -> Envelope<ChildOutcome> {
    let attempts = AtomicU32::new(0);
    let attempts_ref = &attempts;
    let message_ref = &message;

    let result = retry_on_transient(retry, transformer.name(), move |attempt| {
        attempts_ref.store(attempt, Ordering::Relaxed);
        transformer.transform(message_ref)
    })
    .await
    .into_result();

    let attempts = attempts.load(Ordering::Relaxed);

    match result {
        Ok(mut output) => {
            output.headers.copy_if_absent(&message.headers);
            observer.on_event(
                &FlowEvent::new(
                    Component::Transformer,
                    output.correlation_id(),
                    FlowEventKind::Transformed { attempts },
                )
                .with_summary(output.payload.to_string()),
            );
            output.map(ChildOutcome::Transformed)
        }
        Err(error) => {
            observer.on_event(
                &FlowEvent::new(
                    Component::Transformer,
                    message.correlation_id(),
                    FlowEventKind::TransformFailed {
                        attempts,
                        error: error.to_string(),
                    },
                )
                .with_summary(message.payload.to_string()),
            );
            let failure = ChildFailure {
                line_item: message.payload.clone(),
                sequence_number: message.headers.sequence_number,
                attempts,
                error,
            };
            message.forward(ChildOutcome::Failed(failure))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
