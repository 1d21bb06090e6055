use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::domain::order::{LineItem, Order};
use crate::messaging::{CorrelationId, Envelope};

use super::aggregator::{AggregatedResult, Aggregator};
use super::config::FlowConfig;
use super::correlation_store::{CorrelationStore, RecordOutcome};
use super::dead_letter::{DeadLetterSink, InMemoryDeadLetterQueue};
use super::errors::FlowError;
use super::observer::{
    Component, FlowEvent, FlowEventKind, FlowObserver, ObserverChain, TracingObserver,
};
use super::splitter::{ChildStore, Splitter};
use super::transformer::{transform_child, LineItemTransformer, LoggingTransformer};

// ============================================================================
// Order Flow - split, transform, aggregate
// ============================================================================
//
// The only component that knows the whole wiring:
//
//   OrderFlow
//   ├── Splitter        (registers the group, emits children)
//   ├── worker pool     (one task per child, bounded by a semaphore)
//   │   └── LineItemTransformer + retry
//   └── Aggregator      (fires on the arrival that completes the group)
//
// Every submission gets its own correlation group, so submissions run
// concurrently without sharing anything but the store.
//
// ============================================================================

/// Result of one order inside a batch.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderOutcome {
    pub order_id: i64,
    pub result: Result<AggregatedResult, String>,
}

/// One outcome per submitted order, sorted by order id.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub outcomes: Vec<OrderOutcome>,
}

type WorkerOutput = Result<Option<Envelope<AggregatedResult>>, FlowError>;

#[derive(Clone)]
pub struct OrderFlow {
    config: Arc<FlowConfig>,
    store: Arc<ChildStore>,
    splitter: Arc<Splitter>,
    transformer: Arc<dyn LineItemTransformer>,
    aggregator: Arc<Aggregator>,
    workers: Arc<Semaphore>,
    batches: Arc<CorrelationStore<OrderOutcome>>,
    observer: Arc<dyn FlowObserver>,
}

impl OrderFlow {
    /// Flow with a logging transformer and an in-memory dead letter queue.
    pub fn new(config: FlowConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> OrderFlowBuilder {
        OrderFlowBuilder::default()
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Groups still waiting for children.
    pub fn in_flight(&self) -> usize {
        self.store.in_flight()
    }

    /// Cancel the group of an in-flight order.
    ///
    /// Idempotent. Children that arrive afterwards are dead-lettered and the
    /// pending `submit` resolves once its workers have finished.
    pub fn abandon(&self, correlation_id: &CorrelationId) -> bool {
        self.aggregator.abandon(correlation_id)
    }

    pub async fn submit(&self, order: Order) -> Result<Envelope<AggregatedResult>, FlowError> {
        self.submit_envelope(Envelope::new(order)).await
    }

    /// Drive one order message through the pipeline.
    ///
    /// Resolves to exactly one aggregated result or an error. An order with
    /// no line items resolves to an empty result.
    pub async fn submit_envelope(
        &self,
        message: Envelope<Order>,
    ) -> Result<Envelope<AggregatedResult>, FlowError> {
        let started = Instant::now();
        let order_id = message.payload.id;
        let correlation_id = CorrelationId::for_order(order_id);
        let parent_headers = message.headers.clone();

        self.observer.on_event(
            &FlowEvent::new(
                Component::Orchestrator,
                Some(&correlation_id),
                FlowEventKind::Submitted {
                    line_items: message.payload.len(),
                },
            )
            .with_summary(message.payload.to_string()),
        );

        let children = match self.splitter.split(message) {
            Ok(children) => children,
            Err(FlowError::EmptySplit { order_id }) => {
                let result =
                    Envelope::with_headers(AggregatedResult::empty(order_id), parent_headers)
                        .with_correlation_id(correlation_id.clone())
                        .with_order(Arc::new(Order::new(order_id, Vec::new())));
                self.delivered(&correlation_id, started);
                return Ok(result);
            }
            Err(e) => return Err(e),
        };

        // Closes the group if the caller drops this submission mid-flight
        let mut guard = GroupGuard {
            aggregator: Arc::clone(&self.aggregator),
            correlation_id: correlation_id.clone(),
            armed: true,
        };

        let mut workers = JoinSet::new();
        for child in children {
            workers.spawn(self.clone().run_worker(child));
        }

        let output = self.collect(&correlation_id, &mut workers).await;
        guard.armed = false;
        if output.is_ok() {
            self.delivered(&correlation_id, started);
        }
        output
    }

    /// Submit several orders as one batch and aggregate their outcomes.
    ///
    /// Orders run concurrently. A failing order is reported in its outcome
    /// and never affects its siblings.
    pub async fn submit_batch(
        &self,
        orders: Vec<Order>,
    ) -> Result<Envelope<BatchResult>, FlowError> {
        let batch_id = Uuid::now_v7();
        let correlation_id = CorrelationId::for_batch(batch_id);
        self.batches.register(correlation_id.clone(), orders.len())?;

        tracing::info!(
            correlation_id = %correlation_id,
            orders = orders.len(),
            "Submitting order batch"
        );

        let submissions = orders.into_iter().map(|order| {
            let flow = self.clone();
            let correlation_id = correlation_id.clone();
            async move {
                let order_id = order.id;
                let result = flow
                    .submit(order)
                    .await
                    .map(Envelope::into_payload)
                    .map_err(|e| e.to_string());

                flow.batches
                    .record(&correlation_id, OrderOutcome { order_id, result })
                    .and_then(|recorded| match recorded {
                        RecordOutcome::Complete { .. } => {
                            flow.batches.drain(&correlation_id).map(Some)
                        }
                        RecordOutcome::Pending { .. } => Ok(None),
                    })
            }
        });

        let mut outcomes = None;
        for completion in join_all(submissions).await {
            if let Some(drained) = completion? {
                outcomes = Some(drained);
            }
        }

        let mut outcomes = match outcomes {
            Some(outcomes) => outcomes,
            // An empty batch is complete as soon as it is registered
            None => self.batches.drain(&correlation_id)?,
        };
        outcomes.sort_by_key(|outcome| outcome.order_id);

        Ok(Envelope::new(BatchResult { batch_id, outcomes }).with_correlation_id(correlation_id))
    }

    async fn run_worker(self, child: Envelope<LineItem>) -> WorkerOutput {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| FlowError::Worker(e.to_string()))?;

        let outcome = transform_child(
            self.transformer.as_ref(),
            &self.config.retry,
            self.observer.as_ref(),
            child,
        )
        .await;

        self.aggregator.accept(outcome)
    }

    /// Wait for the workers of one group and pick out its single output.
    async fn collect(
        &self,
        correlation_id: &CorrelationId,
        workers: &mut JoinSet<WorkerOutput>,
    ) -> Result<Envelope<AggregatedResult>, FlowError> {
        let mut deadline = self.config.completion_timeout.map(|timeout| Instant::now() + timeout);
        let mut output: Option<Result<Envelope<AggregatedResult>, FlowError>> = None;

        loop {
            let next = match deadline {
                Some(at) => match timeout_at(at, workers.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        deadline = None;
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            "Completion timeout expired, forcing completion"
                        );
                        match self.aggregator.force_complete(correlation_id) {
                            // Completed on its own just before the deadline
                            Ok(None) => continue,
                            forced => {
                                // Stragglers would keep their worker permits
                                workers.abort_all();
                                return forced.and_then(|result| {
                                    result.ok_or_else(|| {
                                        FlowError::Abandoned(correlation_id.clone())
                                    })
                                });
                            }
                        }
                    }
                },
                None => workers.join_next().await,
            };

            match next {
                None => break,
                Some(Ok(Ok(Some(result)))) => output = Some(Ok(result)),
                Some(Ok(Ok(None))) => {}
                Some(Ok(Err(e @ FlowError::GroupFailed { .. }))) => output = Some(Err(e)),
                Some(Ok(Err(e))) => {
                    // Already dead-lettered by the aggregator
                    tracing::debug!(
                        correlation_id = %correlation_id,
                        error = %e,
                        "Child was not aggregated"
                    );
                }
                Some(Err(join_error)) => {
                    tracing::error!(
                        correlation_id = %correlation_id,
                        error = %join_error,
                        "Transform worker failed"
                    );
                    // The group can no longer complete; siblings still running
                    // are dead-lettered as late arrivals.
                    self.aggregator.abandon(correlation_id);
                    if output.is_none() {
                        output = Some(Err(FlowError::Worker(join_error.to_string())));
                    }
                }
            }
        }

        match output {
            Some(output) => output,
            // Every worker is done but the group never fired: it was abandoned
            // or lost a child, so close it now.
            None => self
                .aggregator
                .force_complete(correlation_id)?
                .ok_or_else(|| FlowError::Abandoned(correlation_id.clone())),
        }
    }

    fn delivered(&self, correlation_id: &CorrelationId, started: Instant) {
        self.observer.on_event(&FlowEvent::new(
            Component::Orchestrator,
            Some(correlation_id),
            FlowEventKind::Delivered {
                elapsed: started.elapsed(),
            },
        ));
    }
}

/// Abandons a submission's group when dropped while armed.
struct GroupGuard {
    aggregator: Arc<Aggregator>,
    correlation_id: CorrelationId,
    armed: bool,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.armed && self.aggregator.abandon(&self.correlation_id) {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                "Submission dropped before its group fired, group abandoned"
            );
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
pub struct OrderFlowBuilder {
    config: FlowConfig,
    transformer: Option<Arc<dyn LineItemTransformer>>,
    observers: Vec<Arc<dyn FlowObserver>>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl OrderFlowBuilder {
    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn LineItemTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Add an observer. Events are always logged through `TracingObserver` too.
    pub fn observer(mut self, observer: Arc<dyn FlowObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub fn build(self) -> OrderFlow {
        let config = self.config;

        let mut chain = ObserverChain::new().with(Arc::new(TracingObserver));
        for extra in self.observers {
            chain.push(extra);
        }
        let observer: Arc<dyn FlowObserver> = Arc::new(chain);

        let dead_letters = self
            .dead_letters
            .unwrap_or_else(|| Arc::new(InMemoryDeadLetterQueue::new()));
        let transformer = self.transformer.unwrap_or_else(|| Arc::new(LoggingTransformer));

        let store = Arc::new(ChildStore::with_shards(
            config.store_shards,
            config.tombstone_capacity,
        ));
        let batches = Arc::new(CorrelationStore::with_shards(
            config.store_shards,
            config.tombstone_capacity,
        ));
        let splitter = Arc::new(Splitter::new(store.clone(), observer.clone()));
        let aggregator = Arc::new(Aggregator::new(
            store.clone(),
            config.policy,
            observer.clone(),
            dead_letters,
        ));
        let workers = Arc::new(Semaphore::new(config.max_concurrent_transforms.max(1)));

        tracing::debug!(
            transformer = transformer.name(),
            workers = config.max_concurrent_transforms,
            policy = ?config.policy,
            "Order flow built"
        );

        OrderFlow {
            config: Arc::new(config),
            store,
            splitter,
            transformer,
            aggregator,
            workers,
            batches,
            observer,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::observer::testing::RecordingObserver;
    use crate::flow::transformer::{FnTransformer, TransformError};
    use crate::utils::RetryConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn order_1() -> Order {
        Order::new(1, vec![LineItem::new(11, "11"), LineItem::new(22, "12")])
    }

    fn order_2() -> Order {
        Order::new(2, vec![LineItem::new(33, "33"), LineItem::new(44, "44")])
    }

    /// Holds every child until the test opens the gate.
    struct Gated {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl LineItemTransformer for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        async fn transform(
            &self,
            message: &Envelope<LineItem>,
        ) -> Result<Envelope<LineItem>, TransformError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| TransformError::Permanent(e.to_string()))?;
            permit.forget();
            Ok(message.forward(message.payload.clone()))
        }
    }

    /// Holds one sku forever and lets every other one through.
    struct StallOn {
        sku: &'static str,
    }

    #[async_trait]
    impl LineItemTransformer for StallOn {
        fn name(&self) -> &str {
            "stall_on"
        }

        async fn transform(
            &self,
            message: &Envelope<LineItem>,
        ) -> Result<Envelope<LineItem>, TransformError> {
            if message.payload.sku == self.sku {
                std::future::pending::<()>().await;
            }
            Ok(message.forward(message.payload.clone()))
        }
    }

    /// Panics on one sku.
    struct PanicOn {
        sku: &'static str,
    }

    #[async_trait]
    impl LineItemTransformer for PanicOn {
        fn name(&self) -> &str {
            "panic_on"
        }

        async fn transform(
            &self,
            message: &Envelope<LineItem>,
        ) -> Result<Envelope<LineItem>, TransformError> {
            if message.payload.sku == self.sku {
                panic!("cannot transform sku {}", self.sku);
            }
            Ok(message.forward(message.payload.clone()))
        }
    }

    #[tokio::test]
    async fn test_concurrent_orders_do_not_cross_contaminate() {
        let flow = OrderFlow::new(FlowConfig::default());

        let (first, second) = tokio::join!(flow.submit(order_1()), flow.submit(order_2()));
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(first.payload.len(), 2);
        assert_eq!(second.payload.len(), 2);
        assert_eq!(first.payload.order_id, Some(1));
        assert_eq!(second.payload.order_id, Some(2));
        for item in &first.payload.items {
            assert_eq!(item.headers.order_id(), Some(1));
            assert_eq!(item.correlation_id(), Some(&CorrelationId::for_order(1)));
        }
        for item in &second.payload.items {
            assert_eq!(item.headers.order_id(), Some(2));
        }
        let first_ids: Vec<i64> = first.payload.line_items().map(|item| item.id).collect();
        let second_ids: Vec<i64> = second.payload.line_items().map(|item| item.id).collect();
        assert_eq!(first_ids, vec![11, 22]);
        assert_eq!(second_ids, vec![33, 44]);
        assert_eq!(flow.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_many_concurrent_orders_each_get_their_own_items() {
        let flow = OrderFlow::builder()
            .config(FlowConfig::default().with_max_concurrent_transforms(3))
            .transformer(Arc::new(FnTransformer::new("suffix", |item: &LineItem| {
                Ok(LineItem::new(item.id, format!("{}-t", item.sku)))
            })))
            .build();

        let submissions = (1..=20).map(|id: i64| {
            let flow = flow.clone();
            async move {
                let items = (0..5).map(|n| LineItem::new(id * 100 + n, format!("{}", n)));
                flow.submit(Order::new(id, items)).await
            }
        });

        for (index, result) in join_all(submissions).await.into_iter().enumerate() {
            let result = result.unwrap();
            let id = index as i64 + 1;
            assert_eq!(result.payload.len(), 5);
            assert!(result.payload.line_items().all(|item| item.id / 100 == id));
            assert!(result.payload.line_items().all(|item| item.sku.ends_with("-t")));
        }
        assert_eq!(flow.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_empty_order_yields_empty_result() {
        let observer = Arc::new(RecordingObserver::default());
        let flow = OrderFlow::builder().observer(observer.clone()).build();

        let result = flow.submit(Order::new(7, Vec::new())).await.unwrap();

        assert!(result.payload.is_empty());
        assert!(result.payload.complete);
        assert_eq!(result.payload.order_id, Some(7));
        assert_eq!(result.headers.order_id(), Some(7));
        assert_eq!(flow.in_flight(), 0);
        assert_eq!(observer.count(|k| matches!(k, FlowEventKind::Delivered { .. })), 1);
    }

    #[tokio::test]
    async fn test_require_all_fails_on_permanent_failure() {
        let flow = OrderFlow::builder()
            .config(FlowConfig::default().with_retry(fast_retry()))
            .transformer(Arc::new(FnTransformer::new("reject_12", |item: &LineItem| {
                if item.sku == "12" {
                    Err(TransformError::Permanent("discontinued".to_string()))
                } else {
                    Ok(item.clone())
                }
            })))
            .build();

        let result = flow.submit(order_1()).await;

        match result {
            Err(FlowError::GroupFailed { failures, .. }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].line_item.sku, "12");
            }
            other => panic!("expected group failure, got {:?}", other),
        }
        assert_eq!(flow.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_best_effort_returns_degraded_result() {
        let flow = OrderFlow::builder()
            .config(FlowConfig::best_effort().with_retry(fast_retry()))
            .transformer(Arc::new(FnTransformer::new("reject_12", |item: &LineItem| {
                if item.sku == "12" {
                    Err(TransformError::Permanent("discontinued".to_string()))
                } else {
                    Ok(item.clone())
                }
            })))
            .build();

        let result = flow.submit(order_1()).await.unwrap();

        assert_eq!(result.payload.len(), 1);
        assert_eq!(result.payload.failures.len(), 1);
        assert!(result.payload.is_degraded());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let flow = OrderFlow::builder()
            .transformer(Arc::new(FnTransformer::new("flaky", move |item: &LineItem| {
                // The first two attempts fail, whichever child they belong to
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TransformError::Transient("busy".to_string()))
                } else {
                    Ok(item.clone())
                }
            })))
            .config(
                FlowConfig::default()
                    .with_retry(fast_retry())
                    .with_max_concurrent_transforms(1),
            )
            .build();

        let result = flow.submit(order_1()).await.unwrap();

        assert_eq!(result.payload.len(), 2);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_abandon_dead_letters_late_children() {
        let gate = Arc::new(Semaphore::new(0));
        let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());
        let flow = OrderFlow::builder()
            .transformer(Arc::new(Gated { gate: gate.clone() }))
            .dead_letters(dead_letters.clone())
            .build();

        let pending = tokio::spawn({
            let flow = flow.clone();
            async move { flow.submit(order_1()).await }
        });

        while flow.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(flow.abandon(&CorrelationId::for_order(1)));
        assert!(!flow.abandon(&CorrelationId::for_order(1)));
        gate.add_permits(2);

        let result = pending.await.unwrap();

        assert!(matches!(
            result,
            Err(FlowError::Abandoned(ref id)) if *id == CorrelationId::for_order(1)
        ));
        assert_eq!(dead_letters.stats().by_kind["late_arrival"], 2);
        assert_eq!(flow.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_timeout_best_effort_returns_partial() {
        let flow = OrderFlow::builder()
            .config(FlowConfig::best_effort().with_completion_timeout(Duration::from_millis(50)))
            .transformer(Arc::new(StallOn { sku: "12" }))
            .build();

        let result = flow.submit(order_1()).await.unwrap();

        assert!(!result.payload.complete);
        assert_eq!(result.payload.expected, 2);
        let ids: Vec<i64> = result.payload.line_items().map(|item| item.id).collect();
        assert_eq!(ids, vec![11]);
        assert_eq!(flow.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_timeout_require_all_is_abandoned() {
        let flow = OrderFlow::builder()
            .config(FlowConfig::default().with_completion_timeout(Duration::from_millis(50)))
            .transformer(Arc::new(StallOn { sku: "12" }))
            .build();

        let result = flow.submit(order_1()).await;

        assert!(matches!(result, Err(FlowError::Abandoned(_))));
        assert_eq!(flow.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_timeout_frees_worker_pool_for_later_orders() {
        let flow = OrderFlow::builder()
            .config(
                FlowConfig::best_effort()
                    .with_max_concurrent_transforms(1)
                    .with_completion_timeout(Duration::from_millis(50)),
            )
            .transformer(Arc::new(StallOn { sku: "12" }))
            .build();

        let stalled = flow.submit(order_1()).await.unwrap();
        assert!(!stalled.payload.complete);

        let healthy = flow.submit(order_2()).await.unwrap();

        assert!(healthy.payload.complete);
        assert_eq!(healthy.payload.len(), 2);
        assert_eq!(flow.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_transformer_does_not_leak_group() {
        let flow = OrderFlow::builder()
            .transformer(Arc::new(PanicOn { sku: "12" }))
            .build();

        let first = flow.submit(order_1()).await;

        assert!(matches!(first, Err(FlowError::Worker(_))));
        assert_eq!(flow.in_flight(), 0);
        assert_eq!(
            flow.store.state(&CorrelationId::for_order(1)),
            Some(crate::flow::correlation_store::GroupState::Abandoned)
        );

        // The order id is free again
        let again = flow.submit(order_1()).await;
        assert!(matches!(again, Err(FlowError::Worker(_))));
        assert!(flow.submit(order_2()).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_submission_abandons_its_group() {
        let gate = Arc::new(Semaphore::new(0));
        let flow = OrderFlow::builder()
            .transformer(Arc::new(Gated { gate: gate.clone() }))
            .build();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), flow.submit(order_1())).await;

        assert!(timed_out.is_err());
        assert_eq!(flow.in_flight(), 0);

        gate.add_permits(2);
        let again = flow.submit(order_1()).await.unwrap();
        assert_eq!(again.payload.len(), 2);
    }

    #[tokio::test]
    async fn test_finished_submission_leaves_group_drained() {
        let flow = OrderFlow::new(FlowConfig::default());

        flow.submit(order_1()).await.unwrap();

        assert_eq!(
            flow.store.state(&CorrelationId::for_order(1)),
            Some(crate::flow::correlation_store::GroupState::Drained)
        );
    }

    #[tokio::test]
    async fn test_resubmitting_an_order_after_completion() {
        let flow = OrderFlow::new(FlowConfig::default());

        flow.submit(order_1()).await.unwrap();
        let again = flow.submit(order_1()).await.unwrap();

        assert_eq!(again.payload.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_reports_every_order() {
        let flow = OrderFlow::builder()
            .config(FlowConfig::default().with_retry(RetryConfig::none()))
            .transformer(Arc::new(FnTransformer::new("reject_33", |item: &LineItem| {
                if item.sku == "33" {
                    Err(TransformError::Permanent("discontinued".to_string()))
                } else {
                    Ok(item.clone())
                }
            })))
            .build();

        let batch = flow
            .submit_batch(vec![order_2(), Order::new(3, Vec::new()), order_1()])
            .await
            .unwrap();

        assert_eq!(
            batch.correlation_id(),
            Some(&CorrelationId::for_batch(batch.payload.batch_id))
        );
        let outcomes = &batch.payload.outcomes;
        let ids: Vec<i64> = outcomes.iter().map(|outcome| outcome.order_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(outcomes[0].result.as_ref().unwrap().len(), 2);
        assert!(outcomes[1].result.as_ref().unwrap_err().contains("order-2"));
        assert!(outcomes[2].result.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let flow = OrderFlow::new(FlowConfig::default());

        let batch = flow.submit_batch(Vec::new()).await.unwrap();

        assert!(batch.payload.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_observer_sees_every_stage() {
        let observer = Arc::new(RecordingObserver::default());
        let flow = OrderFlow::builder().observer(observer.clone()).build();

        flow.submit(order_1()).await.unwrap();

        let events = observer.events();
        assert!(events.iter().all(|e| e.correlation_id == Some(CorrelationId::for_order(1))));
        assert_eq!(observer.count(|k| matches!(k, FlowEventKind::Submitted { line_items: 2 })), 1);
        assert_eq!(observer.count(|k| matches!(k, FlowEventKind::Split { children: 2 })), 1);
        assert_eq!(observer.count(|k| matches!(k, FlowEventKind::Transformed { .. })), 2);
        assert_eq!(observer.count(|k| matches!(k, FlowEventKind::Recorded { .. })), 2);
        assert_eq!(observer.count(|k| matches!(k, FlowEventKind::Completed { .. })), 1);
        assert_eq!(observer.count(|k| matches!(k, FlowEventKind::Delivered { .. })), 1);
    }
}
