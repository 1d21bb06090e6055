use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::flow::{FlowEvent, FlowEventKind, FlowObserver};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Metrics is a FlowObserver: hand it to the flow builder and every stage
// event updates the registry. Covers:
// - Orders submitted and children split
// - Transform outcomes and retries
// - Group completions, failures and abandons
// - Dead letters by kind
// - Submit-to-aggregate latency
//
// ============================================================================

/// Central metrics registry for the order flow
pub struct Metrics {
    registry: Registry,

    // Submission Metrics
    pub orders_submitted: IntCounter,
    pub children_split: IntCounter,

    // Transform Metrics
    pub transforms_total: IntCounterVec,
    pub transform_retries: IntCounter,

    // Aggregation Metrics
    pub groups_completed: IntCounterVec,
    pub groups_failed: IntCounter,
    pub groups_abandoned: IntCounter,

    // Dead Letter Metrics
    pub dead_letters_total: IntCounterVec,

    pub flow_duration: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Submission Metrics
        let orders_submitted = IntCounter::new("orders_submitted_total", "Total orders submitted")?;
        registry.register(Box::new(orders_submitted.clone()))?;

        let children_split = IntCounter::new(
            "order_children_split_total",
            "Total child messages produced by the splitter",
        )?;
        registry.register(Box::new(children_split.clone()))?;

        // Transform Metrics
        let transforms_total = IntCounterVec::new(
            Opts::new("line_item_transforms_total", "Line item transforms by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(transforms_total.clone()))?;

        let transform_retries = IntCounter::new(
            "line_item_transform_retries_total",
            "Transform attempts beyond the first",
        )?;
        registry.register(Box::new(transform_retries.clone()))?;

        // Aggregation Metrics
        let groups_completed = IntCounterVec::new(
            Opts::new("groups_completed_total", "Aggregated groups by completeness"),
            &["completeness"],
        )?;
        registry.register(Box::new(groups_completed.clone()))?;

        let groups_failed = IntCounter::new(
            "groups_failed_total",
            "Groups failed by a child failure",
        )?;
        registry.register(Box::new(groups_failed.clone()))?;

        let groups_abandoned = IntCounter::new(
            "groups_abandoned_total",
            "Groups abandoned before completion",
        )?;
        registry.register(Box::new(groups_abandoned.clone()))?;

        // Dead Letter Metrics
        let dead_letters_total = IntCounterVec::new(
            Opts::new("dead_letters_total", "Messages sent to the dead letter sink"),
            &["kind"],
        )?;
        registry.register(Box::new(dead_letters_total.clone()))?;

        let flow_duration = Histogram::with_opts(
            HistogramOpts::new(
                "order_flow_duration_seconds",
                "Submit to aggregated result duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(flow_duration.clone()))?;

        Ok(Self {
            registry,
            orders_submitted,
            children_split,
            transforms_total,
            transform_retries,
            groups_completed,
            groups_failed,
            groups_abandoned,
            dead_letters_total,
            flow_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

impl FlowObserver for Metrics {
    fn on_event(&self, event: &FlowEvent) {
        match &event.kind {
            FlowEventKind::Submitted { .. } => self.orders_submitted.inc(),
            FlowEventKind::Split { children } => self.children_split.inc_by(*children as u64),
            FlowEventKind::Transformed { attempts } => {
                self.transforms_total.with_label_values(&["success"]).inc();
                self.transform_retries.inc_by(attempts.saturating_sub(1) as u64);
            }
            FlowEventKind::TransformFailed { attempts, .. } => {
                self.transforms_total.with_label_values(&["failure"]).inc();
                self.transform_retries.inc_by(attempts.saturating_sub(1) as u64);
            }
            FlowEventKind::Completed { complete, .. } => {
                let completeness = if *complete { "complete" } else { "partial" };
                self.groups_completed.with_label_values(&[completeness]).inc();
            }
            FlowEventKind::GroupFailed { .. } => self.groups_failed.inc(),
            FlowEventKind::Abandoned { .. } => self.groups_abandoned.inc(),
            FlowEventKind::DeadLettered { kind } => {
                self.dead_letters_total.with_label_values(&[*kind]).inc();
            }
            FlowEventKind::Delivered { elapsed } => {
                self.flow_duration.observe(elapsed.as_secs_f64());
            }
            FlowEventKind::EmptySplit | FlowEventKind::Recorded { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Component;
    use crate::messaging::CorrelationId;
    use std::time::Duration;

    fn event(kind: FlowEventKind) -> FlowEvent {
        FlowEvent::new(Component::Orchestrator, Some(&CorrelationId::for_order(1)), kind)
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.registry().gather().len() > 0);
    }

    #[test]
    fn test_transform_outcomes_and_retries() {
        let metrics = Metrics::new().unwrap();
        metrics.on_event(&event(FlowEventKind::Transformed { attempts: 3 }));
        metrics.on_event(&event(FlowEventKind::TransformFailed {
            attempts: 1,
            error: "rejected".to_string(),
        }));

        assert_eq!(metrics.transforms_total.with_label_values(&["success"]).get(), 1);
        assert_eq!(metrics.transforms_total.with_label_values(&["failure"]).get(), 1);
        assert_eq!(metrics.transform_retries.get(), 2);
    }

    #[test]
    fn test_group_and_dead_letter_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.on_event(&event(FlowEventKind::Split { children: 2 }));
        metrics.on_event(&event(FlowEventKind::Completed {
            items: 1,
            failures: 0,
            complete: false,
        }));
        metrics.on_event(&event(FlowEventKind::DeadLettered { kind: "late_arrival" }));
        metrics.on_event(&event(FlowEventKind::Delivered {
            elapsed: Duration::from_millis(3),
        }));

        assert_eq!(metrics.children_split.get(), 2);
        assert_eq!(metrics.groups_completed.with_label_values(&["partial"]).get(), 1);
        assert_eq!(metrics.dead_letters_total.with_label_values(&["late_arrival"]).get(), 1);
        assert_eq!(metrics.flow_duration.get_sample_count(), 1);
    }

    #[test]
    fn test_render_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.on_event(&event(FlowEventKind::Submitted { line_items: 2 }));

        let text = metrics.render().unwrap();

        assert!(text.contains("# TYPE orders_submitted_total counter"));
        assert!(text.contains("orders_submitted_total 1"));
    }
}
