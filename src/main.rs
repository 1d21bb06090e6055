use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_flow::flow::{FlowConfig, InMemoryDeadLetterQueue, LoggingTransformer, OrderFlow};
use order_flow::messaging::spawn_requests_endpoint;
use order_flow::metrics::Metrics;
use order_flow::{LineItem, Order};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=trace cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_flow=debug")),
        )
        .init();

    tracing::info!("🚀 Starting order split/aggregate demo");

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!(
        "📊 Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    // === 2. Flow ===
    let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());
    let flow = OrderFlow::builder()
        .config(FlowConfig::default())
        .transformer(Arc::new(LoggingTransformer))
        .observer(metrics.clone())
        .dead_letters(dead_letters.clone())
        .build();

    // === 3. Requests endpoint ===
    let (requests, endpoint) = spawn_requests_endpoint(flow, 16);

    // === 4. Send the demo orders as one message ===
    let orders = vec![
        Order::new(1, vec![LineItem::new(11, "11"), LineItem::new(22, "12")]),
        Order::new(2, vec![LineItem::new(33, "33"), LineItem::new(44, "44")]),
    ];
    let batch = requests.send(orders).await?;

    for outcome in &batch.payload.outcomes {
        match &outcome.result {
            Ok(result) => tracing::info!(
                order_id = outcome.order_id,
                "end of the line! {}",
                serde_json::to_string(result)?
            ),
            Err(e) => tracing::error!(order_id = outcome.order_id, error = %e, "Order failed"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&batch.payload)?);

    // === 5. Shutdown ===
    drop(requests);
    endpoint.await?;

    let dlq = dead_letters.stats();
    tracing::info!(total = dlq.total_messages, "Dead letter queue");

    println!("{}", metrics.render()?);

    tracing::info!("👋 Demo finished");
    Ok(())
}
