use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::domain::order::Order;
use crate::flow::{BatchResult, FlowError, OrderFlow};

use super::Envelope;

// ============================================================================
// Requests Channel
// ============================================================================
//
// Typed request/reply channel in front of an OrderFlow:
//
//   RequestsChannel --mpsc--> endpoint task --submit_batch--> OrderFlow
//          ^                                                     |
//          +-------------------- oneshot reply ------------------+
//
// The endpoint handles each request on its own task and stops once every
// handle has been dropped.
//
// ============================================================================

/// A set of orders sent as one message, answered with one batch result.
pub struct OrderBatchRequest {
    pub orders: Vec<Order>,
    pub respond_to: oneshot::Sender<Result<Envelope<BatchResult>, FlowError>>,
}

/// Cloneable handle for sending order batches to a running endpoint.
#[derive(Clone)]
pub struct RequestsChannel {
    sender: mpsc::Sender<OrderBatchRequest>,
}

impl RequestsChannel {
    /// Send a batch of orders and wait for its aggregated result.
    pub async fn send(&self, orders: Vec<Order>) -> Result<Envelope<BatchResult>, FlowError> {
        let (respond_to, reply) = oneshot::channel();

        self.sender
            .send(OrderBatchRequest { orders, respond_to })
            .await
            .map_err(|_| FlowError::ChannelClosed)?;

        reply.await.map_err(|_| FlowError::ChannelClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Start an endpoint serving batch requests with `flow`.
///
/// `capacity` bounds how many requests may queue before `send` waits.
pub fn spawn_requests_endpoint(
    flow: OrderFlow,
    capacity: usize,
) -> (RequestsChannel, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<OrderBatchRequest>(capacity.max(1));

    let endpoint = tokio::spawn(async move {
        tracing::info!("📨 Requests endpoint started");

        while let Some(request) = receiver.recv().await {
            let flow = flow.clone();
            tokio::spawn(async move {
                let OrderBatchRequest { orders, respond_to } = request;
                let result = flow.submit_batch(orders).await;
                if respond_to.send(result).is_err() {
                    tracing::warn!("Requester went away before the batch result was ready");
                }
            });
        }

        tracing::info!("Requests endpoint stopped, every handle was dropped");
    });

    (RequestsChannel { sender }, endpoint)
}
