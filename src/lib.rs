pub mod domain;
pub mod flow;
pub mod messaging;
pub mod metrics;
pub mod utils;

pub use domain::order::{LineItem, Order};
pub use flow::{AggregatedResult, AggregationPolicy, FlowConfig, FlowError, OrderFlow};
pub use messaging::{CorrelationId, Envelope};
