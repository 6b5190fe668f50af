//! Tower layers wrapped around the [`crate::service::OperationRouter`]:
//! admission control outside, per-operation spans and metrics inside.

pub mod load_shed;
pub mod metrics;
pub mod pipeline;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_operation_pipeline, OperationPipeline};
