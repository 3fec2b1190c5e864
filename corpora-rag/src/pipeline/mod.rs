//! The staged search pipeline.
//!
//! One [`SearchContext`] threads through an ordered list of technique
//! stages, then the built-in generation and attribution stages. The
//! orchestrator checks cancellation and the wall-clock deadline between
//! stages and collects one typed metrics record per stage.

pub mod context;
pub mod metrics;
pub mod orchestrator;
pub mod request;
pub mod stages;

pub use context::{ContextAugmentation, RetrievedChunk, SearchContext, SourceRef, SubAnswer};
pub use metrics::StageMetrics;
pub use orchestrator::SearchService;
pub use request::{SearchOverrides, SearchRequest, SearchResponse, Warning, WarningKind};
