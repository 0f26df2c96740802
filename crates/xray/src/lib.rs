//! Decision tracing for multi-step pipelines.
//!
//! xray records, for each step of a pipeline, what went in, what came out,
//! which candidates were considered, which filters applied, and why the step
//! decided what it did. Finalized traces are persisted for later inspection.
//!
//! # Example
//!
//! ```rust,no_run
//! use xray::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let store = xray::init(&XRayConfig::from_env()?)?;
//!
//! let mut trace = xray::trace("Competitor selection");
//! trace
//!     .step("Candidate search", StepType::Search)
//!     .input(json!({"keywords": ["insulated water bottle"]}))
//!     .output(json!({"count": 12}))
//!     .reasoning("Fetched top 12 results by relevance")
//!     .end();
//! let trace = trace.end(Some(TraceResult::success("Selected p7"))).await?;
//!
//! assert!(store.get(&trace.id)?.is_some());
//! # Ok(())
//! # }
//! ```

mod tracer;

pub use tracer::{configure, init, open_store, trace, Options, Tracer};

pub use xray_config::{ConfigError, StorageConfig, XRayConfig};
pub use xray_core::{
    json, merge_data, Candidate, Data, Evaluation, Filter, IntoData, Step, StepIo, StepType,
    Trace, TraceResult, TraceStatus, TraceSummary, Value,
};
pub use xray_monitor::{
    sink_fn, FileTraceStore, FnSink, SinkError, SqliteTraceStore, StepBuilder, StoreError,
    StoreSink, TraceBuilder, TraceError, TraceSink, TraceStore,
};

pub mod prelude {
    pub use crate::{
        json, Candidate, Evaluation, Filter, StepType, Trace, TraceBuilder, TraceResult,
        TraceSink, TraceStatus, TraceStore, Tracer, XRayConfig,
    };
}
