//! Trace builders and persistence for xray decision traces.
//!
//! - [`TraceBuilder`] / [`StepBuilder`]: accumulate a trace step by step
//! - [`TraceSink`]: receives each finalized trace; [`StoreSink`] persists it
//! - [`TraceStore`]: keyed storage with [`FileTraceStore`] and [`SqliteTraceStore`] backends

mod builder;
mod file_store;
mod sink;
mod store;

pub use builder::{StepBuilder, TraceBuilder, TraceError};
pub use file_store::FileTraceStore;
pub use sink::{sink_fn, FnSink, SinkError, StoreSink, TraceSink};
pub use store::{SqliteTraceStore, StoreError, TraceStore};
