//! Completion sinks invoked when a trace is finalized.

use std::sync::Arc;

use async_trait::async_trait;
use xray_core::Trace;

use crate::store::TraceStore;

/// Error type returned by caller-defined sinks.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every finalized trace.
///
/// `TraceBuilder::end` awaits the sink before returning, so once `end`
/// resolves successfully whatever the sink does (typically a durable write)
/// has completed.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn on_trace(&self, trace: &Trace) -> Result<(), SinkError>;
}

/// Persists finalized traces into a [`TraceStore`].
#[derive(Clone)]
pub struct StoreSink {
    store: Arc<dyn TraceStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TraceStore> {
        &self.store
    }
}

#[async_trait]
impl TraceSink for StoreSink {
    async fn on_trace(&self, trace: &Trace) -> Result<(), SinkError> {
        // Store I/O is blocking; keep it off the async workers when we can.
        if tokio::runtime::Handle::try_current().is_err() {
            return Ok(self.store.save(trace)?);
        }

        let store = Arc::clone(&self.store);
        let trace = trace.clone();
        tokio::task::spawn_blocking(move || store.save(&trace)).await??;
        Ok(())
    }
}

/// Sink backed by a synchronous closure. Built with [`sink_fn`].
pub struct FnSink<F> {
    f: F,
}

/// Wraps a closure as a [`TraceSink`].
pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(&Trace) -> Result<(), SinkError> + Send + Sync,
{
    FnSink { f }
}

#[async_trait]
impl<F> TraceSink for FnSink<F>
where
    F: Fn(&Trace) -> Result<(), SinkError> + Send + Sync,
{
    async fn on_trace(&self, trace: &Trace) -> Result<(), SinkError> {
        (self.f)(trace)
    }
}
