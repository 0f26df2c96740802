//! Tracer configuration and the process-wide default tracer.

use std::sync::{Arc, PoisonError, RwLock};

use xray_config::{StorageConfig, XRayConfig};
use xray_monitor::{
    FileTraceStore, SqliteTraceStore, StoreError, StoreSink, TraceBuilder, TraceSink, TraceStore,
};

/// Creates trace builders wired to a completion sink.
///
/// Prefer passing a `Tracer` to the code that opens traces. The free
/// functions [`configure`] and [`trace`] wrap one process-wide instance for
/// callers that want a global.
#[derive(Clone, Default)]
pub struct Tracer {
    sink: Option<Arc<dyn TraceSink>>,
}

impl Tracer {
    /// A tracer without a sink: finalized traces are returned but not persisted.
    pub const fn new() -> Self {
        Self { sink: None }
    }

    pub fn with_sink(sink: Arc<dyn TraceSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// A tracer that saves every finalized trace into `store`.
    pub fn with_store(store: Arc<dyn TraceStore>) -> Self {
        Self::with_sink(Arc::new(StoreSink::new(store)))
    }

    pub fn sink(&self) -> Option<&Arc<dyn TraceSink>> {
        self.sink.as_ref()
    }

    /// Opens a trace whose `end()` is routed to this tracer's sink.
    pub fn trace(&self, name: impl Into<String>) -> TraceBuilder {
        let mut builder = TraceBuilder::new(name);
        if let Some(sink) = &self.sink {
            builder.on_end(Arc::clone(sink));
        }
        builder
    }
}

/// Options for [`configure`].
#[derive(Clone, Default)]
pub struct Options {
    /// Sink invoked with every trace opened through [`trace`].
    pub on_trace: Option<Arc<dyn TraceSink>>,
}

static GLOBAL: RwLock<Tracer> = RwLock::new(Tracer::new());

/// Sets or replaces the process-wide sink. The last call wins; traces
/// already opened keep the sink they were created with.
pub fn configure(options: Options) {
    let mut global = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    *global = Tracer {
        sink: options.on_trace,
    };
    tracing::debug!(has_sink = global.sink.is_some(), "Configured global tracer");
}

/// Opens a trace using the process-wide configuration.
pub fn trace(name: impl Into<String>) -> TraceBuilder {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .trace(name)
}

/// Opens the store described by `config`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn TraceStore>, StoreError> {
    let store: Arc<dyn TraceStore> = match config {
        StorageConfig::Files { dir } => Arc::new(FileTraceStore::new(dir.clone())),
        StorageConfig::Sqlite { path } => Arc::new(SqliteTraceStore::new(path)?),
    };
    tracing::info!(storage = ?config, "Opened trace store");
    Ok(store)
}

/// Opens the configured store, registers it as the process-wide sink and
/// returns it for readers.
pub fn init(config: &XRayConfig) -> Result<Arc<dyn TraceStore>, StoreError> {
    let store = open_store(&config.storage)?;
    configure(Options {
        on_trace: Some(Arc::new(StoreSink::new(Arc::clone(&store)))),
    });
    Ok(store)
}
