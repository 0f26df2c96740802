//! Trace and step builders.
//!
//! A [`TraceBuilder`] accumulates ordered steps for one pipeline run. Each
//! [`StepBuilder`] borrows its trace mutably, so only one step is open at a
//! time and steps land in the trace in the order `end()` is called. Both
//! `end()` methods consume the builder: once a record is finalized nothing
//! can mutate it.
//!
//! Builders carry no internal locking. A builder may move between threads,
//! but sharing one across threads needs external synchronization.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use xray_core::{
    merge_data, now, Candidate, Filter, IntoData, Step, StepIo, StepType, Trace, TraceResult,
    TraceStatus,
};

use crate::sink::{SinkError, TraceSink};

/// Errors from builder operations.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Invalid builder state: {0}")]
    InvalidState(String),
    /// The trace was finalized but the completion sink failed. The finalized
    /// trace is carried so the caller can retry or inspect it.
    #[error("Completion sink failed for trace {}: {source}", .trace.id)]
    Callback {
        trace: Box<Trace>,
        #[source]
        source: SinkError,
    },
}

impl TraceError {
    /// Returns the finalized trace if the error happened after finalization.
    pub fn into_trace(self) -> Option<Trace> {
        match self {
            TraceError::Callback { trace, .. } => Some(*trace),
            TraceError::InvalidState(_) => None,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Accumulates one pipeline run.
pub struct TraceBuilder {
    trace: Trace,
    started: Instant,
    sink: Option<Arc<dyn TraceSink>>,
}

impl TraceBuilder {
    /// Opens a new running trace.
    pub fn new(name: impl Into<String>) -> Self {
        let trace = Trace {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            start_time: now(),
            end_time: None,
            duration: None,
            status: TraceStatus::Running,
            steps: Vec::new(),
            metadata: None,
            result: None,
        };

        tracing::debug!(trace_id = %trace.id, name = %trace.name, "Trace started");

        Self {
            trace,
            started: Instant::now(),
            sink: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.trace.description = Some(description.into());
        self
    }

    /// Returns the trace ID.
    pub fn id(&self) -> &str {
        &self.trace.id
    }

    /// The record as accumulated so far.
    pub fn snapshot(&self) -> &Trace {
        &self.trace
    }

    /// Opens a step bound to this trace. Nothing is appended until the step
    /// builder's `end()`.
    pub fn step(&mut self, name: impl Into<String>, kind: StepType) -> StepBuilder<'_> {
        StepBuilder::new(self, name.into(), kind)
    }

    /// Shallow-merges `data` into the trace metadata.
    pub fn metadata(&mut self, data: impl IntoData) -> &mut Self {
        merge_data(&mut self.trace.metadata, data.into_data());
        self
    }

    /// Registers the completion sink, replacing any previous one.
    pub fn on_end(&mut self, sink: Arc<dyn TraceSink>) -> &mut Self {
        self.sink = Some(sink);
        self
    }

    /// Appends a step recorded elsewhere. Step ids must be unique within the
    /// trace.
    pub fn push_step(&mut self, step: Step) -> Result<&mut Self, TraceError> {
        if self.trace.steps.iter().any(|s| s.id == step.id) {
            return Err(TraceError::InvalidState(format!(
                "step {} already recorded in trace {}",
                step.id, self.trace.id
            )));
        }
        self.trace.steps.push(step);
        Ok(self)
    }

    /// Finalizes the trace and hands it to the completion sink.
    ///
    /// The status is `failed` when `result.success` is false and `completed`
    /// otherwise. Returns only after the sink has finished; a sink failure is
    /// returned as [`TraceError::Callback`] carrying the finalized trace.
    pub async fn end(self, result: Option<TraceResult>) -> Result<Trace, TraceError> {
        let Self {
            mut trace,
            started,
            sink,
        } = self;

        trace.end_time = Some(now());
        trace.duration = Some(elapsed_ms(started));
        trace.status = match &result {
            Some(r) if !r.success => TraceStatus::Failed,
            _ => TraceStatus::Completed,
        };
        trace.result = result;

        tracing::info!(
            trace_id = %trace.id,
            status = %trace.status,
            steps = trace.steps.len(),
            duration_ms = trace.duration.unwrap_or_default(),
            "Trace finalized"
        );

        if let Some(sink) = sink {
            if let Err(source) = sink.on_trace(&trace).await {
                tracing::warn!(trace_id = %trace.id, "Completion sink failed: {}", source);
                return Err(TraceError::Callback {
                    trace: Box::new(trace),
                    source,
                });
            }
        }

        Ok(trace)
    }

    /// Finalizes the trace as failed with the given explanation.
    pub async fn fail(self, error: impl Into<String>) -> Result<Trace, TraceError> {
        self.end(Some(TraceResult::failure(error))).await
    }
}

/// Accumulates one step of a trace.
pub struct StepBuilder<'a> {
    trace: &'a mut TraceBuilder,
    step: Step,
    started: Instant,
}

impl<'a> StepBuilder<'a> {
    fn new(trace: &'a mut TraceBuilder, name: String, kind: StepType) -> Self {
        let step = Step {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            kind,
            timestamp: now(),
            duration: 0,
            input: StepIo::default(),
            output: StepIo::default(),
            reasoning: String::new(),
            filters: None,
            candidates: None,
            metadata: None,
        };

        Self {
            trace,
            step,
            started: Instant::now(),
        }
    }

    /// Returns the step ID.
    pub fn id(&self) -> &str {
        &self.step.id
    }

    /// Replaces the step input.
    pub fn input(mut self, data: impl IntoData) -> Self {
        self.step.input = StepIo {
            description: None,
            data: data.into_data(),
        };
        self
    }

    /// Replaces the step input, with a description.
    pub fn input_described(mut self, data: impl IntoData, description: impl Into<String>) -> Self {
        self.step.input = StepIo {
            description: Some(description.into()),
            data: data.into_data(),
        };
        self
    }

    /// Replaces the step output.
    pub fn output(mut self, data: impl IntoData) -> Self {
        self.step.output = StepIo {
            description: None,
            data: data.into_data(),
        };
        self
    }

    /// Replaces the step output, with a description.
    pub fn output_described(mut self, data: impl IntoData, description: impl Into<String>) -> Self {
        self.step.output = StepIo {
            description: Some(description.into()),
            data: data.into_data(),
        };
        self
    }

    pub fn reasoning(mut self, text: impl Into<String>) -> Self {
        self.step.reasoning = text.into();
        self
    }

    pub fn filters(mut self, filters: Vec<Filter>) -> Self {
        self.step.filters = Some(filters);
        self
    }

    pub fn candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.step.candidates = Some(candidates);
        self
    }

    /// Shallow-merges `data` into the step metadata.
    pub fn metadata(mut self, data: impl IntoData) -> Self {
        merge_data(&mut self.step.metadata, data.into_data());
        self
    }

    /// Finalizes the step, appends it to the trace and returns the trace
    /// builder for chaining.
    pub fn end(self) -> &'a mut TraceBuilder {
        let Self {
            trace,
            mut step,
            started,
        } = self;

        step.duration = elapsed_ms(started);
        tracing::debug!(
            trace_id = %trace.trace.id,
            step_id = %step.id,
            name = %step.name,
            duration_ms = step.duration,
            "Step finalized"
        );

        trace.trace.steps.push(step);
        trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::sink_fn;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;
    use xray_core::{json, Evaluation, Value};

    #[tokio::test]
    async fn test_single_step_completed() {
        let mut trace = TraceBuilder::new("Demo");
        trace
            .step("Search", StepType::Search)
            .input(json!({"q": "bottle"}))
            .output(json!({"count": 5}))
            .reasoning("matched 5 items")
            .end();

        let trace = trace.end(None).await.unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);
        assert!(trace.result.is_none());
        assert_eq!(trace.steps.len(), 1);
        assert_eq!(trace.steps[0].name, "Search");
        assert_eq!(trace.steps[0].kind, StepType::Search);
        assert_eq!(trace.steps[0].input.data.get("q"), Some(&json!("bottle")));
        assert_eq!(trace.steps[0].reasoning, "matched 5 items");
        assert!(trace.end_time.unwrap() >= trace.start_time);
        assert!(trace.duration.is_some());
    }

    #[tokio::test]
    async fn test_fail_without_steps() {
        let trace = TraceBuilder::new("Demo").fail("no candidates").await.unwrap();
        assert_eq!(trace.status, TraceStatus::Failed);
        let result = trace.result.unwrap();
        assert!(!result.success);
        assert_eq!(result.summary, "no candidates");
        assert!(trace.steps.is_empty());
    }

    #[tokio::test]
    async fn test_successful_result_is_attached() {
        let trace = TraceBuilder::new("Demo")
            .end(Some(TraceResult::success("picked p2").with_data(json!({"id": "p2"}))))
            .await
            .unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);
        assert_eq!(trace.result.unwrap().summary, "picked p2");
    }

    #[test]
    fn test_steps_keep_call_order() {
        let mut trace = TraceBuilder::new("Ordered");
        for i in 0..5 {
            trace.step(format!("step {i}"), StepType::Transform).end();
        }
        trace
            .step("a", StepType::Filter)
            .end()
            .step("b", StepType::Rank)
            .end();

        let names: Vec<&str> = trace.snapshot().steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["step 0", "step 1", "step 2", "step 3", "step 4", "a", "b"]
        );
    }

    #[test]
    fn test_step_defaults_and_ids() {
        let mut trace = TraceBuilder::new("Defaults");
        trace.step("one", StepType::default()).end();
        trace.step("two", StepType::default()).end();

        let steps = &trace.snapshot().steps;
        assert_eq!(steps[0].kind, StepType::Custom);
        assert_eq!(steps[0].reasoning, "");
        assert!(steps[0].input.data.is_empty());
        assert!(steps[0].output.data.is_empty());
        assert!(steps[0].filters.is_none());
        assert!(steps[0].metadata.is_none());
        assert_ne!(steps[0].id, steps[1].id);
        assert_eq!(trace.snapshot().status, TraceStatus::Running);
    }

    #[test]
    fn test_step_duration_tracks_elapsed_time() {
        let mut trace = TraceBuilder::new("Timing");
        let step = trace.step("slow", StepType::Llm);
        thread::sleep(Duration::from_millis(20));
        step.end();

        assert!(trace.snapshot().steps[0].duration >= 20);
    }

    #[test]
    fn test_step_setters_last_call_wins() {
        let mut trace = TraceBuilder::new("Setters");
        trace
            .step("s", StepType::Filter)
            .input_described(json!({"a": 1}), "first")
            .input(json!({"b": 2}))
            .output(json!({"x": 1}))
            .output_described(json!({"y": 2}), "final")
            .reasoning("draft")
            .reasoning("final reasoning")
            .filters(vec![Filter::new("min_rating", "rating >= 3.8", 3.8)])
            .filters(vec![Filter::new("max_price", "price <= 2x reference", 60)])
            .candidates(vec![Candidate::new("p1", "Bottle").qualified(true)])
            .end();

        let step = &trace.snapshot().steps[0];
        assert_eq!(Value::Object(step.input.data.clone()), json!({"b": 2}));
        assert!(step.input.description.is_none());
        assert_eq!(Value::Object(step.output.data.clone()), json!({"y": 2}));
        assert_eq!(step.output.description.as_deref(), Some("final"));
        assert_eq!(step.reasoning, "final reasoning");
        let filters = step.filters.as_ref().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].name, "max_price");
        assert_eq!(step.qualified_count(), 1);
    }

    #[test]
    fn test_metadata_merges() {
        let mut trace = TraceBuilder::new("Meta");
        trace.metadata(json!({"a": 1})).metadata(json!({"b": 2}));
        trace
            .step("s", StepType::Llm)
            .metadata(json!({"model": "gpt-4", "temperature": 0.3}))
            .metadata(json!({"temperature": 0.7}))
            .end();
        trace.metadata(json!({"a": 2}));

        let snapshot = trace.snapshot();
        assert_eq!(
            Value::Object(snapshot.metadata.clone().unwrap()),
            json!({"a": 2, "b": 2})
        );
        assert_eq!(
            Value::Object(snapshot.steps[0].metadata.clone().unwrap()),
            json!({"model": "gpt-4", "temperature": 0.7})
        );
    }

    #[test]
    fn test_push_step_rejects_duplicate_id() {
        let mut trace = TraceBuilder::new("Push");
        trace.step("first", StepType::Custom).end();
        let existing = trace.snapshot().steps[0].clone();

        let err = trace.push_step(existing.clone()).err().unwrap();
        assert!(matches!(err, TraceError::InvalidState(_)));
        assert!(err.into_trace().is_none());

        let mut external = existing;
        external.id = "external".to_string();
        trace.push_step(external).unwrap();
        assert_eq!(trace.snapshot().steps.len(), 2);
    }

    #[tokio::test]
    async fn test_sink_receives_finalized_trace_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            sink_fn(move |trace: &Trace| {
                seen.lock().unwrap().push(trace.clone());
                Ok(())
            })
        };

        let mut builder = TraceBuilder::new("Sunk").with_description("with sink");
        builder.on_end(Arc::new(sink));
        builder
            .step("Rank", StepType::Rank)
            .candidates(vec![Candidate::new("p1", "Bottle")
                .evaluation(Evaluation::new("score", "Score", true, "0.9"))
                .qualified(true)
                .selected(true)])
            .end();
        let trace = builder.end(None).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], trace);
        assert_eq!(seen[0].description.as_deref(), Some("with sink"));
        assert_eq!(seen[0].status, TraceStatus::Completed);
    }

    #[tokio::test]
    async fn test_on_end_replaces_previous_sink() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let make = |label: &'static str| {
            let calls = Arc::clone(&calls);
            Arc::new(sink_fn(move |_: &Trace| {
                calls.lock().unwrap().push(label);
                Ok(())
            }))
        };

        let mut builder = TraceBuilder::new("Replace");
        builder.on_end(make("first")).on_end(make("second"));
        builder.end(None).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["second"]);
    }

    #[tokio::test]
    async fn test_sink_failure_propagates_with_trace() {
        let mut builder = TraceBuilder::new("Broken");
        builder.on_end(Arc::new(sink_fn(|_: &Trace| Err("permission denied".into()))));
        let id = builder.id().to_string();

        let err = builder.fail("upstream error").await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));

        let trace = err.into_trace().unwrap();
        assert_eq!(trace.id, id);
        assert_eq!(trace.status, TraceStatus::Failed);
        assert!(trace.end_time.is_some());
    }
}
