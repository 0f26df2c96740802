//! Trace record types.
//!
//! These are the shapes persisted by the store and handed to completion
//! sinks. Field names serialize in camelCase and optional fields are omitted
//! when absent.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::{
    deserialize_present, serialize_timestamp, serialize_timestamp_opt, Data, IntoData,
};

/// Lifecycle status of a trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    /// Trace is still accumulating steps.
    #[default]
    Running,
    /// Trace finished and the pipeline reported success (or no result).
    Completed,
    /// Trace finished with an unsuccessful result.
    Failed,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Running => "running",
            TraceStatus::Completed => "completed",
            TraceStatus::Failed => "failed",
        }
    }

    /// Returns true once the trace has been finalized.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TraceStatus::Running)
    }
}

impl FromStr for TraceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(TraceStatus::Running),
            "completed" => Ok(TraceStatus::Completed),
            "failed" => Ok(TraceStatus::Failed),
            other => Err(format!("unknown trace status: {other}")),
        }
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a step, used for presentation only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Transform,
    Filter,
    Llm,
    Search,
    Rank,
    #[default]
    Custom,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Transform => "transform",
            StepType::Filter => "filter",
            StepType::Llm => "llm",
            StepType::Search => "search",
            StepType::Rank => "rank",
            StepType::Custom => "custom",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The complete record of one instrumented pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Unique trace identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the trace was opened.
    #[serde(serialize_with = "serialize_timestamp")]
    pub start_time: DateTime<Utc>,
    /// When the trace was finalized.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_timestamp_opt"
    )]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock milliseconds between open and finalize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub status: TraceStatus,
    /// Steps in the order they were finalized.
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TraceResult>,
}

impl Trace {
    /// Projects the lightweight listing view of this trace.
    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            start_time: self.start_time,
            duration: self.duration,
            steps_count: self.steps.len(),
        }
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Outcome attached to a trace when it is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceResult {
    pub success: bool,
    /// Human-readable explanation of the outcome.
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
}

impl TraceResult {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            data: None,
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl IntoData) -> Self {
        self.data = Some(data.into_data());
        self
    }
}

/// Listing view of a stored trace, without step bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    pub id: String,
    pub name: String,
    pub status: TraceStatus,
    #[serde(serialize_with = "serialize_timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub steps_count: usize,
}

/// Input or output of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepIo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub data: Data,
}

/// One unit of work inside a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique step identifier.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StepType,
    /// When the step was opened.
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Wall-clock milliseconds between open and finalize.
    pub duration: u64,
    #[serde(default)]
    pub input: StepIo,
    #[serde(default)]
    pub output: StepIo,
    /// Why the step decided what it decided.
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Data>,
}

impl Step {
    /// Number of candidates that passed this step's criteria.
    pub fn qualified_count(&self) -> usize {
        self.candidates
            .iter()
            .flatten()
            .filter(|c| c.qualified)
            .count()
    }

    /// First candidate flagged as selected.
    ///
    /// At most one selected candidate per step is a convention only; it is
    /// not enforced here.
    pub fn selected(&self) -> Option<&Candidate> {
        self.candidates
            .iter()
            .flatten()
            .find(|c| c.selected == Some(true))
    }
}

/// An item evaluated during a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub metrics: Data,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluations: Option<Vec<Evaluation>>,
    pub qualified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

impl Candidate {
    /// Creates an unqualified candidate with no metrics.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            metrics: Data::new(),
            evaluations: None,
            qualified: false,
            selected: None,
        }
    }

    pub fn metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    pub fn evaluation(mut self, evaluation: Evaluation) -> Self {
        self.evaluations.get_or_insert_with(Vec::new).push(evaluation);
        self
    }

    pub fn qualified(mut self, qualified: bool) -> Self {
        self.qualified = qualified;
        self
    }

    pub fn selected(mut self, selected: bool) -> Self {
        self.selected = Some(selected);
        self
    }

    /// Returns true if every evaluation passed (vacuously true without any).
    pub fn all_passed(&self) -> bool {
        self.evaluations.iter().flatten().all(|e| e.passed)
    }
}

/// A single pass/fail test applied to a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub label: String,
    pub passed: bool,
    pub detail: String,
    /// Observed value; an explicit `null` is kept distinct from absent.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub value: Option<Value>,
}

impl Evaluation {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        passed: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            passed,
            detail: detail.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// A selection rule applied during a step, independent of any candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    /// Human-readable description of the rule.
    pub rule: String,
    /// Threshold or configuration backing the rule.
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(name: impl Into<String>, rule: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            rule: rule.into(),
            value: value.into(),
        }
    }
}
