//! Record types for xray decision traces.
//!
//! This crate holds the data shapes shared by the rest of the workspace:
//!
//! - [`Trace`]: one instrumented pipeline run, owning its ordered [`Step`]s
//! - [`Step`]: one stage with input, output, reasoning, [`Filter`]s and [`Candidate`]s
//! - [`Candidate`] and [`Evaluation`]: items considered by a step and the tests applied to them
//! - [`TraceSummary`]: the listing view returned by stores
//! - [`Data`]: the open key/value payload used for inputs, outputs, metrics and metadata
//!
//! # Example
//!
//! ```rust
//! use xray_core::{Candidate, Evaluation};
//!
//! let candidate = Candidate::new("p1", "Steel bottle 32oz")
//!     .metric("price", 24.99)
//!     .evaluation(Evaluation::new("rating", "Minimum rating", true, "4.6 >= 4.0"))
//!     .qualified(true);
//!
//! assert!(candidate.all_passed());
//! ```

mod data;
mod record;

pub use data::{format_timestamp, merge_data, now, Data, IntoData};
pub use record::{
    Candidate, Evaluation, Filter, Step, StepIo, StepType, Trace, TraceResult, TraceStatus,
    TraceSummary,
};
pub use serde_json::{json, Value};
