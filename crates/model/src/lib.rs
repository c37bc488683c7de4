//! In-memory model of a live trace: a forest of spans with nested on-CPU intervals,
//! a lane layout for timeline rendering, and range queries over what is visible.

pub mod lanes;
pub mod query;
pub mod span;
pub mod tree;

pub use query::{LaneSnapshot, SpanView, TraceStatus, VisibleSpans};
pub use span::{CpuState, NewSpan, OnCpuInterval, Span};
pub use tree::{Trace, TraceOptions, Wakeup};
