pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod time;

pub use error::{Result, SpanlaneError};
pub use event::{EventKind, Outcome, TraceEvent};
pub use ids::SpanId;
pub use time::Timestamp;
