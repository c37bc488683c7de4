use serde::{Deserialize, Serialize};
use spanlane_core::{SpanId, Timestamp};
use spanlane_model::{LaneSnapshot, SpanView, TraceStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    Status,
    /// An omitted `end` means "through the latest timestamp seen".
    Lanes {
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    },
    Span {
        id: SpanId,
    },
    Collapse {
        id: SpanId,
    },
    Expand {
        id: SpanId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiResponse {
    Status(TraceStatus),
    Lanes(LaneSnapshot),
    Span(SpanView),
    LaneCount { num_lanes: usize },
    Error(String),
}
