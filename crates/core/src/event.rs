use serde::{Deserialize, Serialize};

use crate::ids::SpanId;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Open,
    Close,
    OnCpu,
    OffCpu,
    Wakeup,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::OnCpu => "onCpu",
            Self::OffCpu => "offCpu",
            Self::Wakeup => "wakeup",
        }
    }
}

/// How a span finished, as reported by the tracer on close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error(String),
}

/// One record of the event stream.
///
/// `parentId`, `name`, `metadata` and `threadName` are meaningful on `open` only,
/// `outcome` on `close`, `wakingId` on `wakeup` (where `id` is the parked span).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub kind: EventKind,
    pub id: SpanId,
    #[serde(default)]
    pub parent_id: Option<SpanId>,
    pub ts: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waking_id: Option<SpanId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl TraceEvent {
    fn bare(kind: EventKind, id: SpanId, ts: Timestamp) -> Self {
        Self {
            kind,
            id,
            parent_id: None,
            ts,
            name: None,
            metadata: None,
            thread_name: None,
            waking_id: None,
            outcome: None,
        }
    }

    pub fn open(
        id: impl Into<SpanId>,
        parent_id: Option<SpanId>,
        ts: Timestamp,
        name: impl Into<String>,
    ) -> Self {
        Self {
            parent_id,
            name: Some(name.into()),
            ..Self::bare(EventKind::Open, id.into(), ts)
        }
    }

    pub fn close(id: impl Into<SpanId>, ts: Timestamp) -> Self {
        Self::bare(EventKind::Close, id.into(), ts)
    }

    pub fn on_cpu(id: impl Into<SpanId>, ts: Timestamp) -> Self {
        Self::bare(EventKind::OnCpu, id.into(), ts)
    }

    pub fn off_cpu(id: impl Into<SpanId>, ts: Timestamp) -> Self {
        Self::bare(EventKind::OffCpu, id.into(), ts)
    }

    pub fn wakeup(parked: impl Into<SpanId>, waking: impl Into<SpanId>, ts: Timestamp) -> Self {
        Self {
            waking_id: Some(waking.into()),
            ..Self::bare(EventKind::Wakeup, parked.into(), ts)
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = Some(thread_name.into());
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}
