//! Records written by the cyclotron tracer backend, one externally tagged object per line.

use std::time::Duration;

use serde::Deserialize;
use spanlane_core::{Outcome, SpanId, Timestamp, TraceEvent};

#[derive(Debug, Clone, Deserialize)]
pub enum LegacyEvent {
    AsyncStart {
        id: SpanId,
        parent_id: SpanId,
        name: String,
        ts: Duration,
        #[serde(default)]
        metadata: serde_json::Value,
    },
    #[serde(rename = "AsyncOnCPU")]
    AsyncOnCpu { id: SpanId, ts: Duration },
    #[serde(rename = "AsyncOffCPU")]
    AsyncOffCpu { id: SpanId, ts: Duration },
    AsyncEnd {
        id: SpanId,
        ts: Duration,
        outcome: LegacyOutcome,
    },
    SyncStart {
        id: SpanId,
        parent_id: SpanId,
        name: String,
        ts: Duration,
        #[serde(default)]
        metadata: serde_json::Value,
    },
    SyncEnd { id: SpanId, ts: Duration },
    ThreadStart { id: SpanId, name: String, ts: Duration },
    ThreadEnd { id: SpanId, ts: Duration },
    Wakeup {
        waking_span: SpanId,
        parked_span: SpanId,
        ts: Duration,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub enum LegacyOutcome {
    Success,
    Error(String),
}

impl From<LegacyOutcome> for Outcome {
    fn from(value: LegacyOutcome) -> Self {
        match value {
            LegacyOutcome::Success => Outcome::Success,
            LegacyOutcome::Error(msg) => Outcome::Error(msg),
        }
    }
}

fn nanos(ts: Duration) -> Timestamp {
    Timestamp::try_from(ts.as_nanos()).unwrap_or(Timestamp::MAX)
}

fn metadata(value: serde_json::Value) -> Option<serde_json::Value> {
    (!value.is_null()).then_some(value)
}

impl LegacyEvent {
    /// Sync spans run on-CPU for their whole life, so they expand to two events each way.
    pub fn into_events(self) -> Vec<TraceEvent> {
        match self {
            Self::AsyncStart {
                id,
                parent_id,
                name,
                ts,
                metadata: meta,
            } => {
                let mut open = TraceEvent::open(id, Some(parent_id), nanos(ts), name);
                open.metadata = metadata(meta);
                vec![open]
            }
            Self::AsyncOnCpu { id, ts } => vec![TraceEvent::on_cpu(id, nanos(ts))],
            Self::AsyncOffCpu { id, ts } => vec![TraceEvent::off_cpu(id, nanos(ts))],
            Self::AsyncEnd { id, ts, outcome } => {
                vec![TraceEvent::close(id, nanos(ts)).with_outcome(outcome.into())]
            }
            Self::SyncStart {
                id,
                parent_id,
                name,
                ts,
                metadata: meta,
            } => {
                let ts = nanos(ts);
                let mut open = TraceEvent::open(id, Some(parent_id), ts, name);
                open.metadata = metadata(meta);
                vec![open, TraceEvent::on_cpu(id, ts)]
            }
            Self::SyncEnd { id, ts } => {
                let ts = nanos(ts);
                vec![TraceEvent::off_cpu(id, ts), TraceEvent::close(id, ts)]
            }
            Self::ThreadStart { id, name, ts } => {
                vec![TraceEvent::open(id, None, nanos(ts), name.clone()).with_thread_name(name)]
            }
            Self::ThreadEnd { id, ts } => vec![TraceEvent::close(id, nanos(ts))],
            Self::Wakeup {
                waking_span,
                parked_span,
                ts,
            } => vec![TraceEvent::wakeup(parked_span, waking_span, nanos(ts))],
        }
    }
}
