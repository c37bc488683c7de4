use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use spanlane_core::error::{Result, SpanlaneError};
use spanlane_core::{Outcome, SpanId, Timestamp};

/// A stretch of a span's life during which it was scheduled on a CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnCpuInterval {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
}

impl OnCpuInterval {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    Idle,
    Running,
}

/// Fields taken from an `open` event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSpan {
    pub id: SpanId,
    pub parent_id: Option<SpanId>,
    pub start: Timestamp,
    pub name: String,
    pub metadata: Option<serde_json::Value>,
    pub thread_name: Option<String>,
}

impl NewSpan {
    pub fn new(id: impl Into<SpanId>, parent_id: Option<SpanId>, start: Timestamp) -> Self {
        Self {
            id: id.into(),
            parent_id,
            start,
            name: String::new(),
            metadata: None,
            thread_name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct Span {
    id: SpanId,
    parent_id: Option<SpanId>,
    name: String,
    thread_name: Option<String>,
    metadata: Option<serde_json::Value>,
    start: Timestamp,
    end: Option<Timestamp>,
    outcome: Option<Outcome>,
    intervals: Vec<OnCpuInterval>,
    max_child_end: Option<Timestamp>,

    // Arena links and layout state, owned by the trace.
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    pub(crate) lane: Option<u32>,
    pub(crate) free_lanes: BTreeSet<u32>,
    pub(crate) max_subtree_lane: Option<u32>,
    pub(crate) visible: bool,
    pub(crate) collapsed: bool,
}

impl Span {
    pub(crate) fn new(fields: NewSpan) -> Self {
        Self {
            id: fields.id,
            parent_id: fields.parent_id,
            name: fields.name,
            thread_name: fields.thread_name,
            metadata: fields.metadata,
            start: fields.start,
            end: None,
            outcome: None,
            intervals: Vec::new(),
            max_child_end: None,
            parent: None,
            children: Vec::new(),
            lane: None,
            free_lanes: BTreeSet::new(),
            max_subtree_lane: None,
            visible: true,
            collapsed: false,
        }
    }

    pub fn id(&self) -> SpanId {
        self.id
    }

    /// Parent named by the open event, whether or not it has been seen yet.
    pub fn parent_id(&self) -> Option<SpanId> {
        self.parent_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Option<Timestamp> {
        self.end
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn intervals(&self) -> &[OnCpuInterval] {
        &self.intervals
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn cpu_state(&self) -> CpuState {
        match self.intervals.last() {
            Some(interval) if interval.is_open() => CpuState::Running,
            _ => CpuState::Idle,
        }
    }

    pub fn lane(&self) -> Option<u32> {
        self.lane
    }

    pub fn free_lanes(&self) -> impl Iterator<Item = u32> + '_ {
        self.free_lanes.iter().copied()
    }

    pub fn max_subtree_lane(&self) -> Option<u32> {
        self.max_subtree_lane
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Latest end among this span's closed children.
    pub fn max_child_end(&self) -> Option<Timestamp> {
        self.max_child_end
    }

    /// Half-open intersection with `[range_start, range_end)`, ignoring visibility.
    pub fn intersects(&self, range_start: Timestamp, range_end: Timestamp) -> bool {
        self.start < range_end && self.end.is_none_or(|end| end > range_start)
    }

    /// True when the span is shown and its time range meets `[range_start, range_end)`.
    pub fn overlaps(&self, range_start: Timestamp, range_end: Timestamp) -> bool {
        self.visible && self.intersects(range_start, range_end)
    }

    /// Total time spent on-CPU, counting an open interval up to `now`.
    pub fn on_cpu_time(&self, now: Timestamp) -> Timestamp {
        self.intervals
            .iter()
            .map(|i| i.end.unwrap_or(now).saturating_sub(i.start))
            .sum()
    }

    fn last_off_cpu(&self) -> Option<Timestamp> {
        self.intervals.last().and_then(|i| i.end)
    }

    pub(crate) fn on_cpu(&mut self, ts: Timestamp) -> Result<()> {
        if !self.is_open() {
            return Err(SpanlaneError::invalid_state(self.id, "on-CPU after close"));
        }
        if self.cpu_state() == CpuState::Running {
            return Err(SpanlaneError::invalid_state(self.id, "double on-CPU"));
        }
        if ts < self.start {
            return Err(SpanlaneError::invalid_state(
                self.id,
                format!("on-CPU at {ts} before span start {}", self.start),
            ));
        }
        if let Some(prev) = self.last_off_cpu().filter(|&prev| ts < prev) {
            return Err(SpanlaneError::invalid_state(
                self.id,
                format!("on-CPU at {ts} before previous off-CPU at {prev}"),
            ));
        }
        self.intervals.push(OnCpuInterval {
            start: ts,
            end: None,
        });
        Ok(())
    }

    pub(crate) fn off_cpu(&mut self, ts: Timestamp) -> Result<()> {
        if !self.is_open() {
            return Err(SpanlaneError::invalid_state(self.id, "off-CPU after close"));
        }
        let id = self.id;
        let Some(interval) = self.intervals.last_mut().filter(|i| i.is_open()) else {
            return Err(SpanlaneError::invalid_state(id, "off-CPU without on-CPU"));
        };
        if ts < interval.start {
            return Err(SpanlaneError::invalid_state(
                id,
                format!("off-CPU at {ts} before on-CPU at {}", interval.start),
            ));
        }
        interval.end = Some(ts);
        Ok(())
    }

    pub(crate) fn close(&mut self, ts: Timestamp, outcome: Option<Outcome>) -> Result<()> {
        if !self.is_open() {
            return Err(SpanlaneError::invalid_state(self.id, "double close"));
        }
        if self.cpu_state() == CpuState::Running {
            return Err(SpanlaneError::invalid_state(self.id, "close while on-CPU"));
        }
        if ts < self.start {
            return Err(SpanlaneError::invalid_state(
                self.id,
                format!("close at {ts} before span start {}", self.start),
            ));
        }
        if let Some(prev) = self.last_off_cpu().filter(|&prev| ts < prev) {
            return Err(SpanlaneError::invalid_state(
                self.id,
                format!("close at {ts} before last off-CPU at {prev}"),
            ));
        }
        if let Some(child_end) = self.max_child_end.filter(|&child_end| ts < child_end) {
            return Err(SpanlaneError::invalid_state(
                self.id,
                format!("close at {ts} before a child ended at {child_end}"),
            ));
        }
        self.end = Some(ts);
        self.outcome = outcome;
        Ok(())
    }

    pub(crate) fn record_child_end(&mut self, ts: Timestamp) {
        self.max_child_end = Some(self.max_child_end.map_or(ts, |prev| prev.max(ts)));
    }
}
