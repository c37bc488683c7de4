use serde::{Deserialize, Serialize};
use spanlane_core::{Outcome, SpanId, Timestamp};

use crate::span::{OnCpuInterval, Span};
use crate::tree::{Trace, Wakeup};

/// Lazy walk over visible spans intersecting a time range, yielding `(lane, span)`.
///
/// Each call to [`Trace::list_visible_spans`] starts a fresh traversal; nothing is cached
/// between redraws. Subtrees of collapsed or hidden spans are skipped, as are subtrees
/// whose root starts at or after the end of the range.
pub struct VisibleSpans<'a> {
    trace: &'a Trace,
    stack: Vec<usize>,
    range_start: Timestamp,
    range_end: Timestamp,
}

impl<'a> Iterator for VisibleSpans<'a> {
    type Item = (u32, &'a Span);

    fn next(&mut self) -> Option<Self::Item> {
        let trace = self.trace;
        while let Some(i) = self.stack.pop() {
            let span = &trace.spans[i];
            if !span.is_visible() || span.start() >= self.range_end {
                continue;
            }
            if !span.is_collapsed() {
                self.stack.extend(span.children.iter().rev().copied());
            }
            if let Some(lane) = span.lane() {
                if span.intersects(self.range_start, self.range_end) {
                    return Some((lane, span));
                }
            }
        }
        None
    }
}

impl Trace {
    /// True iff `id` is known, shown, and intersects `[range_start, range_end)`.
    pub fn overlaps(&self, id: SpanId, range_start: Timestamp, range_end: Timestamp) -> bool {
        self.span(id)
            .is_some_and(|span| span.overlaps(range_start, range_end))
    }

    pub fn list_visible_spans(
        &self,
        range_start: Timestamp,
        range_end: Timestamp,
    ) -> VisibleSpans<'_> {
        VisibleSpans {
            trace: self,
            stack: self.roots.iter().rev().copied().collect(),
            range_start,
            range_end,
        }
    }

    pub fn view(&self, id: SpanId) -> Option<SpanView> {
        self.span(id).map(|span| SpanView::new(self, span))
    }

    pub fn status(&self) -> TraceStatus {
        TraceStatus {
            spans: self.len(),
            roots: self.root_count(),
            open_spans: self.open_span_count(),
            num_lanes: self.num_lanes(),
            max_time: self.max_time(),
            accepted_events: self.accepted_events(),
            rejected_events: self.rejected_events(),
            wakeups: self.wakeups().len(),
        }
    }
}

/// Owned copy of one span's state for readers outside the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanView {
    pub id: SpanId,
    pub parent_id: Option<SpanId>,
    pub name: String,
    pub thread_name: Option<String>,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub lane: Option<u32>,
    pub visible: bool,
    pub collapsed: bool,
    pub outcome: Option<Outcome>,
    pub intervals: Vec<OnCpuInterval>,
    /// On-CPU time so far; a running interval counts up to the trace's latest timestamp.
    pub on_cpu_time: Timestamp,
    pub children: Vec<SpanId>,
    pub metadata: Option<serde_json::Value>,
}

impl SpanView {
    pub fn new(trace: &Trace, span: &Span) -> Self {
        Self {
            id: span.id(),
            parent_id: span.parent_id(),
            name: span.name().to_string(),
            thread_name: span.thread_name().map(str::to_string),
            start: span.start(),
            end: span.end(),
            lane: span.lane(),
            visible: span.is_visible(),
            collapsed: span.is_collapsed(),
            outcome: span.outcome().cloned(),
            intervals: span.intervals().to_vec(),
            on_cpu_time: span.on_cpu_time(trace.max_time()),
            children: trace.children(span).map(Span::id).collect(),
            metadata: span.metadata().cloned(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStatus {
    pub spans: usize,
    pub roots: usize,
    pub open_spans: usize,
    pub num_lanes: usize,
    pub max_time: Timestamp,
    pub accepted_events: u64,
    pub rejected_events: u64,
    pub wakeups: usize,
}

/// Visible spans of a range, grouped for drawing, plus wakeups in that range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub range_start: Timestamp,
    pub range_end: Timestamp,
    pub num_lanes: usize,
    pub max_time: Timestamp,
    pub spans: Vec<(u32, SpanView)>,
    pub wakeups: Vec<Wakeup>,
}

impl LaneSnapshot {
    pub fn capture(trace: &Trace, range_start: Timestamp, range_end: Timestamp) -> Self {
        Self {
            range_start,
            range_end,
            num_lanes: trace.num_lanes(),
            max_time: trace.max_time(),
            spans: trace
                .list_visible_spans(range_start, range_end)
                .map(|(lane, span)| (lane, SpanView::new(trace, span)))
                .collect(),
            wakeups: trace.wakeups_in(range_start, range_end).copied().collect(),
        }
    }
}
