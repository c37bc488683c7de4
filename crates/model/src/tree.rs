use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use spanlane_core::error::{Result, SpanlaneError};
use spanlane_core::{EventKind, Outcome, SpanId, Timestamp, TraceEvent};
use tracing::warn;

use crate::lanes::LaneTable;
use crate::span::{NewSpan, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOptions {
    /// Drop trailing empty lanes after a collapse so `num_lanes` can shrink.
    pub shrink_lanes_on_collapse: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            shrink_lanes_on_collapse: true,
        }
    }
}

/// One span waking another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wakeup {
    pub parked: SpanId,
    pub waking: SpanId,
    pub ts: Timestamp,
}

/// The span forest built from an event stream, plus its lane layout.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub(crate) spans: Vec<Span>,
    index: HashMap<SpanId, usize>,
    pub(crate) roots: Vec<usize>,
    pending_children: HashMap<SpanId, Vec<usize>>,
    wakeups: Vec<Wakeup>,
    max_time: Timestamp,
    open_spans: usize,
    accepted: u64,
    rejected: u64,
    pub(crate) lanes: LaneTable,
    pub(crate) options: TraceOptions,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: TraceOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Applies one event. A rejected event is logged and counted and leaves the trace unchanged.
    pub fn add_event(&mut self, event: &TraceEvent) -> Result<()> {
        let result = match event.kind {
            EventKind::Open => self.open(NewSpan {
                id: event.id,
                parent_id: event.parent_id,
                start: event.ts,
                name: event.name.clone().unwrap_or_default(),
                metadata: event.metadata.clone(),
                thread_name: event.thread_name.clone(),
            }),
            EventKind::Close => self.close(event.id, event.ts, event.outcome.clone()),
            EventKind::OnCpu => self.on_cpu(event.id, event.ts),
            EventKind::OffCpu => self.off_cpu(event.id, event.ts),
            EventKind::Wakeup => match event.waking_id {
                Some(waking) => self.wakeup(event.id, waking, event.ts),
                None => Err(SpanlaneError::InvalidArgument(format!(
                    "wakeup for span {} has no wakingId",
                    event.id
                ))),
            },
        };

        match &result {
            Ok(()) => self.accepted += 1,
            Err(err) => {
                self.rejected += 1;
                warn!(
                    span = %event.id,
                    kind = event.kind.as_str(),
                    ts = event.ts,
                    error = %err,
                    "rejected trace event"
                );
            }
        }
        result
    }

    pub fn open(&mut self, fields: NewSpan) -> Result<()> {
        let id = fields.id;
        if self.index.contains_key(&id) {
            return Err(SpanlaneError::DuplicateSpan { id });
        }

        let parent = match fields.parent_id {
            Some(parent_id) => self.index.get(&parent_id).copied(),
            None => None,
        };
        if let Some(p) = parent {
            let parent_span = &self.spans[p];
            if fields.start < parent_span.start() {
                return Err(SpanlaneError::invalid_state(
                    id,
                    format!(
                        "starts at {} before parent {} started at {}",
                        fields.start,
                        parent_span.id(),
                        parent_span.start()
                    ),
                ));
            }
            if let Some(end) = parent_span.end().filter(|&end| fields.start > end) {
                return Err(SpanlaneError::invalid_state(
                    id,
                    format!(
                        "starts at {} after parent {} closed at {end}",
                        fields.start,
                        parent_span.id()
                    ),
                ));
            }
        }

        let start = fields.start;
        let parent_id = fields.parent_id;
        let idx = self.spans.len();
        let mut span = Span::new(fields);
        span.parent = parent;
        if let Some(p) = parent {
            span.visible = self.spans[p].visible && !self.spans[p].collapsed;
        }
        self.spans.push(span);
        self.index.insert(id, idx);
        self.open_spans += 1;

        match (parent, parent_id) {
            (Some(p), _) => self.spans[p].children.push(idx),
            (None, Some(missing)) => {
                self.roots.push(idx);
                self.pending_children.entry(missing).or_default().push(idx);
            }
            (None, None) => self.roots.push(idx),
        }

        if self.spans[idx].visible {
            self.assign_lane(idx);
        }
        self.adopt_pending_children(idx);
        self.observe(start);
        Ok(())
    }

    /// Re-parents provisional roots that were waiting for `idx` to open.
    fn adopt_pending_children(&mut self, idx: usize) {
        let id = self.spans[idx].id();
        let Some(pending) = self.pending_children.remove(&id) else {
            return;
        };

        for child in pending {
            if self.spans[child].start() < self.spans[idx].start() {
                warn!(
                    span = %self.spans[child].id(),
                    parent = %id,
                    "late parent starts after its child; keeping child as a root"
                );
                continue;
            }
            if self.is_ancestor(child, idx) {
                warn!(
                    span = %self.spans[child].id(),
                    parent = %id,
                    "late parent is a descendant of its child; keeping child as a root"
                );
                continue;
            }

            self.roots.retain(|&r| r != child);
            self.spans[child].parent = Some(idx);
            self.spans[idx].children.push(child);
            if let Some(end) = self.spans[child].end() {
                self.spans[idx].record_child_end(end);
            }

            let parent = &self.spans[idx];
            if parent.visible && !parent.collapsed {
                self.refresh_max_lanes(idx);
            } else {
                self.hide_subtrees(vec![child], Some(idx));
                if self.options.shrink_lanes_on_collapse {
                    self.lanes.shrink();
                }
            }
        }
    }

    fn is_ancestor(&self, candidate: usize, of: usize) -> bool {
        let mut cur = Some(of);
        while let Some(i) = cur {
            if i == candidate {
                return true;
            }
            cur = self.spans[i].parent;
        }
        false
    }

    pub fn on_cpu(&mut self, id: SpanId, ts: Timestamp) -> Result<()> {
        let idx = self.index_of(id)?;
        self.spans[idx].on_cpu(ts)?;
        self.observe(ts);
        Ok(())
    }

    pub fn off_cpu(&mut self, id: SpanId, ts: Timestamp) -> Result<()> {
        let idx = self.index_of(id)?;
        self.spans[idx].off_cpu(ts)?;
        self.observe(ts);
        Ok(())
    }

    pub fn close(&mut self, id: SpanId, ts: Timestamp, outcome: Option<Outcome>) -> Result<()> {
        let idx = self.index_of(id)?;
        let parent = self.spans[idx].parent;
        if let Some(p) = parent {
            if let Some(end) = self.spans[p].end().filter(|&end| ts > end) {
                return Err(SpanlaneError::invalid_state(
                    id,
                    format!(
                        "closes at {ts} after parent {} closed at {end}",
                        self.spans[p].id()
                    ),
                ));
            }
        }

        self.spans[idx].close(ts, outcome)?;
        self.open_spans -= 1;
        if let Some(p) = parent {
            self.spans[p].record_child_end(ts);
        }
        if let Some(lane) = self.spans[idx].lane {
            self.lanes.finish(lane, ts);
            if let Some(p) = parent {
                self.spans[p].free_lanes.insert(lane);
            }
        }
        self.observe(ts);
        Ok(())
    }

    pub fn wakeup(&mut self, parked: SpanId, waking: SpanId, ts: Timestamp) -> Result<()> {
        self.index_of(parked)?;
        self.index_of(waking)?;
        self.wakeups.push(Wakeup { parked, waking, ts });
        self.observe(ts);
        Ok(())
    }

    fn observe(&mut self, ts: Timestamp) {
        self.max_time = self.max_time.max(ts);
    }

    pub(crate) fn index_of(&self, id: SpanId) -> Result<usize> {
        self.index
            .get(&id)
            .copied()
            .ok_or(SpanlaneError::UnknownSpan { id })
    }

    pub fn span(&self, id: SpanId) -> Option<&Span> {
        self.index.get(&id).map(|&i| &self.spans[i])
    }

    pub fn parent(&self, span: &Span) -> Option<&Span> {
        self.index
            .get(&span.id())
            .and_then(|&i| self.spans[i].parent)
            .map(|p| &self.spans[p])
    }

    pub fn children<'a>(&'a self, span: &Span) -> impl Iterator<Item = &'a Span> + 'a {
        let children = self
            .index
            .get(&span.id())
            .map(|&i| self.spans[i].children.as_slice())
            .unwrap_or(&[]);
        children.iter().map(|&c| &self.spans[c])
    }

    pub fn roots(&self) -> impl Iterator<Item = &Span> + '_ {
        self.roots.iter().map(|&r| &self.spans[r])
    }

    /// Every span in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &Span> + '_ {
        self.spans.iter()
    }

    /// Spans still waiting for the parent their open event named.
    pub fn provisional_roots(&self) -> impl Iterator<Item = &Span> + '_ {
        self.roots()
            .filter(|s| s.parent_id().is_some_and(|p| !self.index.contains_key(&p)))
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn open_span_count(&self) -> usize {
        self.open_spans
    }

    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    pub fn max_time(&self) -> Timestamp {
        self.max_time
    }

    pub fn accepted_events(&self) -> u64 {
        self.accepted
    }

    pub fn rejected_events(&self) -> u64 {
        self.rejected
    }

    pub fn wakeups(&self) -> &[Wakeup] {
        &self.wakeups
    }

    /// Wakeups with `ts` in `[range_start, range_end)`.
    pub fn wakeups_in(
        &self,
        range_start: Timestamp,
        range_end: Timestamp,
    ) -> impl Iterator<Item = &Wakeup> + '_ {
        self.wakeups
            .iter()
            .filter(move |w| w.ts >= range_start && w.ts < range_end)
    }
}

#[cfg(test)]
mod tests {
    use spanlane_core::{Outcome, SpanId, SpanlaneError, TraceEvent};

    use super::*;
    use crate::span::{CpuState, OnCpuInterval};

    fn id(v: u64) -> SpanId {
        SpanId(v)
    }

    #[test]
    fn basic_lifecycle_through_events() {
        let mut trace = Trace::new();
        for ev in [
            TraceEvent::open(1, None, 0, "main"),
            TraceEvent::on_cpu(1, 1),
            TraceEvent::off_cpu(1, 5),
            TraceEvent::close(1, 10),
        ] {
            trace.add_event(&ev).unwrap();
        }

        let span = trace.span(id(1)).unwrap();
        assert_eq!(
            span.intervals(),
            &[OnCpuInterval {
                start: 1,
                end: Some(5)
            }]
        );
        assert_eq!(span.end(), Some(10));
        assert_eq!(span.cpu_state(), CpuState::Idle);
        assert_eq!(trace.max_time(), 10);
        assert_eq!(trace.open_span_count(), 0);
        assert_eq!(trace.accepted_events(), 4);
    }

    #[test]
    fn builds_parent_child_links() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(1, None, 0, "root")).unwrap();
        trace.add_event(&TraceEvent::open(2, Some(id(1)), 1, "a")).unwrap();
        trace.add_event(&TraceEvent::open(3, Some(id(1)), 2, "b")).unwrap();

        let root = trace.span(id(1)).unwrap();
        let names: Vec<_> = trace.children(root).map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(trace.root_count(), 1);
        let child = trace.span(id(3)).unwrap();
        assert_eq!(trace.parent(child).map(|p| p.id()), Some(id(1)));
    }

    #[test]
    fn rejects_duplicate_open() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(1, None, 0, "a")).unwrap();
        let err = trace.add_event(&TraceEvent::open(1, None, 3, "again")).unwrap_err();
        assert_eq!(err, SpanlaneError::DuplicateSpan { id: id(1) });
        assert_eq!(trace.span(id(1)).unwrap().name(), "a");
        assert_eq!(trace.rejected_events(), 1);
    }

    #[test]
    fn rejects_events_for_unknown_spans() {
        let mut trace = Trace::new();
        for ev in [
            TraceEvent::close(9, 1),
            TraceEvent::on_cpu(9, 1),
            TraceEvent::off_cpu(9, 1),
        ] {
            assert_eq!(
                trace.add_event(&ev).unwrap_err(),
                SpanlaneError::UnknownSpan { id: id(9) }
            );
        }
        assert!(trace.is_empty());
        assert_eq!(trace.max_time(), 0);
    }

    #[test]
    fn bad_event_does_not_stop_the_stream() {
        let mut trace = Trace::new();
        let events = [
            TraceEvent::open(1, None, 0, "a"),
            TraceEvent::close(1, 4),
            TraceEvent::close(1, 6),
            TraceEvent::open(2, None, 7, "b"),
        ];
        let results: Vec<_> = events.iter().map(|ev| trace.add_event(ev)).collect();
        assert!(results[2].is_err());
        assert_eq!(trace.span(id(1)).unwrap().end(), Some(4));
        assert!(trace.span(id(2)).is_some());
        assert_eq!(trace.max_time(), 7);
    }

    #[test]
    fn child_must_start_within_parent() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(1, None, 10, "root")).unwrap();
        assert!(trace.add_event(&TraceEvent::open(2, Some(id(1)), 5, "early")).is_err());
        trace.add_event(&TraceEvent::close(1, 20)).unwrap();
        assert!(trace.add_event(&TraceEvent::open(3, Some(id(1)), 21, "late")).is_err());
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn child_cannot_outlive_closed_parent() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(1, None, 0, "root")).unwrap();
        trace.add_event(&TraceEvent::open(2, Some(id(1)), 1, "child")).unwrap();
        trace.add_event(&TraceEvent::close(1, 10)).unwrap();
        assert!(trace.add_event(&TraceEvent::close(2, 11)).is_err());
        trace.add_event(&TraceEvent::close(2, 9)).unwrap();
    }

    #[test]
    fn parent_cannot_close_before_child_end() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(1, None, 0, "root")).unwrap();
        trace.add_event(&TraceEvent::open(2, Some(id(1)), 1, "child")).unwrap();
        trace.add_event(&TraceEvent::close(2, 8)).unwrap();
        assert!(trace.add_event(&TraceEvent::close(1, 7)).is_err());
        trace.add_event(&TraceEvent::close(1, 8)).unwrap();
    }

    #[test]
    fn late_parent_reattaches_provisional_root() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(2, Some(id(1)), 5, "child")).unwrap();
        assert_eq!(trace.provisional_roots().count(), 1);

        trace.add_event(&TraceEvent::open(1, None, 0, "parent")).unwrap();
        assert_eq!(trace.root_count(), 1);
        assert_eq!(trace.provisional_roots().count(), 0);
        let parent = trace.span(id(1)).unwrap();
        let children: Vec<_> = trace.children(parent).map(|s| s.id()).collect();
        assert_eq!(children, vec![id(2)]);
        assert_eq!(parent.max_subtree_lane(), Some(1));
        trace.verify_lanes().unwrap();
    }

    #[test]
    fn late_parent_starting_after_child_is_not_adopted() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(2, Some(id(1)), 5, "child")).unwrap();
        trace.add_event(&TraceEvent::open(1, None, 8, "parent")).unwrap();
        assert_eq!(trace.root_count(), 2);
        assert_eq!(trace.span(id(1)).unwrap().child_count(), 0);
    }

    #[test]
    fn late_parent_cycle_is_not_adopted() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(2, Some(id(1)), 0, "two")).unwrap();
        trace.add_event(&TraceEvent::open(1, Some(id(2)), 0, "one")).unwrap();
        assert_eq!(trace.span(id(2)).unwrap().child_count(), 1);
        assert_eq!(trace.span(id(1)).unwrap().child_count(), 0);
        assert_eq!(trace.root_count(), 1);
    }

    #[test]
    fn late_parent_under_collapsed_span_hides_adopted_child() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(1, None, 0, "root")).unwrap();
        trace.collapse(id(1)).unwrap();
        trace.add_event(&TraceEvent::open(3, Some(id(2)), 2, "grandchild")).unwrap();
        assert!(trace.span(id(3)).unwrap().lane().is_some());

        trace.add_event(&TraceEvent::open(2, Some(id(1)), 1, "child")).unwrap();
        let grandchild = trace.span(id(3)).unwrap();
        assert!(!grandchild.is_visible());
        assert_eq!(grandchild.lane(), None);
        assert_eq!(trace.num_lanes(), 1);
        trace.verify_lanes().unwrap();
    }

    #[test]
    fn adoption_under_collapsed_span_keeps_lanes_without_shrinking() {
        let mut trace = Trace::with_options(TraceOptions {
            shrink_lanes_on_collapse: false,
        });
        trace.add_event(&TraceEvent::open(1, None, 0, "root")).unwrap();
        trace.collapse(id(1)).unwrap();
        trace.add_event(&TraceEvent::open(3, Some(id(2)), 2, "grandchild")).unwrap();
        trace.add_event(&TraceEvent::open(2, Some(id(1)), 1, "child")).unwrap();

        assert_eq!(trace.span(id(3)).unwrap().lane(), None);
        assert_eq!(trace.num_lanes(), 2);
    }

    #[test]
    fn records_wakeups_and_outcomes() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(1, None, 0, "a")).unwrap();
        trace.add_event(&TraceEvent::open(2, None, 0, "b")).unwrap();
        trace.add_event(&TraceEvent::wakeup(2, 1, 3)).unwrap();
        assert!(trace.add_event(&TraceEvent::wakeup(2, 7, 4)).is_err());
        trace
            .add_event(&TraceEvent::close(2, 5).with_outcome(Outcome::Error("boom".into())))
            .unwrap();

        assert_eq!(trace.wakeups().len(), 1);
        assert_eq!(trace.wakeups_in(0, 3).count(), 0);
        assert_eq!(trace.wakeups_in(3, 4).count(), 1);
        assert_eq!(
            trace.span(id(2)).unwrap().outcome(),
            Some(&Outcome::Error("boom".into()))
        );
    }

    #[test]
    fn wakeup_without_waking_id_is_rejected() {
        let mut trace = Trace::new();
        trace.add_event(&TraceEvent::open(1, None, 0, "a")).unwrap();
        let mut ev = TraceEvent::wakeup(1, 1, 2);
        ev.waking_id = None;
        assert!(matches!(
            trace.add_event(&ev),
            Err(SpanlaneError::InvalidArgument(_))
        ));
    }
}
