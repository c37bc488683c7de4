//! Lane allocation: greedy interval colouring applied as spans open, close,
//! collapse and expand.
//!
//! Lane ids are global to a trace. A lane can be claimed by a span starting at
//! `s` when no open span holds it and every closed span still drawn on it ended
//! at or before `s`. Candidates are tried from the parent's `free_lanes` first,
//! then from the trace-wide free set, smallest id first; when nothing fits a
//! new lane is appended.

use std::collections::BTreeSet;

use spanlane_core::error::{Result, SpanlaneError};
use spanlane_core::{SpanId, Timestamp};
use tracing::debug;

use crate::tree::Trace;

#[derive(Debug, Clone, Default)]
struct LaneSlot {
    open: Option<usize>,
    occupants: Vec<usize>,
    free_at: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LaneTable {
    slots: Vec<LaneSlot>,
    free: BTreeSet<u32>,
}

impl LaneTable {
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn claimable(&self, lane: u32, start: Timestamp) -> bool {
        self.slots
            .get(lane as usize)
            .is_some_and(|slot| slot.open.is_none() && slot.free_at <= start)
    }

    fn first_free(&self, start: Timestamp) -> Option<u32> {
        self.free
            .iter()
            .copied()
            .find(|&lane| self.claimable(lane, start))
    }

    fn push_lane(&mut self) -> u32 {
        let lane = self.slots.len() as u32;
        self.slots.push(LaneSlot::default());
        self.free.insert(lane);
        lane
    }

    fn occupy(&mut self, lane: u32, span: usize, end: Option<Timestamp>) {
        let slot = &mut self.slots[lane as usize];
        slot.occupants.push(span);
        match end {
            None => {
                slot.open = Some(span);
                self.free.remove(&lane);
            }
            Some(end) => slot.free_at = slot.free_at.max(end),
        }
    }

    /// The open occupant finished at `ts`; the lane stays drawn but becomes reusable after `ts`.
    pub(crate) fn finish(&mut self, lane: u32, ts: Timestamp) {
        let slot = &mut self.slots[lane as usize];
        slot.open = None;
        slot.free_at = slot.free_at.max(ts);
        self.free.insert(lane);
    }

    /// Drops `span` from the lane entirely and recomputes when the lane frees up.
    fn release(&mut self, lane: u32, span: usize, end_of: impl Fn(usize) -> Option<Timestamp>) {
        let slot = &mut self.slots[lane as usize];
        slot.occupants.retain(|&s| s != span);
        if slot.open == Some(span) {
            slot.open = None;
        }
        slot.free_at = slot
            .occupants
            .iter()
            .filter_map(|&s| end_of(s))
            .max()
            .unwrap_or(0);
        if slot.open.is_none() {
            self.free.insert(lane);
        }
    }

    /// Removes trailing lanes that nothing is drawn on.
    pub(crate) fn shrink(&mut self) {
        while self
            .slots
            .last()
            .is_some_and(|slot| slot.occupants.is_empty())
        {
            self.slots.pop();
            self.free.remove(&(self.slots.len() as u32));
        }
    }

    pub(crate) fn occupants(&self, lane: u32) -> &[usize] {
        self.slots
            .get(lane as usize)
            .map(|slot| slot.occupants.as_slice())
            .unwrap_or(&[])
    }
}

impl Trace {
    /// Gives `idx` a lane and raises `max_subtree_lane` along its ancestry.
    pub(crate) fn assign_lane(&mut self, idx: usize) -> u32 {
        let start = self.spans[idx].start();
        let parent = self.spans[idx].parent;

        let scoped = parent.and_then(|p| {
            self.spans[p]
                .free_lanes
                .iter()
                .copied()
                .find(|&lane| self.lanes.claimable(lane, start))
        });
        let lane = scoped
            .or_else(|| self.lanes.first_free(start))
            .unwrap_or_else(|| self.lanes.push_lane());

        if let Some(p) = parent {
            self.spans[p].free_lanes.remove(&lane);
        }
        self.lanes.occupy(lane, idx, self.spans[idx].end());
        self.spans[idx].lane = Some(lane);

        let mut cur = Some(idx);
        while let Some(i) = cur {
            let span = &mut self.spans[i];
            if span.max_subtree_lane.is_some_and(|max| max >= lane) {
                break;
            }
            span.max_subtree_lane = Some(lane);
            cur = span.parent;
        }
        lane
    }

    /// Hides `roots` and everything below them, returning their lanes to `scope`.
    pub(crate) fn hide_subtrees(&mut self, roots: Vec<usize>, scope: Option<usize>) {
        let mut stack = roots;
        let mut freed = Vec::new();
        while let Some(i) = stack.pop() {
            let span = &mut self.spans[i];
            if !span.visible {
                continue;
            }
            span.visible = false;
            span.max_subtree_lane = None;
            span.free_lanes.clear();
            if let Some(lane) = span.lane.take() {
                freed.push((lane, i));
            }
            stack.extend(span.children.iter().copied());
        }

        let spans = &self.spans;
        for &(lane, i) in &freed {
            self.lanes.release(lane, i, |s| spans[s].end());
        }
        if let Some(scope) = scope {
            self.spans[scope]
                .free_lanes
                .extend(freed.iter().map(|&(lane, _)| lane));
        }
    }

    /// Recomputes `max_subtree_lane` from `from` up to its root.
    pub(crate) fn refresh_max_lanes(&mut self, from: usize) {
        let mut cur = Some(from);
        while let Some(i) = cur {
            let max = self.spans[i]
                .children
                .iter()
                .map(|&c| self.spans[c].max_subtree_lane)
                .fold(self.spans[i].lane, std::cmp::max);
            self.spans[i].max_subtree_lane = max;
            cur = self.spans[i].parent;
        }
    }

    /// Hides the descendants of `id` and frees their lanes. The span itself keeps its row.
    pub fn collapse(&mut self, id: SpanId) -> Result<()> {
        let idx = self.index_of(id)?;
        if self.spans[idx].collapsed {
            return Ok(());
        }
        self.spans[idx].collapsed = true;

        let children = self.spans[idx].children.clone();
        self.hide_subtrees(children, Some(idx));
        self.refresh_max_lanes(idx);
        if self.options.shrink_lanes_on_collapse {
            self.lanes.shrink();
        }
        debug!(span = %id, num_lanes = self.num_lanes(), "collapsed span");
        Ok(())
    }

    /// Reverses [`Trace::collapse`] and lays out every descendant that became visible.
    pub fn expand(&mut self, id: SpanId) -> Result<()> {
        let idx = self.index_of(id)?;
        if !self.spans[idx].collapsed {
            return Ok(());
        }
        self.spans[idx].collapsed = false;
        if !self.spans[idx].visible {
            return Ok(());
        }

        let mut revealed = Vec::new();
        let mut stack = self.spans[idx].children.clone();
        while let Some(i) = stack.pop() {
            let span = &mut self.spans[i];
            span.visible = true;
            revealed.push(i);
            if !span.collapsed {
                stack.extend(span.children.iter().copied());
            }
        }

        revealed.sort_by_key(|&i| (self.spans[i].start(), i));
        for i in revealed {
            self.assign_lane(i);
        }
        debug!(span = %id, num_lanes = self.num_lanes(), "expanded span");
        Ok(())
    }

    /// Checks that no two visible spans sharing a lane overlap in time.
    pub fn verify_lanes(&self) -> Result<()> {
        for lane in 0..self.lanes.len() as u32 {
            let mut ranges: Vec<(Timestamp, Option<Timestamp>, usize)> = self
                .lanes
                .occupants(lane)
                .iter()
                .map(|&i| (self.spans[i].start(), self.spans[i].end(), i))
                .collect();
            ranges.sort_by_key(|&(start, end, _)| (start, end.unwrap_or(Timestamp::MAX)));
            for pair in ranges.windows(2) {
                let (_, prev_end, prev) = pair[0];
                let (next_start, _, next) = pair[1];
                if prev_end.is_none_or(|end| end > next_start) {
                    return Err(SpanlaneError::invalid_state(
                        self.spans[next].id(),
                        format!(
                            "lane {lane} overlaps span {}",
                            self.spans[prev].id()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use spanlane_core::TraceEvent;

    use crate::tree::{Trace, TraceOptions};

    fn lane_of(trace: &Trace, id: u64) -> Option<u32> {
        trace.span(id.into()).and_then(|s| s.lane())
    }

    fn hidden_ids(trace: &Trace) -> Vec<u64> {
        trace
            .iter()
            .filter(|s| !s.is_visible())
            .map(|s| s.id().get())
            .collect()
    }

    fn apply(trace: &mut Trace, events: &[TraceEvent]) {
        for ev in events {
            trace.add_event(ev).unwrap();
        }
    }

    #[test]
    fn sibling_reuses_lane_after_close() {
        let mut trace = Trace::new();
        apply(
            &mut trace,
            &[
                TraceEvent::open(1, None, 0, "parent"),
                TraceEvent::open(2, Some(1.into()), 0, "a"),
                TraceEvent::open(3, Some(1.into()), 5, "c"),
                TraceEvent::close(2, 10),
                TraceEvent::open(4, Some(1.into()), 10, "b"),
            ],
        );

        let a = lane_of(&trace, 2).unwrap();
        assert_ne!(lane_of(&trace, 3).unwrap(), a);
        assert_eq!(lane_of(&trace, 4), Some(a));
        assert_eq!(trace.num_lanes(), 3);
        trace.verify_lanes().unwrap();
    }

    #[test]
    fn lane_not_reused_before_previous_end() {
        let mut trace = Trace::new();
        apply(
            &mut trace,
            &[
                TraceEvent::open(1, None, 0, "a"),
                TraceEvent::close(1, 10),
                TraceEvent::open(2, None, 5, "late"),
            ],
        );
        assert_eq!(lane_of(&trace, 1), Some(0));
        assert_eq!(lane_of(&trace, 2), Some(1));
        trace.verify_lanes().unwrap();
    }

    #[test]
    fn smallest_free_lane_wins() {
        let mut trace = Trace::new();
        apply(
            &mut trace,
            &[
                TraceEvent::open(1, None, 0, "r0"),
                TraceEvent::open(2, None, 0, "r1"),
                TraceEvent::open(3, None, 0, "r2"),
                TraceEvent::close(3, 4),
                TraceEvent::close(2, 5),
                TraceEvent::open(4, None, 6, "r3"),
            ],
        );
        assert_eq!(lane_of(&trace, 4), Some(1));
    }

    #[test]
    fn child_prefers_lanes_freed_in_its_subtree() {
        let mut trace = Trace::new();
        apply(
            &mut trace,
            &[
                TraceEvent::open(1, None, 0, "r0"),
                TraceEvent::open(2, None, 0, "r1"),
                TraceEvent::open(3, Some(2.into()), 1, "child"),
                TraceEvent::close(1, 2),
                TraceEvent::close(3, 3),
                TraceEvent::open(5, Some(2.into()), 4, "next child"),
            ],
        );
        // Lane 0 is the smaller free id, but lane 2 was freed by r1's own child.
        assert_eq!(lane_of(&trace, 3), Some(2));
        assert_eq!(lane_of(&trace, 5), Some(2));
        let r1 = trace.span(2.into()).unwrap();
        assert_eq!(r1.max_subtree_lane(), Some(2));
        assert_eq!(r1.free_lanes().count(), 0);
        trace.verify_lanes().unwrap();
    }

    #[test]
    fn collapse_frees_descendant_lanes() {
        let mut trace = Trace::new();
        apply(
            &mut trace,
            &[
                TraceEvent::open(1, None, 0, "root"),
                TraceEvent::open(2, Some(1.into()), 1, "a"),
                TraceEvent::open(3, Some(2.into()), 2, "a.1"),
                TraceEvent::open(4, Some(1.into()), 3, "b"),
            ],
        );
        assert_eq!(trace.num_lanes(), 4);

        trace.collapse(1.into()).unwrap();
        for id in 2..=4 {
            let span = trace.span(id.into()).unwrap();
            assert!(!span.is_visible());
            assert_eq!(span.lane(), None);
        }
        let root = trace.span(1.into()).unwrap();
        assert_eq!(root.lane(), Some(0));
        assert_eq!(root.free_lanes().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(root.max_subtree_lane(), Some(0));
        assert_eq!(trace.num_lanes(), 1);
    }

    #[test]
    fn expand_relays_out_descendants() {
        let mut trace = Trace::new();
        apply(
            &mut trace,
            &[
                TraceEvent::open(1, None, 0, "root"),
                TraceEvent::open(2, Some(1.into()), 1, "a"),
                TraceEvent::open(3, Some(2.into()), 2, "a.1"),
                TraceEvent::close(3, 4),
                TraceEvent::open(4, Some(1.into()), 3, "b"),
            ],
        );
        trace.collapse(1.into()).unwrap();
        apply(&mut trace, &[TraceEvent::open(5, None, 5, "late root")]);
        trace.expand(1.into()).unwrap();

        for id in 1..=5 {
            assert!(trace.span(id.into()).unwrap().lane().is_some(), "span {id}");
        }
        trace.verify_lanes().unwrap();
    }

    #[test]
    fn collapse_expand_collapse_is_idempotent() {
        let mut trace = Trace::new();
        apply(
            &mut trace,
            &[
                TraceEvent::open(1, None, 0, "root"),
                TraceEvent::open(2, Some(1.into()), 1, "a"),
                TraceEvent::open(3, Some(2.into()), 2, "a.1"),
                TraceEvent::open(4, Some(1.into()), 3, "b"),
            ],
        );
        trace.collapse(2.into()).unwrap();
        trace.collapse(1.into()).unwrap();
        let hidden_once = hidden_ids(&trace);

        trace.expand(1.into()).unwrap();
        assert!(trace.span(2.into()).unwrap().is_visible());
        assert!(!trace.span(3.into()).unwrap().is_visible());
        trace.collapse(1.into()).unwrap();
        assert_eq!(hidden_ids(&trace), hidden_once);
    }

    #[test]
    fn children_opened_under_collapsed_span_stay_hidden() {
        let mut trace = Trace::new();
        apply(&mut trace, &[TraceEvent::open(1, None, 0, "root")]);
        trace.collapse(1.into()).unwrap();
        apply(
            &mut trace,
            &[
                TraceEvent::open(2, Some(1.into()), 1, "a"),
                TraceEvent::close(2, 2),
            ],
        );
        assert!(!trace.span(2.into()).unwrap().is_visible());
        assert_eq!(trace.span(2.into()).unwrap().lane(), None);
        assert_eq!(trace.num_lanes(), 1);
    }

    #[test]
    fn num_lanes_holds_without_shrinking() {
        let mut trace = Trace::with_options(TraceOptions {
            shrink_lanes_on_collapse: false,
        });
        apply(
            &mut trace,
            &[
                TraceEvent::open(1, None, 0, "root"),
                TraceEvent::open(2, Some(1.into()), 1, "a"),
                TraceEvent::close(2, 3),
            ],
        );
        assert_eq!(trace.num_lanes(), 2);
        trace.collapse(1.into()).unwrap();
        assert_eq!(trace.num_lanes(), 2);
    }

    #[test]
    fn num_lanes_never_drops_on_close() {
        let mut trace = Trace::new();
        apply(
            &mut trace,
            &[
                TraceEvent::open(1, None, 0, "a"),
                TraceEvent::open(2, None, 0, "b"),
                TraceEvent::close(2, 5),
                TraceEvent::close(1, 6),
            ],
        );
        assert_eq!(trace.num_lanes(), 2);
    }

    #[test]
    fn sample_stream_layout_survives_collapse_round_trip() -> anyhow::Result<()> {
        let mut trace = Trace::new();
        for ev in testkit::sample_trace() {
            trace.add_event(&ev)?;
        }
        let layout = |t: &Trace| (1..=5).map(|id| lane_of(t, id)).collect::<Vec<_>>();
        let before = layout(&trace);
        assert_eq!(before, vec![Some(0), Some(1), Some(2), Some(3), Some(1)]);
        assert_eq!(trace.num_lanes(), 4);

        trace.collapse(1.into())?;
        assert_eq!(hidden_ids(&trace), vec![2, 3, 4, 5]);
        assert_eq!(trace.num_lanes(), 1);

        trace.expand(1.into())?;
        assert!(hidden_ids(&trace).is_empty());
        assert_eq!(layout(&trace), before);
        trace.verify_lanes()?;
        Ok(())
    }
}
