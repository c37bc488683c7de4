use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use spanlane_core::TraceEvent;
use spanlane_model::Trace;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// The model shared between the apply task and readers.
pub type SharedTrace = Arc<Mutex<Trace>>;

pub fn shared(trace: Trace) -> SharedTrace {
    Arc::new(Mutex::new(trace))
}

/// Locks the trace. A panic in another holder leaves the model consistent between
/// events, so a poisoned lock is recovered rather than propagated.
pub fn lock(trace: &SharedTrace) -> MutexGuard<'_, Trace> {
    trace.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Message {
    Events(Vec<TraceEvent>),
    Barrier(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct Pipeline {
    tx: mpsc::Sender<Message>,
    trace: SharedTrace,
}

pub struct PipelineConfig {
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl Pipeline {
    /// Spawns the single task that applies submitted batches in arrival order.
    pub fn new(trace: SharedTrace, cfg: PipelineConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.channel_capacity.max(1));
        tokio::spawn(run_apply(trace.clone(), rx));
        Self { tx, trace }
    }

    pub fn trace(&self) -> &SharedTrace {
        &self.trace
    }

    pub async fn submit(&self, events: Vec<TraceEvent>) {
        if events.is_empty() {
            return;
        }
        if self.tx.send(Message::Events(events)).await.is_err() {
            warn!("event pipeline dropped batch: receiver closed");
        }
    }

    /// Resolves once every batch submitted before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Barrier(done_tx)).await.is_err() {
            warn!("event pipeline flush skipped: receiver closed");
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_apply(trace: SharedTrace, mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Events(events) => {
                apply_batch(&trace, &events);
            }
            Message::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("event pipeline closed");
}

/// Applies one batch, returning how many events were rejected by the model and how many were malformed.
fn apply_batch(trace: &SharedTrace, events: &[TraceEvent]) -> (usize, usize) {
    let mut guard = lock(trace);
    let mut rejected = 0usize;
    let mut malformed = 0usize;
    for event in events {
        match guard.add_event(event) {
            Ok(()) => {}
            Err(e) if e.is_event_rejection() => rejected += 1,
            Err(_) => malformed += 1,
        }
    }
    debug!(
        events = events.len(),
        rejected,
        malformed,
        spans = guard.len(),
        "applied event batch"
    );
    (rejected, malformed)
}

#[cfg(test)]
mod tests {
    use spanlane_core::SpanId;

    use super::*;

    #[tokio::test]
    async fn pipeline_applies_batches_in_order() {
        let trace = shared(Trace::new());
        let pipeline = Pipeline::new(trace.clone(), PipelineConfig { channel_capacity: 2 });

        let events = testkit::sample_trace();
        for chunk in events.chunks(3) {
            pipeline.submit(chunk.to_vec()).await;
        }
        pipeline.flush().await;

        let guard = lock(&trace);
        assert_eq!(guard.len(), 5);
        assert_eq!(guard.rejected_events(), 0);
        assert_eq!(guard.num_lanes(), 4);
        assert_eq!(guard.max_time(), 45);
        assert_eq!(guard.span(SpanId(5)).and_then(|s| s.lane()), Some(1));
    }

    #[tokio::test]
    async fn rejected_events_do_not_stop_the_pipeline() {
        let trace = shared(Trace::new());
        let pipeline = Pipeline::new(trace.clone(), PipelineConfig::default());

        pipeline
            .submit(vec![
                TraceEvent::close(7, 1),
                TraceEvent::open(1, None, 0, "a"),
                TraceEvent::open(1, None, 2, "again"),
            ])
            .await;
        pipeline.submit(vec![TraceEvent::close(1, 4)]).await;
        pipeline.flush().await;

        let guard = lock(pipeline.trace());
        assert_eq!(guard.accepted_events(), 2);
        assert_eq!(guard.rejected_events(), 2);
        assert_eq!(guard.span(SpanId(1)).and_then(|s| s.end()), Some(4));
    }

    #[test]
    fn batch_counts_split_rejections_from_malformed_events() {
        let trace = shared(Trace::new());
        let mut wakeup = TraceEvent::wakeup(1, 1, 3);
        wakeup.waking_id = None;
        let counts = apply_batch(
            &trace,
            &[
                TraceEvent::open(1, None, 0, "a"),
                TraceEvent::open(1, None, 1, "dup"),
                TraceEvent::close(9, 2),
                wakeup,
            ],
        );
        assert_eq!(counts, (2, 1));
        assert_eq!(lock(&trace).rejected_events(), 3);
    }

    #[tokio::test]
    async fn empty_batches_are_ignored() {
        let trace = shared(Trace::new());
        let pipeline = Pipeline::new(trace.clone(), PipelineConfig::default());
        pipeline.submit(Vec::new()).await;
        pipeline.flush().await;
        assert_eq!(lock(&trace).accepted_events(), 0);
    }
}
