use std::path::{Path, PathBuf};

use spanlane_core::{Outcome, SpanId, TraceEvent};

/// A small request-handling trace: a thread root, a request with a nested query,
/// a cache lookup, a wakeup and a trailing flush. Span 1 is left open.
pub fn sample_trace() -> Vec<TraceEvent> {
    let p = |id: u64| Some(SpanId(id));
    vec![
        TraceEvent::open(1, None, 0, "main").with_thread_name("main"),
        TraceEvent::open(2, p(1), 10, "handle_request")
            .with_metadata(serde_json::json!({"path": "/v1/orders"})),
        TraceEvent::on_cpu(2, 10),
        TraceEvent::open(3, p(2), 12, "db.query"),
        TraceEvent::on_cpu(3, 12),
        TraceEvent::off_cpu(3, 15),
        TraceEvent::off_cpu(2, 16),
        TraceEvent::open(4, p(1), 18, "cache.get"),
        TraceEvent::on_cpu(4, 18),
        TraceEvent::off_cpu(4, 22),
        TraceEvent::close(4, 22).with_outcome(Outcome::Success),
        TraceEvent::wakeup(3, 1, 30),
        TraceEvent::on_cpu(3, 30),
        TraceEvent::off_cpu(3, 35),
        TraceEvent::close(3, 35).with_outcome(Outcome::Success),
        TraceEvent::on_cpu(2, 36),
        TraceEvent::off_cpu(2, 40),
        TraceEvent::close(2, 40).with_outcome(Outcome::Error("timeout".to_string())),
        TraceEvent::open(5, p(1), 41, "flush"),
        TraceEvent::close(5, 45),
    ]
}

/// The same shape of trace as emitted by the older cyclotron tracer backend.
pub fn legacy_sample_lines() -> Vec<String> {
    vec![
        r#"{"ThreadStart":{"id":1,"name":"main","ts":{"secs":0,"nanos":0}}}"#,
        r#"{"AsyncStart":{"id":2,"parent_id":1,"name":"poll","ts":{"secs":0,"nanos":10},"metadata":{"k":"v"}}}"#,
        r#"{"AsyncOnCPU":{"id":2,"ts":{"secs":0,"nanos":11}}}"#,
        r#"{"SyncStart":{"id":3,"parent_id":2,"name":"parse","ts":{"secs":0,"nanos":12},"metadata":null}}"#,
        r#"{"SyncEnd":{"id":3,"ts":{"secs":0,"nanos":14}}}"#,
        r#"{"AsyncOffCPU":{"id":2,"ts":{"secs":0,"nanos":15}}}"#,
        r#"{"Wakeup":{"waking_span":1,"parked_span":2,"ts":{"secs":0,"nanos":16}}}"#,
        r#"{"AsyncEnd":{"id":2,"ts":{"secs":0,"nanos":20},"outcome":"Success"}}"#,
        r#"{"ThreadEnd":{"id":1,"ts":{"secs":1,"nanos":0}}}"#,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn to_ndjson(events: &[TraceEvent]) -> anyhow::Result<String> {
    let mut out = String::new();
    for ev in events {
        out.push_str(&serde_json::to_string(ev)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn write_trace_file(dir: &Path, name: &str, events: &[TraceEvent]) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, to_ndjson(events)?)?;
    Ok(path)
}
