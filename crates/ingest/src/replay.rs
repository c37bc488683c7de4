use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use spanlane_core::error::{Result, SpanlaneError};
use spanlane_core::TraceEvent;
use spanlane_model::Trace;
use tracing::{debug, warn};

use crate::decode::decode_events;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplayReport {
    pub events: Vec<TraceEvent>,
    pub lines: usize,
    pub skipped_lines: usize,
}

impl ReplayReport {
    /// Applies every decoded event in order; rejections are counted by the trace.
    pub fn apply_to(&self, trace: &mut Trace) {
        for event in &self.events {
            let _ = trace.add_event(event);
        }
    }
}

/// Reads NDJSON events; undecodable lines, including ones that are not UTF-8, are logged and skipped.
pub fn read_events<R: BufRead>(reader: R) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();
    for (n, line) in reader.split(b'\n').enumerate() {
        let line = line.map_err(|e| SpanlaneError::Io(format!("read line {}: {e}", n + 1)))?;
        report.lines += 1;
        let decoded = std::str::from_utf8(&line)
            .map_err(|e| SpanlaneError::Parse(format!("line is not valid utf-8: {e}")))
            .and_then(decode_events);
        match decoded {
            Ok(events) => report.events.extend(events),
            Err(err) => {
                report.skipped_lines += 1;
                warn!(line = n + 1, error = %err, "skipping undecodable trace line");
            }
        }
    }
    Ok(report)
}

/// Reads a trace file, decompressing it first when the name ends in `.gz`.
pub fn replay_file(path: &Path) -> Result<ReplayReport> {
    let file = File::open(path)
        .map_err(|e| SpanlaneError::Io(format!("failed to open {}: {e}", path.display())))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let report = read_events(BufReader::new(reader))?;
    debug!(
        path = %path.display(),
        events = report.events.len(),
        skipped = report.skipped_lines,
        "replayed trace file"
    );
    Ok(report)
}
