use serde::Deserialize;
use spanlane_core::error::{Result, SpanlaneError};
use spanlane_core::TraceEvent;

use crate::legacy::LegacyEvent;

/// One decoded line of a producer stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Names the trace source the producer is about to send.
    Handshake { source: String },
    Events(Vec<TraceEvent>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Handshake {
    source: String,
}

/// Decodes a native event, a legacy cyclotron record, or a handshake. Blank lines yield `None`.
pub fn decode_frame(line: &str) -> Result<Option<Frame>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| SpanlaneError::Parse(format!("malformed json: {e}")))?;
    let Some(obj) = value.as_object() else {
        return Err(SpanlaneError::Parse("expected a json object".to_string()));
    };

    if obj.contains_key("kind") {
        let event = serde_json::from_value::<TraceEvent>(value)
            .map_err(|e| SpanlaneError::Parse(format!("bad event: {e}")))?;
        return Ok(Some(Frame::Events(vec![event])));
    }

    if obj.contains_key("source") {
        let handshake = serde_json::from_value::<Handshake>(value)
            .map_err(|e| SpanlaneError::Parse(format!("bad handshake: {e}")))?;
        return Ok(Some(Frame::Handshake {
            source: handshake.source,
        }));
    }

    let legacy = serde_json::from_value::<LegacyEvent>(value)
        .map_err(|e| SpanlaneError::Parse(format!("unrecognized record: {e}")))?;
    Ok(Some(Frame::Events(legacy.into_events())))
}

/// Like [`decode_frame`] for inputs with no handshake; a handshake line decodes to no events.
pub fn decode_events(line: &str) -> Result<Vec<TraceEvent>> {
    match decode_frame(line)? {
        Some(Frame::Events(events)) => Ok(events),
        Some(Frame::Handshake { .. }) | None => Ok(Vec::new()),
    }
}
