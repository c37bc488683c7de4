use std::time::Duration;

use crate::error::{Result, SpanlaneError};

/// Nanoseconds on the event source's clock.
pub type Timestamp = u64;

/// Accepts raw nanoseconds (`"1500"`) or a duration from the trace origin (`"1.5ms"`).
pub fn parse_timestamp(input: &str) -> Result<Timestamp> {
    let trimmed = input.trim();
    if let Ok(nanos) = trimmed.parse::<u64>() {
        return Ok(nanos);
    }

    if let Ok(duration) = humantime::parse_duration(trimmed) {
        return u64::try_from(duration.as_nanos())
            .map_err(|_| SpanlaneError::Parse(format!("timestamp out of range: {input}")));
    }

    Err(SpanlaneError::Parse(format!(
        "expected nanoseconds or duration, got {input}"
    )))
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| SpanlaneError::Parse(format!("invalid duration {input}: {e}")))
}

pub fn format_timestamp(ts: Timestamp) -> String {
    humantime::format_duration(Duration::from_nanos(ts)).to_string()
}
