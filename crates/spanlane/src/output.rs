use owo_colors::OwoColorize;
use spanlane_core::Outcome;
use spanlane_core::time::format_timestamp;
use spanlane_model::{LaneSnapshot, SpanView, TraceStatus};

const ROW_WIDTH: usize = 64;

pub fn print_status_human(v: &TraceStatus) {
    println!(
        "spans={} roots={} open={} lanes={}",
        v.spans, v.roots, v.open_spans, v.num_lanes
    );
    println!(
        "events accepted={} rejected={} wakeups={}",
        v.accepted_events, v.rejected_events, v.wakeups
    );
    println!("max_time={}", format_timestamp(v.max_time));
}

pub fn print_span_human(v: &SpanView) {
    let end = v
        .end
        .map(format_timestamp)
        .unwrap_or_else(|| "open".to_string());
    let lane = v
        .lane
        .map(|l| l.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "SPAN {} name=\"{}\" start={} end={} lane={} {}",
        v.id,
        v.name,
        format_timestamp(v.start),
        end,
        lane,
        outcome_label(v)
    );
    if let Some(parent) = v.parent_id {
        println!("parent={parent}");
    }
    if let Some(thread) = &v.thread_name {
        println!("thread={thread}");
    }
    println!("visible={} collapsed={}", v.visible, v.collapsed);
    println!("on_cpu={}", format_timestamp(v.on_cpu_time));
    for interval in &v.intervals {
        let end = interval
            .end
            .map(format_timestamp)
            .unwrap_or_else(|| "running".to_string());
        println!("  on-cpu {} .. {}", format_timestamp(interval.start), end);
    }
    if !v.children.is_empty() {
        let ids: Vec<_> = v.children.iter().map(|c| c.to_string()).collect();
        println!("children={}", ids.join(","));
    }
    if let Some(meta) = &v.metadata {
        println!("metadata={meta}");
    }
}

/// One text row per lane; `#` marks on-CPU time and `=` the rest of a span's life.
pub fn print_lanes_human(v: &LaneSnapshot) {
    println!(
        "range {} .. {}  lanes={}",
        format_timestamp(v.range_start),
        format_timestamp(v.range_end),
        v.num_lanes
    );

    for lane in 0..v.num_lanes {
        let mut row = vec![Cell::Empty; ROW_WIDTH];
        for (_, span) in v.spans.iter().filter(|(l, _)| *l as usize == lane) {
            paint(&mut row, v, span);
        }
        let rendered: String = row.iter().map(Cell::render).collect();
        println!("{lane:>3} |{rendered}|");
    }

    for (lane, span) in &v.spans {
        let end = span
            .end
            .map(format_timestamp)
            .unwrap_or_else(|| "open".to_string());
        let marker = if span.collapsed { "+" } else { " " };
        println!(
            "{lane:>3} {marker} {} {} [{} .. {}] {}",
            span.id,
            span.name,
            format_timestamp(span.start),
            end,
            outcome_label(span)
        );
    }
    println!(
        "-- {} spans, {} wakeups --",
        v.spans.len(),
        v.wakeups.len()
    );
}

pub fn print_lane_count_human(num_lanes: usize) {
    println!("lanes={num_lanes}");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Running,
    Ok,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Empty,
    Span(Tone),
    OnCpu(Tone),
}

impl Cell {
    fn render(&self) -> String {
        let (ch, tone) = match *self {
            Cell::Empty => return " ".to_string(),
            Cell::Span(tone) => ('=', tone),
            Cell::OnCpu(tone) => ('#', tone),
        };
        match tone {
            Tone::Running => ch.yellow().to_string(),
            Tone::Ok => ch.green().to_string(),
            Tone::Failed => ch.red().to_string(),
        }
    }
}

fn tone(span: &SpanView) -> Tone {
    match (&span.end, &span.outcome) {
        (None, _) => Tone::Running,
        (Some(_), Some(Outcome::Error(_))) => Tone::Failed,
        (Some(_), _) => Tone::Ok,
    }
}

fn paint(row: &mut [Cell], v: &LaneSnapshot, span: &SpanView) {
    let tone = tone(span);
    let end = span.end.unwrap_or(v.range_end);
    for col in columns(v, span.start, end, row.len()) {
        row[col] = Cell::Span(tone);
    }
    for interval in &span.intervals {
        let end = interval.end.unwrap_or(end);
        for col in columns(v, interval.start, end, row.len()) {
            row[col] = Cell::OnCpu(tone);
        }
    }
}

/// Columns covered by `[start, end)` clipped to the snapshot range; never empty for a visible span.
fn columns(
    v: &LaneSnapshot,
    start: u64,
    end: u64,
    width: usize,
) -> std::ops::Range<usize> {
    let range = v.range_end.saturating_sub(v.range_start).max(1) as u128;
    let to_col = |ts: u64| {
        let offset = ts.clamp(v.range_start, v.range_end) - v.range_start;
        ((offset as u128 * width as u128) / range) as usize
    };
    let first = to_col(start).min(width.saturating_sub(1));
    let last = to_col(end).max(first + 1).min(width);
    first..last
}

fn outcome_label(span: &SpanView) -> String {
    if span.end.is_none() {
        return "running".yellow().to_string();
    }
    match &span.outcome {
        Some(Outcome::Error(msg)) => format!("{} {msg}", "error".red()),
        _ => "ok".green().to_string(),
    }
}
