use std::net::SocketAddr;

use anyhow::Context;
use spanlane_core::SpanlaneError;
use spanlane_ingest::{SharedTrace, lock};
use spanlane_model::{LaneSnapshot, Trace};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::protocol::{ApiRequest, ApiResponse};

pub async fn run_query_server(trace: SharedTrace, tcp_addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(tcp_addr)
        .await
        .context("bind TCP query listener")?;

    loop {
        let (stream, _) = listener.accept().await?;
        let trace = trace.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(BufReader::new(stream), trace).await {
                tracing::warn!(error = ?err, "tcp client request failed");
            }
        });
    }
}

async fn handle_stream<T>(mut stream: BufReader<T>, trace: SharedTrace) -> anyhow::Result<()>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut line = String::new();
    let n = stream.read_line(&mut line).await?;
    if n == 0 {
        return Ok(());
    }

    let response = match serde_json::from_str::<ApiRequest>(&line) {
        Ok(req) => {
            let mut guard = lock(&trace);
            handle_request(req, &mut guard)
        }
        Err(e) => ApiResponse::Error(format!("bad request: {e}")),
    };
    let payload = serde_json::to_vec(&response)?;
    stream.get_mut().write_all(&payload).await?;
    stream.get_mut().write_all(b"\n").await?;
    stream.get_mut().flush().await?;
    Ok(())
}

pub fn handle_request(req: ApiRequest, trace: &mut Trace) -> ApiResponse {
    let resp = match req {
        ApiRequest::Status => Ok(ApiResponse::Status(trace.status())),
        ApiRequest::Lanes { start, end } => {
            let start = start.unwrap_or(0);
            let end = end.unwrap_or_else(|| trace.max_time().saturating_add(1));
            if end < start {
                Err(SpanlaneError::InvalidArgument(format!(
                    "range end {end} is before start {start}"
                )))
            } else {
                Ok(ApiResponse::Lanes(LaneSnapshot::capture(trace, start, end)))
            }
        }
        ApiRequest::Span { id } => trace
            .view(id)
            .map(ApiResponse::Span)
            .ok_or(SpanlaneError::UnknownSpan { id }),
        ApiRequest::Collapse { id } => trace.collapse(id).map(|()| ApiResponse::LaneCount {
            num_lanes: trace.num_lanes(),
        }),
        ApiRequest::Expand { id } => trace.expand(id).map(|()| ApiResponse::LaneCount {
            num_lanes: trace.num_lanes(),
        }),
    };

    resp.unwrap_or_else(|e| ApiResponse::Error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use spanlane_core::SpanId;

    use super::*;

    fn sample() -> Trace {
        let mut trace = Trace::new();
        for event in testkit::sample_trace() {
            trace.add_event(&event).unwrap();
        }
        trace
    }

    #[test]
    fn lanes_default_to_whole_trace() {
        let mut trace = sample();
        let ApiResponse::Lanes(snapshot) = handle_request(
            ApiRequest::Lanes {
                start: None,
                end: None,
            },
            &mut trace,
        ) else {
            panic!("expected lanes response");
        };
        assert_eq!(snapshot.range_end, 46);
        assert_eq!(snapshot.num_lanes, 4);
        let lanes: Vec<_> = snapshot.spans.iter().map(|(lane, s)| (s.id.get(), *lane)).collect();
        assert_eq!(lanes, vec![(1, 0), (2, 1), (3, 2), (4, 3), (5, 1)]);
        assert_eq!(snapshot.wakeups.len(), 1);
    }

    #[test]
    fn collapse_and_expand_report_lane_count() {
        let mut trace = sample();
        let collapsed = handle_request(ApiRequest::Collapse { id: SpanId(1) }, &mut trace);
        assert!(matches!(collapsed, ApiResponse::LaneCount { num_lanes: 1 }));
        let expanded = handle_request(ApiRequest::Expand { id: SpanId(1) }, &mut trace);
        assert!(matches!(expanded, ApiResponse::LaneCount { num_lanes: 4 }));
    }

    #[test]
    fn errors_are_reported_inline() {
        let mut trace = sample();
        let ApiResponse::Error(msg) = handle_request(ApiRequest::Span { id: SpanId(42) }, &mut trace)
        else {
            panic!("expected error response");
        };
        assert!(msg.contains("unknown span"));

        let reversed = handle_request(
            ApiRequest::Lanes {
                start: Some(10),
                end: Some(5),
            },
            &mut trace,
        );
        assert!(matches!(reversed, ApiResponse::Error(_)));
    }
}
