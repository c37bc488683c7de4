use std::net::SocketAddr;
use std::time::Duration;

use spanlane_core::error::{Result, SpanlaneError};
use spanlane_core::TraceEvent;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::decode::{Frame, decode_frame};
use crate::pipeline::Pipeline;

const MAX_BATCH: usize = 1024;

pub async fn run_event_listener(
    addr: SocketAddr,
    pipeline: Pipeline,
    idle_timeout: Option<Duration>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SpanlaneError::Ingest(format!("failed to bind event listener {addr}: {e}")))?;
    serve_events(listener, pipeline, idle_timeout).await
}

/// Accepts producers forever, one task per connection.
pub async fn serve_events(
    listener: TcpListener,
    pipeline: Pipeline,
    idle_timeout: Option<Duration>,
) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| SpanlaneError::Ingest(format!("event listener accept failed: {e}")))?;
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            match handle_producer(stream, &pipeline, idle_timeout).await {
                Ok(count) => debug!(%peer, events = count, "producer disconnected"),
                Err(e) => warn!(%peer, error = %e, "producer connection failed"),
            }
        });
    }
}

/// Reads NDJSON frames until EOF and forwards decoded events. Returns the number of events read.
pub async fn handle_producer<R>(
    stream: R,
    pipeline: &Pipeline,
    idle_timeout: Option<Duration>,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf: Vec<u8> = Vec::new();
    let mut batch: Vec<TraceEvent> = Vec::new();
    let mut source = String::from("anonymous");
    let mut total = 0usize;
    let mut line_no = 0usize;

    loop {
        buf.clear();
        let next_line = reader.read_until(b'\n', &mut buf);
        let read = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, next_line).await {
                Ok(read) => read,
                Err(_) => {
                    info!(%source, "closing idle producer");
                    break;
                }
            },
            None => next_line.await,
        };
        let n = match read {
            Ok(n) => n,
            Err(e) => {
                // Keep what was already decoded from this producer.
                pipeline.submit(batch).await;
                return Err(SpanlaneError::Io(format!("producer read failed: {e}")));
            }
        };
        if n == 0 {
            break;
        }
        line_no += 1;

        let frame = std::str::from_utf8(&buf)
            .map_err(|e| SpanlaneError::Parse(format!("line is not valid utf-8: {e}")))
            .and_then(decode_frame);
        match frame {
            Ok(Some(Frame::Events(events))) => {
                total += events.len();
                batch.extend(events);
            }
            Ok(Some(Frame::Handshake { source: name })) => {
                info!(source = %name, "producer connected");
                source = name;
            }
            Ok(None) => {}
            Err(e) => warn!(%source, line = line_no, error = %e, "skipping undecodable line"),
        }

        // Flush once the socket has nothing more buffered so interactive producers see their events promptly.
        if batch.len() >= MAX_BATCH || (!batch.is_empty() && reader.buffer().is_empty()) {
            pipeline.submit(std::mem::take(&mut batch)).await;
        }
    }

    pipeline.submit(batch).await;
    Ok(total)
}
