mod client;
mod output;
mod protocol;
mod query_server;
mod telemetry;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use spanlane_core::SpanId;
use spanlane_core::config::Config;
use spanlane_core::time::parse_timestamp;
use spanlane_ingest::pipeline::{Pipeline, PipelineConfig, shared};
use spanlane_ingest::replay::replay_file;
use spanlane_model::{LaneSnapshot, Trace, TraceOptions};

use crate::client::QueryClient;
use crate::output::{
    print_lane_count_human, print_lanes_human, print_span_human, print_status_human,
};
use crate::protocol::{ApiRequest, ApiResponse};
use crate::telemetry::{init_cli_tracing, init_run_tracing};

#[derive(Parser, Debug)]
#[command(name = "spanlane")]
#[command(about = "Live trace timeline: span tree, lanes and visibility queries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "Query server address")]
    addr: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the event listener and query server")]
    Run {
        #[arg(long)]
        listen_addr: Option<String>,
        #[arg(long)]
        query_addr: Option<String>,
    },
    #[command(about = "Load a trace file offline and print its lane layout")]
    Replay {
        file: PathBuf,
        #[arg(long, help = "Range start: nanoseconds or a duration such as 1.5ms")]
        start: Option<String>,
        #[arg(long, help = "Range end (exclusive); defaults to the end of the trace")]
        end: Option<String>,
        #[arg(
            long = "collapse",
            value_parser = parse_span_id,
            help = "Collapse these spans before printing"
        )]
        collapse: Vec<SpanId>,
    },
    #[command(about = "Show model counters")]
    Status,
    #[command(about = "List visible spans by lane for a time range")]
    Lanes {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    #[command(about = "Inspect one span")]
    Span {
        #[arg(value_parser = parse_span_id)]
        id: SpanId,
    },
    #[command(about = "Hide a span's descendants")]
    Collapse {
        #[arg(value_parser = parse_span_id)]
        id: SpanId,
    },
    #[command(about = "Show a collapsed span's descendants again")]
    Expand {
        #[arg(value_parser = parse_span_id)]
        id: SpanId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            listen_addr,
            query_addr,
        } => run_server(listen_addr, query_addr).await,
        Commands::Replay {
            file,
            start,
            end,
            collapse,
        } => {
            init_cli_tracing();
            replay(file, start, end, collapse, cli.json)
        }
        Commands::Status => {
            init_cli_tracing();
            query(cli.addr, ApiRequest::Status, cli.json).await
        }
        Commands::Lanes { start, end } => {
            init_cli_tracing();
            let req = ApiRequest::Lanes {
                start: parse_bound(start)?,
                end: parse_bound(end)?,
            };
            query(cli.addr, req, cli.json).await
        }
        Commands::Span { id } => {
            init_cli_tracing();
            query(cli.addr, ApiRequest::Span { id }, cli.json).await
        }
        Commands::Collapse { id } => {
            init_cli_tracing();
            query(cli.addr, ApiRequest::Collapse { id }, cli.json).await
        }
        Commands::Expand { id } => {
            init_cli_tracing();
            query(cli.addr, ApiRequest::Expand { id }, cli.json).await
        }
    }
}

async fn query(addr: Option<String>, req: ApiRequest, json: bool) -> anyhow::Result<()> {
    let mut client = QueryClient::connect(addr).await?;
    let response = client.request(req).await?;
    print_response(response, json)
}

fn parse_span_id(raw: &str) -> Result<SpanId, String> {
    SpanId::parse(raw).map_err(|e| e.to_string())
}

fn parse_bound(raw: Option<String>) -> anyhow::Result<Option<u64>> {
    raw.map(|v| parse_timestamp(&v))
        .transpose()
        .context("parse range bound")
}

fn replay(
    file: PathBuf,
    start: Option<String>,
    end: Option<String>,
    collapse: Vec<SpanId>,
    json: bool,
) -> anyhow::Result<()> {
    let cfg = Config::load().context("load config")?;
    let report =
        replay_file(&file).with_context(|| format!("replay {}", file.display()))?;

    let mut trace = Trace::with_options(TraceOptions {
        shrink_lanes_on_collapse: cfg.shrink_lanes_on_collapse,
    });
    report.apply_to(&mut trace);
    for id in collapse {
        trace
            .collapse(id)
            .with_context(|| format!("collapse span {id}"))?;
    }

    let start = parse_bound(start)?.unwrap_or(0);
    let end = parse_bound(end)?.unwrap_or_else(|| trace.max_time().saturating_add(1));
    if end < start {
        anyhow::bail!("range end {end} is before start {start}");
    }

    print_response(
        ApiResponse::Lanes(LaneSnapshot::capture(&trace, start, end)),
        json,
    )?;
    if !json {
        println!(
            "events={} skipped_lines={} rejected={}",
            report.events.len(),
            report.skipped_lines,
            trace.rejected_events()
        );
    }
    Ok(())
}

fn print_response(response: ApiResponse, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    match response {
        ApiResponse::Status(v) => print_status_human(&v),
        ApiResponse::Lanes(v) => print_lanes_human(&v),
        ApiResponse::Span(v) => print_span_human(&v),
        ApiResponse::LaneCount { num_lanes } => print_lane_count_human(num_lanes),
        ApiResponse::Error(e) => eprintln!("error: {e}"),
    }
    Ok(())
}

async fn run_server(listen_addr: Option<String>, query_addr: Option<String>) -> anyhow::Result<()> {
    let mut cfg = Config::load().context("load config")?;
    if let Some(v) = listen_addr {
        cfg.listen_addr = v;
    }
    if let Some(v) = query_addr {
        cfg.query_addr = v;
    }

    init_run_tracing();

    eprintln!("spanlane run");
    eprintln!("  events: {}", cfg.listen_addr);
    eprintln!("  query: {}", cfg.query_addr);
    eprintln!(
        "  shrink lanes on collapse: {}",
        cfg.shrink_lanes_on_collapse
    );
    eprintln!("  tip: run `spanlane lanes` in another shell");

    let listen_addr = cfg.listen_addr.parse().context("parse listen address")?;
    let query_addr = cfg.query_addr.parse().context("parse query address")?;

    let trace = shared(Trace::with_options(TraceOptions {
        shrink_lanes_on_collapse: cfg.shrink_lanes_on_collapse,
    }));
    let pipeline = Pipeline::new(
        trace.clone(),
        PipelineConfig {
            channel_capacity: cfg.channel_capacity,
        },
    );

    let ingest_task = tokio::spawn(spanlane_ingest::server::run_event_listener(
        listen_addr,
        pipeline,
        cfg.idle_timeout,
    ));
    let query_task = tokio::spawn(query_server::run_query_server(trace, query_addr));

    tokio::select! {
        res = ingest_task => {
            res??;
        }
        res = query_task => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
