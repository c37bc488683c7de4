use anyhow::Context;
use spanlane_core::config::Config;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::protocol::{ApiRequest, ApiResponse};

pub struct QueryClient {
    stream: BufReader<TcpStream>,
}

impl QueryClient {
    pub async fn connect(addr: Option<String>) -> anyhow::Result<Self> {
        let addr = addr
            .or_else(|| std::env::var("SPANLANE_QUERY_ADDR").ok())
            .unwrap_or_else(|| Config::default().query_addr);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("connect query server TCP {addr}"))?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    pub async fn request(&mut self, req: ApiRequest) -> anyhow::Result<ApiResponse> {
        let payload = serde_json::to_vec(&req)?;
        self.stream.get_mut().write_all(&payload).await?;
        self.stream.get_mut().write_all(b"\n").await?;
        self.stream.get_mut().flush().await?;

        let mut line = String::new();
        self.stream.read_line(&mut line).await?;
        serde_json::from_str(&line).context("decode query response")
    }
}
