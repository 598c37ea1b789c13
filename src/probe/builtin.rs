//! Built-in TCP prober.
//!
//! Speaks the classic line-oriented speedtest exchange (`PING`, `DOWNLOAD`,
//! `UPLOAD`) against a configured server list. Discovery ranks
//! the configured servers by TCP connect time through the bound dialer;
//! latency comes from repeated `PING` round trips, throughput from timed bulk
//! transfers.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::prober::{LatencyStats, Prober};
use crate::dialer::BoundDialer;
use crate::error::{Error, Result};
use crate::types::ServerCandidate;

/// One configured measurement server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeServer {
    /// Endpoint in `host:port` form.
    pub host: String,

    /// Display name; defaults to the host.
    #[serde(default)]
    pub name: String,

    /// Opaque identifier; defaults to the host.
    #[serde(default)]
    pub id: String,

    /// Country or location hint.
    #[serde(default)]
    pub country: String,
}

/// Built-in prober configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpProberConfig {
    /// Candidate servers, ranked at discovery time.
    #[serde(default)]
    pub servers: Vec<ProbeServer>,

    /// Number of PING round trips per latency measurement.
    #[serde(default = "default_ping_samples")]
    pub ping_samples: usize,

    /// Wall-clock window for each throughput direction.
    #[serde(default = "default_transfer_duration", with = "humantime_serde")]
    pub transfer_duration: Duration,

    /// Bytes requested per DOWNLOAD/UPLOAD block.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Timeout for any single socket operation.
    #[serde(default = "default_io_timeout", with = "humantime_serde")]
    pub io_timeout: Duration,
}

fn default_ping_samples() -> usize {
    8
}
fn default_transfer_duration() -> Duration {
    Duration::from_secs(8)
}
fn default_chunk_size() -> usize {
    256 * 1024
}
fn default_io_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for TcpProberConfig {
    fn default() -> Self {
        Self {
            servers: vec![],
            ping_samples: default_ping_samples(),
            transfer_duration: default_transfer_duration(),
            chunk_size: default_chunk_size(),
            io_timeout: default_io_timeout(),
        }
    }
}

/// TCP prober over a configured server list.
pub struct TcpProber {
    config: TcpProberConfig,
}

type Halves = (BufReader<OwnedReadHalf>, OwnedWriteHalf);

impl TcpProber {
    pub fn new(config: TcpProberConfig) -> Self {
        Self { config }
    }

    async fn resolve(&self, host: &str) -> Result<SocketAddr> {
        let mut addrs = timeout(self.config.io_timeout, tokio::net::lookup_host(host))
            .await
            .map_err(|_| Error::Measurement(format!("resolve {host}: timeout")))?
            .map_err(|e| Error::Measurement(format!("resolve {host}: {e}")))?;

        addrs
            .next()
            .ok_or_else(|| Error::Measurement(format!("resolve {host}: no addresses")))
    }

    async fn connect(&self, server: &ServerCandidate, dialer: &BoundDialer) -> Result<Halves> {
        let addr = self.resolve(&server.host).await?;
        let stream = dialer.dial_tcp(addr).await?;
        let (read, write) = stream.into_split();
        Ok((BufReader::new(read), write))
    }

    async fn exchange_line(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        request: &str,
    ) -> std::io::Result<String> {
        writer.write_all(request.as_bytes()).await?;
        let mut response = String::new();
        reader.read_line(&mut response).await?;
        Ok(response)
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn discover_servers(&self, dialer: &BoundDialer) -> Result<Vec<ServerCandidate>> {
        let mut candidates = Vec::with_capacity(self.config.servers.len());

        for server in &self.config.servers {
            let addr = match self.resolve(&server.host).await {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(host = %server.host, error = %e, "skipping unresolvable server");
                    continue;
                }
            };

            let start = Instant::now();
            match dialer.dial_tcp(addr).await {
                Ok(_stream) => {
                    let rank_ms = start.elapsed().as_secs_f64() * 1000.0;
                    debug!(host = %server.host, rank_ms, "server reachable");
                    candidates.push(ServerCandidate {
                        id: if server.id.is_empty() {
                            server.host.clone()
                        } else {
                            server.id.clone()
                        },
                        name: if server.name.is_empty() {
                            server.host.clone()
                        } else {
                            server.name.clone()
                        },
                        host: server.host.clone(),
                        country: server.country.clone(),
                        rank_ms,
                    });
                }
                Err(e) => {
                    warn!(host = %server.host, error = %e, "skipping unreachable server");
                }
            }
        }

        candidates.sort_by(|a, b| a.rank_ms.total_cmp(&b.rank_ms));
        Ok(candidates)
    }

    async fn measure_latency(
        &self,
        server: &ServerCandidate,
        dialer: &BoundDialer,
    ) -> Result<LatencyStats> {
        let (mut reader, mut writer) = self.connect(server, dialer).await?;

        let samples = self.config.ping_samples.max(1);
        let mut rtts: Vec<f64> = Vec::with_capacity(samples);
        let mut lost = 0usize;

        for _ in 0..samples {
            let request = format!("PING {}\n", Utc::now().timestamp_millis());
            let start = Instant::now();

            match timeout(
                self.config.io_timeout,
                self.exchange_line(&mut reader, &mut writer, &request),
            )
            .await
            {
                Ok(Ok(response)) if response.starts_with("PONG") => {
                    rtts.push(start.elapsed().as_secs_f64() * 1000.0);
                }
                _ => lost += 1,
            }
        }

        if rtts.is_empty() {
            return Err(Error::Measurement(format!(
                "all {samples} ping samples lost to {}",
                server.host
            )));
        }

        let latency_ms = rtts.iter().sum::<f64>() / rtts.len() as f64;
        let jitter_ms = if rtts.len() < 2 {
            0.0
        } else {
            rtts.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (rtts.len() - 1) as f64
        };
        let loss_pct = lost as f64 / samples as f64 * 100.0;

        Ok(LatencyStats {
            latency_ms,
            jitter_ms,
            loss_pct,
        })
    }

    async fn measure_download(
        &self,
        server: &ServerCandidate,
        dialer: &BoundDialer,
    ) -> Result<f64> {
        let (mut reader, mut writer) = self.connect(server, dialer).await?;

        let window = self.config.transfer_duration;
        let chunk = self.config.chunk_size.max(1024);
        let start = Instant::now();
        let mut total: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];

        'outer: while start.elapsed() < window {
            let request = format!("DOWNLOAD {chunk}\n");
            timeout(self.config.io_timeout, writer.write_all(request.as_bytes()))
                .await
                .map_err(|_| Error::Measurement("download request timeout".into()))?
                .map_err(|e| Error::Measurement(format!("download request: {e}")))?;

            let mut remaining = chunk;
            while remaining > 0 {
                let want = remaining.min(buf.len());
                let n = timeout(self.config.io_timeout, reader.read(&mut buf[..want]))
                    .await
                    .map_err(|_| Error::Measurement("download read timeout".into()))?
                    .map_err(|e| Error::Measurement(format!("download read: {e}")))?;
                if n == 0 {
                    return Err(Error::Measurement("server closed during download".into()));
                }
                remaining -= n;
                total += n as u64;
                if start.elapsed() >= window {
                    break 'outer;
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        if elapsed <= 0.0 || total == 0 {
            return Err(Error::Measurement("download transferred no data".into()));
        }
        Ok(total as f64 * 8.0 / elapsed / 1_000_000.0)
    }

    async fn measure_upload(&self, server: &ServerCandidate, dialer: &BoundDialer) -> Result<f64> {
        let (mut reader, mut writer) = self.connect(server, dialer).await?;

        let window = self.config.transfer_duration;
        let chunk = self.config.chunk_size.max(1024);
        let start = Instant::now();
        let mut total: u64 = 0;

        // Block layout: header line plus payload, `chunk` bytes in total,
        // payload newline-terminated as the exchange requires.
        let header = format!("UPLOAD {chunk} 0\n");
        let mut payload = vec![0x55u8; chunk - header.len()];
        if let Some(last) = payload.last_mut() {
            *last = b'\n';
        }

        while start.elapsed() < window {
            let write_block = async {
                writer.write_all(header.as_bytes()).await?;
                writer.write_all(&payload).await?;
                let mut response = String::new();
                reader.read_line(&mut response).await?;
                std::io::Result::Ok(response)
            };

            let response = timeout(self.config.io_timeout, write_block)
                .await
                .map_err(|_| Error::Measurement("upload timeout".into()))?
                .map_err(|e| Error::Measurement(format!("upload: {e}")))?;

            if !response.starts_with("OK") {
                return Err(Error::Measurement(format!(
                    "unexpected upload response: {}",
                    response.trim_end()
                )));
            }
            total += chunk as u64;
        }

        let elapsed = start.elapsed().as_secs_f64();
        if elapsed <= 0.0 || total == 0 {
            return Err(Error::Measurement("upload transferred no data".into()));
        }
        Ok(total as f64 * 8.0 / elapsed / 1_000_000.0)
    }
}
