//! TCP probing of peer ports before the main container starts.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

/// Options for the wait-ports subcommand.
#[derive(Args, Debug)]
pub struct Opts {
    /// File listing the DNS names to probe, one per line.
    #[arg(long)]
    pub expected_file: PathBuf,

    /// The TCP port every peer must answer on.
    #[arg(long)]
    pub port: u16,

    /// Seconds between probe rounds.
    #[arg(long, default_value_t = 2)]
    pub poll_interval: u64,

    /// Overall timeout in seconds.
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
}

/// Block until every expected peer accepts a TCP connection on the port.
pub async fn wait_ports(opts: Opts) -> Result<()> {
    let expected = crate::wait_hosts::read_expected(&opts.expected_file)?;
    probe_all(
        &expected,
        opts.port,
        Duration::from_secs(opts.poll_interval),
        Duration::from_secs(opts.timeout),
    )
    .await
}

async fn probe_all(
    hosts: &[String],
    port: u16,
    poll_interval: Duration,
    overall_timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + overall_timeout;
    let mut remaining: Vec<&String> = hosts.iter().collect();
    while !remaining.is_empty() {
        let mut unreachable = Vec::new();
        for host in remaining {
            if probe(host, port).await {
                debug!(%host, port, "port open");
            } else {
                unreachable.push(host);
            }
        }
        if unreachable.is_empty() {
            break;
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for port {port} on {unreachable:?}");
        }
        debug!(?unreachable, port, "waiting for ports");
        sleep(poll_interval).await;
        remaining = unreachable;
    }
    info!(port, "all peers listening");
    Ok(())
}

// A peer is reachable when the TCP connect succeeds within a short window.
async fn probe(host: &str, port: u16) -> bool {
    matches!(
        timeout(Duration::from_secs(1), TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
