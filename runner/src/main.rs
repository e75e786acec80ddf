//! In-pod helper implementing the benchmark rendezvous protocol.
//!
//! Runs as an init container in benchmark pods: `wait-hosts` gates startup on
//! the peer roster being resolvable, `wait-ports` gates it on the peers
//! actually listening.
#![deny(missing_docs)]

mod wait_hosts;
mod wait_ports;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Available Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait until every expected peer has a record in the hosts file
    WaitHosts(wait_hosts::Opts),
    /// Wait until every expected peer answers on a TCP port
    WaitPorts(wait_ports::Opts),
}

#[tokio::main]
async fn main() -> Result<()> {
    perftest_common::telemetry::init_tracing(None).await?;
    let args = Cli::parse();
    info!(command = ?args.command, "starting runner");
    match args.command {
        Command::WaitHosts(opts) => match wait_hosts::wait_hosts(opts).await? {
            wait_hosts::Outcome::Ready => Ok(()),
            wait_hosts::Outcome::RestartRequired => {
                // A non-zero exit makes the kubelet restart this container,
                // which remounts /etc/hosts with the populated content
                std::process::exit(1)
            }
        },
        Command::WaitPorts(opts) => wait_ports::wait_ports(opts).await,
    }
}
