//! Operator turning declarative benchmark resources into gang-scheduled jobs.
#![deny(missing_docs)]
use std::process::ExitCode;
use std::sync::Arc;

use clap::{command, Parser, Subcommand};
use kube::Client;
use perftest_common::telemetry;
use tracing::{error, info};

use perftest_operator::context::Context;
use perftest_operator::kinds;
use perftest_operator::settings::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "OPERATOR_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

/// Available Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the operator
    Daemon {
        /// Watch a single namespace instead of all namespaces.
        #[arg(long, env = "OPERATOR_NAMESPACE")]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(err) = tracing_log::LogTracer::init() {
        eprintln!("failed to initialise logging: {err}");
        return ExitCode::from(1);
    }
    if let Err(err) = telemetry::init_tracing(args.otlp_endpoint.clone()).await {
        eprintln!("failed to initialise telemetry: {err}");
        return ExitCode::from(1);
    }

    let settings = match Settings::load() {
        Ok(settings) => Arc::new(settings),
        Err(err) => {
            error!(?err, "failed to load settings");
            return ExitCode::from(1);
        }
    };
    let k_client = match Client::try_default().await {
        Ok(client) => client,
        Err(err) => {
            error!(?err, "failed to create Kubernetes client");
            return ExitCode::from(1);
        }
    };

    match args.command {
        Command::Daemon { namespace } => {
            info!(?namespace, "starting operator");
            let cx = Arc::new(Context::new(k_client, settings));
            tokio::select! {
                _ = kinds::run_all(cx, namespace) => {
                    // The controllers only terminate when their watch streams
                    // hit an unrecoverable API error
                    error!("controllers terminated unexpectedly");
                    ExitCode::from(2)
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    ExitCode::from(0)
                }
            }
        }
    }
}
