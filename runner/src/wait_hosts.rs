//! The pod-side half of the discovery protocol.
//!
//! The controller mounts the discovery config map's `hosts` key over
//! `/etc/hosts` and the whole map at a config directory. The kubelet snapshots
//! config map mounts, so `/etc/hosts` can be an empty snapshot taken before
//! the controller populated the table. The two-phase dance:
//!
//! 1. `/etc/hosts` empty: watch the live `hosts` key in the config directory
//!    until it carries a record for every expected peer, then exit non-zero.
//!    The kubelet restarts the container and remounts `/etc/hosts` with the
//!    populated content.
//! 2. `/etc/hosts` non-empty: assert every expected peer has a record. A stale
//!    file is a transient error, the restart picks up a fresh snapshot.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Options for the wait-hosts subcommand.
#[derive(Args, Debug)]
pub struct Opts {
    /// The hosts file mounted from the discovery config map.
    #[arg(long, default_value = "/etc/hosts")]
    pub etc_hosts: PathBuf,

    /// The live hosts key inside the mounted discovery directory.
    #[arg(long)]
    pub discovery_hosts: PathBuf,

    /// File listing the DNS names that must have records, one per line.
    #[arg(long)]
    pub expected_file: PathBuf,

    /// Seconds between polls of the discovery directory.
    #[arg(long, default_value_t = 2)]
    pub poll_interval: u64,

    /// Overall timeout in seconds.
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
}

/// How the caller should proceed after a successful wait.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every peer resolves through the mounted hosts file.
    Ready,
    /// The hosts table is populated but the mount predates it; exit non-zero
    /// so the kubelet restarts the container and refreshes the mount.
    RestartRequired,
}

/// Run the wait-hosts protocol with the configured paths and timings.
pub async fn wait_hosts(opts: Opts) -> Result<Outcome> {
    run(
        &opts.etc_hosts,
        &opts.discovery_hosts,
        &opts.expected_file,
        Duration::from_secs(opts.poll_interval),
        Duration::from_secs(opts.timeout),
    )
    .await
}

async fn run(
    etc_hosts: &Path,
    discovery_hosts: &Path,
    expected_file: &Path,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<Outcome> {
    let expected = read_expected(expected_file)?;
    if expected.is_empty() {
        info!("no peers expected, nothing to wait for");
        return Ok(Outcome::Ready);
    }

    let mounted = std::fs::read_to_string(etc_hosts).unwrap_or_default();
    if mounted.trim().is_empty() {
        // Mounted before the table was populated, watch the live key
        wait_for_records(discovery_hosts, &expected, poll_interval, timeout).await?;
        info!("hosts table populated, restart required to refresh the mount");
        return Ok(Outcome::RestartRequired);
    }

    let missing = missing_records(&mounted, &expected);
    if missing.is_empty() {
        info!("all peers resolvable");
        Ok(Outcome::Ready)
    } else {
        // Stale snapshot, the restart takes a fresh one
        bail!("mounted hosts file is missing records for {missing:?}")
    }
}

async fn wait_for_records(
    path: &Path,
    expected: &[String],
    poll_interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let hosts = std::fs::read_to_string(path).unwrap_or_default();
        let missing = missing_records(&hosts, expected);
        if missing.is_empty() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for hosts records for {missing:?}");
        }
        debug!(?missing, "waiting for hosts records");
        sleep(poll_interval).await;
    }
}

/// Read the expected DNS names, one per line, skipping blanks.
pub(crate) fn read_expected(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

// A peer has a record when any hosts line lists it as one of its names.
fn missing_records(hosts: &str, expected: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|name| {
            !hosts
                .lines()
                .any(|line| line.split_whitespace().skip(1).any(|field| field == *name))
        })
        .cloned()
        .collect()
}
