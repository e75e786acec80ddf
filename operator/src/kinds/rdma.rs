//! The RDMA bandwidth and latency benchmarks, built on the perftest suite.
use k8s_openapi::api::core::v1::Container;
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::benchmark::{
    affinity, discovery, job, Benchmark, BenchmarkIdentity, BenchmarkStatus, ChildResource,
    CommonSpec, ParseError, RenderError,
};
use crate::labels::identity_labels;
use crate::settings::Settings;
use crate::volcano;

const SERVER: &str = "server";
const CLIENT: &str = "client";
const PERFTEST_PORT: i32 = 18515;

/// Enumeration of possible modes for the RDMA benchmarks.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RDMAMode {
    /// RDMA read operations.
    #[default]
    Read,
    /// RDMA write operations.
    Write,
}

/// Defines the parameters for the RDMA bandwidth benchmark.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "perftest.stackhpc.com",
    version = "v1alpha1",
    kind = "RDMABandwidth",
    plural = "rdmabandwidths",
    status = "RDMABandwidthStatus",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Finished","type":"date","jsonPath":".status.finishedAt"}"#,
    printcolumn = r#"{"name":"Peak Bandwidth","type":"string","jsonPath":".status.summary"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RDMABandwidthSpec {
    /// Fields shared by all benchmark kinds.
    #[serde(flatten)]
    pub common: CommonSpec,
    /// The mode for the test.
    #[serde(default)]
    pub mode: RDMAMode,
    /// The number of iterations for each message size.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// The number of queue pairs to use.
    #[serde(default = "default_qps")]
    pub qps: u32,
    /// Extra arguments for the perftest command.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Defines the parameters for the RDMA latency benchmark.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "perftest.stackhpc.com",
    version = "v1alpha1",
    kind = "RDMALatency",
    plural = "rdmalatencies",
    status = "RDMALatencyStatus",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Finished","type":"date","jsonPath":".status.finishedAt"}"#,
    printcolumn = r#"{"name":"Min Avg Latency","type":"string","jsonPath":".status.summary"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RDMALatencySpec {
    /// Fields shared by all benchmark kinds.
    #[serde(flatten)]
    pub common: CommonSpec,
    /// The mode for the test.
    #[serde(default)]
    pub mode: RDMAMode,
    /// The number of iterations for each message size.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Extra arguments for the perftest command.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_iterations() -> u32 {
    1000
}

fn default_qps() -> u32 {
    1
}

/// One RDMA bandwidth measurement, for a single message size.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RDMABandwidthRecord {
    /// The message size in bytes.
    pub bytes: u64,
    /// The number of iterations.
    pub iterations: u64,
    /// The peak bandwidth in MB/sec.
    pub peak_bandwidth: f64,
    /// The average bandwidth in MB/sec.
    pub average_bandwidth: f64,
    /// The message rate in Mpps.
    pub message_rate: f64,
}

/// The result of an RDMA bandwidth benchmark.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RDMABandwidthResult {
    /// One record per message size.
    pub records: Vec<RDMABandwidthRecord>,
}

/// One RDMA latency measurement, for a single message size.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RDMALatencyRecord {
    /// The message size in bytes.
    pub bytes: u64,
    /// The number of iterations.
    pub iterations: u64,
    /// The minimum latency in usec.
    pub minimum: f64,
    /// The maximum latency in usec.
    pub maximum: f64,
    /// The typical latency in usec.
    pub typical: f64,
    /// The average latency in usec.
    pub average: f64,
    /// The standard deviation of the latency in usec.
    pub stdev: f64,
    /// The 99th percentile latency in usec.
    pub percentile_99: f64,
    /// The 99.9th percentile latency in usec.
    pub percentile_99_9: f64,
}

/// The result of an RDMA latency benchmark.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RDMALatencyResult {
    /// One record per message size.
    pub records: Vec<RDMALatencyRecord>,
}

/// Status of an RDMA bandwidth benchmark.
pub type RDMABandwidthStatus = BenchmarkStatus<RDMABandwidthResult>;

/// Status of an RDMA latency benchmark.
pub type RDMALatencyStatus = BenchmarkStatus<RDMALatencyResult>;

// The perftest binaries are named ib_<mode>_<flavour>, e.g. ib_read_lat.
fn perftest_binary(mode: RDMAMode, flavour: &str) -> String {
    let mode = match mode {
        RDMAMode::Read => "read",
        RDMAMode::Write => "write",
    };
    format!("ib_{mode}_{flavour}")
}

// Render the server/client pair shared by both RDMA kinds.
#[allow(clippy::too_many_arguments)]
fn render_rdma(
    settings: &Settings,
    id: &BenchmarkIdentity<'_>,
    common: &CommonSpec,
    priority_class_name: &str,
    binary: String,
    mut args: Vec<String>,
    extra_args: &[String],
) -> Result<Vec<ChildResource>, RenderError> {
    common.validate()?;
    let image = common.image(settings, "perftest");
    let pull_policy = common.image_pull_policy(settings);
    let tasks = [(SERVER, 1), (CLIENT, 1)];
    args.extend(extra_args.iter().cloned());

    let mut server_command = vec![binary.clone()];
    server_command.extend(args.iter().cloned());

    let mut client_command = vec![binary];
    client_command.extend(args.iter().cloned());
    client_command.push(discovery::dns_name(id.name, SERVER, 0));

    let server = volcano::TaskSpec {
        name: SERVER.to_owned(),
        replicas: 1,
        policies: None,
        template: job::task_template(
            settings,
            id,
            common,
            job::TaskPod {
                component: SERVER.to_owned(),
                init_containers: vec![],
                containers: vec![Container {
                    name: SERVER.to_owned(),
                    image: Some(image.clone()),
                    image_pull_policy: Some(pull_policy.clone()),
                    command: Some(server_command),
                    resources: common.resources.clone(),
                    ..Default::default()
                }],
                volumes: vec![],
                affinity: affinity::exclusive_affinity(settings),
                topology_spread_constraints: vec![],
            },
        ),
    };

    let client = volcano::TaskSpec {
        name: CLIENT.to_owned(),
        replicas: 1,
        policies: Some(job::complete_job_when_done()),
        template: job::task_template(
            settings,
            id,
            common,
            job::TaskPod {
                component: CLIENT.to_owned(),
                init_containers: vec![
                    discovery::wait_for_hosts_container(
                        settings,
                        &discovery::task_hosts_key(SERVER),
                    ),
                    discovery::wait_for_ports_container(
                        settings,
                        &discovery::task_hosts_key(SERVER),
                        PERFTEST_PORT,
                    ),
                ],
                containers: vec![Container {
                    name: CLIENT.to_owned(),
                    image: Some(image),
                    image_pull_policy: Some(pull_policy),
                    command: Some(client_command),
                    resources: common.resources.clone(),
                    ..Default::default()
                }],
                volumes: vec![discovery::discovery_volume(id.name)],
                affinity: affinity::exclusive_affinity(settings),
                topology_spread_constraints: vec![],
            },
        ),
    };

    let mut gang = volcano::Job::new(
        id.name,
        job::gang_job(settings, priority_class_name, vec![server, client]),
    );
    gang.metadata.labels = Some(identity_labels(settings, id.kind, id.namespace, id.name));

    Ok(vec![
        ChildResource::ConfigMap(discovery::config_map(settings, id, &tasks)),
        ChildResource::Service(discovery::headless_service(settings, id)),
        ChildResource::Job(gang),
    ])
}

impl Benchmark for RDMABandwidth {
    type BenchResult = RDMABandwidthResult;

    const KIND: &'static str = "RDMABandwidth";
    const RESULT_COMPONENT: &'static str = CLIENT;

    fn common(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn status(&self) -> Option<&RDMABandwidthStatus> {
        self.status.as_ref()
    }

    fn render(
        &self,
        settings: &Settings,
        priority_class_name: &str,
    ) -> Result<Vec<ChildResource>, RenderError> {
        render_rdma(
            settings,
            &self.identity(),
            &self.spec.common,
            priority_class_name,
            perftest_binary(self.spec.mode, "bw"),
            vec![
                "--all".to_owned(),
                "-n".to_owned(),
                self.spec.iterations.to_string(),
                "-q".to_owned(),
                self.spec.qps.to_string(),
                "-p".to_owned(),
                PERFTEST_PORT.to_string(),
            ],
            &self.spec.extra_args,
        )
    }

    fn parse(log: &str) -> Result<(RDMABandwidthResult, String), ParseError> {
        let record = Regex::new(
            r"(?x)^\s*
              (\d+)\s+          # bytes
              (\d+)\s+          # iterations
              (\d+(?:\.\d+)?)\s+  # peak bandwidth
              (\d+(?:\.\d+)?)\s+  # average bandwidth
              (\d+(?:\.\d+)?)     # message rate
            ",
        )
        .expect("static regex");
        let mut records = Vec::new();
        let mut lines = log.lines().skip_while(|l| !l.trim_start().starts_with("#bytes"));
        // Skip the header itself
        if lines.next().is_none() {
            return Err(ParseError::new("no results table found in client log"));
        }
        for line in lines {
            let Some(caps) = record.captures(line) else {
                continue;
            };
            records.push(RDMABandwidthRecord {
                bytes: caps[1].parse().expect("digits parse as u64"),
                iterations: caps[2].parse().expect("digits parse as u64"),
                peak_bandwidth: caps[3].parse().expect("number parses as f64"),
                average_bandwidth: caps[4].parse().expect("number parses as f64"),
                message_rate: caps[5].parse().expect("number parses as f64"),
            });
        }
        if records.is_empty() {
            return Err(ParseError::new("no measurements found in results table"));
        }
        let peak = records
            .iter()
            .map(|r| r.average_bandwidth)
            .fold(f64::MIN, f64::max);
        let summary = format!("{peak} MB/sec");
        Ok((RDMABandwidthResult { records }, summary))
    }
}

impl Benchmark for RDMALatency {
    type BenchResult = RDMALatencyResult;

    const KIND: &'static str = "RDMALatency";
    const RESULT_COMPONENT: &'static str = CLIENT;

    fn common(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn status(&self) -> Option<&RDMALatencyStatus> {
        self.status.as_ref()
    }

    fn render(
        &self,
        settings: &Settings,
        priority_class_name: &str,
    ) -> Result<Vec<ChildResource>, RenderError> {
        render_rdma(
            settings,
            &self.identity(),
            &self.spec.common,
            priority_class_name,
            perftest_binary(self.spec.mode, "lat"),
            vec![
                "--all".to_owned(),
                "-n".to_owned(),
                self.spec.iterations.to_string(),
                "-p".to_owned(),
                PERFTEST_PORT.to_string(),
            ],
            &self.spec.extra_args,
        )
    }

    fn parse(log: &str) -> Result<(RDMALatencyResult, String), ParseError> {
        let record = Regex::new(
            r"(?x)^\s*
              (\d+)\s+            # bytes
              (\d+)\s+            # iterations
              (\d+(?:\.\d+)?)\s+  # minimum
              (\d+(?:\.\d+)?)\s+  # maximum
              (\d+(?:\.\d+)?)\s+  # typical
              (\d+(?:\.\d+)?)\s+  # average
              (\d+(?:\.\d+)?)\s+  # stdev
              (\d+(?:\.\d+)?)\s+  # 99th percentile
              (\d+(?:\.\d+)?)     # 99.9th percentile
            ",
        )
        .expect("static regex");
        let mut records = Vec::new();
        let mut lines = log.lines().skip_while(|l| !l.trim_start().starts_with("#bytes"));
        if lines.next().is_none() {
            return Err(ParseError::new("no results table found in client log"));
        }
        for line in lines {
            let Some(caps) = record.captures(line) else {
                continue;
            };
            records.push(RDMALatencyRecord {
                bytes: caps[1].parse().expect("digits parse as u64"),
                iterations: caps[2].parse().expect("digits parse as u64"),
                minimum: caps[3].parse().expect("number parses as f64"),
                maximum: caps[4].parse().expect("number parses as f64"),
                typical: caps[5].parse().expect("number parses as f64"),
                average: caps[6].parse().expect("number parses as f64"),
                stdev: caps[7].parse().expect("number parses as f64"),
                percentile_99: caps[8].parse().expect("number parses as f64"),
                percentile_99_9: caps[9].parse().expect("number parses as f64"),
            });
        }
        if records.is_empty() {
            return Err(ParseError::new("no measurements found in results table"));
        }
        let best = records
            .iter()
            .map(|r| r.average)
            .fold(f64::MAX, f64::min);
        let summary = format!("{best} usec");
        Ok((RDMALatencyResult { records }, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bandwidth_table() {
        let log = include_str!("testdata/rdma_bandwidth.log");
        let (result, summary) = RDMABandwidth::parse(log).unwrap();
        assert_eq!(result.records.len(), 5);
        assert_eq!(result.records[0].bytes, 2);
        assert_eq!(result.records[0].iterations, 1000);
        assert_eq!(result.records[4].average_bandwidth, 11389.17);
        assert_eq!(summary, "11389.17 MB/sec");
    }

    #[test]
    fn parse_latency_table() {
        let log = include_str!("testdata/rdma_latency.log");
        let (result, summary) = RDMALatency::parse(log).unwrap();
        assert_eq!(result.records.len(), 4);
        assert_eq!(result.records[0].bytes, 2);
        assert_eq!(result.records[0].average, 1.93);
        assert_eq!(result.records[0].percentile_99_9, 2.84);
        assert_eq!(summary, "1.93 usec");
    }

    #[test]
    fn parse_rejects_log_without_table() {
        assert!(RDMABandwidth::parse("Couldn't connect to 10.0.0.1\n").is_err());
        assert!(RDMALatency::parse("ib_read_lat: command not found\n").is_err());
    }

    #[test]
    fn client_runs_the_mode_binary_against_the_server() {
        let settings = Settings::default();
        let mut bench = RDMABandwidth::new(
            "bench",
            RDMABandwidthSpec {
                mode: RDMAMode::Write,
                iterations: 500,
                qps: 2,
                ..Default::default()
            },
        );
        bench.metadata.namespace = Some("default".to_owned());
        let children = bench.render(&settings, "pc").unwrap();
        let ChildResource::Job(job) = &children[2] else {
            panic!("expected a job");
        };
        let client = &job.spec.tasks[1].template.spec.as_ref().unwrap().containers[0];
        let command = client.command.as_ref().unwrap();
        assert_eq!(command[0], "ib_write_bw");
        assert!(command.contains(&"500".to_owned()));
        assert!(command.contains(&"-q".to_owned()));
        assert_eq!(command.last().unwrap(), "bench-server-0.bench");
        let server = &job.spec.tasks[0].template.spec.as_ref().unwrap().containers[0];
        assert_eq!(server.command.as_ref().unwrap()[0], "ib_write_bw");
    }

    #[test]
    fn latency_renders_the_lat_binary() {
        let settings = Settings::default();
        let mut bench = RDMALatency::new("bench", RDMALatencySpec::default());
        bench.metadata.namespace = Some("default".to_owned());
        let children = bench.render(&settings, "pc").unwrap();
        let ChildResource::Job(job) = &children[2] else {
            panic!("expected a job");
        };
        let client = &job.spec.tasks[1].template.spec.as_ref().unwrap().containers[0];
        assert_eq!(client.command.as_ref().unwrap()[0], "ib_read_lat");
    }
}
