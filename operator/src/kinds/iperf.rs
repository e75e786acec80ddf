//! The iperf network bandwidth benchmark.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, ContainerPort};
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::benchmark::{
    affinity, discovery, job, Benchmark, BenchmarkStatus, ChildResource, CommonSpec, ParseError,
    RenderError,
};
use crate::labels::identity_labels;
use crate::settings::Settings;
use crate::volcano;

const SERVER: &str = "server";
const CLIENT: &str = "client";
const IPERF_PORT: i32 = 5001;

/// Enumeration of possible modes for iperf benchmarks.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum IPerfMode {
    /// The client targets the server pod directly by its DNS name.
    #[default]
    PodToPod,
    /// The client targets the benchmark's service.
    PodToService,
}

/// Defines the parameters for the iperf benchmark.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "perftest.stackhpc.com",
    version = "v1alpha1",
    kind = "IPerf",
    plural = "iperfs",
    status = "IPerfStatus",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Finished","type":"date","jsonPath":".status.finishedAt"}"#,
    printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.summary"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IPerfSpec {
    /// Fields shared by all benchmark kinds.
    #[serde(flatten)]
    pub common: CommonSpec,
    /// The mode to use.
    #[serde(default)]
    pub mode: IPerfMode,
    /// The duration of the benchmark in seconds.
    pub duration: u32,
    /// The number of parallel streams to use.
    pub streams: u32,
}

/// The result of an individual iperf stream or the stream summary.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IPerfStreamResult {
    /// The amount of data transferred in KBytes.
    pub transfer_kbytes: u64,
    /// The average bandwidth for the transfer in Kbits/sec.
    pub bandwidth_kbits: u64,
}

/// The result of an iperf benchmark.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IPerfResult {
    /// Results from the individual streams, indexed by stream ID.
    pub streams: BTreeMap<String, IPerfStreamResult>,
    /// Combined result over all the streams.
    pub sum: IPerfStreamResult,
    /// The combined bandwidth in Gbit/sec, to two decimal places.
    pub bandwidth_gbps: String,
}

/// Status of an iperf benchmark.
pub type IPerfStatus = BenchmarkStatus<IPerfResult>;

impl Benchmark for IPerf {
    type BenchResult = IPerfResult;

    const KIND: &'static str = "IPerf";
    const RESULT_COMPONENT: &'static str = CLIENT;

    fn common(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn status(&self) -> Option<&IPerfStatus> {
        self.status.as_ref()
    }

    fn render(
        &self,
        settings: &Settings,
        priority_class_name: &str,
    ) -> Result<Vec<ChildResource>, RenderError> {
        self.spec.common.validate()?;
        if self.spec.duration == 0 {
            return Err(RenderError::new("duration must be positive"));
        }
        if self.spec.streams == 0 {
            return Err(RenderError::new("streams must be positive"));
        }
        let id = self.identity();
        let image = self.spec.common.image(settings, "iperf");
        let pull_policy = self.spec.common.image_pull_policy(settings);
        let tasks = [(SERVER, 1), (CLIENT, 1)];

        let target = match self.spec.mode {
            IPerfMode::PodToPod => discovery::dns_name(id.name, SERVER, 0),
            IPerfMode::PodToService => id.name.to_owned(),
        };

        let server = volcano::TaskSpec {
            name: SERVER.to_owned(),
            replicas: 1,
            policies: None,
            template: job::task_template(
                settings,
                &id,
                &self.spec.common,
                job::TaskPod {
                    component: SERVER.to_owned(),
                    init_containers: vec![],
                    containers: vec![Container {
                        name: SERVER.to_owned(),
                        image: Some(image.clone()),
                        image_pull_policy: Some(pull_policy.clone()),
                        command: Some(vec![
                            "iperf".to_owned(),
                            "-s".to_owned(),
                            "-p".to_owned(),
                            IPERF_PORT.to_string(),
                            "-f".to_owned(),
                            "k".to_owned(),
                        ]),
                        ports: Some(vec![ContainerPort {
                            container_port: IPERF_PORT,
                            ..Default::default()
                        }]),
                        resources: self.spec.common.resources.clone(),
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
                &id,
                &self.spec.common,
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
                            IPERF_PORT,
                        ),
                    ],
                    containers: vec![Container {
                        name: CLIENT.to_owned(),
                        image: Some(image),
                        image_pull_policy: Some(pull_policy),
                        command: Some(vec![
                            "iperf".to_owned(),
                            "-c".to_owned(),
                            target,
                            "-p".to_owned(),
                            IPERF_PORT.to_string(),
                            "-t".to_owned(),
                            self.spec.duration.to_string(),
                            "-P".to_owned(),
                            self.spec.streams.to_string(),
                            "-f".to_owned(),
                            "k".to_owned(),
                        ]),
                        resources: self.spec.common.resources.clone(),
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
            ChildResource::ConfigMap(discovery::config_map(settings, &id, &tasks)),
            ChildResource::Service(discovery::headless_service(settings, &id)),
            ChildResource::Job(gang),
        ])
    }

    fn parse(log: &str) -> Result<(IPerfResult, String), ParseError> {
        let record = Regex::new(r"^\[ *([A-Za-z0-9]+)\]\s.*?(\d+) KBytes\s+(\d+) Kbits/sec")
            .expect("static regex");
        let mut streams = BTreeMap::new();
        let mut sum = None;
        for line in log.lines() {
            let Some(caps) = record.captures(line) else {
                continue;
            };
            let result = IPerfStreamResult {
                transfer_kbytes: caps[2].parse().expect("digits parse as u64"),
                bandwidth_kbits: caps[3].parse().expect("digits parse as u64"),
            };
            if &caps[1] == "SUM" {
                sum = Some(result);
                break;
            }
            streams.insert(caps[1].to_owned(), result);
        }
        // A single stream run has no [SUM] line, the one stream is the summary
        let sum = match sum {
            Some(sum) => sum,
            None if streams.len() == 1 => streams
                .values()
                .next()
                .cloned()
                .expect("one stream exists"),
            None => return Err(ParseError::new("no summary line found in client log")),
        };
        let bandwidth_gbps = format!("{:.2}", sum.bandwidth_kbits as f64 / 1e6);
        let summary = format!("{bandwidth_gbps} Gbits/sec");
        let result = IPerfResult {
            streams,
            sum,
            bandwidth_gbps,
        };
        Ok((result, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::discovery::DISCOVERY_MOUNT_PATH;

    fn benchmark(spec: IPerfSpec) -> IPerf {
        let mut iperf = IPerf::new("bench", spec);
        iperf.metadata.namespace = Some("default".to_owned());
        iperf
    }

    #[test]
    fn parse_multi_stream_log() {
        let log = include_str!("testdata/iperf_client.log");
        let (result, summary) = IPerf::parse(log).unwrap();
        assert_eq!(result.streams.len(), 4);
        assert_eq!(result.sum.bandwidth_kbits, 980000);
        assert_eq!(result.sum.transfer_kbytes, 598272);
        assert_eq!(result.bandwidth_gbps, "0.98");
        assert_eq!(summary, "0.98 Gbits/sec");
        assert_eq!(
            result.streams.get("1"),
            Some(&IPerfStreamResult {
                transfer_kbytes: 149504,
                bandwidth_kbits: 244939,
            })
        );
    }

    #[test]
    fn parse_single_stream_log_without_sum() {
        let log = "\
------------------------------------------------------------\n\
Client connecting to bench-server-0.bench, TCP port 5001\n\
------------------------------------------------------------\n\
[ ID] Interval       Transfer     Bandwidth\n\
[  1] 0.0000-5.0215 sec  612352 KBytes  999035 Kbits/sec\n";
        let (result, summary) = IPerf::parse(log).unwrap();
        assert_eq!(result.sum.bandwidth_kbits, 999035);
        assert_eq!(summary, "1.00 Gbits/sec");
    }

    #[test]
    fn parse_rejects_log_without_results() {
        let err = IPerf::parse("connect failed: Connection refused\n").unwrap_err();
        assert_eq!(err.to_string(), "no summary line found in client log");
    }

    #[test]
    fn renders_service_discovery_and_two_task_job() {
        let settings = Settings::default();
        let bench = benchmark(IPerfSpec {
            duration: 5,
            streams: 4,
            ..Default::default()
        });
        let children = bench
            .render(&settings, "kube-perftest-default-bench")
            .unwrap();
        assert_eq!(children.len(), 3);
        let ChildResource::Job(job) = &children[2] else {
            panic!("expected a job");
        };
        let spec = &job.spec;
        assert_eq!(spec.min_available, Some(2));
        assert_eq!(
            spec.priority_class_name.as_deref(),
            Some("kube-perftest-default-bench")
        );
        assert_eq!(spec.tasks.len(), 2);
        assert_eq!(spec.tasks[0].name, "server");
        assert_eq!(spec.tasks[1].name, "client");
        // The client task finishing completes the job
        let policies = spec.tasks[1].policies.as_ref().unwrap();
        assert_eq!(policies[0].event.as_deref(), Some("TaskCompleted"));
        assert_eq!(policies[0].action.as_deref(), Some("CompleteJob"));
    }

    #[test]
    fn client_waits_for_the_server() {
        let settings = Settings::default();
        let bench = benchmark(IPerfSpec {
            duration: 30,
            streams: 2,
            ..Default::default()
        });
        let children = bench.render(&settings, "pc").unwrap();
        let ChildResource::Job(job) = &children[2] else {
            panic!("expected a job");
        };
        let client = job.spec.tasks[1].template.spec.as_ref().unwrap();
        let init = client.init_containers.as_ref().unwrap();
        assert_eq!(init[0].name, "wait-for-hosts");
        assert!(init[0]
            .command
            .as_ref()
            .unwrap()
            .contains(&format!("{DISCOVERY_MOUNT_PATH}/server-hosts")));
        assert_eq!(init[1].name, "wait-for-ports");
        let client_command = client.containers[0].command.as_ref().unwrap();
        assert!(client_command.contains(&"bench-server-0.bench".to_owned()));
        assert!(client_command.contains(&"-P".to_owned()));
        assert!(client_command.contains(&"2".to_owned()));
    }

    #[test]
    fn service_mode_targets_the_service() {
        let settings = Settings::default();
        let bench = benchmark(IPerfSpec {
            mode: IPerfMode::PodToService,
            duration: 5,
            streams: 1,
            ..Default::default()
        });
        let children = bench.render(&settings, "pc").unwrap();
        let ChildResource::Job(job) = &children[2] else {
            panic!("expected a job");
        };
        let command = job.spec.tasks[1].template.spec.as_ref().unwrap().containers[0]
            .command
            .as_ref()
            .unwrap();
        assert!(command.contains(&"bench".to_owned()));
        assert!(!command.contains(&"bench-server-0.bench".to_owned()));
    }

    #[test]
    fn zero_streams_is_a_render_error() {
        let settings = Settings::default();
        let bench = benchmark(IPerfSpec {
            duration: 5,
            streams: 0,
            ..Default::default()
        });
        assert!(bench.render(&settings, "pc").is_err());
    }
}
