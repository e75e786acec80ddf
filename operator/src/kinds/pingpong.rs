//! The Intel MPI Benchmarks PingPong latency/bandwidth benchmark.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, Volume, VolumeMount,
};
use kube::{core::ObjectMeta, CustomResource};
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

const MASTER: &str = "master";
const WORKER: &str = "worker";

/// Defines the parameters for the MPI PingPong benchmark.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "perftest.stackhpc.com",
    version = "v1alpha1",
    kind = "MPIPingPong",
    plural = "mpipingpongs",
    status = "MPIPingPongStatus",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Finished","type":"date","jsonPath":".status.finishedAt"}"#,
    printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.summary"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MPIPingPongSpec {
    /// Fields shared by all benchmark kinds.
    #[serde(flatten)]
    pub common: CommonSpec,
    /// The port to use for SSH between the MPI processes.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

fn default_ssh_port() -> u16 {
    2222
}

/// One PingPong measurement, for a single message size.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PingPongRecord {
    /// The message size in bytes.
    pub bytes: u64,
    /// The number of repetitions.
    pub repetitions: u64,
    /// The average round-trip half time in usec.
    pub t_avg_usec: f64,
    /// The observed throughput in Mbytes/sec.
    pub mbytes_per_sec: f64,
}

/// The result of an MPI PingPong benchmark.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MPIPingPongResult {
    /// One record per message size.
    pub records: Vec<PingPongRecord>,
}

/// Status of an MPI PingPong benchmark.
pub type MPIPingPongStatus = BenchmarkStatus<MPIPingPongResult>;

/// The name of the SSH port-override config map for a benchmark.
pub fn ssh_config_map_name(benchmark: &str) -> String {
    format!("{benchmark}-ssh")
}

/// Config map carrying an ssh_config that points MPI at the non-root SSH port.
pub fn ssh_config_map(
    settings: &Settings,
    id: &BenchmarkIdentity<'_>,
    ssh_port: u16,
) -> ConfigMap {
    let ssh_config = format!(
        "Host *\n  Port {ssh_port}\n  StrictHostKeyChecking no\n  UserKnownHostsFile /dev/null\n"
    );
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(ssh_config_map_name(id.name)),
            labels: Some(identity_labels(settings, id.kind, id.namespace, id.name)),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from_iter(vec![(
            "ssh_config".to_owned(),
            ssh_config,
        )])),
        ..Default::default()
    }
}

/// Volume and mount exposing the ssh_config override to a container.
pub fn ssh_config_volume(benchmark: &str) -> (Volume, VolumeMount) {
    (
        Volume {
            name: "ssh-config".to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(ssh_config_map_name(benchmark)),
                default_mode: Some(0o644),
                ..Default::default()
            }),
            ..Default::default()
        },
        VolumeMount {
            name: "ssh-config".to_owned(),
            mount_path: "/etc/ssh/ssh_config.d/perftest.conf".to_owned(),
            sub_path: Some("ssh_config".to_owned()),
            ..Default::default()
        },
    )
}

impl Benchmark for MPIPingPong {
    type BenchResult = MPIPingPongResult;

    const KIND: &'static str = "MPIPingPong";
    const RESULT_COMPONENT: &'static str = MASTER;

    fn common(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn status(&self) -> Option<&MPIPingPongStatus> {
        self.status.as_ref()
    }

    fn render(
        &self,
        settings: &Settings,
        priority_class_name: &str,
    ) -> Result<Vec<ChildResource>, RenderError> {
        self.spec.common.validate()?;
        let id = self.identity();
        let image = self.spec.common.image(settings, "mpi-benchmarks");
        let pull_policy = self.spec.common.image_pull_policy(settings);
        let tasks = [(MASTER, 1), (WORKER, 1)];
        let ssh_port = self.spec.ssh_port;
        let (ssh_volume, ssh_mount) = ssh_config_volume(id.name);

        let hosts = format!(
            "{},{}",
            discovery::dns_name(id.name, MASTER, 0),
            discovery::dns_name(id.name, WORKER, 0)
        );
        let master_command = vec![
            "mpirun".to_owned(),
            "--allow-run-as-root".to_owned(),
            "-np".to_owned(),
            "2".to_owned(),
            "-host".to_owned(),
            hosts,
            "mpitests-IMB-MPI1".to_owned(),
            "PingPong".to_owned(),
        ];

        let master = volcano::TaskSpec {
            name: MASTER.to_owned(),
            replicas: 1,
            policies: Some(job::complete_job_when_done()),
            template: job::task_template(
                settings,
                &id,
                &self.spec.common,
                job::TaskPod {
                    component: MASTER.to_owned(),
                    init_containers: vec![
                        discovery::wait_for_hosts_container(settings, discovery::ALL_HOSTS_KEY),
                        discovery::wait_for_ports_container(
                            settings,
                            &discovery::task_hosts_key(WORKER),
                            ssh_port as i32,
                        ),
                    ],
                    containers: vec![Container {
                        name: MASTER.to_owned(),
                        image: Some(image.clone()),
                        image_pull_policy: Some(pull_policy.clone()),
                        command: Some(master_command),
                        volume_mounts: Some(vec![ssh_mount.clone()]),
                        resources: self.spec.common.resources.clone(),
                        ..Default::default()
                    }],
                    volumes: vec![discovery::discovery_volume(id.name), ssh_volume.clone()],
                    affinity: affinity::exclusive_affinity(settings),
                    topology_spread_constraints: vec![],
                },
            ),
        };

        let worker = volcano::TaskSpec {
            name: WORKER.to_owned(),
            replicas: 1,
            policies: None,
            template: job::task_template(
                settings,
                &id,
                &self.spec.common,
                job::TaskPod {
                    component: WORKER.to_owned(),
                    init_containers: vec![discovery::wait_for_hosts_container(
                        settings,
                        discovery::ALL_HOSTS_KEY,
                    )],
                    containers: vec![Container {
                        name: WORKER.to_owned(),
                        image: Some(image),
                        image_pull_policy: Some(pull_policy),
                        command: Some(vec![
                            "/usr/sbin/sshd".to_owned(),
                            "-De".to_owned(),
                            "-p".to_owned(),
                            ssh_port.to_string(),
                        ]),
                        volume_mounts: Some(vec![ssh_mount]),
                        resources: self.spec.common.resources.clone(),
                        ..Default::default()
                    }],
                    volumes: vec![discovery::discovery_volume(id.name), ssh_volume],
                    affinity: affinity::exclusive_affinity(settings),
                    topology_spread_constraints: vec![],
                },
            ),
        };

        let mut gang = volcano::Job::new(
            id.name,
            job::gang_job(settings, priority_class_name, vec![master, worker]),
        );
        gang.metadata.labels = Some(identity_labels(settings, id.kind, id.namespace, id.name));

        Ok(vec![
            ChildResource::ConfigMap(discovery::config_map(settings, &id, &tasks)),
            ChildResource::ConfigMap(ssh_config_map(settings, &id, ssh_port)),
            ChildResource::Service(discovery::headless_service(settings, &id)),
            ChildResource::Job(gang),
        ])
    }

    fn parse(log: &str) -> Result<(MPIPingPongResult, String), ParseError> {
        let record = Regex::new(
            r"^\s*(\d+)\s+(\d+)\s+(\d+(?:\.\d+)?)\s+(\d+(?:\.\d+)?)\s*$",
        )
        .expect("static regex");
        let mut records = Vec::new();
        let mut lines = log
            .lines()
            .skip_while(|l| !l.trim_start().starts_with("#bytes"));
        if lines.next().is_none() {
            return Err(ParseError::new("no results table found in master log"));
        }
        for line in lines {
            let Some(caps) = record.captures(line) else {
                continue;
            };
            records.push(PingPongRecord {
                bytes: caps[1].parse().expect("digits parse as u64"),
                repetitions: caps[2].parse().expect("digits parse as u64"),
                t_avg_usec: caps[3].parse().expect("number parses as f64"),
                mbytes_per_sec: caps[4].parse().expect("number parses as f64"),
            });
        }
        if records.is_empty() {
            return Err(ParseError::new("no measurements found in results table"));
        }
        let smallest = records.iter().map(|r| r.bytes).min().unwrap_or_default();
        let largest = records.iter().map(|r| r.bytes).max().unwrap_or_default();
        let summary = format!(
            "{} sizes, {} B to {} B",
            records.len(),
            smallest,
            largest
        );
        Ok((MPIPingPongResult { records }, summary))
    }
}
