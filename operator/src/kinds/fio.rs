//! The fio distributed storage benchmark.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Volume, VolumeMount,
};
use kube::{core::ObjectMeta, CustomResource};
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

const JOB_FILE_MOUNT_PATH: &str = "/perftest/jobfile";
const JOB_FILE_NAME: &str = "benchmark.fio";
const DATA_MOUNT_PATH: &str = "/scratch";

/// Enumeration of supported fio rw modes.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FioRW {
    /// Sequential reads.
    #[default]
    Read,
    /// Sequential writes.
    Write,
    /// Random reads.
    RandRead,
    /// Random writes.
    RandWrite,
    /// Mixed sequential reads and writes.
    ReadWrite,
    /// Mixed random reads and writes.
    RandRW,
}

impl FioRW {
    fn as_option(&self) -> &'static str {
        match self {
            FioRW::Read => "read",
            FioRW::Write => "write",
            FioRW::RandRead => "randread",
            FioRW::RandWrite => "randwrite",
            FioRW::ReadWrite => "readwrite",
            FioRW::RandRW => "randrw",
        }
    }
}

/// Enumeration of supported fio IO engines.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FioIOEngine {
    /// Linux native asynchronous IO.
    #[default]
    Libaio,
}

/// Defines the parameters for the fio benchmark.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "perftest.stackhpc.com",
    version = "v1alpha1",
    kind = "Fio",
    plural = "fios",
    status = "FioStatus",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Finished","type":"date","jsonPath":".status.finishedAt"}"#,
    printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.summary"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FioSpec {
    /// Fields shared by all benchmark kinds.
    #[serde(flatten)]
    pub common: CommonSpec,
    /// The port that the fio servers listen on.
    #[serde(default = "default_fio_port")]
    pub fio_port: u16,
    /// The template for the volume claim shared by the workers.
    #[serde(default)]
    pub volume_claim_template: Option<PersistentVolumeClaimSpec>,
    /// The number of fio worker pods.
    #[serde(default = "default_one")]
    pub num_workers: u32,
    /// The fio rw option.
    #[serde(default)]
    pub rw: FioRW,
    /// The fio bs option.
    #[serde(default = "default_bs")]
    pub bs: String,
    /// The fio iodepth option.
    #[serde(default = "default_one")]
    pub iodepth: u32,
    /// The fio nrfiles option.
    #[serde(default = "default_one")]
    pub nrfiles: u32,
    /// The fio rwmixread option, the percentage of reads in a mixed workload.
    #[serde(default = "default_rwmixread")]
    pub rwmixread: u32,
    /// The fio percentage_random option.
    #[serde(default = "default_percentage_random")]
    pub percentage_random: u32,
    /// The fio direct option.
    #[serde(default = "default_true")]
    pub direct: bool,
    /// The fio ioengine option.
    #[serde(default)]
    pub ioengine: FioIOEngine,
    /// The fio runtime option.
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// The fio numjobs option, processes per worker.
    #[serde(default = "default_one")]
    pub num_jobs: u32,
    /// The fio size option.
    #[serde(default = "default_size")]
    pub size: String,
    /// The fio thread option.
    #[serde(default)]
    pub thread: bool,
}

fn default_fio_port() -> u16 {
    8765
}

fn default_one() -> u32 {
    1
}

fn default_bs() -> String {
    "4M".to_owned()
}

fn default_rwmixread() -> u32 {
    50
}

fn default_percentage_random() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_runtime() -> String {
    "30s".to_owned()
}

fn default_size() -> String {
    "10G".to_owned()
}

/// Aggregate statistics for one IO direction.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FioDirectionResult {
    /// The aggregate bandwidth in bytes/sec.
    pub bw_bytes: f64,
    /// The aggregate IOPS.
    pub iops: f64,
    /// The mean completion latency in milliseconds.
    pub mean_clat_ms: f64,
}

/// The result of a fio benchmark.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FioResult {
    /// Aggregate read statistics.
    pub read: FioDirectionResult,
    /// Aggregate write statistics.
    pub write: FioDirectionResult,
}

/// Status of a fio benchmark.
pub type FioStatus = BenchmarkStatus<FioResult>;

/// The name of the shared data volume claim for a benchmark.
pub fn pvc_name(benchmark: &str) -> String {
    format!("{benchmark}-data")
}

/// The name of the config map carrying the fio job file.
pub fn job_file_config_map_name(benchmark: &str) -> String {
    format!("{benchmark}-jobfile")
}

// Render the fio job file driven by the workers.
fn job_file(spec: &FioSpec) -> String {
    let mut options = vec![
        format!("rw={}", spec.rw.as_option()),
        format!("bs={}", spec.bs),
        format!("iodepth={}", spec.iodepth),
        format!("nrfiles={}", spec.nrfiles),
        format!("rwmixread={}", spec.rwmixread),
        format!("percentage_random={}", spec.percentage_random),
        format!("direct={}", if spec.direct { 1 } else { 0 }),
        "ioengine=libaio".to_owned(),
        format!("runtime={}", spec.runtime),
        "time_based=1".to_owned(),
        format!("numjobs={}", spec.num_jobs),
        format!("size={}", spec.size),
        "group_reporting=1".to_owned(),
        format!("directory={DATA_MOUNT_PATH}"),
    ];
    if spec.thread {
        options.push("thread".to_owned());
    }
    format!("[global]\n{}\n\n[benchmark]\n", options.join("\n"))
}

impl Benchmark for Fio {
    type BenchResult = FioResult;

    const KIND: &'static str = "Fio";
    const RESULT_COMPONENT: &'static str = MASTER;

    fn common(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn status(&self) -> Option<&FioStatus> {
        self.status.as_ref()
    }

    fn render(
        &self,
        settings: &Settings,
        priority_class_name: &str,
    ) -> Result<Vec<ChildResource>, RenderError> {
        self.spec.common.validate()?;
        let Some(claim_spec) = self.spec.volume_claim_template.clone() else {
            return Err(RenderError::new(
                "volumeClaimTemplate is required, the workers need a volume to exercise",
            ));
        };
        if self.spec.num_workers == 0 {
            return Err(RenderError::new("numWorkers must be positive"));
        }
        let id = self.identity();
        let image = self.spec.common.image(settings, "fio");
        let pull_policy = self.spec.common.image_pull_policy(settings);
        let num_workers = self.spec.num_workers as i32;
        let tasks = [(MASTER, 1), (WORKER, num_workers)];
        let port = self.spec.fio_port;

        // One claim shared by every worker, not one claim per worker
        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(pvc_name(id.name)),
                labels: Some(identity_labels(settings, id.kind, id.namespace, id.name)),
                ..ObjectMeta::default()
            },
            spec: Some(claim_spec),
            ..Default::default()
        };

        let job_file_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(job_file_config_map_name(id.name)),
                labels: Some(identity_labels(settings, id.kind, id.namespace, id.name)),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from_iter(vec![(
                JOB_FILE_NAME.to_owned(),
                job_file(&self.spec),
            )])),
            ..Default::default()
        };

        let mut master_command = vec!["fio".to_owned()];
        for ordinal in 0..num_workers {
            master_command.push(format!(
                "--client={},{}",
                discovery::dns_name(id.name, WORKER, ordinal),
                port
            ));
        }
        master_command.push("--output-format=json+".to_owned());
        master_command.push(format!("{JOB_FILE_MOUNT_PATH}/{JOB_FILE_NAME}"));

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
                        discovery::wait_for_hosts_container(
                            settings,
                            &discovery::task_hosts_key(WORKER),
                        ),
                        discovery::wait_for_ports_container(
                            settings,
                            &discovery::task_hosts_key(WORKER),
                            port as i32,
                        ),
                    ],
                    containers: vec![Container {
                        name: MASTER.to_owned(),
                        image: Some(image.clone()),
                        image_pull_policy: Some(pull_policy.clone()),
                        command: Some(master_command),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "jobfile".to_owned(),
                            mount_path: JOB_FILE_MOUNT_PATH.to_owned(),
                            ..Default::default()
                        }]),
                        resources: self.spec.common.resources.clone(),
                        ..Default::default()
                    }],
                    volumes: vec![
                        discovery::discovery_volume(id.name),
                        Volume {
                            name: "jobfile".to_owned(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: Some(job_file_config_map_name(id.name)),
                                default_mode: Some(0o644),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ],
                    affinity: affinity::spread_affinity(settings, &id),
                    topology_spread_constraints: affinity::spread_constraints(
                        settings, &id, MASTER,
                    ),
                },
            ),
        };

        let worker = volcano::TaskSpec {
            name: WORKER.to_owned(),
            replicas: num_workers,
            policies: None,
            template: job::task_template(
                settings,
                &id,
                &self.spec.common,
                job::TaskPod {
                    component: WORKER.to_owned(),
                    init_containers: vec![],
                    containers: vec![Container {
                        name: WORKER.to_owned(),
                        image: Some(image),
                        image_pull_policy: Some(pull_policy),
                        command: Some(vec!["fio".to_owned(), format!("--server=,{port}")]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "data".to_owned(),
                            mount_path: DATA_MOUNT_PATH.to_owned(),
                            ..Default::default()
                        }]),
                        resources: self.spec.common.resources.clone(),
                        ..Default::default()
                    }],
                    volumes: vec![Volume {
                        name: "data".to_owned(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: pvc_name(id.name),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    affinity: affinity::spread_affinity(settings, &id),
                    topology_spread_constraints: affinity::spread_constraints(
                        settings, &id, WORKER,
                    ),
                },
            ),
        };

        let mut gang = volcano::Job::new(
            id.name,
            job::gang_job(settings, priority_class_name, vec![master, worker]),
        );
        gang.metadata.labels = Some(identity_labels(settings, id.kind, id.namespace, id.name));

        Ok(vec![
            ChildResource::PersistentVolumeClaim(claim),
            ChildResource::ConfigMap(discovery::config_map(settings, &id, &tasks)),
            ChildResource::ConfigMap(job_file_map),
            ChildResource::Service(discovery::headless_service(settings, &id)),
            ChildResource::Job(gang),
        ])
    }

    fn parse(log: &str) -> Result<(FioResult, String), ParseError> {
        // fio prints connection chatter before the JSON document
        let start = log
            .find('{')
            .ok_or_else(|| ParseError::new("no JSON document found in master log"))?;
        let json: serde_json::Value = serde_json::from_str(&log[start..])
            .map_err(|err| ParseError::new(format!("invalid fio JSON output: {err}")))?;
        let jobs = json
            .get("client_stats")
            .or_else(|| json.get("jobs"))
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| ParseError::new("fio output has no job statistics"))?;

        // With multiple workers fio emits an "All clients" aggregate row;
        // a single worker run has only its own row
        let selected: Vec<&serde_json::Value> = match jobs
            .iter()
            .find(|job| job.get("jobname").and_then(|n| n.as_str()) == Some("All clients"))
        {
            Some(aggregate) => vec![aggregate],
            None => jobs.iter().collect(),
        };
        if selected.is_empty() {
            return Err(ParseError::new("fio output has no job statistics"));
        }

        let direction = |key: &str| -> FioDirectionResult {
            let mut bw_bytes = 0.0;
            let mut iops = 0.0;
            let mut clat_sum = 0.0;
            for job in &selected {
                let stats = &job[key];
                bw_bytes += stats["bw_bytes"].as_f64().unwrap_or_default();
                iops += stats["iops"].as_f64().unwrap_or_default();
                clat_sum += stats["clat_ns"]["mean"].as_f64().unwrap_or_default();
            }
            FioDirectionResult {
                bw_bytes,
                iops,
                mean_clat_ms: clat_sum / selected.len() as f64 / 1e6,
            }
        };

        let result = FioResult {
            read: direction("read"),
            write: direction("write"),
        };
        let summary = format!(
            "read {:.2} MiB/s {:.0} IOPS, write {:.2} MiB/s {:.0} IOPS",
            result.read.bw_bytes / 1048576.0,
            result.read.iops,
            result.write.bw_bytes / 1048576.0,
            result.write.iops,
        );
        Ok((result, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim_template() -> PersistentVolumeClaimSpec {
        PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteMany".to_owned()]),
            ..Default::default()
        }
    }

    fn benchmark(spec: FioSpec) -> Fio {
        let mut fio = Fio::new("bench", spec);
        fio.metadata.namespace = Some("default".to_owned());
        fio
    }

    #[test]
    fn parse_aggregates_the_all_clients_row() {
        let log = include_str!("testdata/fio_client.json");
        let (result, summary) = Fio::parse(log).unwrap();
        assert_eq!(result.read.bw_bytes, 209715200.0);
        assert_eq!(result.read.iops, 51200.0);
        assert_eq!(result.read.mean_clat_ms, 2.5);
        assert_eq!(result.write.bw_bytes, 0.0);
        assert_eq!(summary, "read 200.00 MiB/s 51200 IOPS, write 0.00 MiB/s 0 IOPS");
    }

    #[test]
    fn parse_single_worker_without_aggregate_row() {
        let log = r#"{
            "client_stats": [
                {
                    "jobname": "benchmark",
                    "read": {"bw_bytes": 104857600, "iops": 25600.0, "clat_ns": {"mean": 1000000.0}},
                    "write": {"bw_bytes": 0, "iops": 0.0, "clat_ns": {"mean": 0.0}}
                }
            ]
        }"#;
        let (result, _) = Fio::parse(log).unwrap();
        assert_eq!(result.read.bw_bytes, 104857600.0);
        assert_eq!(result.read.mean_clat_ms, 1.0);
    }

    #[test]
    fn parse_rejects_non_json_output() {
        assert!(Fio::parse("fio: connect failed\n").is_err());
    }

    #[test]
    fn renders_exactly_one_claim_shared_by_workers() {
        let settings = Settings::default();
        let bench = benchmark(FioSpec {
            volume_claim_template: Some(claim_template()),
            num_workers: 4,
            ..Default::default()
        });
        let children = bench.render(&settings, "pc").unwrap();
        let claims: Vec<_> = children
            .iter()
            .filter(|child| matches!(child, ChildResource::PersistentVolumeClaim(_)))
            .collect();
        assert_eq!(claims.len(), 1);
        let ChildResource::Job(job) = children.last().unwrap() else {
            panic!("expected a job");
        };
        assert_eq!(job.spec.tasks[1].replicas, 4);
        // Every worker mounts the one shared claim
        let worker = job.spec.tasks[1].template.spec.as_ref().unwrap();
        let claim_volume = worker
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.persistent_volume_claim.is_some())
            .unwrap();
        assert_eq!(
            claim_volume
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "bench-data"
        );
    }

    #[test]
    fn master_targets_every_worker() {
        let settings = Settings::default();
        let bench = benchmark(FioSpec {
            volume_claim_template: Some(claim_template()),
            num_workers: 2,
            ..Default::default()
        });
        let children = bench.render(&settings, "pc").unwrap();
        let ChildResource::Job(job) = children.last().unwrap() else {
            panic!("expected a job");
        };
        let command = job.spec.tasks[0].template.spec.as_ref().unwrap().containers[0]
            .command
            .as_ref()
            .unwrap();
        assert!(command.contains(&"--client=bench-worker-0.bench,8765".to_owned()));
        assert!(command.contains(&"--client=bench-worker-1.bench,8765".to_owned()));
        assert!(command.contains(&"--output-format=json+".to_owned()));
    }

    #[test]
    fn missing_claim_template_is_a_render_error() {
        let settings = Settings::default();
        let bench = benchmark(FioSpec {
            num_workers: 2,
            ..Default::default()
        });
        let err = bench.render(&settings, "pc").unwrap_err();
        assert!(err.to_string().contains("volumeClaimTemplate"));
    }

    #[test]
    fn job_file_reflects_the_spec() {
        let spec = FioSpec {
            volume_claim_template: Some(claim_template()),
            rw: FioRW::RandRW,
            bs: "64K".to_owned(),
            iodepth: 16,
            direct: false,
            thread: true,
            ..Default::default()
        };
        let rendered = job_file(&spec);
        assert!(rendered.contains("rw=randrw"));
        assert!(rendered.contains("bs=64K"));
        assert!(rendered.contains("iodepth=16"));
        assert!(rendered.contains("direct=0"));
        assert!(rendered.contains("thread"));
        assert!(rendered.contains("directory=/scratch"));
    }
}
