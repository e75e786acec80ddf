//! The OpenFOAM 3-D lid-driven cavity flow benchmark.
use k8s_openapi::api::core::v1::{Container, EnvVar};
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::benchmark::{
    affinity, discovery, job, Benchmark, BenchmarkStatus, ChildResource, CommonSpec, ParseError,
    RenderError,
};
use crate::kinds::pingpong::{ssh_config_map, ssh_config_volume};
use crate::labels::identity_labels;
use crate::settings::Settings;
use crate::volcano;

const MASTER: &str = "master";
const WORKER: &str = "worker";

/// Enumeration of supported MPI transports.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum MPITransport {
    /// Plain TCP.
    #[default]
    Tcp,
    /// RDMA verbs.
    Rdma,
}

/// Enumeration of possible OpenFOAM problem sizes.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum OpenFOAMProblemSize {
    /// Small problem.
    #[default]
    S,
    /// Medium problem.
    M,
    /// Extra-large problem.
    XL,
    /// Extra-extra-large problem.
    XXL,
}

/// Enumeration of possible OpenFOAM iterative methods.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum OpenFOAMIterativeMethod {
    /// Fixed number of iterations.
    #[serde(rename = "fixedITER")]
    FixedIter,
    /// Fixed residual norm.
    #[default]
    #[serde(rename = "fixedNORM")]
    FixedNorm,
    /// FOAM DIC-PCG solver with a fixed norm.
    #[serde(rename = "FOAM-DIC-PCG.fixedNORM")]
    FoamDicPcgFixedNorm,
    /// FOAM GAMG-PCG solver with a fixed norm.
    #[serde(rename = "FOAM-GAMG-PCG.fixedNORM")]
    FoamGamgPcgFixedNorm,
    /// PETSc AMG-CG solver with a fixed norm.
    #[serde(rename = "PETSc-AMG-CG.fixedNORM")]
    PetscAmgCgFixedNorm,
    /// PETSc AMG-CG solver with a fixed norm and caching.
    #[serde(rename = "PETSc-AMG-CG.fixedNORM.caching")]
    PetscAmgCgFixedNormCaching,
    /// PETSc ICC-CG solver with a fixed norm.
    #[serde(rename = "PETSc-ICC-CG.fixedNORM")]
    PetscIccCgFixedNorm,
}

/// Defines the parameters for the OpenFOAM benchmark.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "perftest.stackhpc.com",
    version = "v1alpha1",
    kind = "OpenFOAM",
    plural = "openfoams",
    status = "OpenFOAMStatus",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Finished","type":"date","jsonPath":".status.finishedAt"}"#,
    printcolumn = r#"{"name":"Execution Time","type":"string","jsonPath":".status.summary"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenFOAMSpec {
    /// Fields shared by all benchmark kinds.
    #[serde(flatten)]
    pub common: CommonSpec,
    /// The port to use for SSH between the MPI processes.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// The transport to use for MPI communication.
    #[serde(default)]
    pub transport: MPITransport,
    /// The problem size for the cavity flow case.
    #[serde(default)]
    pub problem_size: OpenFOAMProblemSize,
    /// The iterative method for the cavity flow case.
    #[serde(default)]
    pub iterative_method: OpenFOAMIterativeMethod,
    /// The total number of MPI processes.
    #[serde(default = "default_one")]
    pub num_procs: u32,
    /// The number of worker nodes to spread the processes over.
    #[serde(default = "default_one")]
    pub num_nodes: u32,
}

fn default_ssh_port() -> u16 {
    2222
}

fn default_one() -> u32 {
    1
}

/// The result of an OpenFOAM benchmark.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenFOAMResult {
    /// The final solver execution time in seconds.
    pub execution_time_secs: f64,
    /// The final wall clock time in seconds.
    pub clock_time_secs: f64,
}

/// Status of an OpenFOAM benchmark.
pub type OpenFOAMStatus = BenchmarkStatus<OpenFOAMResult>;

impl Benchmark for OpenFOAM {
    type BenchResult = OpenFOAMResult;

    const KIND: &'static str = "OpenFOAM";
    const RESULT_COMPONENT: &'static str = MASTER;

    fn common(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn status(&self) -> Option<&OpenFOAMStatus> {
        self.status.as_ref()
    }

    fn render(
        &self,
        settings: &Settings,
        priority_class_name: &str,
    ) -> Result<Vec<ChildResource>, RenderError> {
        self.spec.common.validate()?;
        if self.spec.num_procs < self.spec.num_nodes {
            return Err(RenderError::new(
                "numProcs must be at least numNodes, every node runs at least one process",
            ));
        }
        let id = self.identity();
        let image = self.spec.common.image(settings, "openfoam");
        let pull_policy = self.spec.common.image_pull_policy(settings);
        let num_nodes = self.spec.num_nodes as i32;
        let tasks = [(MASTER, 1), (WORKER, num_nodes)];
        let ssh_port = self.spec.ssh_port;
        let (ssh_volume, ssh_mount) = ssh_config_volume(id.name);

        // The image's entrypoint drives the case from these variables
        let env = vec![
            env_var("OPENFOAM_PROBLEM_SIZE", format!("{:?}", self.spec.problem_size)),
            env_var(
                "OPENFOAM_ITERATIVE_METHOD",
                serde_json::to_value(self.spec.iterative_method)
                    .expect("enum serialises")
                    .as_str()
                    .expect("enum serialises to a string")
                    .to_owned(),
            ),
            env_var("OPENFOAM_TRANSPORT", format!("{:?}", self.spec.transport).to_uppercase()),
            env_var("OPENFOAM_NUM_PROCS", self.spec.num_procs.to_string()),
            env_var("OPENFOAM_NUM_NODES", self.spec.num_nodes.to_string()),
            env_var("OPENFOAM_SSH_PORT", ssh_port.to_string()),
            env_var(
                "OPENFOAM_HOSTS_FILE",
                format!(
                    "{}/{}",
                    discovery::DISCOVERY_MOUNT_PATH,
                    discovery::task_hosts_key(WORKER)
                ),
            ),
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
                        env: Some(env.clone()),
                        volume_mounts: Some(vec![ssh_mount.clone()]),
                        resources: self.spec.common.resources.clone(),
                        ..Default::default()
                    }],
                    volumes: vec![discovery::discovery_volume(id.name), ssh_volume.clone()],
                    affinity: affinity::spread_affinity(settings, &id),
                    topology_spread_constraints: affinity::spread_constraints(
                        settings, &id, MASTER,
                    ),
                },
            ),
        };

        let worker = volcano::TaskSpec {
            name: WORKER.to_owned(),
            replicas: num_nodes,
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
                        env: Some(env),
                        volume_mounts: Some(vec![ssh_mount]),
                        resources: self.spec.common.resources.clone(),
                        ..Default::default()
                    }],
                    volumes: vec![discovery::discovery_volume(id.name), ssh_volume],
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
            ChildResource::ConfigMap(discovery::config_map(settings, &id, &tasks)),
            ChildResource::ConfigMap(ssh_config_map(settings, &id, ssh_port)),
            ChildResource::Service(discovery::headless_service(settings, &id)),
            ChildResource::Job(gang),
        ])
    }

    fn parse(log: &str) -> Result<(OpenFOAMResult, String), ParseError> {
        let time = Regex::new(
            r"ExecutionTime\s*=\s*(\d+(?:\.\d+)?)\s*s\s+ClockTime\s*=\s*(\d+(?:\.\d+)?)\s*s",
        )
        .expect("static regex");
        // The solver logs one time line per iteration, the final one is the result
        let caps = time
            .captures_iter(log)
            .last()
            .ok_or_else(|| ParseError::new("no ExecutionTime line found in master log"))?;
        let result = OpenFOAMResult {
            execution_time_secs: caps[1].parse().expect("number parses as f64"),
            clock_time_secs: caps[2].parse().expect("number parses as f64"),
        };
        let summary = format!("{} s", result.execution_time_secs);
        Ok((result, summary))
    }
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value),
        ..Default::default()
    }
}
