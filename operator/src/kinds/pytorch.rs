//! The PyTorch model benchmark.
//!
//! Single-pod benchmark wrapping the upstream pytorch-benchmark runner with
//! GNU `time -v`, so the result carries both the script's own figures and the
//! observed wall time.
use k8s_openapi::api::core::v1::{Container, EnvVar};
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::benchmark::{
    affinity, job, Benchmark, BenchmarkStatus, ChildResource, CommonSpec, ParseError, RenderError,
};
use crate::labels::identity_labels;
use crate::settings::Settings;
use crate::volcano;

const CLIENT: &str = "client";

/// Enumeration of supported computation devices.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Run the workload on the CPU.
    #[default]
    Cpu,
    /// Run the workload on CUDA GPUs.
    Cuda,
}

/// Enumeration of available models for benchmarking.
///
/// Must match the models baked into the pytorch-benchmarks image.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PyTorchModel {
    /// Small CNN classifier.
    #[default]
    Alexnet,
    /// ResNet-50 classifier.
    Resnet50,
    /// LLaMA language model.
    Llama,
}

/// Enumeration of model processes available to benchmark.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PyTorchBenchmarkType {
    /// Benchmark the training step.
    Train,
    /// Benchmark inference.
    #[default]
    Eval,
}

/// Defines the parameters for the PyTorch benchmark.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "perftest.stackhpc.com",
    version = "v1alpha1",
    kind = "PyTorch",
    plural = "pytorches",
    status = "PyTorchStatus",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Finished","type":"date","jsonPath":".status.finishedAt"}"#,
    printcolumn = r#"{"name":"Wall Time","type":"string","jsonPath":".status.summary"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PyTorchSpec {
    /// Fields shared by all benchmark kinds.
    #[serde(flatten)]
    pub common: CommonSpec,
    /// The device to run the workload on.
    ///
    /// For `cuda` the spec must also request GPU resources via
    /// `resources.limits["nvidia.com/gpu"]`.
    #[serde(default)]
    pub device: Device,
    /// The model to benchmark.
    #[serde(default)]
    pub model: PyTorchModel,
    /// Whether to benchmark training or inference.
    #[serde(default)]
    pub benchmark_type: PyTorchBenchmarkType,
    /// The batch size for the generated model input data.
    #[serde(default = "default_batch_size")]
    pub input_batch_size: u32,
}

fn default_batch_size() -> u32 {
    64
}

/// The output of the GNU `time -v` wrapper around the benchmark script.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GnuTimeResult {
    /// The command being timed.
    pub command: String,
    /// Time spent executing user space code, in seconds.
    pub user_time_secs: f64,
    /// Time spent executing kernel code, in seconds.
    pub sys_time_secs: f64,
    /// The percentage of a CPU the job got.
    pub cpu_percentage: f64,
    /// The elapsed wall clock time in seconds.
    pub wall_time_secs: f64,
}

/// The result of a PyTorch benchmark.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PyTorchResult {
    /// The CPU wall time per batch reported by the script, in seconds.
    pub cpu_time_secs: f64,
    /// The peak CPU memory usage reported by the script, in GB.
    pub peak_cpu_memory_gb: f64,
    /// The GPU time per batch reported by the script, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_time_secs: Option<f64>,
    /// The peak GPU memory usage reported by the script, in GB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_gpu_memory_gb: Option<f64>,
    /// The GNU time output for the whole run.
    pub gnu_time: GnuTimeResult,
}

/// Status of a PyTorch benchmark.
pub type PyTorchStatus = BenchmarkStatus<PyTorchResult>;

impl GnuTimeResult {
    /// Parse the `time -v` block out of the pod log.
    pub fn parse(log: &str) -> Result<Self, ParseError> {
        let block = Regex::new(
            r#"(?x)
            Command\ being\ timed:\s+"(?P<command>.+)"
            \s+User\ time\ \(seconds\):\s+(?P<user>\d+\.\d+)
            \s+System\ time\ \(seconds\):\s+(?P<sys>\d+\.\d+)
            \s+Percent\ of\ CPU\ this\ job\ got:\s+(?P<cpu>\d+)%
            \s+Elapsed\ \(wall\ clock\)\ time\ \(h:mm:ss\ or\ m:ss\):\s+(?P<wall>[\d:.]+)
            "#,
        )
        .expect("static regex");
        let caps = block
            .captures(log)
            .ok_or_else(|| ParseError::new("no GNU time output found in pod log"))?;

        // Wall time is either h:mm:ss.ss or m:ss.ss depending on magnitude
        let wall = &caps["wall"];
        let parts: Vec<&str> = wall.split(':').collect();
        let wall_time_secs = match parts.as_slice() {
            [minutes, seconds] => {
                parse_f64(minutes)? * 60.0 + parse_f64(seconds)?
            }
            [hours, minutes, seconds] => {
                parse_f64(hours)? * 3600.0 + parse_f64(minutes)? * 60.0 + parse_f64(seconds)?
            }
            _ => {
                return Err(ParseError::new(format!(
                    "unexpected GNU time wall clock format: {wall}"
                )))
            }
        };

        Ok(GnuTimeResult {
            command: caps["command"].to_owned(),
            user_time_secs: parse_f64(&caps["user"])?,
            sys_time_secs: parse_f64(&caps["sys"])?,
            cpu_percentage: parse_f64(&caps["cpu"])?,
            wall_time_secs,
        })
    }
}

fn parse_f64(raw: &str) -> Result<f64, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::new(format!("expected a number, found {raw:?}")))
}

// The script reports times in milliseconds and memory in GB; anything else
// means the upstream output format changed and the parse should fail loudly.
fn labelled_number(log: &str, pattern: &str, unit: &str) -> Result<Option<f64>, ParseError> {
    let re = Regex::new(pattern).expect("static regex");
    let Some(caps) = re.captures(log) else {
        return Ok(None);
    };
    if &caps[2] != unit {
        return Err(ParseError::new(format!(
            "results reported in {:?}, expected {unit:?}; has the upstream output format changed?",
            &caps[2],
        )));
    }
    Ok(Some(parse_f64(&caps[1])?))
}

impl Benchmark for PyTorch {
    type BenchResult = PyTorchResult;

    const KIND: &'static str = "PyTorch";
    const RESULT_COMPONENT: &'static str = CLIENT;

    fn common(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn status(&self) -> Option<&PyTorchStatus> {
        self.status.as_ref()
    }

    fn render(
        &self,
        settings: &Settings,
        priority_class_name: &str,
    ) -> Result<Vec<ChildResource>, RenderError> {
        self.spec.common.validate()?;
        if self.spec.device == Device::Cuda {
            let has_gpu = self
                .spec
                .common
                .resources
                .as_ref()
                .and_then(|resources| resources.limits.as_ref())
                .map(|limits| limits.contains_key("nvidia.com/gpu"))
                .unwrap_or(false);
            if !has_gpu {
                return Err(RenderError::new(
                    "device is cuda but no nvidia.com/gpu resource limit is set",
                ));
            }
        }
        let id = self.identity();
        let image = self.spec.common.image(settings, "pytorch-benchmarks");
        let pull_policy = self.spec.common.image_pull_policy(settings);

        let env = vec![
            env_var("PYTORCH_DEVICE", format!("{:?}", self.spec.device).to_lowercase()),
            env_var("PYTORCH_MODEL", format!("{:?}", self.spec.model).to_lowercase()),
            env_var(
                "PYTORCH_BENCHMARK_TYPE",
                format!("{:?}", self.spec.benchmark_type).to_lowercase(),
            ),
            env_var(
                "PYTORCH_INPUT_BATCH_SIZE",
                self.spec.input_batch_size.to_string(),
            ),
        ];

        // A single pod, no peers to rendezvous with
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
                    init_containers: vec![],
                    containers: vec![Container {
                        name: CLIENT.to_owned(),
                        image: Some(image),
                        image_pull_policy: Some(pull_policy),
                        env: Some(env),
                        resources: self.spec.common.resources.clone(),
                        ..Default::default()
                    }],
                    volumes: vec![],
                    affinity: affinity::spread_affinity(settings, &id),
                    topology_spread_constraints: affinity::spread_constraints(
                        settings, &id, CLIENT,
                    ),
                },
            ),
        };

        let mut gang = volcano::Job::new(
            id.name,
            job::gang_job(settings, priority_class_name, vec![client]),
        );
        gang.metadata.labels = Some(identity_labels(settings, id.kind, id.namespace, id.name));

        Ok(vec![ChildResource::Job(gang)])
    }

    fn parse(log: &str) -> Result<(PyTorchResult, String), ParseError> {
        let cpu_time_ms = labelled_number(
            log,
            r"CPU Wall Time per batch:\s+(\d+\.\d+)\s*(\w+)",
            "milliseconds",
        )?
        .ok_or_else(|| ParseError::new("no CPU wall time found in pod log"))?;
        let peak_cpu_memory_gb = labelled_number(
            log,
            r"CPU Peak Memory:\s+(\d+\.\d+)\s*(\w+)",
            "GB",
        )?
        .ok_or_else(|| ParseError::new("no CPU peak memory found in pod log"))?;
        let gpu_time_ms = labelled_number(
            log,
            r"GPU Time per batch:\s+(\d+\.\d+)\s*(\w+)",
            "milliseconds",
        )?;
        let peak_gpu_memory_gb = labelled_number(
            log,
            r"GPU \d+ Peak Memory:\s+(\d+\.\d+)\s*(\w+)",
            "GB",
        )?;
        let gnu_time = GnuTimeResult::parse(log)?;

        let result = PyTorchResult {
            cpu_time_secs: cpu_time_ms / 1000.0,
            peak_cpu_memory_gb,
            gpu_time_secs: gpu_time_ms.map(|ms| ms / 1000.0),
            peak_gpu_memory_gb,
            gnu_time,
        };
        let summary = format!("{:.3} s", result.gnu_time.wall_time_secs);
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
