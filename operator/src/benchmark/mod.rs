//! Common types and the capability surface shared by every benchmark kind.
pub mod affinity;
pub mod controller;
pub mod discovery;
pub mod job;
pub mod priority;
pub mod scrape;

use std::fmt;

use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, ResourceRequirements, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{core::NamespaceResourceScope, CustomResourceExt, Resource};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{settings::Settings, volcano};

/// Enumeration of the possible image pull policies.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum ImagePullPolicy {
    /// Pull the image on every pod start.
    Always,
    /// Pull the image only when it is not present on the node.
    #[default]
    IfNotPresent,
    /// Never pull the image.
    Never,
}

impl fmt::Display for ImagePullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagePullPolicy::Always => write!(f, "Always"),
            ImagePullPolicy::IfNotPresent => write!(f, "IfNotPresent"),
            ImagePullPolicy::Never => write!(f, "Never"),
        }
    }
}

/// Spec fields shared by every benchmark kind.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct CommonSpec {
    /// Image for all pods created by the benchmark.
    /// Defaults to the kind's image from the process settings.
    pub image: Option<String>,
    /// Pull policy for the image.
    pub image_pull_policy: Option<ImagePullPolicy>,
    /// Indicates whether to use host networking.
    pub host_network: bool,
    /// Multus network to attach the pods to, as `<namespace>/<name>`.
    pub network_name: Option<String>,
    /// MTU to configure on the benchmark network interface.
    pub mtu: Option<i32>,
    /// Resource requests and limits for the benchmark containers.
    pub resources: Option<ResourceRequirements>,
}

impl CommonSpec {
    /// Reject combinations of fields that cannot be rendered.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.host_network && self.network_name.is_some() {
            return Err(RenderError::new(
                "hostNetwork and networkName are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// The image to run, falling back to the kind's default image.
    pub fn image(&self, settings: &Settings, default_name: &str) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| settings.default_image(default_name))
    }

    /// The pull policy to use, falling back to the configured default.
    pub fn image_pull_policy(&self, settings: &Settings) -> String {
        self.image_pull_policy
            .unwrap_or(settings.default_image_pull_policy)
            .to_string()
    }
}

/// Enumeration of possible phases for a benchmark.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum BenchmarkPhase {
    /// The benchmark is waiting for its priority class.
    #[default]
    Pending,
    /// The benchmark resources are being created.
    Preparing,
    /// The benchmark job has been submitted and is being tracked.
    Running,
    /// The benchmark completed and its result is being extracted.
    Summarising,
    /// The benchmark completed and recorded a result.
    Succeeded,
    /// The benchmark finished unexpectedly or produced unparseable output.
    Failed,
    /// The benchmark is being deleted.
    Terminating,
}

impl BenchmarkPhase {
    /// Whether the phase is terminal, terminal statuses are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BenchmarkPhase::Succeeded | BenchmarkPhase::Failed)
    }
}

/// Current status of a benchmark.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(default, rename_all = "camelCase", bound = "")]
pub struct BenchmarkStatus<R>
where
    R: Serialize + DeserializeOwned + JsonSchema + Clone + fmt::Debug + PartialEq,
{
    /// The phase of the benchmark.
    pub phase: BenchmarkPhase,
    /// The name of the priority class created for the benchmark.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    /// The time at which the benchmark started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Time>,
    /// The time at which the benchmark finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Time>,
    /// The result extracted from the benchmark output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    /// Headline result for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Why the benchmark failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl<R> Default for BenchmarkStatus<R>
where
    R: Serialize + DeserializeOwned + JsonSchema + Clone + fmt::Debug + PartialEq,
{
    fn default() -> Self {
        Self {
            phase: BenchmarkPhase::default(),
            priority_class_name: None,
            started_at: None,
            finished_at: None,
            result: None,
            summary: None,
            failure_reason: None,
        }
    }
}

/// A child API object rendered for a benchmark.
#[derive(Debug, Clone)]
pub enum ChildResource {
    /// The gang-scheduled job running the benchmark.
    Job(volcano::Job),
    /// A headless service giving pods stable DNS names.
    Service(Service),
    /// A config map, e.g. the discovery map or an SSH override.
    ConfigMap(ConfigMap),
    /// A volume claim shared by the benchmark workers.
    PersistentVolumeClaim(PersistentVolumeClaim),
}

impl ChildResource {
    /// The name of the rendered object.
    pub fn name(&self) -> Option<&str> {
        match self {
            ChildResource::Job(job) => job.metadata.name.as_deref(),
            ChildResource::Service(service) => service.metadata.name.as_deref(),
            ChildResource::ConfigMap(map) => map.metadata.name.as_deref(),
            ChildResource::PersistentVolumeClaim(pvc) => pvc.metadata.name.as_deref(),
        }
    }
}

/// Error produced when a benchmark spec cannot be rendered into resources.
///
/// Rendering errors are configuration errors, the benchmark is failed
/// without retry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RenderError(String);

impl RenderError {
    /// Create a render error with the given human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Error produced when benchmark output does not match the expected format.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ParseError(String);

impl ParseError {
    /// Create a parse error with the given human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// The identity of a benchmark, used to label and locate its resources.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkIdentity<'a> {
    /// The benchmark kind.
    pub kind: &'a str,
    /// The namespace of the benchmark resource.
    pub namespace: &'a str,
    /// The name of the benchmark resource.
    pub name: &'a str,
}

/// Capability surface of a benchmark kind.
///
/// The generic controller drives any type implementing this trait. Adding a
/// new benchmark kind means implementing this trait and registering the kind
/// with the dispatcher in `kinds::run_all` and with `crdgen`.
pub trait Benchmark:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + CustomResourceExt
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The typed result extracted from the benchmark output.
    type BenchResult: Serialize
        + DeserializeOwned
        + JsonSchema
        + Clone
        + fmt::Debug
        + PartialEq
        + Send
        + Sync;

    /// The kind of the custom resource.
    const KIND: &'static str;

    /// The component whose pod logs carry the benchmark result.
    const RESULT_COMPONENT: &'static str;

    /// The spec fields shared by all benchmark kinds.
    fn common(&self) -> &CommonSpec;

    /// The current status of the benchmark, if any has been recorded.
    fn status(&self) -> Option<&BenchmarkStatus<Self::BenchResult>>;

    /// Render the child resources implementing this benchmark.
    ///
    /// This is a pure function of the spec, the priority class and the
    /// process settings so that re-rendering is always safe.
    fn render(
        &self,
        settings: &Settings,
        priority_class_name: &str,
    ) -> Result<Vec<ChildResource>, RenderError>;

    /// Parse the result component's logs into a result and its display summary.
    fn parse(log: &str) -> Result<(Self::BenchResult, String), ParseError>;

    /// The identity labels source for this benchmark instance.
    fn identity(&self) -> BenchmarkIdentity<'_> {
        BenchmarkIdentity {
            kind: Self::KIND,
            namespace: self
                .meta()
                .namespace
                .as_deref()
                .unwrap_or_default(),
            name: self.meta().name.as_deref().unwrap_or_default(),
        }
    }
}
