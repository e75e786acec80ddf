//! Typed model of the Volcano gang-scheduled Job resource.
//!
//! The operator creates these jobs but the Volcano controllers own the CRD,
//! so only the fields the operator reads and writes are modelled.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec of a Volcano batch Job.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "batch.volcano.sh",
    version = "v1alpha1",
    kind = "Job",
    plural = "jobs",
    status = "JobStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// The scheduler that places the job's pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,
    /// The queue the job is submitted to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// The minimum number of pods that must be schedulable for gang admission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_available: Option<i32>,
    /// The number of pod restarts before the job is failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retry: Option<i32>,
    /// The priority class inherited by the job's pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    /// Volcano helper plugins, e.g. `env`, `ssh` and `svc`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<BTreeMap<String, Vec<String>>>,
    /// Job-level lifecycle policies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies: Option<Vec<LifecyclePolicy>>,
    /// The tasks making up the gang.
    pub tasks: Vec<TaskSpec>,
}

/// Maps a job or pod event to an action on the job.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LifecyclePolicy {
    /// The observed event, e.g. `TaskCompleted` or `PodEvicted`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// The action taken, e.g. `CompleteJob` or `RestartJob`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// One named group of identical pods within a job.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// The task name, used in pod names and DNS.
    pub name: String,
    /// The number of pod replicas for the task.
    pub replicas: i32,
    /// Task-level lifecycle policies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies: Option<Vec<LifecyclePolicy>>,
    /// The pod template for the task.
    pub template: PodTemplateSpec,
}

/// Observed state of a Volcano job.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// The aggregated job state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    /// The number of running pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<i32>,
    /// The number of succeeded pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<i32>,
    /// The number of failed pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<i32>,
}

/// The phase of a Volcano job together with the reason for it.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    /// The current phase, one of the `phase` constants in this module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Machine-readable reason for the phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message for the phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Volcano job phases observed by the operator.
pub mod phase {
    /// All tasks completed.
    pub const COMPLETED: &str = "Completed";
    /// The job failed past its retry limit.
    pub const FAILED: &str = "Failed";
    /// The job was aborted by policy or user.
    pub const ABORTED: &str = "Aborted";
    /// The job was terminated in response to an event.
    pub const TERMINATED: &str = "Terminated";
}

/// Volcano lifecycle events and actions used by the gang jobs.
pub mod policy {
    /// Event raised when a task's pods all complete.
    pub const TASK_COMPLETED: &str = "TaskCompleted";
    /// Event raised when a pod of the job is evicted.
    pub const POD_EVICTED: &str = "PodEvicted";
    /// Action that marks the whole job completed.
    pub const COMPLETE_JOB: &str = "CompleteJob";
    /// Action that restarts the whole job.
    pub const RESTART_JOB: &str = "RestartJob";
}

impl Job {
    /// The phase reported by the job state, if any.
    pub fn phase(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.state.as_ref())
            .and_then(|state| state.phase.as_deref())
    }

    /// The last reason/message pair reported by the job state.
    pub fn state_message(&self) -> Option<String> {
        let state = self.status.as_ref()?.state.as_ref()?;
        match (&state.reason, &state.message) {
            (Some(reason), Some(message)) => Some(format!("{reason}: {message}")),
            (Some(reason), None) => Some(reason.clone()),
            (None, Some(message)) => Some(message.clone()),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_serialises_camel_case() {
        let spec = JobSpec {
            scheduler_name: Some("default-scheduler".to_owned()),
            queue: Some("default".to_owned()),
            min_available: Some(2),
            max_retry: Some(3),
            priority_class_name: Some("kube-perftest-ns-bench".to_owned()),
            plugins: Some(BTreeMap::from_iter(vec![
                ("env".to_owned(), vec![]),
                ("svc".to_owned(), vec![]),
            ])),
            policies: Some(vec![LifecyclePolicy {
                event: Some(policy::POD_EVICTED.to_owned()),
                action: Some(policy::RESTART_JOB.to_owned()),
            }]),
            tasks: vec![TaskSpec {
                name: "server".to_owned(),
                replicas: 1,
                policies: None,
                template: Default::default(),
            }],
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["minAvailable"], 2);
        assert_eq!(json["maxRetry"], 3);
        assert_eq!(json["schedulerName"], "default-scheduler");
        assert_eq!(json["policies"][0]["event"], "PodEvicted");
        assert_eq!(json["tasks"][0]["name"], "server");
    }

    #[test]
    fn job_phase_and_message() {
        let mut job = Job::new("test", JobSpec::default());
        assert_eq!(job.phase(), None);
        job.status = Some(JobStatus {
            state: Some(JobState {
                phase: Some(phase::FAILED.to_owned()),
                reason: Some("BackoffLimitExceeded".to_owned()),
                message: Some("task client has failed".to_owned()),
            }),
            ..Default::default()
        });
        assert_eq!(job.phase(), Some("Failed"));
        assert_eq!(
            job.state_message().unwrap(),
            "BackoffLimitExceeded: task client has failed"
        );
    }
}
