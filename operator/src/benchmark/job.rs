//! Gang job scaffolding shared by every benchmark kind.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, PodSpec, PodTemplateSpec, TopologySpreadConstraint, Volume,
};
use kube::core::ObjectMeta;

use crate::benchmark::{BenchmarkIdentity, CommonSpec};
use crate::labels::component_labels;
use crate::settings::Settings;
use crate::volcano;

/// Annotation attaching pods to a Multus network.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Number of job restarts before Volcano fails the job.
pub const MAX_RETRY: i32 = 3;

/// The gang job skeleton for a benchmark.
///
/// Tasks are supplied by the kind; the skeleton carries the scheduler, queue
/// and priority class from the process settings, the standard helper plugins
/// and the restart-on-eviction policy. The task whose completion means the
/// benchmark is done must carry a `TaskCompleted -> CompleteJob` policy, see
/// [`complete_job_when_done`].
pub fn gang_job(
    settings: &Settings,
    priority_class_name: &str,
    tasks: Vec<volcano::TaskSpec>,
) -> volcano::JobSpec {
    let min_available = tasks.iter().map(|task| task.replicas).sum();
    volcano::JobSpec {
        scheduler_name: Some(settings.scheduler_name.clone()),
        queue: Some(settings.queue_name.clone()),
        min_available: Some(min_available),
        max_retry: Some(MAX_RETRY),
        priority_class_name: Some(priority_class_name.to_owned()),
        plugins: Some(BTreeMap::from_iter(vec![
            ("env".to_owned(), vec![]),
            ("ssh".to_owned(), vec![]),
            ("svc".to_owned(), vec![]),
        ])),
        policies: Some(vec![volcano::LifecyclePolicy {
            event: Some(volcano::policy::POD_EVICTED.to_owned()),
            action: Some(volcano::policy::RESTART_JOB.to_owned()),
        }]),
        tasks,
    }
}

/// Task policy completing the whole job when this task's pods finish.
pub fn complete_job_when_done() -> Vec<volcano::LifecyclePolicy> {
    vec![volcano::LifecyclePolicy {
        event: Some(volcano::policy::TASK_COMPLETED.to_owned()),
        action: Some(volcano::policy::COMPLETE_JOB.to_owned()),
    }]
}

/// Pieces of one task's pod template that vary per kind.
pub struct TaskPod {
    /// The task/component name.
    pub component: String,
    /// Init containers run before the main container, in order.
    pub init_containers: Vec<Container>,
    /// The main containers of the pod.
    pub containers: Vec<Container>,
    /// Extra volumes mounted by the containers.
    pub volumes: Vec<Volume>,
    /// The placement policy for the pod.
    pub affinity: Affinity,
    /// Spread constraints, used by the spread placement policy.
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,
}

/// Assemble the pod template for one task of a benchmark.
///
/// Applies the identity and component labels, the network annotation or host
/// networking, the MTU init container and the subdomain that makes the
/// headless service resolve pod names.
pub fn task_template(
    settings: &Settings,
    id: &BenchmarkIdentity<'_>,
    common: &CommonSpec,
    task: TaskPod,
) -> PodTemplateSpec {
    let mut annotations = BTreeMap::new();
    if !common.host_network {
        if let Some(network_name) = &common.network_name {
            annotations.insert(NETWORKS_ANNOTATION.to_owned(), network_name.clone());
        }
    }
    let mut init_containers = Vec::new();
    if let Some(mtu) = common.mtu {
        init_containers.push(super::discovery::mtu_init_container(settings, mtu));
    }
    init_containers.extend(task.init_containers);

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(component_labels(
                settings,
                id.kind,
                id.namespace,
                id.name,
                &task.component,
            )),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            subdomain: Some(id.name.to_owned()),
            host_network: common.host_network.then_some(true),
            dns_policy: common
                .host_network
                .then(|| "ClusterFirstWithHostNet".to_owned()),
            init_containers: (!init_containers.is_empty()).then_some(init_containers),
            containers: task.containers,
            volumes: (!task.volumes.is_empty()).then_some(task.volumes),
            affinity: Some(task.affinity),
            topology_spread_constraints: (!task.topology_spread_constraints.is_empty())
                .then_some(task.topology_spread_constraints),
            restart_policy: Some("Never".to_owned()),
            ..Default::default()
        }),
    }
}
