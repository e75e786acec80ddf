//! Scheduling fragments for benchmark pods.
//!
//! Two placement policies exist. The spread policy keeps the components of
//! different benchmarks apart while spreading a benchmark's own pods evenly.
//! The exclusive policy, used by the pure network benchmarks, refuses to share
//! a node with any other benchmark pod at all so that measurements are not
//! disturbed.
use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PodAffinityTerm, PodAntiAffinity, TopologySpreadConstraint,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::benchmark::BenchmarkIdentity;
use crate::labels::component_labels;
use crate::settings::Settings;

const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";
const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

// Benchmark pods never land on control plane nodes.
fn worker_nodes_only() -> NodeAffinity {
    NodeAffinity {
        required_during_scheduling_ignored_during_execution: Some(NodeSelector {
            node_selector_terms: vec![NodeSelectorTerm {
                match_expressions: Some(vec![NodeSelectorRequirement {
                    key: CONTROL_PLANE_LABEL.to_owned(),
                    operator: "DoesNotExist".to_owned(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
        }),
        ..Default::default()
    }
}

/// Affinity repelling the pods of any other benchmark while allowing this
/// benchmark's own pods to share nodes.
pub fn spread_affinity(settings: &Settings, id: &BenchmarkIdentity<'_>) -> Affinity {
    Affinity {
        node_affinity: Some(worker_nodes_only()),
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_expressions: Some(vec![
                        LabelSelectorRequirement {
                            key: settings.kind_label(),
                            operator: "Exists".to_owned(),
                            ..Default::default()
                        },
                        LabelSelectorRequirement {
                            key: settings.name_label(),
                            operator: "NotIn".to_owned(),
                            values: Some(vec![id.name.to_owned()]),
                        },
                    ]),
                    ..Default::default()
                }),
                topology_key: HOSTNAME_TOPOLOGY_KEY.to_owned(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Spread constraints keeping the replicas of one component evenly distributed
/// across nodes, with a maximum skew of one.
pub fn spread_constraints(
    settings: &Settings,
    id: &BenchmarkIdentity<'_>,
    component: &str,
) -> Vec<TopologySpreadConstraint> {
    vec![TopologySpreadConstraint {
        max_skew: 1,
        topology_key: HOSTNAME_TOPOLOGY_KEY.to_owned(),
        when_unsatisfiable: "ScheduleAnyway".to_owned(),
        label_selector: Some(LabelSelector {
            match_labels: Some(component_labels(
                settings,
                id.kind,
                id.namespace,
                id.name,
                component,
            )),
            ..Default::default()
        }),
        ..Default::default()
    }]
}

/// Affinity refusing to share a node with any pod of any benchmark,
/// including this one's.
pub fn exclusive_affinity(settings: &Settings) -> Affinity {
    Affinity {
        node_affinity: Some(worker_nodes_only()),
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_expressions: Some(vec![LabelSelectorRequirement {
                        key: settings.kind_label(),
                        operator: "Exists".to_owned(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                topology_key: HOSTNAME_TOPOLOGY_KEY.to_owned(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
