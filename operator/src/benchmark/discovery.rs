//! The pod rendezvous protocol.
//!
//! Multi-pod benchmarks need to reach their peers by name before the peer IPs
//! are known at admission time. Each benchmark gets a discovery config map
//! listing the predicted DNS name of every task pod and a `hosts` key that
//! starts empty. Pods mount the `hosts` key at `/etc/hosts` and the whole map
//! at a well-known directory. Once every participating pod has an IP, the
//! controller writes the full hosts table into the `hosts` key; the
//! `wait-hosts` init container (see the runner crate) blocks until the table
//! is visible and forces a container restart when the kubelet mounted the
//! file before it was populated.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapVolumeSource, Container, Pod, SecurityContext, Service,
    ServiceSpec, Volume, VolumeMount,
};
use kube::{
    api::{ListParams, Patch, PatchParams},
    core::ObjectMeta,
    Api, ResourceExt,
};
use tracing::debug;

use crate::benchmark::BenchmarkIdentity;
use crate::context::{Clock, Context};
use crate::labels::{self, identity_labels};
use crate::settings::Settings;
use crate::CONTROLLER_NAME;

/// The config map key holding the rendered hosts file.
pub const HOSTS_KEY: &str = "hosts";

/// The config map key listing the DNS names of every pod in the benchmark.
pub const ALL_HOSTS_KEY: &str = "all-hosts";

/// Where the discovery config map is mounted in benchmark pods.
pub const DISCOVERY_MOUNT_PATH: &str = "/perftest/discovery";

const DISCOVERY_VOLUME_NAME: &str = "discovery";
const RUNNER_COMMAND: &str = "/usr/bin/perftest-runner";

/// The name of the discovery config map for a benchmark.
pub fn config_map_name(benchmark: &str) -> String {
    format!("{benchmark}-discovery")
}

/// The config map key listing the DNS names of one task's pods.
pub fn task_hosts_key(task: &str) -> String {
    format!("{task}-hosts")
}

/// The predicted DNS name of one task pod.
///
/// Pod `<i>` of task `<task>` is named `<benchmark>-<task>-<i>` by the gang
/// scheduler and resolvable through the benchmark's headless service.
pub fn dns_name(benchmark: &str, task: &str, ordinal: i32) -> String {
    format!("{benchmark}-{task}-{ordinal}.{benchmark}")
}

/// The predicted DNS names for every replica of the given tasks.
pub fn dns_names(benchmark: &str, tasks: &[(&str, i32)]) -> Vec<String> {
    tasks
        .iter()
        .flat_map(|(task, replicas)| {
            (0..*replicas).map(move |ordinal| dns_name(benchmark, task, ordinal))
        })
        .collect()
}

/// The discovery config map for a benchmark, with an empty `hosts` key.
pub fn config_map(
    settings: &Settings,
    id: &BenchmarkIdentity<'_>,
    tasks: &[(&str, i32)],
) -> ConfigMap {
    let mut data = BTreeMap::from_iter(vec![
        (HOSTS_KEY.to_owned(), String::new()),
        (ALL_HOSTS_KEY.to_owned(), dns_names(id.name, tasks).join("\n")),
    ]);
    for (task, replicas) in tasks {
        data.insert(
            task_hosts_key(task),
            dns_names(id.name, &[(task, *replicas)]).join("\n"),
        );
    }
    let mut cm_labels = identity_labels(settings, id.kind, id.namespace, id.name);
    cm_labels.insert(settings.hosts_from_label(), id.name.to_owned());
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(id.name)),
            labels: Some(cm_labels),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// The headless service giving benchmark pods stable DNS names.
///
/// Not-ready addresses are published because the init containers keep pods
/// out of readiness until their peers resolve, which would otherwise deadlock
/// the rendezvous.
pub fn headless_service(settings: &Settings, id: &BenchmarkIdentity<'_>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(id.name.to_owned()),
            labels: Some(identity_labels(settings, id.kind, id.namespace, id.name)),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_owned()),
            publish_not_ready_addresses: Some(true),
            selector: Some(identity_labels(settings, id.kind, id.namespace, id.name)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Render the hosts file from the discovered pod addresses.
///
/// Returns an empty string until an address is known for every expected DNS
/// name, consumers treat a partial table the same as no table.
pub fn hosts_file(
    settings: &Settings,
    expected: &[String],
    addresses: &BTreeMap<String, String>,
) -> String {
    if expected.is_empty() || !expected.iter().all(|dns| addresses.contains_key(dns)) {
        return String::new();
    }
    let mut hosts = settings.default_hosts.clone();
    for dns in expected {
        let ip = &addresses[dns];
        let short = dns.split('.').next().unwrap_or(dns);
        hosts.push_str(&format!("\n{ip}\t{dns}\t{short}"));
    }
    hosts
}

/// Recompute the hosts table from the benchmark's pods and patch it into the
/// discovery config map.
///
/// The update is last-write-wins; consumers re-probe via the init container
/// loop so eventual consistency is sufficient.
pub async fn update_hosts(
    cx: &Context<impl Clock>,
    id: &BenchmarkIdentity<'_>,
) -> Result<(), kube::Error> {
    let config_maps: Api<ConfigMap> = Api::namespaced(cx.k_client.clone(), id.namespace);
    let Some(config_map) = config_maps.get_opt(&config_map_name(id.name)).await? else {
        return Ok(());
    };
    let data = config_map.data.unwrap_or_default();
    let expected: Vec<String> = data
        .get(ALL_HOSTS_KEY)
        .map(|names| names.lines().map(|l| l.trim().to_owned()).collect())
        .unwrap_or_default();

    let pods: Api<Pod> = Api::namespaced(cx.k_client.clone(), id.namespace);
    let selector = labels::selector(&identity_labels(
        &cx.settings,
        id.kind,
        id.namespace,
        id.name,
    ));
    let pod_list = pods.list(&ListParams::default().labels(&selector)).await?;

    let mut addresses = BTreeMap::new();
    for pod in pod_list.items {
        let Some(ip) = pod.status.as_ref().and_then(|s| s.pod_ip.clone()) else {
            continue;
        };
        addresses.insert(format!("{}.{}", pod.name_any(), id.name), ip);
    }

    let hosts = hosts_file(&cx.settings, &expected, &addresses);
    if data.get(HOSTS_KEY).map(String::as_str) == Some(hosts.as_str()) {
        return Ok(());
    }
    debug!(
        benchmark = id.name,
        populated = !hosts.is_empty(),
        "updating discovery hosts"
    );
    config_maps
        .patch(
            &config_map_name(id.name),
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(serde_json::json!({ "data": { HOSTS_KEY: hosts } })),
        )
        .await?;
    Ok(())
}

/// The volume exposing the discovery config map to a pod.
pub fn discovery_volume(benchmark: &str) -> Volume {
    Volume {
        name: DISCOVERY_VOLUME_NAME.to_owned(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map_name(benchmark)),
            default_mode: Some(0o644),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Mounts for the discovery volume: the `hosts` key over `/etc/hosts` and the
/// whole map at the discovery directory.
pub fn discovery_volume_mounts() -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: DISCOVERY_VOLUME_NAME.to_owned(),
            mount_path: "/etc/hosts".to_owned(),
            sub_path: Some(HOSTS_KEY.to_owned()),
            ..Default::default()
        },
        VolumeMount {
            name: DISCOVERY_VOLUME_NAME.to_owned(),
            mount_path: DISCOVERY_MOUNT_PATH.to_owned(),
            ..Default::default()
        },
    ]
}

/// Init container blocking pod start until every peer listed under the given
/// config map key has a record in `/etc/hosts`.
pub fn wait_for_hosts_container(settings: &Settings, expected_key: &str) -> Container {
    Container {
        name: "wait-for-hosts".to_owned(),
        image: Some(settings.discovery_container_image.clone()),
        image_pull_policy: Some(settings.default_image_pull_policy.to_string()),
        command: Some(vec![
            RUNNER_COMMAND.to_owned(),
            "wait-hosts".to_owned(),
            "--etc-hosts".to_owned(),
            "/etc/hosts".to_owned(),
            "--discovery-hosts".to_owned(),
            format!("{DISCOVERY_MOUNT_PATH}/{HOSTS_KEY}"),
            "--expected-file".to_owned(),
            format!("{DISCOVERY_MOUNT_PATH}/{expected_key}"),
        ]),
        volume_mounts: Some(discovery_volume_mounts()),
        ..Default::default()
    }
}

/// Init container blocking pod start until the given TCP port answers on every
/// peer listed under the given config map key.
pub fn wait_for_ports_container(settings: &Settings, expected_key: &str, port: i32) -> Container {
    Container {
        name: "wait-for-ports".to_owned(),
        image: Some(settings.discovery_container_image.clone()),
        image_pull_policy: Some(settings.default_image_pull_policy.to_string()),
        command: Some(vec![
            RUNNER_COMMAND.to_owned(),
            "wait-ports".to_owned(),
            "--port".to_owned(),
            port.to_string(),
            "--expected-file".to_owned(),
            format!("{DISCOVERY_MOUNT_PATH}/{expected_key}"),
        ]),
        volume_mounts: Some(discovery_volume_mounts()),
        ..Default::default()
    }
}

/// Init container setting the MTU on the benchmark network interface.
pub fn mtu_init_container(settings: &Settings, mtu: i32) -> Container {
    Container {
        name: "set-mtu".to_owned(),
        image: Some(settings.discovery_container_image.clone()),
        image_pull_policy: Some(settings.default_image_pull_policy.to_string()),
        command: Some(vec![
            "sh".to_owned(),
            "-c".to_owned(),
            format!("ip link set dev eth0 mtu {mtu}"),
        ]),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["NET_ADMIN".to_owned(), "NET_RAW".to_owned()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    fn id<'a>() -> BenchmarkIdentity<'a> {
        BenchmarkIdentity {
            kind: "IPerf",
            namespace: "default",
            name: "bench",
        }
    }

    #[test]
    fn config_map_lists_every_task_pod() {
        let settings = Settings::default();
        let cm = config_map(&settings, &id(), &[("server", 1), ("client", 2)]);
        assert_eq!(cm.metadata.name.as_deref(), Some("bench-discovery"));
        let data = cm.data.unwrap();
        assert_eq!(data.get(HOSTS_KEY).map(String::as_str), Some(""));
        assert_eq!(
            data.get(ALL_HOSTS_KEY).map(String::as_str),
            Some("bench-server-0.bench\nbench-client-0.bench\nbench-client-1.bench")
        );
        assert_eq!(
            data.get("server-hosts").map(String::as_str),
            Some("bench-server-0.bench")
        );
        assert_eq!(
            data.get("client-hosts").map(String::as_str),
            Some("bench-client-0.bench\nbench-client-1.bench")
        );
        let labels = cm.metadata.labels.unwrap();
        assert_eq!(
            labels.get("perftest.stackhpc.com/hosts-from"),
            Some(&"bench".to_owned())
        );
    }

    #[test]
    fn hosts_file_empty_until_roster_complete() {
        let settings = Settings::default();
        let expected = vec![
            "bench-server-0.bench".to_owned(),
            "bench-client-0.bench".to_owned(),
        ];
        let mut addresses = BTreeMap::new();
        addresses.insert("bench-server-0.bench".to_owned(), "10.0.0.5".to_owned());
        assert_eq!(hosts_file(&settings, &expected, &addresses), "");

        addresses.insert("bench-client-0.bench".to_owned(), "10.0.0.6".to_owned());
        expect![[r#"
            127.0.0.1  localhost
            ::1        localhost ip6-localhost ip6-loopback
            10.0.0.5	bench-server-0.bench	bench-server-0
            10.0.0.6	bench-client-0.bench	bench-client-0"#]]
        .assert_eq(&hosts_file(&settings, &expected, &addresses));
    }

    #[test]
    fn headless_service_selects_identity_labels() {
        let settings = Settings::default();
        let service = headless_service(&settings, &id());
        let spec = service.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        let selector = spec.selector.unwrap();
        assert_eq!(
            selector.get("perftest.stackhpc.com/benchmark-name"),
            Some(&"bench".to_owned())
        );
    }

    #[test]
    fn hosts_mount_shadows_etc_hosts() {
        let mounts = discovery_volume_mounts();
        assert_eq!(mounts[0].mount_path, "/etc/hosts");
        assert_eq!(mounts[0].sub_path.as_deref(), Some(HOSTS_KEY));
        assert_eq!(mounts[1].mount_path, DISCOVERY_MOUNT_PATH);
    }
}
