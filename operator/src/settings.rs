//! Process-wide configuration for the operator.
//!
//! Settings are loaded from a YAML file and every field can be overridden from
//! the environment using the `KUBE_PERFTEST__` prefix, with `__` separating
//! nested keys, e.g. `KUBE_PERFTEST__PRIORITY_WINDOW__MAX`.
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::benchmark::ImagePullPolicy;

/// Environment variable naming the settings file.
pub const CONFIG_PATH_ENV: &str = "KUBE_PERFTEST_CONFIG";

/// Default path of the settings file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kube-perftest/config.yaml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "KUBE_PERFTEST__";

const DEFAULT_HOSTS: &str =
    "127.0.0.1  localhost\n::1        localhost ip6-localhost ip6-loopback";

/// The window of numeric priorities available to benchmark priority classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PriorityWindow {
    /// The value handed to the first benchmark ever seen.
    pub max: i32,
    /// The lowest value the allocator will hand out.
    pub min: i32,
}

impl Default for PriorityWindow {
    fn default() -> Self {
        // Negative priorities so that benchmark pods never preempt other workloads
        Self {
            max: -1,
            min: -1_000_000,
        }
    }
}

/// Top-level configuration for the operator process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The API group used when deriving default label names.
    pub api_group: String,
    /// The prefix for default benchmark images.
    pub default_image_prefix: String,
    /// The tag for default benchmark images.
    pub default_image_tag: String,
    /// The pull policy used when a benchmark does not specify one.
    pub default_image_pull_policy: ImagePullPolicy,
    /// The scheduler that benchmark pods are submitted to.
    ///
    /// Pod preemption combined with (anti-)affinity is unreliable in the
    /// Volcano scheduler, so the default scheduler is used. Volcano still
    /// provides gang admission and job lifecycle events.
    pub scheduler_name: String,
    /// The Volcano queue that benchmark jobs are submitted to.
    pub queue_name: String,
    /// The image providing the `perftest-runner` binary for init containers.
    pub discovery_container_image: String,
    /// The prefix used when generating cluster-scoped resource names.
    pub resource_prefix: String,
    /// The stock entries at the top of every generated hosts file.
    pub default_hosts: String,
    /// The window of numeric priorities for benchmark priority classes.
    pub priority_window: PriorityWindow,
    /// Timeout for individual API server calls, in seconds.
    pub api_timeout_secs: u64,
    /// Timeout for fetching pod logs, in seconds.
    pub log_timeout_secs: u64,
    kind_label: Option<String>,
    namespace_label: Option<String>,
    name_label: Option<String>,
    component_label: Option<String>,
    hosts_from_label: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_group: crate::API_GROUP.to_owned(),
            default_image_prefix: "ghcr.io/stackhpc/kube-perftest-".to_owned(),
            default_image_tag: "latest".to_owned(),
            default_image_pull_policy: ImagePullPolicy::IfNotPresent,
            scheduler_name: "default-scheduler".to_owned(),
            queue_name: "default".to_owned(),
            discovery_container_image: "ghcr.io/stackhpc/kube-perftest-runner:latest"
                .to_owned(),
            resource_prefix: "kube-perftest-".to_owned(),
            default_hosts: DEFAULT_HOSTS.to_owned(),
            priority_window: PriorityWindow::default(),
            api_timeout_secs: 30,
            log_timeout_secs: 60,
            kind_label: None,
            namespace_label: None,
            name_label: None,
            component_label: None,
            hosts_from_label: None,
        }
    }
}

impl Settings {
    /// Load settings from the configured file and the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::load_from(Path::new(&path), std::env::vars())
    }

    /// Load settings from the given file, then apply environment overrides.
    ///
    /// A missing file is not an error, all fields have defaults.
    pub fn load_from(
        path: &Path,
        vars: impl Iterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut value = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            serde_yaml::Value::Mapping(Default::default())
        };
        apply_env_overrides(&mut value, vars);
        serde_yaml::from_value(value).context("invalid settings")
    }

    /// Label specifying the kind of the benchmark that a resource belongs to.
    pub fn kind_label(&self) -> String {
        self.kind_label
            .clone()
            .unwrap_or_else(|| format!("{}/benchmark-kind", self.api_group))
    }

    /// Label specifying the namespace of the benchmark that a resource belongs to.
    pub fn namespace_label(&self) -> String {
        self.namespace_label
            .clone()
            .unwrap_or_else(|| format!("{}/benchmark-namespace", self.api_group))
    }

    /// Label specifying the name of the benchmark that a resource belongs to.
    pub fn name_label(&self) -> String {
        self.name_label
            .clone()
            .unwrap_or_else(|| format!("{}/benchmark-name", self.api_group))
    }

    /// Label specifying the component of the benchmark that a resource belongs to.
    pub fn component_label(&self) -> String {
        self.component_label
            .clone()
            .unwrap_or_else(|| format!("{}/benchmark-component", self.api_group))
    }

    /// Label indicating that a config map is populated with discovered hosts.
    pub fn hosts_from_label(&self) -> String {
        self.hosts_from_label
            .clone()
            .unwrap_or_else(|| format!("{}/hosts-from", self.api_group))
    }

    /// The default image for a benchmark kind, e.g. `iperf`.
    pub fn default_image(&self, name: &str) -> String {
        format!(
            "{}{}:{}",
            self.default_image_prefix, name, self.default_image_tag
        )
    }
}

// Apply `KUBE_PERFTEST__`-prefixed environment variables onto the YAML value,
// creating nested mappings as needed. Values are parsed as YAML scalars so
// numbers and booleans round-trip, anything unparseable stays a string.
fn apply_env_overrides(
    value: &mut serde_yaml::Value,
    vars: impl Iterator<Item = (String, String)>,
) {
    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let path: Vec<String> = rest.split("__").map(|s| s.to_lowercase()).collect();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&raw)
            .unwrap_or(serde_yaml::Value::String(raw.clone()));
        let mut current = &mut *value;
        for segment in &path[..path.len() - 1] {
            if !current.is_mapping() {
                *current = serde_yaml::Value::Mapping(Default::default());
            }
            let map = current.as_mapping_mut().expect("mapping");
            current = map
                .entry(serde_yaml::Value::String(segment.clone()))
                .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
        }
        if !current.is_mapping() {
            *current = serde_yaml::Value::Mapping(Default::default());
        }
        current.as_mapping_mut().expect("mapping").insert(
            serde_yaml::Value::String(path[path.len() - 1].clone()),
            parsed,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.default_image_tag, "latest");
        assert_eq!(settings.scheduler_name, "default-scheduler");
        assert_eq!(settings.priority_window.max, -1);
        assert_eq!(
            settings.kind_label(),
            "perftest.stackhpc.com/benchmark-kind"
        );
        assert_eq!(
            settings.default_image("iperf"),
            "ghcr.io/stackhpc/kube-perftest-iperf:latest"
        );
    }

    #[test]
    fn env_overrides_flat_and_nested() {
        let vars = vec![
            (
                "KUBE_PERFTEST__DEFAULT_IMAGE_TAG".to_owned(),
                "v1.2.3".to_owned(),
            ),
            (
                "KUBE_PERFTEST__PRIORITY_WINDOW__MAX".to_owned(),
                "-10".to_owned(),
            ),
            ("UNRELATED".to_owned(), "ignored".to_owned()),
        ];
        let settings =
            Settings::load_from(Path::new("/nonexistent"), vars.into_iter()).unwrap();
        assert_eq!(settings.default_image_tag, "v1.2.3");
        assert_eq!(settings.priority_window.max, -10);
        // Untouched fields keep their defaults
        assert_eq!(settings.priority_window.min, -1_000_000);
        assert_eq!(settings.queue_name, "default");
    }

    #[test]
    fn env_override_label_names() {
        let vars = vec![(
            "KUBE_PERFTEST__KIND_LABEL".to_owned(),
            "example.org/kind".to_owned(),
        )];
        let settings =
            Settings::load_from(Path::new("/nonexistent"), vars.into_iter()).unwrap();
        assert_eq!(settings.kind_label(), "example.org/kind");
        // The other labels still derive from the API group
        assert_eq!(
            settings.component_label(),
            "perftest.stackhpc.com/benchmark-component"
        );
    }
}
