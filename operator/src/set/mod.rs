//! Parameter sweeps over a benchmark template.
pub mod controller;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::benchmark::RenderError;
use crate::API_GROUP;

/// The shape of the benchmark to create for each permutation.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSetTemplate {
    /// The API version of the benchmarks to create.
    pub api_version: String,
    /// The kind of the benchmarks to create.
    pub kind: String,
    /// The fixed part of the spec for the benchmarks.
    #[serde(default = "empty_object")]
    pub spec: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// The permutations to sweep over.
///
/// With no permutations at all, a single empty permutation is produced.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSetPermutations {
    /// Permutations generated from the cross-product of the given keys, in
    /// the order the keys appear.
    #[serde(default)]
    pub product: Map<String, Value>,
    /// Explicit permutations, appended after the product.
    #[serde(default)]
    pub explicit: Vec<Map<String, Value>>,
}

impl BenchmarkSetPermutations {
    /// All the permutations, in their deterministic order.
    pub fn permutations(&self) -> Vec<Map<String, Value>> {
        // The cross product of an empty product is the single empty permutation
        let mut acc: Vec<Map<String, Value>> = vec![Map::new()];
        for (key, values) in &self.product {
            let values: Vec<Value> = match values {
                Value::Array(values) => values.clone(),
                other => vec![other.clone()],
            };
            let mut next = Vec::with_capacity(acc.len() * values.len());
            for permutation in &acc {
                for value in &values {
                    let mut permutation = permutation.clone();
                    permutation.insert(key.clone(), value.clone());
                    next.push(permutation);
                }
            }
            acc = next;
        }
        acc.extend(self.explicit.iter().cloned());
        acc
    }
}

/// Defines the parameters for a benchmark set.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "perftest.stackhpc.com",
    version = "v1alpha1",
    kind = "BenchmarkSet",
    plural = "benchmarksets",
    status = "BenchmarkSetStatus",
    namespaced,
    printcolumn = r#"{"name":"Count","type":"integer","jsonPath":".status.count"}"#,
    printcolumn = r#"{"name":"Succeeded","type":"integer","jsonPath":".status.succeeded"}"#,
    printcolumn = r#"{"name":"Failed","type":"integer","jsonPath":".status.failed"}"#,
    printcolumn = r#"{"name":"Finished","type":"date","jsonPath":".status.finishedAt"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSetSpec {
    /// The template for the benchmarks in the set.
    pub template: BenchmarkSetTemplate,
    /// The number of repetitions of each permutation.
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    /// The permutations to sweep over.
    #[serde(default)]
    pub permutations: BenchmarkSetPermutations,
}

fn default_repetitions() -> u32 {
    1
}

/// Current status of a benchmark set.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct BenchmarkSetStatus {
    /// The number of benchmarks in the set. Frozen at first reconcile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// The number of benchmarks that completed successfully.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<u64>,
    /// The number of benchmarks that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    /// The time at which the set was first reconciled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Time>,
    /// The time at which the last benchmark finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Time>,
}

/// One concrete benchmark manifest produced by expanding a set.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildManifest {
    /// The name of the benchmark, `<set>-<zero-padded-index>`.
    pub name: String,
    /// The API version of the benchmark.
    pub api_version: String,
    /// The kind of the benchmark.
    pub kind: String,
    /// The merged spec of the benchmark.
    pub spec: Value,
}

/// Merge a permutation into a template value.
///
/// Maps merge recursively; scalars and sequences in the permutation replace
/// the template value outright; keys absent from the permutation keep their
/// template value. Lists are never concatenated.
pub fn deep_merge(template: &Value, overlay: &Value) -> Value {
    match (template, overlay) {
        (Value::Object(template), Value::Object(overlay)) => {
            let mut merged = template.clone();
            for (key, value) in overlay {
                match merged.get(key) {
                    Some(existing) => {
                        let merged_value = deep_merge(existing, value);
                        merged.insert(key.clone(), merged_value);
                    }
                    None => {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        (template, Value::Null) => template.clone(),
        (_, overlay) => overlay.clone(),
    }
}

/// Expand a benchmark set into its child manifests.
///
/// A pure function of the spec: expanding the same set twice yields identical
/// manifests in the same order. Children are named `<set>-<index>` with the
/// index zero-padded to the width of the largest index.
pub fn expand(set: &BenchmarkSet) -> Result<Vec<ChildManifest>, RenderError> {
    let template = &set.spec.template;
    if !template
        .api_version
        .starts_with(&format!("{API_GROUP}/"))
    {
        return Err(RenderError::new(format!(
            "template apiVersion must be in the {API_GROUP} group"
        )));
    }
    if set.spec.repetitions == 0 {
        return Err(RenderError::new("repetitions must be at least 1"));
    }
    let set_name = set
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| RenderError::new("benchmark set has no name"))?;

    let permutations = set.spec.permutations.permutations();
    let repetitions = set.spec.repetitions as usize;
    let count = permutations.len() * repetitions;
    // Width of the largest index, so children sort in creation order
    let width = (count.saturating_sub(1)).to_string().len();

    let mut manifests = Vec::with_capacity(count);
    for (permutation_index, permutation) in permutations.iter().enumerate() {
        let overlay = Value::Object(permutation.clone());
        let spec = deep_merge(&template.spec, &overlay);
        for repetition in 0..repetitions {
            let index = permutation_index * repetitions + repetition;
            manifests.push(ChildManifest {
                name: format!("{set_name}-{index:0width$}"),
                api_version: template.api_version.clone(),
                kind: template.kind.clone(),
                spec: spec.clone(),
            });
        }
    }
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(spec: BenchmarkSetSpec) -> BenchmarkSet {
        let mut set = BenchmarkSet::new("sweep", spec);
        set.metadata.namespace = Some("default".to_owned());
        set
    }

    fn iperf_template(spec: Value) -> BenchmarkSetTemplate {
        BenchmarkSetTemplate {
            api_version: "perftest.stackhpc.com/v1alpha1".to_owned(),
            kind: "IPerf".to_owned(),
            spec,
        }
    }

    fn product(entries: Vec<(&str, Value)>) -> Map<String, Value> {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect()
    }

    #[test]
    fn expansion_is_deterministic() {
        let set = set(BenchmarkSetSpec {
            template: iperf_template(json!({"duration": 30})),
            repetitions: 3,
            permutations: BenchmarkSetPermutations {
                product: product(vec![
                    ("streams", json!([1, 2, 4])),
                    ("hostNetwork", json!([true, false])),
                ]),
                explicit: vec![product(vec![("streams", json!(8))])],
            },
        });
        let first = expand(&set).unwrap();
        let second = expand(&set).unwrap();
        assert_eq!(first, second);
        // 3 * (3 * 2 + 1)
        assert_eq!(first.len(), 21);
    }

    #[test]
    fn scenario_product_with_repetitions() {
        // template IPerf{duration:30}, product {streams:[1,2]}, repetitions 2
        let set = set(BenchmarkSetSpec {
            template: iperf_template(json!({"duration": 30})),
            repetitions: 2,
            permutations: BenchmarkSetPermutations {
                product: product(vec![("streams", json!([1, 2]))]),
                explicit: vec![],
            },
        });
        let manifests = expand(&set).unwrap();
        assert_eq!(manifests.len(), 4);
        let names: Vec<&str> = manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["sweep-0", "sweep-1", "sweep-2", "sweep-3"]);
        let streams: Vec<i64> = manifests
            .iter()
            .map(|m| m.spec["streams"].as_i64().unwrap())
            .collect();
        assert_eq!(streams, vec![1, 1, 2, 2]);
        // The template value survives in every child
        assert!(manifests.iter().all(|m| m.spec["duration"] == json!(30)));
    }

    #[test]
    fn empty_permutations_yield_repetitions_children() {
        let set = set(BenchmarkSetSpec {
            template: iperf_template(json!({"duration": 30, "streams": 1})),
            repetitions: 5,
            permutations: BenchmarkSetPermutations::default(),
        });
        let manifests = expand(&set).unwrap();
        assert_eq!(manifests.len(), 5);
        assert_eq!(manifests[0].name, "sweep-0");
        assert_eq!(manifests[4].name, "sweep-4");
    }

    #[test]
    fn explicit_permutations_follow_the_product() {
        let set = set(BenchmarkSetSpec {
            template: iperf_template(json!({})),
            repetitions: 1,
            permutations: BenchmarkSetPermutations {
                product: product(vec![("streams", json!([1]))]),
                explicit: vec![
                    product(vec![("streams", json!(16))]),
                    product(vec![("streams", json!(32))]),
                ],
            },
        });
        let manifests = expand(&set).unwrap();
        let streams: Vec<i64> = manifests
            .iter()
            .map(|m| m.spec["streams"].as_i64().unwrap())
            .collect();
        assert_eq!(streams, vec![1, 16, 32]);
    }

    #[test]
    fn names_are_zero_padded_to_the_index_width() {
        let set = set(BenchmarkSetSpec {
            template: iperf_template(json!({})),
            repetitions: 12,
            permutations: BenchmarkSetPermutations::default(),
        });
        let manifests = expand(&set).unwrap();
        assert_eq!(manifests[0].name, "sweep-00");
        assert_eq!(manifests[9].name, "sweep-09");
        assert_eq!(manifests[11].name, "sweep-11");
    }

    #[test]
    fn merge_replaces_scalars_and_sequences_and_recurses_maps() {
        let template = json!({
            "duration": 30,
            "extraArgs": ["-a"],
            "resources": {
                "requests": {"cpu": "1", "memory": "1Gi"},
            },
        });
        let overlay = json!({
            "duration": 60,
            "extraArgs": ["-b", "-c"],
            "resources": {
                "requests": {"cpu": "2"},
            },
        });
        let merged = deep_merge(&template, &overlay);
        assert_eq!(merged["duration"], json!(60));
        // Sequences replace, they are never concatenated
        assert_eq!(merged["extraArgs"], json!(["-b", "-c"]));
        // Nested maps merge, untouched keys survive
        assert_eq!(merged["resources"]["requests"]["cpu"], json!("2"));
        assert_eq!(merged["resources"]["requests"]["memory"], json!("1Gi"));
    }

    #[test]
    fn foreign_template_group_is_rejected() {
        let set = set(BenchmarkSetSpec {
            template: BenchmarkSetTemplate {
                api_version: "batch/v1".to_owned(),
                kind: "Job".to_owned(),
                spec: json!({}),
            },
            repetitions: 1,
            permutations: BenchmarkSetPermutations::default(),
        });
        assert!(expand(&set).is_err());
    }
}
