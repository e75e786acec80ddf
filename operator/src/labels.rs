use std::collections::BTreeMap;

use crate::settings::Settings;

/// Managed by label selector
pub const MANAGED_BY_LABEL_SELECTOR: &str = "managed-by=kube-perftest";

/// Labels that indicate the resource is managed by the kube-perftest operator.
pub fn managed_labels() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from_iter(vec![(
        "managed-by".to_owned(),
        "kube-perftest".to_owned(),
    )]))
}

/// Extend labels with the managed labels, the managed labels win on conflict.
pub fn managed_labels_extend(
    labels: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let mut labels = labels.unwrap_or_default();
    labels.extend(managed_labels().unwrap_or_default());
    Some(labels)
}

/// The identity labels for a benchmark.
///
/// These labels are the only channel used to locate and filter the resources
/// that belong to a benchmark.
pub fn identity_labels(
    settings: &Settings,
    kind: &str,
    namespace: &str,
    name: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from_iter(vec![
        (settings.kind_label(), kind.to_owned()),
        (settings.namespace_label(), namespace.to_owned()),
        (settings.name_label(), name.to_owned()),
    ])
}

/// The identity labels for a benchmark plus the component label for one of its tasks.
pub fn component_labels(
    settings: &Settings,
    kind: &str,
    namespace: &str,
    name: &str,
    component: &str,
) -> BTreeMap<String, String> {
    let mut labels = identity_labels(settings, kind, namespace, name);
    labels.insert(settings.component_label(), component.to_owned());
    labels
}

/// Render labels as a label selector string for list/watch params.
pub fn selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_labels_use_configured_names() {
        let settings = Settings::default();
        let labels = identity_labels(&settings, "IPerf", "default", "test");
        assert_eq!(
            labels.get("perftest.stackhpc.com/benchmark-kind"),
            Some(&"IPerf".to_owned())
        );
        assert_eq!(
            labels.get("perftest.stackhpc.com/benchmark-namespace"),
            Some(&"default".to_owned())
        );
        assert_eq!(
            labels.get("perftest.stackhpc.com/benchmark-name"),
            Some(&"test".to_owned())
        );
    }

    #[test]
    fn managed_labels_win_over_extended() {
        let labels = managed_labels_extend(Some(BTreeMap::from_iter(vec![(
            "managed-by".to_owned(),
            "someone-else".to_owned(),
        )])));
        assert_eq!(
            labels.unwrap().get("managed-by"),
            Some(&"kube-perftest".to_owned())
        );
    }

    #[test]
    fn selector_is_sorted_and_comma_separated() {
        let settings = Settings::default();
        let labels = component_labels(&settings, "Fio", "ns", "bench", "master");
        let selector = selector(&labels);
        assert_eq!(
            selector,
            "perftest.stackhpc.com/benchmark-component=master,\
             perftest.stackhpc.com/benchmark-kind=Fio,\
             perftest.stackhpc.com/benchmark-name=bench,\
             perftest.stackhpc.com/benchmark-namespace=ns"
        );
    }
}
