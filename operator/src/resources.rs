//! Server-side apply helpers for the child resources of a benchmark.
use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::{Patch, PatchParams},
    core::NamespaceResourceScope,
    Api, Resource,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::benchmark::ChildResource;
use crate::context::{Clock, Context};
use crate::labels::managed_labels_extend;
use crate::CONTROLLER_NAME;

/// Server-side apply a namespaced object, adopting it for the owner.
///
/// The owner references make the object subject to garbage collection when
/// the owning benchmark is deleted; the managed labels scope the controller's
/// watches.
pub async fn apply_owned<K>(
    cx: &Context<impl Clock>,
    ns: &str,
    orefs: Vec<OwnerReference>,
    mut object: K,
) -> Result<(), kube::Error>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Serialize
        + DeserializeOwned
        + Clone
        + Debug,
{
    let name = object
        .meta()
        .name
        .clone()
        .expect("rendered objects are always named");
    let meta = object.meta_mut();
    meta.namespace = Some(ns.to_owned());
    meta.owner_references = Some(orefs);
    meta.labels = managed_labels_extend(meta.labels.take());

    let serverside = PatchParams::apply(CONTROLLER_NAME);
    let api: Api<K> = Api::namespaced(cx.k_client.clone(), ns);
    api.patch(&name, &serverside, &Patch::Apply(&object)).await?;
    Ok(())
}

/// Apply one rendered child resource.
pub async fn apply_child(
    cx: &Context<impl Clock>,
    ns: &str,
    orefs: Vec<OwnerReference>,
    child: ChildResource,
) -> Result<(), kube::Error> {
    match child {
        ChildResource::Job(job) => apply_owned(cx, ns, orefs, job).await,
        ChildResource::Service(service) => apply_owned(cx, ns, orefs, service).await,
        ChildResource::ConfigMap(map) => apply_owned(cx, ns, orefs, map).await,
        ChildResource::PersistentVolumeClaim(pvc) => apply_owned(cx, ns, orefs, pvc).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn apply_adopts_and_labels() {
        let (cx, handle) = testing::test_context();
        let (requests, server) = testing::spawn_mock_api(handle, testing::routes(vec![]));
        let orefs = vec![OwnerReference {
            api_version: "perftest.stackhpc.com/v1alpha1".to_owned(),
            kind: "IPerf".to_owned(),
            name: "bench".to_owned(),
            uid: "abc".to_owned(),
            block_owner_deletion: Some(true),
            controller: Some(true),
            ..Default::default()
        }];
        let map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("bench-discovery".to_owned()),
                labels: Some(BTreeMap::from_iter(vec![(
                    "perftest.stackhpc.com/benchmark-kind".to_owned(),
                    "IPerf".to_owned(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        apply_owned(&cx, "default", orefs, map).await.unwrap();
        server.abort();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "PATCH");
        assert!(request
            .path
            .starts_with("/api/v1/namespaces/default/configmaps/bench-discovery"));
        assert_eq!(request.body["metadata"]["labels"]["managed-by"], "kube-perftest");
        assert_eq!(
            request.body["metadata"]["labels"]["perftest.stackhpc.com/benchmark-kind"],
            "IPerf"
        );
        assert_eq!(request.body["metadata"]["ownerReferences"][0]["name"], "bench");
    }
}
