//! The benchmark set controller: fan-out and aggregation.
use std::{sync::Arc, time::Duration};

use futures::stream::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::{
    api::{Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::{controller::Action, watcher, Controller},
    Api, Resource, ResourceExt,
};
use tracing::{debug, error, info, warn};

use crate::benchmark::BenchmarkPhase;
use crate::context::{Clock, Context, UtcClock};
use crate::labels::managed_labels_extend;
use crate::set::{expand, BenchmarkSet, ChildManifest};
use crate::CONTROLLER_NAME;

pub use crate::benchmark::controller::Error;

// How often to poll the children while the set is live. Child benchmarks are
// plain dynamic objects, so the set is not wired into their watch events.
const POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Start the controller for the BenchmarkSet CRD.
pub async fn run(cx: Arc<Context<UtcClock>>, namespace: Option<String>) {
    let sets: Api<BenchmarkSet> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(cx.k_client.clone(), ns),
        None => Api::all(cx.k_client.clone()),
    };
    Controller::new(sets, watcher::Config::default())
        .run(reconcile, on_error, cx)
        .for_each(|result| async move {
            match result {
                Ok((set, _)) => debug!(set = set.name, "reconcile success"),
                Err(err) => error!(?err, "reconcile error"),
            }
        })
        .await;
}

/// Handle errors during reconciliation.
fn on_error(
    set: Arc<BenchmarkSet>,
    error: &Error,
    cx: Arc<Context<impl Clock>>,
) -> Action {
    let key = format!(
        "BenchmarkSet/{}/{}",
        set.namespace().unwrap_or_default(),
        set.name_any()
    );
    let delay = cx.backoff.next_delay(&key);
    warn!(?error, ?delay, "reconcile failed, requeueing");
    Action::requeue(delay)
}

// The kinds this operator serves have irregular plurals, and the naive
// "lowercase and append s" inference in ApiResource::from_gvk gets some of
// them wrong.
fn plural_of(kind: &str) -> String {
    match kind {
        "RDMALatency" => "rdmalatencies".to_owned(),
        "PyTorch" => "pytorches".to_owned(),
        other => format!("{}s", other.to_lowercase()),
    }
}

fn child_api_resource(manifest: &ChildManifest) -> Result<ApiResource, Error> {
    let (group, version) = manifest
        .api_version
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("invalid apiVersion {}", manifest.api_version))?;
    let gvk = GroupVersionKind::gvk(group, version, &manifest.kind);
    Ok(ApiResource::from_gvk_with_plural(
        &gvk,
        &plural_of(&manifest.kind),
    ))
}

/// Perform a reconcile pass for one benchmark set.
async fn reconcile(
    set: Arc<BenchmarkSet>,
    cx: Arc<Context<impl Clock>>,
) -> Result<Action, Error> {
    let name = set.name_any();
    let ns = set.namespace().unwrap_or_default();
    debug!(set = name, "reconcile");

    let mut status = set.status.clone().unwrap_or_default();
    // A finished set is immutable
    if status.finished_at.is_some() {
        return Ok(Action::await_change());
    }

    let manifests = expand(&set).map_err(|err| anyhow::anyhow!("invalid set: {err}"))?;

    // The count is frozen the first time the set is seen; later edits to the
    // permutations are deliberately ignored
    if status.count.is_none() {
        status.count = Some(manifests.len() as u64);
        status.created_at = Some(Time(cx.clock.now()));
    }
    let count = status.count.unwrap_or_default();

    let orefs = set
        .controller_owner_ref(&())
        .map(|oref| vec![oref])
        .unwrap_or_default();

    // Create missing children and roll up the phases of existing ones
    let mut succeeded = 0;
    let mut failed = 0;
    for manifest in &manifests {
        let ar = child_api_resource(manifest)?;
        let api: Api<DynamicObject> = Api::namespaced_with(cx.k_client.clone(), &ns, &ar);
        match api.get_opt(&manifest.name).await? {
            Some(child) => match child_phase(&child) {
                Some(BenchmarkPhase::Succeeded) => succeeded += 1,
                Some(BenchmarkPhase::Failed) => failed += 1,
                _ => {}
            },
            None => {
                info!(set = name, child = manifest.name, "creating benchmark");
                apply_child(&cx, &api, &ns, &orefs, manifest).await?;
            }
        }
    }

    status.succeeded = Some(succeeded);
    status.failed = Some(failed);
    let finished = succeeded + failed == count;
    if finished && status.finished_at.is_none() {
        info!(set = name, succeeded, failed, "benchmark set finished");
        status.finished_at = Some(Time(cx.clock.now()));
    }

    if set.status.as_ref() != Some(&status) {
        let sets: Api<BenchmarkSet> = Api::namespaced(cx.k_client.clone(), &ns);
        sets.patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({ "status": status })),
        )
        .await?;
    }

    if finished {
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(POLL_INTERVAL))
    }
}

// Read the phase out of a dynamic child's status.
fn child_phase(child: &DynamicObject) -> Option<BenchmarkPhase> {
    let phase = child.data.get("status")?.get("phase")?.clone();
    serde_json::from_value(phase).ok()
}

async fn apply_child(
    cx: &Context<impl Clock>,
    api: &Api<DynamicObject>,
    ns: &str,
    orefs: &[OwnerReference],
    manifest: &ChildManifest,
) -> Result<(), Error> {
    let ar = child_api_resource(manifest)?;
    let mut child = DynamicObject::new(&manifest.name, &ar);
    child.metadata.namespace = Some(ns.to_owned());
    child.metadata.owner_references = Some(orefs.to_vec());
    child.metadata.labels = managed_labels_extend(None);
    child.data = serde_json::json!({ "spec": manifest.spec });
    api.patch(
        &manifest.name,
        &PatchParams::apply(CONTROLLER_NAME),
        &Patch::Apply(&child),
    )
    .await?;
    Ok(())
}
