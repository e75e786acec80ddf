//! The benchmark kinds known to the operator.
//!
//! This module is the registry: every kind listed here gets a controller in
//! [`run_all`] and a CRD in [`crds`]. Adding a benchmark means adding a module
//! implementing [`Benchmark`](crate::benchmark::Benchmark) and registering it
//! in both places (plus the RBAC manifests, which live in the chart).
pub mod fio;
pub mod iperf;
pub mod openfoam;
pub mod pingpong;
pub mod pytorch;
pub mod rdma;

use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

use crate::benchmark::controller;
use crate::context::{Context, UtcClock};
use crate::set;

/// Run a controller for every benchmark kind plus the benchmark set controller.
pub async fn run_all(cx: Arc<Context<UtcClock>>, namespace: Option<String>) {
    tokio::join!(
        controller::run::<iperf::IPerf>(cx.clone(), namespace.clone()),
        controller::run::<pingpong::MPIPingPong>(cx.clone(), namespace.clone()),
        controller::run::<openfoam::OpenFOAM>(cx.clone(), namespace.clone()),
        controller::run::<rdma::RDMABandwidth>(cx.clone(), namespace.clone()),
        controller::run::<rdma::RDMALatency>(cx.clone(), namespace.clone()),
        controller::run::<fio::Fio>(cx.clone(), namespace.clone()),
        controller::run::<pytorch::PyTorch>(cx.clone(), namespace.clone()),
        set::controller::run(cx.clone(), namespace.clone()),
    );
}

/// The custom resource definitions for every kind this operator serves.
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![
        iperf::IPerf::crd(),
        pingpong::MPIPingPong::crd(),
        openfoam::OpenFOAM::crd(),
        rdma::RDMABandwidth::crd(),
        rdma::RDMALatency::crd(),
        fio::Fio::crd(),
        pytorch::PyTorch::crd(),
        set::BenchmarkSet::crd(),
    ]
}
