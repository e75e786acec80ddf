//! A recording stub of the Kubernetes API server for tests.
//!
//! Tests drive reconcile functions against a `kube::Client` backed by a
//! `tower_test` mock service. The stub answers requests from a route table,
//! echoes server-side applies the way a real API server responds, and records
//! every request so tests can assert on the mutations a reconcile made.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use hyper::{body::to_bytes, Body};
use k8s_openapi::chrono::{DateTime, TimeZone, Utc};
use kube::Client;
use tokio::task::JoinHandle;

use crate::context::{Backoff, Clock, Context};
use crate::settings::Settings;

pub type ApiServerHandle = tower_test::mock::Handle<http::Request<Body>, http::Response<Body>>;

/// Clock pinned to a fixed instant so timestamps in statuses are stable.
pub struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }
}

/// Create a test context backed by a mock API server.
pub fn test_context() -> (Context<FixedClock>, ApiServerHandle) {
    let (mock_service, handle) =
        tower_test::mock::pair::<http::Request<Body>, http::Response<Body>>();
    let k_client = Client::new(mock_service, "default");
    let cx = Context {
        k_client,
        settings: Arc::new(Settings::default()),
        clock: FixedClock,
        priority_lock: tokio::sync::Mutex::new(()),
        backoff: Backoff::default(),
    };
    (cx, handle)
}

/// Like [`test_context`] but wrapped in an `Arc` for reconcile signatures.
pub fn arc_test_context() -> (Arc<Context<FixedClock>>, ApiServerHandle) {
    let (cx, handle) = test_context();
    (Arc::new(cx), handle)
}

/// A request recorded by the stub API server.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
}

/// Route table: `"<METHOD> <path>"` to the response value.
///
/// String values are sent verbatim (pod logs), everything else as JSON.
pub type Routes = BTreeMap<String, serde_json::Value>;

/// Build a route table from entries.
pub fn routes(entries: Vec<(&str, serde_json::Value)>) -> Routes {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
}

/// Run the stub API server until the test aborts it.
///
/// Routed requests get their configured response. Unrouted mutations are
/// echoed back the way server-side apply responds, unrouted reads get a 404
/// so `get_opt` resolves to `None`.
pub fn spawn_mock_api(
    mut handle: ApiServerHandle,
    routes: Routes,
) -> (Arc<Mutex<Vec<Request>>>, JoinHandle<()>) {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let record = recorded.clone();
    let join = tokio::spawn(async move {
        while let Some((request, send)) = handle.next_request().await {
            let method = request.method().to_string();
            let path = request.uri().path().to_owned();
            let body_bytes = to_bytes(request.into_body())
                .await
                .expect("request body should be readable");
            let body = if body_bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&body_bytes).unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(&body_bytes).into_owned())
                })
            };
            record
                .lock()
                .expect("should acquire recorder lock")
                .push(Request {
                    method: method.clone(),
                    path: path.clone(),
                    body: body.clone(),
                });

            let response = match routes.get(&format!("{method} {path}")) {
                Some(serde_json::Value::String(text)) => http::Response::builder()
                    .body(Body::from(text.clone()))
                    .unwrap(),
                Some(value) => http::Response::builder()
                    .header("Content-Type", "application/json")
                    .body(Body::from(serde_json::to_vec(value).unwrap()))
                    .unwrap(),
                None => match method.as_str() {
                    "PATCH" | "POST" | "PUT" => http::Response::builder()
                        .header("Content-Type", "application/json")
                        .body(Body::from(serde_json::to_vec(&body).unwrap()))
                        .unwrap(),
                    "DELETE" => http::Response::builder()
                        .header("Content-Type", "application/json")
                        .body(Body::from(
                            serde_json::to_vec(&serde_json::json!({
                                "kind": "Status",
                                "apiVersion": "v1",
                                "status": "Success",
                            }))
                            .unwrap(),
                        ))
                        .unwrap(),
                    _ => http::Response::builder()
                        .status(404)
                        .header("Content-Type", "application/json")
                        .body(Body::from(
                            serde_json::to_vec(&serde_json::json!({
                                "kind": "Status",
                                "apiVersion": "v1",
                                "status": "Failure",
                                "message": format!("{path} not found"),
                                "reason": "NotFound",
                                "code": 404,
                            }))
                            .unwrap(),
                        ))
                        .unwrap(),
                },
            };
            send.send_response(response);
        }
    });
    (recorded, join)
}
