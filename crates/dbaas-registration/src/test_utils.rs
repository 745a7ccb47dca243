//! Mock Kubernetes API used by the unit tests.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

use futures::pin_mut;
use http::{Method, Request as HttpRequest, Response as HttpResponse};
use hyper::Body;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::rbac::v1::ClusterRole;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use serde_json::json;
use tower_test::mock;

/// A request as seen by the mock API server.
#[derive(Clone, Debug)]
pub struct MockRequest {
    /// Zero based position of the request in the conversation
    pub sequence: usize,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// Parsed JSON body, `Null` when the body is empty
    pub body: serde_json::Value,
}

impl MockRequest {
    /// Decoded value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// A scripted API server answering every request with `handler`.
///
/// The handler is called in request order and may keep state between calls.
pub struct MockCluster {
    client: Client,
    requests: Arc<Mutex<Vec<MockRequest>>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockCluster {
    pub fn new<F>(mut handler: F) -> Self
    where
        F: FnMut(&MockRequest) -> HttpResponse<Body> + Send + 'static,
    {
        // Mock client as inspired by this thread on kube-rs crate: https://github.com/clux/kube-rs/issues/429
        let (mock_service, handle) = mock::pair::<HttpRequest<Body>, HttpResponse<Body>>();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            pin_mut!(handle);
            let mut sequence = 0;
            while let Some((request, send)) = handle.next_request().await {
                let (parts, body) = request.into_parts();
                let bytes = hyper::body::to_bytes(body).await.unwrap_or_default();
                let body = if bytes.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
                };
                let request = MockRequest {
                    sequence,
                    method: parts.method,
                    path: parts.uri.path().to_string(),
                    query: parts.uri.query().map(str::to_string),
                    body,
                };
                sequence += 1;
                let response = handler(&request);
                seen.lock().unwrap().push(request);
                send.send_response(response);
            }
        });
        MockCluster {
            client: Client::new(mock_service, "default"),
            requests,
            _task: task,
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Every request answered so far.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests answered so far that used `method`.
    pub fn requests_with(&self, method: Method) -> Vec<MockRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }
}

pub fn json_response(code: u16, body: serde_json::Value) -> HttpResponse<Body> {
    HttpResponse::builder()
        .status(code)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

/// A `metav1.Status` failure.
pub fn status_response(code: u16, reason: &str) -> HttpResponse<Body> {
    json_response(
        code,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("mock {}", reason),
            "reason": reason,
            "code": code,
        }),
    )
}

/// A discovery document for `group_version` serving `(plural, kind)` pairs.
pub fn api_resource_list(group_version: &str, resources: &[(&str, &str)]) -> HttpResponse<Body> {
    let resources: Vec<_> = resources
        .iter()
        .map(|(name, kind)| {
            json!({
                "name": name,
                "singularName": "",
                "namespaced": false,
                "kind": kind,
                "verbs": ["get", "list", "watch", "create", "update", "patch", "delete"],
            })
        })
        .collect();
    json_response(
        200,
        json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": group_version,
            "resources": resources,
        }),
    )
}

pub fn cluster_role(name: &str, uid: &str) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn cluster_role_list(items: Vec<ClusterRole>) -> HttpResponse<Body> {
    json_response(
        200,
        json!({
            "kind": "ClusterRoleList",
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "metadata": {"resourceVersion": "1"},
            "items": items,
        }),
    )
}

pub fn deployment(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Deployment {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Deployment {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            uid: Some(format!("{}-uid", name)),
            labels: if labels.is_empty() { None } else { Some(labels) },
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Serializes a typed object with its apiVersion and kind, as the API server would.
pub fn object_response<K: serde::Serialize + k8s_openapi::Resource>(object: &K) -> HttpResponse<Body> {
    let mut value = serde_json::to_value(object).unwrap();
    value["apiVersion"] = json!(K::API_VERSION);
    value["kind"] = json!(K::KIND);
    json_response(200, value)
}

/// Formatted log output collected by [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routes every event on the current thread into the returned buffer until
/// the guard is dropped.
pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, CapturedLogs) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (tracing::subscriber::set_default(subscriber), logs)
}
