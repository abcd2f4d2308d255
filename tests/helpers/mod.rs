//! In-process fake of the analytical backend and the object store.

use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const TOKEN: &str = "integration-token";
pub const TENANT: &str = "acme";

/// A multipart storage write as the fake store saw it.
#[derive(Debug, Clone)]
pub struct StoredForm {
    pub field_order: Vec<String>,
    pub key: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub file_len: usize,
}

/// A raw PUT storage write.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_type: Option<String>,
    pub signed_header: Option<String>,
    pub authorization: Option<String>,
    pub len: usize,
}

#[derive(Default)]
pub struct Behaviour {
    pub presign_put: bool,
    pub reject_storage: bool,
    pub register_as_job: bool,
    pub fail_narrative: bool,
    pub job_statuses: VecDeque<Value>,
}

#[derive(Default)]
pub struct Recorded {
    pub credential_requests: Vec<Value>,
    pub forms: Vec<StoredForm>,
    pub objects: Vec<StoredObject>,
    pub registrations: Vec<Value>,
    pub job_checks: usize,
    pub prompts: Vec<(String, String)>,
    pub narrative_requests: Vec<Value>,
}

pub struct FakeServer {
    pub base_url: String,
    pub behaviour: Mutex<Behaviour>,
    pub recorded: Mutex<Recorded>,
}

/// Bind on an ephemeral port and serve until the test runtime shuts down.
pub async fn start(behaviour: Behaviour) -> Arc<FakeServer> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake server");
    let addr = listener.local_addr().expect("local addr");

    let server = Arc::new(FakeServer {
        base_url: format!("http://{addr}"),
        behaviour: Mutex::new(behaviour),
        recorded: Mutex::new(Recorded::default()),
    });

    let app = Router::new()
        .route("/api/v1/datasets/upload-url", post(upload_url))
        .route("/api/v1/datasets/register", post(register))
        .route("/api/v1/datasets/job/{job_id}", get(job_status))
        .route("/api/v1/datasets/{dataset_id}/dashboard", post(dashboard))
        .route("/api/v1/narrative/generate", post(narrative))
        .route("/storage/form", post(store_form))
        .route("/storage/object", put(store_object))
        .with_state(Arc::clone(&server));

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake server");
    });
    server
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn detail(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

async fn upload_url(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return detail(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    let file_name = body["file_name"].as_str().unwrap_or_default().to_string();
    server.recorded.lock().unwrap().credential_requests.push(body);

    let storage_path = format!("uploads/{TENANT}/{file_name}");
    let credential = if server.behaviour.lock().unwrap().presign_put {
        json!({
            "url": format!("{}/storage/object", server.base_url),
            "method": "PUT",
            "headers": { "x-amz-meta-tenant": TENANT },
            "storage_path": storage_path,
        })
    } else {
        json!({
            "url": format!("{}/storage/form", server.base_url),
            "fields": { "key": storage_path, "policy": "signed-policy" },
            "storage_path": storage_path,
        })
    };
    Json(credential).into_response()
}

async fn store_form(State(server): State<Arc<FakeServer>>, mut multipart: Multipart) -> Response {
    let mut form = StoredForm {
        field_order: Vec::new(),
        key: None,
        file_name: None,
        content_type: None,
        file_len: 0,
    };
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        form.field_order.push(name.clone());
        if name == "file" {
            form.file_name = field.file_name().map(str::to_string);
            form.content_type = field.content_type().map(str::to_string);
            form.file_len = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        } else if name == "key" {
            form.key = field.text().await.ok();
        }
    }
    server.recorded.lock().unwrap().forms.push(form);

    if server.behaviour.lock().unwrap().reject_storage {
        return (StatusCode::FORBIDDEN, "<Error><Code>AccessDenied</Code></Error>").into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn store_object(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    server.recorded.lock().unwrap().objects.push(StoredObject {
        content_type: header("content-type"),
        signed_header: header("x-amz-meta-tenant"),
        authorization: header("authorization"),
        len: body.len(),
    });
    StatusCode::OK.into_response()
}

async fn register(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return detail(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    server.recorded.lock().unwrap().registrations.push(body);
    if server.behaviour.lock().unwrap().register_as_job {
        Json(json!({ "job_id": "job-42", "status": "processing" })).into_response()
    } else {
        Json(json!({ "dataset_id": "ds_123" })).into_response()
    }
}

async fn job_status(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return detail(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    server.recorded.lock().unwrap().job_checks += 1;
    let next = server.behaviour.lock().unwrap().job_statuses.pop_front();
    match next {
        Some(status) => Json(status).into_response(),
        None => detail(StatusCode::NOT_FOUND, &format!("Job {job_id} not found")),
    }
}

async fn dashboard(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
    Path(dataset_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return detail(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
    server
        .recorded
        .lock()
        .unwrap()
        .prompts
        .push((dataset_id.clone(), prompt.clone()));

    if dataset_id != "ds_123" {
        return detail(StatusCode::NOT_FOUND, "Dataset not found or access denied.");
    }
    Json(json!({
        "thought_process": "Group revenue by region.",
        "sql_query": "SELECT region, SUM(revenue) AS total FROM dataset_table GROUP BY region",
        "chart_config": { "type": "bar", "x_axis": "region", "y_axis": "total", "title": prompt },
        "rows": [
            { "region": "West", "total": 120000 },
            { "region": "East", "total": 95000 },
            { "region": "North", "total": 70000 }
        ]
    }))
    .into_response()
}

async fn narrative(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return detail(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    server
        .recorded
        .lock()
        .unwrap()
        .narrative_requests
        .push(body);
    if server.behaviour.lock().unwrap().fail_narrative {
        return detail(StatusCode::BAD_GATEWAY, "Narrative model unavailable");
    }
    Json(json!({ "narrative": "West leads revenue at 120,000, ahead of East and North." }))
        .into_response()
}
