//! Fixture HTTP service for exercising the request engine over real sockets.
//!
//! A small chef-style API backed by an in-memory store. Every route requires
//! the `X-Ops-Userid` and `X-Ops-Sign` headers a signing filter adds, so a
//! request that skipped its filter chain gets a 401.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, RawQuery, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

pub const SIGNED_USER_HEADER: &str = "x-ops-userid";
pub const SIGNED_MARKER_HEADER: &str = "x-ops-sign";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sandbox {
    pub guid: String,
    pub is_completed: bool,
}

#[derive(Deserialize)]
pub struct CommitSandbox {
    pub is_completed: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiClient {
    pub name: String,
    #[serde(default)]
    pub validator: bool,
}

#[derive(Debug, Default)]
pub struct Store {
    sandboxes: HashMap<String, Sandbox>,
    cookbooks: BTreeMap<String, BTreeMap<String, Value>>,
    clients: BTreeSet<String>,
}

impl Store {
    /// One client, `admin`, and one cookbook, `apache2/0.1.0`.
    pub fn seeded() -> Self {
        let mut store = Self::default();
        store.clients.insert("admin".to_string());
        store
            .cookbooks
            .entry("apache2".to_string())
            .or_default()
            .insert("0.1.0".to_string(), json!({"cookbook_name": "apache2", "version": "0.1.0"}));
        store
    }
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    app_with(Store::seeded())
}

pub fn app_with(store: Store) -> Router {
    let db: Db = Arc::new(RwLock::new(store));
    Router::new()
        .route("/sandboxes", post(create_sandbox))
        .route("/sandboxes/{id}", put(commit_sandbox))
        .route("/cookbooks", get(list_cookbooks))
        .route(
            "/cookbooks/{name}/{version}",
            get(get_cookbook).put(update_cookbook).delete(delete_cookbook),
        )
        .route("/clients", post(create_client))
        .route("/clients/{name}", get(get_client).delete(delete_client))
        .route("/search/{index}", get(search))
        .route("/metrics/{name}", get(get_metric))
        .route("/echo", post(echo))
        .route("/slow", get(slow))
        .layer(middleware::from_fn(require_signature))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn require_signature(request: Request, next: Next) -> Response {
    let headers = request.headers();
    if !headers.contains_key(SIGNED_USER_HEADER) || !headers.contains_key(SIGNED_MARKER_HEADER) {
        debug!(path = %request.uri().path(), "rejecting unsigned request");
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": ["missing request signature"]}))).into_response();
    }
    next.run(request).await
}

fn not_found(what: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": [format!("{what} not found")]})))
}

async fn create_sandbox(State(db): State<Db>) -> (StatusCode, Json<Value>) {
    let guid = Uuid::new_v4().simple().to_string();
    db.write().await.sandboxes.insert(
        guid.clone(),
        Sandbox {
            guid: guid.clone(),
            is_completed: false,
        },
    );
    (StatusCode::CREATED, Json(json!({"sandbox_id": guid, "checksums": {}})))
}

async fn commit_sandbox(
    State(db): State<Db>,
    Path(id): Path<String>,
    Json(input): Json<CommitSandbox>,
) -> Result<Json<Sandbox>, (StatusCode, Json<Value>)> {
    let mut store = db.write().await;
    let sandbox = store.sandboxes.get_mut(&id).ok_or_else(|| not_found("sandbox"))?;
    sandbox.is_completed = input.is_completed == "true";
    Ok(Json(sandbox.clone()))
}

async fn list_cookbooks(State(db): State<Db>, headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let store = db.read().await;
    Json(
        store
            .cookbooks
            .keys()
            .map(|name| (name.clone(), format!("http://{host}/cookbooks/{name}")))
            .collect(),
    )
}

async fn get_cookbook(
    State(db): State<Db>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let store = db.read().await;
    store
        .cookbooks
        .get(&name)
        .and_then(|versions| versions.get(&version))
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found("cookbook"))
}

async fn update_cookbook(
    State(db): State<Db>,
    Path((name, version)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    db.write()
        .await
        .cookbooks
        .entry(name)
        .or_default()
        .insert(version, body.clone());
    Json(body)
}

async fn delete_cookbook(
    State(db): State<Db>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut store = db.write().await;
    let versions = store.cookbooks.get_mut(&name).ok_or_else(|| not_found("cookbook"))?;
    let removed = versions.remove(&version).ok_or_else(|| not_found("cookbook"))?;
    if versions.is_empty() {
        store.cookbooks.remove(&name);
    }
    Ok(Json(removed))
}

async fn create_client(
    State(db): State<Db>,
    Json(input): Json<ApiClient>,
) -> Result<(StatusCode, Json<ApiClient>), (StatusCode, Json<Value>)> {
    let mut store = db.write().await;
    if !store.clients.insert(input.name.clone()) {
        return Err((StatusCode::CONFLICT, Json(json!({"error": ["client already exists"]}))));
    }
    Ok((StatusCode::CREATED, Json(input)))
}

async fn get_client(
    State(db): State<Db>,
    Path(name): Path<String>,
) -> Result<Json<ApiClient>, (StatusCode, Json<Value>)> {
    let store = db.read().await;
    if store.clients.contains(&name) {
        Ok(Json(ApiClient { name, validator: false }))
    } else {
        Err(not_found("client"))
    }
}

async fn delete_client(
    State(db): State<Db>,
    Path(name): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    if db.write().await.clients.remove(&name) {
        Ok(StatusCode::OK)
    } else {
        Err(not_found("client"))
    }
}

async fn search(Path(index): Path<String>, RawQuery(query): RawQuery) -> Json<Value> {
    Json(json!({"index": index, "query": query.unwrap_or_default()}))
}

async fn get_metric(Path(name): Path<String>) -> impl IntoResponse {
    let body = format!("<Metric><MetricName>{name}</MetricName><Unit>Percent</Unit></Metric>");
    ([(header::CONTENT_TYPE, "application/xml")], body)
}

async fn echo(headers: HeaderMap, body: String) -> Json<Value> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    Json(json!({"content_type": content_type, "body": body}))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(2)).await;
    "done"
}
