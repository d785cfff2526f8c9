//! In-memory stand-in for the two API generations the client speaks.
//!
//! v1 routes take plain JSON and a `X-Team-Key` header; v2 routes take
//! JSON:API documents and a bearer token. Keys are fixed constants so tests
//! can wire a credential store up front.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const CONFIG_KEY: &str = "config-key";
pub const INGEST_KEY: &str = "ingest-key";
pub const MANAGEMENT_KEY: &str = "management-key";

pub const JSON_API: &str = "application/vnd.api+json";
const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub delete_protected: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentAttributes {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub attributes: EnvironmentAttributes,
}

/// Body of a create request: `{"data": {"type": ..., "attributes": {...}}}`.
#[derive(Deserialize)]
pub struct CreateDocument {
    pub data: CreateData,
}

#[derive(Deserialize)]
pub struct CreateData {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub attributes: Value,
}

#[derive(Deserialize, Default)]
pub struct UpdateAttributes {
    pub description: Option<String>,
    pub color: Option<String>,
    pub settings: Option<Settings>,
}

#[derive(Deserialize)]
pub struct UpdateDocument {
    pub data: UpdateData,
}

#[derive(Deserialize)]
pub struct UpdateData {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub attributes: UpdateAttributes,
}

#[derive(Default)]
pub struct Store {
    /// Environments per team, in creation order.
    environments: HashMap<String, Vec<Environment>>,
    /// Column name to column type, per dataset.
    columns: HashMap<String, BTreeMap<String, String>>,
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    Router::new()
        .route("/1/auth", get(auth_info))
        .route("/1/events/{dataset}", post(create_event))
        .route("/1/batch/{dataset}", post(create_batch))
        .route("/1/columns/{dataset}", get(list_columns))
        .route(
            "/2/teams/{team}/environments",
            get(list_environments).post(create_environment),
        )
        .route(
            "/2/teams/{team}/environments/{id}",
            get(get_environment).patch(update_environment).delete(delete_environment),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// --- auth ---

fn team_key(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-team-key").and_then(|v| v.to_str().ok())
}

fn require_team_key(headers: &HeaderMap, expected: &str) -> Result<(), Response> {
    match team_key(headers) {
        Some(key) if key == expected => Ok(()),
        Some(_) => Err(v1_error(StatusCode::UNAUTHORIZED, "unknown API key - check your credentials")),
        None => Err(v1_error(StatusCode::UNAUTHORIZED, "missing X-Team-Key header")),
    }
}

fn require_bearer(headers: &HeaderMap) -> Result<(), Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match token {
        Some(token) if token == MANAGEMENT_KEY => Ok(()),
        _ => Err(v2_error(StatusCode::UNAUTHORIZED, "a valid management key is required")),
    }
}

fn require_json_api(headers: &HeaderMap) -> Result<(), Response> {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    match content_type {
        Some(ct) if ct.starts_with(JSON_API) => Ok(()),
        _ => Err(v2_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "content type must be application/vnd.api+json",
        )),
    }
}

// --- responses ---

fn v1_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn v2_error(status: StatusCode, detail: &str) -> Response {
    let body = json!({
        "errors": [{ "status": status.as_str(), "detail": detail }]
    });
    json_api(status, body)
}

fn json_api(status: StatusCode, body: Value) -> Response {
    (status, [(header::CONTENT_TYPE, JSON_API)], Json(body)).into_response()
}

fn column_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        _ => "string",
    }
}

fn record_columns(store: &mut Store, dataset: &str, event: &serde_json::Map<String, Value>) {
    let columns = store.columns.entry(dataset.to_string()).or_default();
    for (key, value) in event {
        columns.entry(key.clone()).or_insert_with(|| column_type(value).to_string());
    }
}

// --- v1 ---

async fn auth_info(headers: HeaderMap) -> Response {
    if let Err(resp) = require_team_key(&headers, CONFIG_KEY) {
        return resp;
    }
    Json(json!({
        "id": "mock-key",
        "type": "configuration",
        "team": { "name": "Mock Team", "slug": "mock-team" },
        "environment": { "name": "test", "slug": "test" }
    }))
    .into_response()
}

async fn create_event(
    State(db): State<Db>,
    Path(dataset): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = require_team_key(&headers, INGEST_KEY) {
        return resp;
    }
    match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(event)) => {
            record_columns(&mut *db.write().await, &dataset, &event);
            StatusCode::OK.into_response()
        }
        _ => v1_error(StatusCode::BAD_REQUEST, "request body should be a JSON object"),
    }
}

async fn create_batch(
    State(db): State<Db>,
    Path(dataset): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = require_team_key(&headers, INGEST_KEY) {
        return resp;
    }
    let Ok(Value::Array(events)) = serde_json::from_slice::<Value>(&body) else {
        return v1_error(StatusCode::BAD_REQUEST, "request body should be a JSON array");
    };

    let mut store = db.write().await;
    let statuses: Vec<Value> = events
        .iter()
        .map(|event| match event.get("data") {
            Some(Value::Object(data)) => {
                record_columns(&mut store, &dataset, data);
                json!({ "status": 202 })
            }
            _ => json!({ "status": 400, "error": "event is missing a data object" }),
        })
        .collect();
    Json(statuses).into_response()
}

async fn list_columns(
    State(db): State<Db>,
    Path(dataset): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_team_key(&headers, CONFIG_KEY) {
        return resp;
    }
    let store = db.read().await;
    let Some(columns) = store.columns.get(&dataset) else {
        return v1_error(StatusCode::NOT_FOUND, "dataset not found");
    };
    let render = |(key, ty): (&String, &String)| json!({ "id": key, "key_name": key, "type": ty });

    match query.get("key_name") {
        Some(name) => match columns.get_key_value(name) {
            Some(column) => Json(render(column)).into_response(),
            None => v1_error(StatusCode::NOT_FOUND, "column not found"),
        },
        None => Json(columns.iter().map(render).collect::<Vec<_>>()).into_response(),
    }
}

// --- v2 ---

async fn list_environments(
    State(db): State<Db>,
    Path(team): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_bearer(&headers) {
        return resp;
    }
    let size = match query.get("page[size]").map(|s| s.parse::<usize>()) {
        None => DEFAULT_PAGE_SIZE,
        Some(Ok(n)) if n > 0 => n,
        Some(_) => return v2_error(StatusCode::BAD_REQUEST, "page[size] must be a positive integer"),
    };

    let store = db.read().await;
    let all = store.environments.get(&team).map(Vec::as_slice).unwrap_or_default();
    let start = match query.get("page[after]") {
        Some(after) => match all.iter().position(|env| &env.id == after) {
            Some(i) => i + 1,
            None => return v2_error(StatusCode::BAD_REQUEST, "unknown page[after] cursor"),
        },
        None => 0,
    };
    let page = &all[start..all.len().min(start + size)];
    let more = start + page.len() < all.len();

    let mut body = json!({ "data": page, "links": {} });
    let mut link: Option<HeaderValue> = None;
    if let (true, Some(last)) = (more, page.last()) {
        let next = format!("/2/teams/{team}/environments?page[size]={size}&page[after]={}", last.id);
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        link = format!("<http://{host}{next}>; rel=\"next\"").parse().ok();
        body["links"]["next"] = Value::String(next);
    }

    let mut resp = json_api(StatusCode::OK, body);
    if let Some(link) = link {
        resp.headers_mut().insert(header::LINK, link);
    }
    resp
}

async fn create_environment(
    State(db): State<Db>,
    Path(team): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = require_bearer(&headers).and_then(|_| require_json_api(&headers)) {
        return resp;
    }
    let Ok(doc) = serde_json::from_slice::<CreateDocument>(&body) else {
        return v2_error(StatusCode::BAD_REQUEST, "request body must be a JSON:API document");
    };
    if doc.data.resource_type != "environments" {
        return v2_error(StatusCode::CONFLICT, "resource type must be environments");
    }
    let attributes: EnvironmentAttributes = match serde_json::from_value(doc.data.attributes) {
        Ok(attributes) => attributes,
        Err(e) => return v2_error(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    };
    if attributes.name.trim().is_empty() {
        return v2_error(StatusCode::UNPROCESSABLE_ENTITY, "name must not be blank");
    }

    let mut store = db.write().await;
    let envs = store.environments.entry(team).or_default();
    if envs.iter().any(|env| env.attributes.name == attributes.name) {
        return v2_error(StatusCode::CONFLICT, "an environment with this name already exists");
    }
    let env = Environment {
        id: Uuid::new_v4().to_string(),
        resource_type: "environments".to_string(),
        attributes,
    };
    envs.push(env.clone());
    json_api(StatusCode::CREATED, json!({ "data": env }))
}

async fn get_environment(
    State(db): State<Db>,
    Path((team, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_bearer(&headers) {
        return resp;
    }
    let store = db.read().await;
    let found = store
        .environments
        .get(&team)
        .and_then(|envs| envs.iter().find(|env| env.id == id));
    match found {
        Some(env) => json_api(StatusCode::OK, json!({ "data": env })),
        None => v2_error(StatusCode::NOT_FOUND, "environment not found"),
    }
}

async fn update_environment(
    State(db): State<Db>,
    Path((team, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = require_bearer(&headers).and_then(|_| require_json_api(&headers)) {
        return resp;
    }
    let doc: UpdateDocument = match serde_json::from_slice(&body) {
        Ok(doc) => doc,
        Err(e) => return v2_error(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    };
    if doc.data.resource_type != "environments" {
        return v2_error(StatusCode::CONFLICT, "resource type must be environments");
    }

    let mut store = db.write().await;
    let found = store
        .environments
        .get_mut(&team)
        .and_then(|envs| envs.iter_mut().find(|env| env.id == id));
    let Some(env) = found else {
        return v2_error(StatusCode::NOT_FOUND, "environment not found");
    };
    let update = doc.data.attributes;
    if let Some(description) = update.description {
        env.attributes.description = Some(description);
    }
    if let Some(color) = update.color {
        env.attributes.color = Some(color);
    }
    if let Some(settings) = update.settings {
        env.attributes.settings = settings;
    }
    json_api(StatusCode::OK, json!({ "data": env }))
}

async fn delete_environment(
    State(db): State<Db>,
    Path((team, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_bearer(&headers) {
        return resp;
    }
    let mut store = db.write().await;
    let Some(envs) = store.environments.get_mut(&team) else {
        return v2_error(StatusCode::NOT_FOUND, "environment not found");
    };
    let Some(index) = envs.iter().position(|env| env.id == id) else {
        return v2_error(StatusCode::NOT_FOUND, "environment not found");
    };
    if envs[index].attributes.settings.delete_protected {
        return v2_error(StatusCode::CONFLICT, "environment is delete protected");
    }
    envs.remove(index);
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_serializes_as_resource_object() {
        let env = Environment {
            id: "abc".to_string(),
            resource_type: "environments".to_string(),
            attributes: EnvironmentAttributes {
                name: "prod".to_string(),
                description: None,
                color: Some("blue".to_string()),
                settings: Settings::default(),
            },
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            json!({
                "id": "abc",
                "type": "environments",
                "attributes": { "name": "prod", "color": "blue", "settings": { "delete_protected": false } }
            })
        );
    }

    #[test]
    fn create_attributes_require_name() {
        let result: Result<EnvironmentAttributes, _> = serde_json::from_value(json!({ "color": "red" }));
        assert!(result.is_err());
    }

    #[test]
    fn update_attributes_are_optional() {
        let doc: UpdateDocument =
            serde_json::from_value(json!({ "data": { "type": "environments" } })).unwrap();
        assert!(doc.data.attributes.description.is_none());
        assert!(doc.data.attributes.settings.is_none());
    }

    #[test]
    fn column_types_follow_json_values() {
        assert_eq!(column_type(&json!(1)), "integer");
        assert_eq!(column_type(&json!(1.5)), "float");
        assert_eq!(column_type(&json!(true)), "boolean");
        assert_eq!(column_type(&json!("x")), "string");
        assert_eq!(column_type(&json!(null)), "string");
    }
}
