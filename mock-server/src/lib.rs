//! In-memory stand-in for the test case management REST endpoint.
//!
//! Serves any collection under `/rest/{collection}` using the endpoint's wire
//! conventions: `ns1.`-prefixed keys, `@xsi.type` annotations, a
//! `resourceIdentity` on every record, form-encoded mutation bodies, and
//! `originalVersionId` checks on update and delete. Collection names are
//! plural; the record type is the name without its trailing `s`.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Form, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const NS: &str = "ns1.";
pub const VERSION_PARAM: &str = "originalVersionId";

#[derive(Clone, Debug)]
pub struct Record {
    pub id: Uuid,
    pub version: u64,
    pub fields: Vec<(String, String)>,
}

impl Record {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn set(&mut self, name: String, value: String) {
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }
}

/// Records per collection, in creation order.
pub type Db = Arc<RwLock<HashMap<String, Vec<Record>>>>;

/// Credentials the server demands when login is enabled.
#[derive(Clone, Debug)]
pub struct Login {
    pub email: String,
    pub password: String,
    /// Accepted as `cookie: USERTOKEN: <token>`.
    pub token: String,
}

#[derive(Clone)]
struct AppState {
    db: Db,
    login: Option<Arc<Login>>,
}

#[derive(Debug)]
enum ApiError {
    Unauthorized,
    NotFound(String),
    /// A semantic rejection with a structured `errors[0].error` body.
    Rejected(StatusCode, &'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::CONTENT_TYPE, "text/plain")],
                "login required",
            )
                .into_response(),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("{what} not found"),
            )
                .into_response(),
            ApiError::Rejected(status, error) => {
                (status, Json(json!({ "errors": [{ "error": error }] }))).into_response()
            }
        }
    }
}

pub fn app() -> Router {
    router(None)
}

/// Like [`app`], but every request must authenticate as `login`.
pub fn app_with_login(login: Login) -> Router {
    router(Some(Arc::new(login)))
}

fn router(login: Option<Arc<Login>>) -> Router {
    let state = AppState {
        db: Arc::new(RwLock::new(HashMap::new())),
        login,
    };
    Router::new()
        .route("/rest/{collection}", get(list_records).post(create_record))
        .route(
            "/rest/{collection}/{id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_login(listener: TcpListener, login: Login) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_login(login)).await
}

fn type_name(collection: &str) -> &str {
    collection.strip_suffix('s').unwrap_or(collection)
}

fn check_login(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(login) = &state.login else {
        return Ok(());
    };
    let value_of = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    let basic = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", login.email, login.password));
    if value_of(header::AUTHORIZATION) == Some(format!("Basic {basic}").as_str()) {
        return Ok(());
    }
    if value_of(header::COOKIE) == Some(format!("USERTOKEN: {}", login.token).as_str()) {
        return Ok(());
    }
    debug!("rejecting unauthenticated request");
    Err(ApiError::Unauthorized)
}

fn identity(collection: &str, record: &Record) -> Value {
    json!({
        "@xsi.type": "ns1:ResourceIdentity",
        format!("{NS}id"): record.id.to_string(),
        format!("{NS}version"): record.version.to_string(),
        format!("{NS}url"): format!("{collection}/{}", record.id),
    })
}

fn render(collection: &str, record: &Record) -> Value {
    let mut object = Map::new();
    object.insert(
        "@xsi.type".to_string(),
        Value::from(format!("ns1:{}", type_name(collection))),
    );
    for (name, value) in &record.fields {
        object.insert(format!("{NS}{name}"), Value::from(value.as_str()));
    }
    object.insert(format!("{NS}resourceIdentity"), identity(collection, record));
    Value::Object(object)
}

fn wrap_one(collection: &str, record: &Record) -> Value {
    json!({ format!("{NS}{}", type_name(collection)): [render(collection, record)] })
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::NotFound(id.to_string()))
}

fn check_version(record: &Record, params: &[(String, String)]) -> Result<(), ApiError> {
    match param(params, VERSION_PARAM) {
        None => Err(ApiError::Rejected(
            StatusCode::BAD_REQUEST,
            "originalVersionId.required",
        )),
        Some(version) if version == record.version.to_string() => Ok(()),
        Some(_) => Err(ApiError::Rejected(
            StatusCode::CONFLICT,
            "changed.by.another.user",
        )),
    }
}

fn check_unique_email(records: &[Record], skip: Option<Uuid>, email: Option<&str>) -> Result<(), ApiError> {
    let Some(email) = email else {
        return Ok(());
    };
    let taken = records
        .iter()
        .any(|r| Some(r.id) != skip && r.field("email") == Some(email));
    if taken {
        return Err(ApiError::Rejected(StatusCode::CONFLICT, "email.in.use"));
    }
    Ok(())
}

/// Field updates from a form body, without control parameters.
fn form_fields(form: Vec<(String, String)>) -> Vec<(String, String)> {
    form.into_iter()
        .filter(|(key, _)| key != VERSION_PARAM && !key.starts_with('_'))
        .collect()
}

async fn list_records(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    check_login(&state, &headers)?;
    let db = state.db.read().await;
    let mut matched: Vec<&Record> = db
        .get(&collection)
        .map(|records| records.iter().collect())
        .unwrap_or_default();

    for (key, value) in &params {
        if let Some(field) = key.strip_prefix("filter-") {
            matched.retain(|r| r.field(field) == Some(value.as_str()));
        }
    }
    if let Some(field) = param(&params, "sortfield") {
        matched.sort_by(|a, b| a.field(field).cmp(&b.field(field)));
        if param(&params, "sortdirection") == Some("desc") {
            matched.reverse();
        }
    }
    let total = matched.len();
    let size = param(&params, "pagesize").and_then(|s| s.parse::<usize>().ok());
    if let Some(size) = size.filter(|size| *size > 0) {
        let number = param(&params, "pagenumber")
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        matched = matched
            .into_iter()
            .skip((number - 1).saturating_mul(size))
            .take(size)
            .collect();
    }
    debug!(%collection, total, returned = matched.len(), "listing");

    let singular = type_name(&collection);
    let entries: Vec<Value> = matched.iter().map(|r| render(&collection, r)).collect();
    Ok(Json(json!({
        format!("{NS}searchResult"): [{
            "@xsi.type": "ns1:searchResult",
            format!("{NS}totalResults"): total,
            format!("{NS}{collection}"): [{
                "@xsi.type": format!("ns1:ArrayOf{singular}"),
                format!("{NS}{singular}"): entries,
            }],
        }]
    })))
}

async fn create_record(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    check_login(&state, &headers)?;
    let fields = form_fields(form);
    let mut db = state.db.write().await;
    let records = db.entry(collection.clone()).or_default();
    let email = param(&fields, "email");
    check_unique_email(records, None, email)?;

    let record = Record {
        id: Uuid::new_v4(),
        version: 0,
        fields,
    };
    info!(%collection, id = %record.id, "created");
    let location = format!("/rest/{collection}/{}", record.id);
    let body = wrap_one(&collection, &record);
    records.push(record);

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(body),
    )
        .into_response())
}

async fn get_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    check_login(&state, &headers)?;
    let uuid = parse_id(&id)?;
    let db = state.db.read().await;
    let record = db
        .get(&collection)
        .and_then(|records| records.iter().find(|r| r.id == uuid))
        .ok_or(ApiError::NotFound(format!("{collection}/{id}")))?;
    Ok(Json(wrap_one(&collection, record)))
}

async fn update_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    check_login(&state, &headers)?;
    let uuid = parse_id(&id)?;
    let mut db = state.db.write().await;
    let records = db
        .get_mut(&collection)
        .ok_or(ApiError::NotFound(format!("{collection}/{id}")))?;
    let index = records
        .iter()
        .position(|r| r.id == uuid)
        .ok_or(ApiError::NotFound(format!("{collection}/{id}")))?;

    check_version(&records[index], &form)?;
    let fields = form_fields(form);
    check_unique_email(records, Some(uuid), param(&fields, "email"))?;

    let record = &mut records[index];
    for (name, value) in fields {
        record.set(name, value);
    }
    record.version += 1;
    info!(%collection, %id, version = record.version, "updated");
    Ok(Json(wrap_one(&collection, record)))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<StatusCode, ApiError> {
    check_login(&state, &headers)?;
    let uuid = parse_id(&id)?;
    let mut db = state.db.write().await;
    let records = db
        .get_mut(&collection)
        .ok_or(ApiError::NotFound(format!("{collection}/{id}")))?;
    let index = records
        .iter()
        .position(|r| r.id == uuid)
        .ok_or(ApiError::NotFound(format!("{collection}/{id}")))?;

    check_version(&records[index], &params)?;
    records.remove(index);
    info!(%collection, %id, "deleted");
    Ok(StatusCode::NO_CONTENT)
}
