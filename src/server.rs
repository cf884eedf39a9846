//! HTTP boundary: router, handlers, and the taxonomy-to-status mapping.
//!
//! This is the only layer that turns [`Error`] kinds into HTTP statuses;
//! everything below it speaks the error taxonomy. Handlers materialize
//! results before responding, so the engine lock is never held across
//! network I/O.

use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tower_http::cors::CorsLayer;

use crate::cell::CellResponse;
use crate::engine::{Engine, QueryResponse};
use crate::ingest::{Entity, ImportSession, ImportSessions, SourceFormat};
use crate::page::{PageRequest, PageResponse};
use crate::profile::ProfileReport;
use crate::schema::{SchemaColumn, SchemaResponse};
use crate::table_query::TableQueryResponse;
use crate::types::{Filter, SortDirection, TableQuerySpec};
use crate::{Error, Result};

const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub sessions: Arc<ImportSessions>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open the engine and prepare the upload directory.
    ///
    /// # Errors
    /// Returns an error if the engine cannot start or the directory cannot
    /// be created.
    pub fn new(data_dir: &FsPath) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            engine: Arc::new(Engine::new()?),
            sessions: Arc::new(ImportSessions::with_defaults()),
            data_dir: data_dir.to_path_buf(),
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::Unsupported(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Create the router with all dataset routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/datasets/upload", post(upload_dataset))
        .route("/api/datasets/discover", post(discover_dataset))
        .route("/api/datasets/import", post(import_dataset))
        .route("/api/datasets/:dataset_id/schema", get(get_schema))
        .route("/api/datasets/:dataset_id/page", get(get_page))
        .route(
            "/api/datasets/:dataset_id/profile/:column",
            get(profile_column),
        )
        .route("/api/datasets/:dataset_id/query", post(run_query))
        .route("/api/datasets/:dataset_id/table-query", post(run_table_query))
        .route("/api/datasets/:dataset_id/cell", post(run_cell))
        .route("/api/datasets/:dataset_id/export", get(export_dataset))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the web server.
///
/// # Errors
/// Returns an error if the listener cannot bind.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);
    tracing::info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Upload & import ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    id: String,
    name: String,
    row_count: i64,
    columns: Vec<SchemaColumn>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverResponse {
    import_id: String,
    name: String,
    format: SourceFormat,
    entities: Vec<Entity>,
    requires_selection: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ImportMode {
    #[default]
    Selected,
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DatasetNameMode {
    #[default]
    FilenameEntity,
    EntityOnly,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportRequest {
    import_id: String,
    #[serde(default)]
    selected_entities: Vec<String>,
    #[serde(default)]
    import_mode: ImportMode,
    #[serde(default)]
    dataset_name_mode: DatasetNameMode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetSummary {
    id: String,
    name: String,
    row_count: i64,
    columns: Vec<SchemaColumn>,
    source_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    import_id: String,
    datasets: Vec<DatasetSummary>,
}

struct StoredUpload {
    name: String,
    format: SourceFormat,
    path: PathBuf,
}

/// Persist the multipart `file` field under a UUID-prefixed name after
/// filename-safety checks.
async fn store_upload(state: &AppState, multipart: &mut Multipart) -> Result<StoredUpload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid(format!("Invalid multipart request: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let Some(original) = field.file_name().map(str::to_string) else {
            return Err(Error::invalid("No file provided"));
        };

        let basename = FsPath::new(&original)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        if original.is_empty()
            || original == "."
            || original == ".."
            || basename.as_deref() != Some(original.as_str())
        {
            return Err(Error::invalid("Invalid filename"));
        }

        let Some(format) = SourceFormat::from_filename(&original) else {
            let suffix = FsPath::new(&original)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default();
            return Err(Error::Unsupported(format!(
                "Unsupported file format: {suffix}"
            )));
        };

        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::invalid(format!("Failed to read upload: {e}")))?;
        let stored = state.data_dir.join(format!(
            "{}_{original}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::write(&stored, &bytes)?;
        tracing::debug!(name = %original, bytes = bytes.len(), "upload stored");

        return Ok(StoredUpload {
            name: original,
            format,
            path: stored,
        });
    }
    Err(Error::invalid("No file provided"))
}

async fn upload_dataset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let upload = store_upload(&state, &mut multipart).await?;
    if upload.format.requires_selection() {
        return Err(Error::Unsupported(
            "Use /api/datasets/discover and /api/datasets/import for multi-entity formats"
                .to_string(),
        ));
    }

    let id = state
        .engine
        .load_file(&upload.path, &upload.name, upload.format, None)?;
    let schema = state.engine.get_schema(&id)?;
    Ok(Json(UploadResponse {
        id,
        name: upload.name,
        row_count: schema.row_count,
        columns: schema.columns,
    }))
}

async fn discover_dataset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DiscoverResponse>> {
    let upload = store_upload(&state, &mut multipart).await?;
    let entities = state
        .engine
        .discover_entities(&upload.path, upload.format)
        .map_err(|e| Error::invalid(format!("Failed to discover file entities: {e}")))?;

    let entity_names = entities.iter().map(|e| e.name.clone()).collect();
    let import_id = state.sessions.insert(ImportSession::new(
        upload.path,
        upload.name.clone(),
        upload.format,
        entity_names,
    ));

    Ok(Json(DiscoverResponse {
        import_id,
        name: upload.name,
        format: upload.format,
        requires_selection: upload.format.requires_selection(),
        entities,
    }))
}

async fn import_dataset(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> Result<Json<ImportResponse>> {
    let req: ImportRequest = decode_body(body)?;
    let session = state
        .sessions
        .get(&req.import_id)
        .ok_or_else(|| Error::not_found("Import session not found"))?;

    let selected: Vec<String> = if session.format.requires_selection() {
        let selected = if req.import_mode == ImportMode::All {
            session.entities.clone()
        } else {
            req.selected_entities.clone()
        };
        if selected.is_empty() {
            return Err(Error::invalid("No entities selected for import"));
        }
        let unknown: Vec<&str> = selected
            .iter()
            .filter(|e| !session.entities.contains(e))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(Error::invalid(format!(
                "Unknown entities selected: {}",
                unknown.join(", ")
            )));
        }
        selected
    } else {
        vec!["data".to_string()]
    };

    let base_name = FsPath::new(&session.name)
        .file_stem()
        .map_or_else(|| session.name.clone(), |s| s.to_string_lossy().into_owned());

    let mut datasets = Vec::with_capacity(selected.len());
    for entity in &selected {
        let (dataset_name, id) = if session.format.requires_selection() {
            let dataset_name = match req.dataset_name_mode {
                DatasetNameMode::EntityOnly => entity.clone(),
                DatasetNameMode::FilenameEntity => format!("{base_name}_{entity}"),
            };
            let id = state.engine.load_file(
                &session.path,
                &dataset_name,
                session.format,
                Some(entity),
            )?;
            (dataset_name, id)
        } else {
            let id =
                state
                    .engine
                    .load_file(&session.path, &session.name, session.format, None)?;
            (session.name.clone(), id)
        };

        let schema = state.engine.get_schema(&id)?;
        datasets.push(DatasetSummary {
            id,
            name: dataset_name,
            row_count: schema.row_count,
            columns: schema.columns,
            source_type: "file",
        });
    }

    state.sessions.remove(&req.import_id);
    Ok(Json(ImportResponse {
        import_id: req.import_id,
        datasets,
    }))
}

// ── Reads ────────────────────────────────────────────────────────────────

async fn get_schema(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> Result<Json<SchemaResponse>> {
    Ok(Json(state.engine.get_schema(&dataset_id)?))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<u32>,
    page_size: Option<i64>,
    sort_column: Option<String>,
    sort_direction: Option<String>,
    filters: Option<String>,
    cursor: Option<String>,
}

async fn get_page(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<PageResponse>> {
    let request = PageRequest {
        page: params.page.unwrap_or(0),
        page_size: params.page_size.unwrap_or(200),
        sort_column: params.sort_column,
        sort_direction: SortDirection::from_param(params.sort_direction.as_deref()),
        filters: parse_filters(params.filters.as_deref())?,
        cursor: params.cursor,
    };
    Ok(Json(state.engine.get_page(&dataset_id, &request)?))
}

async fn profile_column(
    State(state): State<AppState>,
    Path((dataset_id, column)): Path<(String, String)>,
) -> Result<Json<ProfileReport>> {
    Ok(Json(state.engine.profile_column(&dataset_id, &column)?))
}

#[derive(Debug, Deserialize)]
struct SqlRequest {
    sql: String,
}

async fn run_query(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    Json(body): Json<JsonValue>,
) -> Result<Json<QueryResponse>> {
    let req: SqlRequest = decode_body(body)?;
    if req.sql.trim().is_empty() {
        return Err(Error::invalid("SQL query is empty"));
    }
    Ok(Json(state.engine.run_query(&dataset_id, &req.sql)?))
}

async fn run_table_query(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    Json(body): Json<JsonValue>,
) -> Result<Json<TableQueryResponse>> {
    let spec: TableQuerySpec = decode_body(body)?;
    Ok(Json(state.engine.run_table_query(&dataset_id, &spec)?))
}

#[derive(Debug, Deserialize)]
struct CellRequest {
    code: String,
}

async fn run_cell(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    Json(body): Json<JsonValue>,
) -> Result<Json<CellResponse>> {
    let req: CellRequest = decode_body(body)?;
    Ok(Json(state.engine.run_cell(&dataset_id, &req.code)?))
}

#[derive(Debug, Deserialize)]
struct ExportParams {
    sort_column: Option<String>,
    sort_direction: Option<String>,
    filters: Option<String>,
}

async fn export_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Response> {
    let filters = parse_filters(params.filters.as_deref())?;
    let bytes = state.engine.export_csv(
        &dataset_id,
        params.sort_column.as_deref(),
        SortDirection::from_param(params.sort_direction.as_deref()),
        &filters,
    )?;

    let name = state.engine.dataset_name(&dataset_id)?;
    let stem = FsPath::new(&name)
        .file_stem()
        .map_or_else(|| "export".to_string(), |s| s.to_string_lossy().into_owned());
    let disposition = format!("attachment; filename=\"{}.csv\"", stem.replace('"', ""));

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn decode_body<T: serde::de::DeserializeOwned>(value: JsonValue) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::invalid(e.to_string()))
}

/// Parse the `filters` query parameter: a JSON array of filter objects.
fn parse_filters(raw: Option<&str>) -> Result<Vec<Filter>> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };
    let parsed: JsonValue =
        serde_json::from_str(raw).map_err(|_| Error::invalid("Invalid filters JSON"))?;
    let JsonValue::Array(items) = parsed else {
        return Err(Error::invalid("Filters must be a JSON array"));
    };
    if !items.iter().all(JsonValue::is_object) {
        return Err(Error::invalid("Each filter must be an object"));
    }
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(|e| Error::invalid(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(dir.path()).unwrap();
        (state, dir)
    }

    fn multipart_body(filename: &str, content: &[u8]) -> (String, Vec<u8>) {
        let boundary = "test-boundary-7MA4YWxkTrZu0gW";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    async fn post_upload(app: &Router, path: &str, filename: &str, content: &[u8]) -> Response {
        let (content_type, body) = multipart_body(filename, content);
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_json(response: Response) -> JsonValue {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_upload_and_schema_round_trip() {
        let (state, _dir) = test_state();
        let app = create_router(state);

        let response =
            post_upload(&app, "/api/datasets/upload", "sales.csv", b"region,amount\nWest,10\nEast,20\n")
                .await;
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["name"], "sales.csv");
        assert_eq!(payload["rowCount"], 2);
        let id = payload["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/datasets/{id}/schema"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let schema = body_json(response).await;
        assert_eq!(schema["rowCount"], 2);
        assert!(schema["columns"][0]["sparkline"].is_array());
    }

    #[tokio::test]
    async fn test_upload_rejects_unsafe_filename() {
        let (state, _dir) = test_state();
        let app = create_router(state);

        let response =
            post_upload(&app, "/api/datasets/upload", "../evil.csv", b"a,b\n1,2\n").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("Invalid filename"));
    }

    #[tokio::test]
    async fn test_upload_rejects_unknown_suffix() {
        let (state, _dir) = test_state();
        let app = create_router(state);

        let response = post_upload(&app, "/api/datasets/upload", "notes.txt", b"hello").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response)
            .await
            .contains("Unsupported file format: .txt"));
    }

    #[tokio::test]
    async fn test_upload_rejects_multi_entity_formats() {
        let (state, _dir) = test_state();
        let app = create_router(state);

        let response = post_upload(&app, "/api/datasets/upload", "book.xlsx", b"zip-ish").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("multi-entity"));
    }

    #[tokio::test]
    async fn test_page_rejects_non_array_filters() {
        let (state, _dir) = test_state();
        let app = create_router(state.clone());
        let response =
            post_upload(&app, "/api/datasets/upload", "t.csv", b"a\n1\n").await;
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let filters = serde_json::json!({"column": "a", "operator": "=", "value": 1});
        let uri = format!(
            "/api/datasets/{id}/page?filters={}",
            urlencode(&filters.to_string())
        );
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response)
            .await
            .contains("Filters must be a JSON array"));
    }

    #[tokio::test]
    async fn test_unknown_dataset_is_404() {
        let (state, _dir) = test_state();
        let app = create_router(state);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/datasets/nope/schema")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_rejects_empty_sql() {
        let (state, _dir) = test_state();
        let app = create_router(state);
        let response =
            post_upload(&app, "/api/datasets/upload", "t.csv", b"a\n1\n").await;
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/datasets/{id}/query"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"sql\": \"   \"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("SQL query is empty"));
    }

    #[tokio::test]
    async fn test_table_query_endpoint() {
        let (state, _dir) = test_state();
        let app = create_router(state);
        let response = post_upload(
            &app,
            "/api/datasets/upload",
            "sales.csv",
            b"region,amount\nWest,800\nWest,400\nEast,300\n",
        )
        .await;
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let spec = serde_json::json!({
            "groupBy": ["region"],
            "aggregations": [{"op": "sum", "column": "amount", "as": "amount_total"}],
            "having": [{"metric": "amount_total", "operator": ">", "value": 1000}],
            "sort": [{"column": "amount_total", "direction": "desc"}],
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/datasets/{id}/table-query"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(spec.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert!(payload["generatedSql"]
            .as_str()
            .unwrap()
            .contains("HAVING \"amount_total\" > ?"));
        assert_eq!(payload["rowCount"], 1);
    }

    #[tokio::test]
    async fn test_export_sets_csv_headers() {
        let (state, _dir) = test_state();
        let app = create_router(state);
        let response = post_upload(
            &app,
            "/api/datasets/upload",
            "sales.csv",
            b"region,amount\nWest,10\n",
        )
        .await;
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/datasets/{id}/export"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/csv"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"sales.csv\""
        );
        let text = body_text(response).await;
        assert!(text.starts_with("region,amount\n"));
    }

    #[tokio::test]
    async fn test_import_session_not_found() {
        let (state, _dir) = test_state();
        let app = create_router(state);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/datasets/import")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"importId\": \"missing\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response)
            .await
            .contains("Import session not found"));
    }

    #[tokio::test]
    async fn test_discover_then_import_sqlite() {
        let (state, _dir) = test_state();
        let app = create_router(state);

        let db_dir = tempfile::tempdir().unwrap();
        let db_path = db_dir.path().join("fixture.sqlite");
        {
            let src = rusqlite::Connection::open(&db_path).unwrap();
            src.execute_batch(
                "CREATE TABLE orders (id INTEGER, amount REAL); \
                 INSERT INTO orders VALUES (1, 9.5), (2, 1.25); \
                 CREATE TABLE customers (id INTEGER, name TEXT); \
                 INSERT INTO customers VALUES (7, 'Ada');",
            )
            .unwrap();
        }
        let db_bytes = std::fs::read(&db_path).unwrap();

        let response =
            post_upload(&app, "/api/datasets/discover", "fixture.sqlite", &db_bytes).await;
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["format"], "sqlite");
        assert_eq!(payload["requiresSelection"], true);
        let import_id = payload["importId"].as_str().unwrap().to_string();
        let entities: Vec<&str> = payload["entities"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(entities, vec!["customers", "orders"]);

        // Unknown entity fails atomically.
        let bad = serde_json::json!({
            "importId": import_id,
            "selectedEntities": ["orders", "ghosts"],
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/datasets/import")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(bad.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response)
            .await
            .contains("Unknown entities selected: ghosts"));

        let good = serde_json::json!({
            "importId": import_id,
            "selectedEntities": ["orders"],
            "datasetNameMode": "filename_entity",
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/datasets/import")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(good.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        let datasets = payload["datasets"].as_array().unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0]["name"], "fixture_orders");
        assert_eq!(datasets[0]["rowCount"], 2);

        // The session is consumed on success.
        let again = serde_json::json!({ "importId": import_id, "selectedEntities": ["orders"] });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/datasets/import")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(again.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cell_endpoint() {
        let (state, _dir) = test_state();
        let app = create_router(state);
        let response = post_upload(
            &app,
            "/api/datasets/upload",
            "sales.csv",
            b"region,amount\nWest,800\nEast,300\n",
        )
        .await;
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let body = serde_json::json!({ "code": "df.filter(amount > 500).count()" });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/datasets/{id}/cell"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["rowCount"], 0);
        assert_eq!(payload["textOutput"], "1");
    }

    /// Minimal percent-encoding for query-string test values.
    fn urlencode(s: &str) -> String {
        let mut out = String::new();
        for b in s.bytes() {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(b as char);
                }
                _ => out.push_str(&format!("%{b:02X}")),
            }
        }
        out
    }
}
