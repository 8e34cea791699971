use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::{ScenarioData, recalculate};
use crate::error::{StoreError, TransferError};
use crate::store::{CalculatorState, KeyValueStore, RejectedRecord, StateStore};
use crate::transfer::{export_state, import_data};

/// The state store every handler shares. The mutex is the single writer that
/// keeps concurrent requests from losing each other's read-modify-write cycles.
pub type SharedStore = Arc<Mutex<StateStore<Box<dyn KeyValueStore>>>>;

pub fn shared_store(store: StateStore<Box<dyn KeyValueStore>>) -> SharedStore {
    Arc::new(Mutex::new(store))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(rename = "type")]
    calculator_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    #[serde(rename = "type")]
    calculator_type: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavePayload {
    id: Option<String>,
    name: String,
    calculator_type: String,
    data: Value,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    states: Vec<CalculatorState>,
    rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/api/scenarios/derive", post(derive_handler))
        .route(
            "/api/states",
            get(list_states_handler)
                .post(save_state_handler)
                .delete(clear_states_handler),
        )
        .route(
            "/api/states/:id",
            get(get_state_handler).delete(delete_state_handler),
        )
        .route("/api/states/:id/export", get(export_state_handler))
        .route("/api/import", post(import_handler))
        .fallback(not_found_handler)
        .with_state(store)
}

pub async fn run_http_server(port: u16, store: SharedStore) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(store);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "scenario planner API listening");
    info!("Local access: http://127.0.0.1:{port}/api/states");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn derive_handler(Json(payload): Json<Value>) -> Response {
    let data = match ScenarioData::from_request(payload) {
        Ok(data) => data,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    match recalculate(&data) {
        Ok(derived) => json_response(StatusCode::OK, derived),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

async fn list_states_handler(
    State(store): State<SharedStore>,
    Query(query): Query<ListQuery>,
) -> Response {
    let store = store.lock().await;
    let report = match query.calculator_type.as_deref() {
        Some(calculator_type) => store.load_report_by_type(calculator_type),
        None => store.load_report(),
    };
    json_response(
        StatusCode::OK,
        ListResponse {
            states: report.states,
            rejected: report.rejected,
        },
    )
}

async fn save_state_handler(
    State(store): State<SharedStore>,
    Json(payload): Json<SavePayload>,
) -> Response {
    let mut state = CalculatorState::new(payload.name, payload.calculator_type, payload.data);
    if let Some(id) = payload.id {
        state.id = id;
    }
    let store = store.lock().await;
    match store.save_state(&state) {
        Ok(()) => json_response(StatusCode::CREATED, state),
        Err(err) => store_error_response(err),
    }
}

async fn get_state_handler(State(store): State<SharedStore>, Path(id): Path<String>) -> Response {
    match store.lock().await.get_state(&id) {
        Some(state) => json_response(StatusCode::OK, state),
        None => error_response(StatusCode::NOT_FOUND, &format!("No state with id `{id}`")),
    }
}

async fn delete_state_handler(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
) -> Response {
    match store.lock().await.delete_state(&id) {
        Ok(()) => with_cache_control(StatusCode::NO_CONTENT),
        Err(err) => store_error_response(err),
    }
}

async fn clear_states_handler(State(store): State<SharedStore>) -> Response {
    match store.lock().await.clear_all_states() {
        Ok(()) => with_cache_control(StatusCode::NO_CONTENT),
        Err(err) => store_error_response(err),
    }
}

async fn export_state_handler(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
) -> Response {
    let Some(state) = store.lock().await.get_state(&id) else {
        return error_response(StatusCode::NOT_FOUND, &format!("No state with id `{id}`"));
    };
    match export_state(&state) {
        Ok(file) => with_cache_control((
            [
                (
                    header::CONTENT_TYPE,
                    "application/json; charset=utf-8".to_string(),
                ),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file.filename.replace('"', "")),
                ),
            ],
            file.bytes,
        )),
        Err(err) => transfer_error_response(err),
    }
}

async fn import_handler(
    State(store): State<SharedStore>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> Response {
    let data = match import_data(body.as_ref(), &query.calculator_type).await {
        Ok(data) => data,
        Err(err) => return transfer_error_response(err),
    };
    let name = query
        .name
        .unwrap_or_else(|| format!("Imported {}", query.calculator_type));
    let state = CalculatorState::new(name, query.calculator_type, data);
    let store = store.lock().await;
    match store.save_state(&state) {
        Ok(()) => json_response(StatusCode::CREATED, state),
        Err(err) => store_error_response(err),
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn store_error_response(err: StoreError) -> Response {
    warn!(error = %err, "state store request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
}

fn transfer_error_response(err: TransferError) -> Response {
    let status = match &err {
        TransferError::TypeMismatch { .. } => StatusCode::CONFLICT,
        TransferError::Format(_) | TransferError::Io(_) => StatusCode::BAD_REQUEST,
        TransferError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &err.to_string())
}
