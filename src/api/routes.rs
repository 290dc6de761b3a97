//! REST endpoints for submitting calculations and managing operation costs.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::TaskError;
use crate::eval::Evaluator;
use crate::orchestrator::Orchestrator;
use crate::task::OperationDurations;

/// Shared state for the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Used only for syntax validation of submitted expressions.
    pub evaluator: Arc<dyn Evaluator>,
}

#[derive(Debug, Deserialize)]
pub struct AddCalculationRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub expression: String,
}

#[derive(Debug, Deserialize)]
pub struct GetExpressionQuery {
    #[serde(rename = "requestID")]
    pub request_id: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message: String = message.into();
    (status, Json(json!({"error": message}))).into_response()
}

fn task_error_response(err: TaskError) -> Response {
    let status = match &err {
        TaskError::Validation(_) => StatusCode::BAD_REQUEST,
        TaskError::DuplicateRequest { .. } => StatusCode::CONFLICT,
        TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
        TaskError::InvalidTransition { .. } => StatusCode::CONFLICT,
        TaskError::Persistence(_) | TaskError::Dispatch(_) => {
            tracing::error!(error = %err, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, err.to_string())
}

/// POST /add-calculation
async fn add_calculation(
    State(state): State<AppState>,
    payload: Result<Json<AddCalculationRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    if req.id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Field 'id' is required");
    }
    if req.expression.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Field 'expression' is required");
    }
    if let Err(e) = state.evaluator.check_syntax(&req.expression) {
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid expression: {e}"));
    }

    match state
        .orchestrator
        .add_calculation(&req.expression, &req.id)
        .await
    {
        Ok(task_id) => Json(json!({"task_id": task_id})).into_response(),
        Err(e) => task_error_response(e),
    }
}

/// GET /get-expressions
async fn get_expressions(State(state): State<AppState>) -> Response {
    match state.orchestrator.list_tasks().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => task_error_response(e),
    }
}

/// GET /get-expression?requestID=...
async fn get_expression(
    State(state): State<AppState>,
    Query(query): Query<GetExpressionQuery>,
) -> Response {
    let Some(request_id) = query.request_id.filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Query parameter 'requestID' is required");
    };

    match state.orchestrator.get_task_by_request_id(&request_id).await {
        Ok(task) => Json(task).into_response(),
        Err(e) => task_error_response(e),
    }
}

/// POST /update-operations
///
/// Replaces all four costs; fields left out or empty become unset.
async fn update_operations(
    State(state): State<AppState>,
    payload: Result<Json<OperationDurations>, JsonRejection>,
) -> Response {
    let Json(durations) = match payload {
        Ok(durations) => durations,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match state.orchestrator.set_operation_durations(durations).await {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => task_error_response(e),
    }
}

/// GET /get-available-operations
async fn get_available_operations(State(state): State<AppState>) -> Response {
    match state.orchestrator.get_operation_durations().await {
        Ok(durations) => Json(durations).into_response(),
        Err(e) => task_error_response(e),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "calcflow"}))
}

/// Build the full router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/add-calculation", post(add_calculation))
        .route("/get-expressions", get(get_expressions))
        .route("/get-expression", get(get_expression))
        .route("/update-operations", post(update_operations))
        .route("/get-available-operations", get(get_available_operations))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::eval::ArithmeticEvaluator;
    use crate::store::LibSqlBackend;
    use crate::worker::{WorkQueue, WorkQueueReceiver};

    async fn test_app() -> (Router, WorkQueueReceiver) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let (tx, rx) = WorkQueue::bounded(16);
        let state = AppState {
            orchestrator: Arc::new(Orchestrator::new(store, Arc::new(tx))),
            evaluator: Arc::new(ArithmeticEvaluator::new()),
        };
        (router(state), rx)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn add_calculation_returns_task_id_and_enqueues() {
        let (app, mut rx) = test_app().await;

        let (status, body) = send(
            &app,
            post_json("/add-calculation", json!({"id": "r1", "expression": "2+2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let task_id = body["task_id"].as_str().unwrap().to_string();

        let queued = rx.dequeue().await.unwrap();
        assert_eq!(queued.id, task_id);
        assert_eq!(queued.request_id, "r1");
    }

    #[tokio::test]
    async fn duplicate_request_is_conflict() {
        let (app, _rx) = test_app().await;
        let body = json!({"id": "r1", "expression": "2+2"});

        let (status, _) = send(&app, post_json("/add-calculation", body.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, post_json("/add-calculation", body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("r1"));
    }

    #[tokio::test]
    async fn invalid_submissions_are_bad_requests() {
        let (app, _rx) = test_app().await;

        for payload in [
            json!({"expression": "2+2"}),
            json!({"id": "", "expression": "2+2"}),
            json!({"id": "r1"}),
            json!({"id": "r1", "expression": "2+"}),
            json!({"id": "r1", "expression": "2 ^ 3"}),
        ] {
            let (status, body) = send(&app, post_json("/add-calculation", payload.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "payload: {payload}");
            assert!(body["error"].is_string());
        }

        let req = Request::builder()
            .method("POST")
            .uri("/add-calculation")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_expression_by_request_id() {
        let (app, _rx) = test_app().await;
        send(
            &app,
            post_json("/add-calculation", json!({"id": "r1", "expression": "1/0"})),
        )
        .await;

        let (status, body) = send(&app, get_req("/get-expression?requestID=r1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["request_id"], "r1");
        assert_eq!(body["expression"], "1/0");
        assert_eq!(body["status"], "pending");
        assert!(body["finished"].is_null());

        let (status, _) = send(&app, get_req("/get-expression?requestID=unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get_req("/get-expression")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_expressions_lists_all() {
        let (app, _rx) = test_app().await;
        for (id, expr) in [("a", "1+1"), ("b", "2*3")] {
            send(
                &app,
                post_json("/add-calculation", json!({"id": id, "expression": expr})),
            )
            .await;
        }

        let (status, body) = send(&app, get_req("/get-expressions")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_then_get_operations() {
        let (app, _rx) = test_app().await;

        let (status, body) = send(&app, get_req("/get-available-operations")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summation"], "");

        let (status, body) = send(
            &app,
            post_json(
                "/update-operations",
                json!({"summation": "2s", "subtraction": "150ms", "multiplication": "", "division": "1m30s"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summation"], "2s");

        let (_, body) = send(&app, get_req("/get-available-operations")).await;
        assert_eq!(body["summation"], "2s");
        assert_eq!(body["subtraction"], "150ms");
        assert_eq!(body["multiplication"], "");
        assert_eq!(body["division"], "1m30s");
    }

    #[tokio::test]
    async fn malformed_durations_are_rejected() {
        let (app, _rx) = test_app().await;
        for bad in ["-1s", "fast", "10"] {
            let (status, body) = send(
                &app,
                post_json("/update-operations", json!({"summation": bad})),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "value: {bad}");
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn health_check() {
        let (app, _rx) = test_app().await;
        let (status, body) = send(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "calcflow");
    }
}
