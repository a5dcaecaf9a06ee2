// Peer Grouping System - Web Server
// REST API over the store plus grouping and CSV export endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::error;

use peer_grouping::{
    export, get_all_ratings, get_all_students, get_ratings_by_rater, is_form_open,
    replace_ratings_for_rater, set_form_open, setup_database, GroupingEngine, Partition, Rating,
    Student,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct FormStatusResponse {
    #[serde(rename = "isOpen")]
    is_open: bool,
}

#[derive(Serialize)]
struct GroupingResponse {
    groups: Partition,
}

#[derive(Deserialize)]
struct GroupingParams {
    anchor_id: Option<String>,
}

#[derive(Deserialize)]
struct SubmissionRequest {
    rater_id: String,
    ratings: Vec<SubmissionEntry>,
}

#[derive(Deserialize)]
struct SubmissionEntry {
    rated_id: String,
    score: i32,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/students - Full roster
async fn get_students(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match get_all_students(&conn) {
        Ok(students) => (StatusCode::OK, Json(ApiResponse::ok(students))).into_response(),
        Err(e) => {
            error!("failed to load students: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::ok(Vec::<Student>::new())),
            )
                .into_response()
        }
    }
}

/// GET /api/form_status - Submission gate state
async fn form_status(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let is_open = is_form_open(&conn).unwrap_or(false);
    Json(ApiResponse::ok(FormStatusResponse { is_open }))
}

/// POST /api/form/open - Accept submissions again
async fn open_form(State(state): State<AppState>) -> impl IntoResponse {
    toggle_form(&state, true)
}

/// POST /api/form/close - Stop accepting submissions
async fn close_form(State(state): State<AppState>) -> impl IntoResponse {
    toggle_form(&state, false)
}

fn toggle_form(state: &AppState, open: bool) -> axum::response::Response {
    let conn = state.db.lock().unwrap();

    match set_form_open(&conn, open) {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::ok(FormStatusResponse { is_open: open })),
        )
            .into_response(),
        Err(e) => {
            error!("failed to toggle form: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("failed to toggle form")),
            )
                .into_response()
        }
    }
}

/// POST /api/evaluations - Submit one rater's full batch
async fn submit_evaluations(
    State(state): State<AppState>,
    Json(request): Json<SubmissionRequest>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match is_form_open(&conn) {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::FORBIDDEN,
                Json(ApiResponse::err("form is closed, submissions rejected")),
            )
                .into_response();
        }
        Err(e) => {
            error!("failed to read form gate: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("failed to read form gate")),
            )
                .into_response();
        }
    }

    let ratings: Vec<Rating> = request
        .ratings
        .iter()
        .map(|entry| Rating {
            rater_id: request.rater_id.clone(),
            rated_id: entry.rated_id.clone(),
            score: entry.score,
        })
        .collect();

    match replace_ratings_for_rater(&conn, &request.rater_id, &ratings) {
        Ok(count) => (
            StatusCode::OK,
            Json(ApiResponse::ok(format!("{} ratings stored", count))),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err(e.to_string())),
        )
            .into_response(),
    }
}

/// GET /api/evaluations/:rater_id - One rater's stored batch
async fn get_evaluations(
    State(state): State<AppState>,
    Path(rater_id): Path<String>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match get_ratings_by_rater(&conn, &rater_id) {
        Ok(ratings) => (StatusCode::OK, Json(ApiResponse::ok(ratings))).into_response(),
        Err(e) => {
            error!("failed to load ratings for {}: {}", rater_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::ok(Vec::<Rating>::new())),
            )
                .into_response()
        }
    }
}

/// GET /api/grouping - Compute groups from the current snapshot
async fn get_grouping(
    State(state): State<AppState>,
    Query(params): Query<GroupingParams>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match compute_partition(&conn, params.anchor_id.as_deref()) {
        Ok(groups) => {
            (StatusCode::OK, Json(ApiResponse::ok(GroupingResponse { groups }))).into_response()
        }
        Err(e) => {
            error!("grouping failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("grouping failed")),
            )
                .into_response()
        }
    }
}

/// GET /api/export/grouping.csv
async fn export_grouping_csv(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let result = compute_partition(&conn, None)
        .and_then(|partition| export::grouping_csv(&partition));
    csv_attachment(result, "grouping_result.csv")
}

/// GET /api/export/grouping_grid.csv
async fn export_grouping_grid_csv(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let result = compute_partition(&conn, None)
        .and_then(|partition| export::grouping_grid_csv(&partition));
    csv_attachment(result, "grouping_grid.csv")
}

/// GET /api/export/matrix.csv
async fn export_matrix_csv(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let result = (|| -> anyhow::Result<String> {
        let roster = get_all_students(&conn)?;
        let ratings = get_all_ratings(&conn)?;
        export::relationship_matrix_csv(&roster, &ratings)
    })();
    csv_attachment(result, "relationship_matrix.csv")
}

fn compute_partition(conn: &Connection, anchor_id: Option<&str>) -> anyhow::Result<Partition> {
    let roster = get_all_students(conn)?;
    let ratings = get_all_ratings(conn)?;

    let engine = GroupingEngine::new();
    Ok(engine.compute_grouping(&roster, &ratings, anchor_id))
}

fn csv_attachment(result: anyhow::Result<String>, filename: &str) -> axum::response::Response {
    match result {
        Ok(csv) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename={}", filename),
                ),
            ],
            csv,
        )
            .into_response(),
        Err(e) => {
            error!("export failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("export failed")),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("🌐 Peer Grouping System - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("PEER_GROUPING_DB").unwrap_or_else(|_| "grouping.db".to_string());

    let conn = Connection::open(&db_path).expect("Failed to open database");
    setup_database(&conn).expect("Failed to initialize store");
    println!("✓ Store opened: {}", db_path);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/students", get(get_students))
        .route("/form_status", get(form_status))
        .route("/form/open", post(open_form))
        .route("/form/close", post(close_form))
        .route("/evaluations", post(submit_evaluations))
        .route("/evaluations/:rater_id", get(get_evaluations))
        .route("/grouping", get(get_grouping))
        .route("/export/grouping.csv", get(export_grouping_csv))
        .route("/export/grouping_grid.csv", get(export_grouping_grid_csv))
        .route("/export/matrix.csv", get(export_matrix_csv))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   API: http://localhost:3000/api/grouping");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
