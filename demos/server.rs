//! REST API server for the pass ledger.
//!
//! Run with: `cargo run --example server -- --demo-codes`
//!
//! ## Endpoints
//!
//! - `POST /passes` - Replace the pool (`{"image": "...", "count": 100}`)
//! - `GET /passes` - Current pool
//! - `PUT /passes` - Edit the pool image and/or count
//! - `GET /passes/summary` - Totals
//! - `POST /passes/share` - Allocate from the pool, or re-share with `parent_token`
//! - `GET /passes/shared/{token}` - A pass as its holder sees it
//! - `POST /passes/shared/{token}/scan` - Check a pass without consuming it
//! - `PATCH /passes/shared/{token}/use` - Mark a pass used
//! - `GET /passes/shared-tokens` - Token directory
//! - `GET /passes/sales` - All shares, newest first
//! - `DELETE /passes/sales/{mobile}` - Revoke a share
//! - `POST /passes/send-otp`, `POST /passes/verify-otp` - One-time codes
//! - `POST /employees`, `GET /employees` - Scanner staff
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:5000/passes \
//!   -H "Content-Type: application/json" \
//!   -d '{"image": "uploads/pass.png", "count": 100}'
//!
//! curl -X POST http://localhost:5000/passes/share \
//!   -H "Content-Type: application/json" \
//!   -d '{"mobile": "9999900000", "name": "Alice", "count": 10}'
//!
//! curl -X POST http://localhost:5000/passes/shared/<token>/scan \
//!   -H "Content-Type: application/json" \
//!   -d '{"employee_id": 1}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use clap::Parser;
use pass_ledger_rs::{
    Employee, Engine, Mobile, OtpStore, PassError, PassView, Pool, PoolRequest,
    SaleEntry, ScanOutcome, ScannerIdentity, Settings, ShareRequest, Summary, Token, TokenEntry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

// === Request/Response DTOs ===

#[derive(Debug, Serialize, Deserialize)]
pub struct ShareResponse {
    pub message: String,
    pub token: Token,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sold: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UseResponse {
    pub message: String,
    pub token: Token,
    pub name: String,
    pub mobile: String,
    pub used: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub message: String,
    pub restored: u32,
    pub pool: Option<Pool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendCodeRequest {
    pub mobile: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyCodeRequest {
    pub mobile: String,
    pub otp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CodeResponse {
    pub message: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmployeeRequest {
    pub name: String,
    pub mobile: String,
}

/// Response body for errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub codes: Arc<OtpStore>,
    pub demo_codes: bool,
}

impl AppState {
    pub fn new(engine: Engine, codes: OtpStore, demo_codes: bool) -> Self {
        Self {
            engine: Arc::new(engine),
            codes: Arc::new(codes),
            demo_codes,
        }
    }
}

// === Error Handling ===

/// Wrapper for converting `PassError` into HTTP responses.
pub struct AppError(PassError);

impl From<PassError> for AppError {
    fn from(err: PassError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            PassError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            PassError::PoolNotFound => (StatusCode::NOT_FOUND, "POOL_NOT_FOUND"),
            PassError::ShareNotFound => (StatusCode::NOT_FOUND, "SHARE_NOT_FOUND"),
            PassError::ParentNotFound => (StatusCode::NOT_FOUND, "PARENT_NOT_FOUND"),
            PassError::DuplicateRecipient => (StatusCode::CONFLICT, "DUPLICATE_RECIPIENT"),
            PassError::DuplicateEmployee => (StatusCode::CONFLICT, "DUPLICATE_EMPLOYEE"),
            PassError::ResourceExhausted { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "RESOURCE_EXHAUSTED")
            }
            PassError::InsufficientBalance => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            PassError::WouldExhaustSender { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "WOULD_EXHAUST_SENDER")
            }
            PassError::HasDependents => (StatusCode::CONFLICT, "HAS_DEPENDENTS"),
            PassError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            PassError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            PassError::AlreadyUsed => (StatusCode::CONFLICT, "ALREADY_USED"),
            PassError::CodeNotFound => (StatusCode::BAD_REQUEST, "CODE_NOT_FOUND"),
            PassError::CodeExpired => (StatusCode::BAD_REQUEST, "CODE_EXPIRED"),
            PassError::CodeMismatch => (StatusCode::BAD_REQUEST, "CODE_MISMATCH"),
            PassError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Pool Handlers ===

/// POST /passes - Replace the pool.
async fn create_pool(
    State(state): State<AppState>,
    Json(request): Json<PoolRequest>,
) -> Result<(StatusCode, Json<Pool>), AppError> {
    let pool = state.engine.create_pool(request)?;
    Ok((StatusCode::CREATED, Json(pool)))
}

/// GET /passes - Current pool.
async fn get_pool(State(state): State<AppState>) -> Result<Json<Pool>, AppError> {
    Ok(Json(state.engine.pool()?))
}

/// PUT /passes - Edit the pool.
async fn update_pool(
    State(state): State<AppState>,
    Json(request): Json<PoolRequest>,
) -> Result<Json<Pool>, AppError> {
    Ok(Json(state.engine.update_pool(request)?))
}

/// GET /passes/summary - Totals.
async fn summary(State(state): State<AppState>) -> Json<Summary> {
    Json(state.engine.summary())
}

// === Share Handlers ===

/// POST /passes/share - Allocate or re-share.
async fn share(
    State(state): State<AppState>,
    Json(request): Json<ShareRequest>,
) -> Result<Json<ShareResponse>, AppError> {
    let share = state.engine.share(request)?;
    let (available, sold) = if share.is_root() {
        let summary = state.engine.summary();
        (Some(summary.available), Some(summary.sold))
    } else {
        (None, None)
    };
    Ok(Json(ShareResponse {
        message: "Passes shared successfully".to_string(),
        token: share.token,
        available,
        sold,
    }))
}

/// GET /passes/shared/{token} - Pass as its holder sees it.
async fn lookup(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<PassView>, AppError> {
    Ok(Json(state.engine.lookup(&Token(token))?))
}

/// POST /passes/shared/{token}/scan - Check without consuming.
async fn scan(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(scanner): Json<ScannerIdentity>,
) -> Result<Json<ScanOutcome>, AppError> {
    Ok(Json(state.engine.scan(&Token(token), &scanner)?))
}

/// PATCH /passes/shared/{token}/use - Mark used.
async fn mark_used(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<UseResponse>, AppError> {
    let share = state.engine.mark_used(&Token(token))?;
    Ok(Json(UseResponse {
        message: "Pass marked as used".to_string(),
        token: share.token,
        name: share.name,
        mobile: share.mobile.to_string(),
        used: share.used,
    }))
}

/// GET /passes/shared-tokens - Token directory.
async fn shared_tokens(State(state): State<AppState>) -> Json<Vec<TokenEntry>> {
    Json(state.engine.shared_tokens())
}

/// GET /passes/sales - All shares, newest first.
async fn sales(State(state): State<AppState>) -> Json<Vec<SaleEntry>> {
    Json(state.engine.sales())
}

/// DELETE /passes/sales/{mobile} - Revoke a share.
async fn revoke(
    State(state): State<AppState>,
    Path(mobile): Path<String>,
) -> Result<Json<RevokeResponse>, AppError> {
    let share = state.engine.revoke(&mobile)?;
    Ok(Json(RevokeResponse {
        message: "Pass deleted and count restored".to_string(),
        restored: share.issued,
        pool: state.engine.pool().ok(),
    }))
}

// === One-time Code Handlers ===

/// POST /passes/send-otp - Issue a code.
///
/// No SMS gateway is wired in; the code is logged, and echoed back when the
/// server runs with `--demo-codes`.
async fn send_code(
    State(state): State<AppState>,
    Json(request): Json<SendCodeRequest>,
) -> Result<Json<CodeResponse>, AppError> {
    let mobile = Mobile::parse(&request.mobile)?;
    let code = state.codes.issue(&mobile);
    info!(mobile = %mobile, code = %code, "one-time code issued");
    Ok(Json(CodeResponse {
        message: "OTP sent successfully".to_string(),
        success: true,
        otp: state.demo_codes.then_some(code),
    }))
}

/// POST /passes/verify-otp - Check a code.
async fn verify_code(
    State(state): State<AppState>,
    Json(request): Json<VerifyCodeRequest>,
) -> Result<Json<CodeResponse>, AppError> {
    let mobile = Mobile::parse(&request.mobile)?;
    state.codes.verify(&mobile, &request.otp)?;
    Ok(Json(CodeResponse {
        message: "OTP verified successfully".to_string(),
        success: true,
        otp: None,
    }))
}

// === Employee Handlers ===

/// POST /employees - Register a scanner.
async fn create_employee(
    State(state): State<AppState>,
    Json(request): Json<EmployeeRequest>,
) -> Result<(StatusCode, Json<Employee>), AppError> {
    let employee = state
        .engine
        .register_employee(&request.name, &request.mobile)?;
    Ok((StatusCode::CREATED, Json(employee)))
}

/// GET /employees - All scanners.
async fn list_employees(State(state): State<AppState>) -> Json<Vec<Employee>> {
    Json(state.engine.employees())
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/passes", get(get_pool).post(create_pool).put(update_pool))
        .route("/passes/summary", get(summary))
        .route("/passes/share", post(share))
        .route("/passes/shared/{token}", get(lookup))
        .route("/passes/shared/{token}/scan", post(scan))
        .route("/passes/shared/{token}/use", patch(mark_used))
        .route("/passes/shared-tokens", get(shared_tokens))
        .route("/passes/sales", get(sales))
        .route("/passes/sales/{mobile}", axum::routing::delete(revoke))
        .route("/passes/send-otp", post(send_code))
        .route("/passes/verify-otp", post(verify_code))
        .route("/employees", get(list_employees).post(create_employee))
        .with_state(state)
}

// === Main ===

#[derive(Parser, Debug)]
#[command(name = "pass-ledger-server")]
struct Args {
    #[command(flatten)]
    settings: Settings,
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Args { settings } = Args::parse();
    settings.init_logging();

    let engine = Engine::load(&settings.state)?;
    let state = AppState::new(engine, settings.otp_store(), settings.demo_codes);
    let app = create_router(state.clone());

    let listener = TcpListener::bind(settings.addr).await?;
    info!(addr = %settings.addr, "pass ledger API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.engine.save(&settings.state)?;
    info!(state = %settings.state.display(), "state saved");
    Ok(())
}
