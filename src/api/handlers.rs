//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    AnalysisResponse, AuthResponse, ChatRequest, ChatResponse, CredentialsRequest,
    DashboardResponse, ErrorResponse, LedgerResponse, ModelsResponse, StockRequest,
    SuccessResponse, UserResponse, CASH_FLOW,
};
use super::AppState;
use crate::analysis::{analyze_expenses, AnalysisError, StockView};
use crate::auth::AuthError;
use crate::db::{Collection, NewRecord, Record};
use crate::ledger::LedgerError;
use crate::runtime::SubmitOutcome;
use crate::state_machine::{ChatState, Identity};
use crate::summary::{build_summary, category_totals};
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Accounts
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/signin", post(sign_in))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/auth/me", get(me))
        // Dashboard
        .route("/api/dashboard", get(dashboard))
        // Expenses and savings
        .route("/api/ledger/:collection", get(list_records).post(add_record))
        .route("/api/ledger/:collection/:id", delete(remove_record))
        // One-shot analysis
        .route("/api/analysis/expenses", post(analyze_expense_habits))
        .route(
            "/api/stocks",
            get(current_stock).post(analyze_stock).delete(clear_stock),
        )
        // Advisor chat
        .route("/api/chat", get(get_chat).post(send_chat))
        .route("/api/chat/stream", get(stream_chat))
        // Model info
        .route("/api/models", get(list_models))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Authentication
// ============================================================

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

/// The caller's identity, from `Authorization: Bearer` or a `token` query
/// parameter (`EventSource` cannot set headers)
struct AuthUser {
    identity: Identity,
    token: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = match TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await {
            Ok(TypedHeader(Authorization(bearer))) => bearer.token().to_string(),
            Err(_) => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .map(|Query(q)| q.token)
                .map_err(|_| AppError::Unauthorized("Missing bearer token".to_string()))?,
        };

        let identity = state
            .auth
            .resolve(&token)
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired session".to_string()))?;
        Ok(Self { identity, token })
    }
}

async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let session = state.auth.sign_up(&req.email, &req.password)?;
    state.chats.present(session.identity.clone()).await;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token: session.token,
            user: session.identity,
        }),
    ))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let session = state.auth.sign_in(&req.email, &req.password)?;
    state.chats.present(session.identity.clone()).await;
    Ok(Json(AuthResponse {
        token: session.token,
        user: session.identity,
    }))
}

async fn sign_out(State(state): State<AppState>, user: AuthUser) -> Json<SuccessResponse> {
    state.auth.sign_out(&user.token);
    state.chats.absent(&user.identity.id).await;
    Json(SuccessResponse { success: true })
}

async fn me(State(state): State<AppState>, user: AuthUser) -> Json<UserResponse> {
    // Page loads re-present the identity; a live chat is left untouched
    state.chats.present(user.identity.clone()).await;
    Json(UserResponse {
        user: user.identity,
    })
}

// ============================================================
// Dashboard
// ============================================================

async fn dashboard(State(state): State<AppState>, user: AuthUser) -> Json<DashboardResponse> {
    let summary = build_summary(state.store.as_ref(), &user.identity.id).await;
    Json(DashboardResponse {
        summary,
        cash_flow: &CASH_FLOW,
    })
}

// ============================================================
// Ledger
// ============================================================

fn parse_collection(name: &str) -> Result<Collection, AppError> {
    name.parse().map_err(AppError::NotFound)
}

async fn list_records(
    State(state): State<AppState>,
    user: AuthUser,
    Path(collection): Path<String>,
) -> Result<Json<LedgerResponse>, AppError> {
    let collection = parse_collection(&collection)?;
    let entries = state.books.list(&user.identity.id, collection).await?;

    let records: Vec<Record> = entries.iter().map(|e| e.record.clone()).collect();
    let total = records.iter().map(Record::amount_or_zero).sum();
    Ok(Json(LedgerResponse {
        categories: category_totals(&records),
        entries,
        total,
    }))
}

async fn add_record(
    State(state): State<AppState>,
    user: AuthUser,
    Path(collection): Path<String>,
    Json(record): Json<NewRecord>,
) -> Result<(StatusCode, Json<Record>), AppError> {
    let collection = parse_collection(&collection)?;
    let stored = state.books.add(&user.identity.id, collection, record).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn remove_record(
    State(state): State<AppState>,
    user: AuthUser,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, AppError> {
    let collection = parse_collection(&collection)?;
    state.books.remove(&user.identity.id, collection, &id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Analysis
// ============================================================

async fn analyze_expense_habits(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<AnalysisResponse>, AppError> {
    let text = analyze_expenses(state.store.as_ref(), state.provider.as_ref(), &user.identity.id).await?;
    Ok(Json(AnalysisResponse { text }))
}

async fn current_stock(State(state): State<AppState>, user: AuthUser) -> Json<StockView> {
    Json(state.stocks.current(&user.identity.id))
}

async fn analyze_stock(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<StockRequest>,
) -> Result<Json<StockView>, AppError> {
    let owner_id = &user.identity.id;
    state
        .stocks
        .analyze(state.provider.as_ref(), owner_id, &req.symbol)
        .await
        .ok_or_else(|| AppError::BadRequest("Symbol is required".to_string()))?;
    Ok(Json(state.stocks.current(owner_id)))
}

async fn clear_stock(State(state): State<AppState>, user: AuthUser) -> Json<SuccessResponse> {
    state.stocks.clear(&user.identity.id);
    Json(SuccessResponse { success: true })
}

// ============================================================
// Chat
// ============================================================

async fn get_chat(State(state): State<AppState>, user: AuthUser) -> Json<ChatState> {
    let owner_id = user.identity.id.clone();
    state.chats.present(user.identity).await;
    Json(state.chats.snapshot(&owner_id).await.unwrap_or_default())
}

async fn send_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let outcome = state.chats.submit(&user.identity.id, &req.text).await;
    let reason = match outcome {
        SubmitOutcome::Accepted => None,
        SubmitOutcome::NotReady => Some("not_ready"),
        SubmitOutcome::Empty => Some("empty"),
    };
    Json(ChatResponse {
        accepted: reason.is_none(),
        reason,
    })
}

async fn stream_chat(State(state): State<AppState>, user: AuthUser) -> Result<Response, AppError> {
    let owner_id = user.identity.id.clone();
    state.chats.present(user.identity).await;
    let (init, rx) = state
        .chats
        .subscribe(&owner_id)
        .await
        .ok_or_else(|| AppError::NotFound("Chat not running".to_string()))?;
    Ok(sse_stream(init, rx).into_response())
}

// ============================================================
// Model Info
// ============================================================

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.llm_registry.available_models(),
        default: state.llm_registry.default_model_id().to_string(),
    })
}

async fn get_version() -> &'static str {
    concat!("finnova ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Upstream(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidEmail | AuthError::WeakPassword => AppError::BadRequest(e.to_string()),
            AuthError::EmailTaken => AppError::Conflict(e.to_string()),
            AuthError::InvalidCredentials => AppError::Unauthorized(e.to_string()),
            AuthError::Storage(_) | AuthError::Hashing(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Invalid(_) => AppError::BadRequest(e.to_string()),
            LedgerError::UnknownRecord(_) => AppError::NotFound(e.to_string()),
            LedgerError::AlreadyPending(_) => AppError::Conflict(e.to_string()),
            LedgerError::Store(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<AnalysisError> for AppError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::NoExpenses => AppError::BadRequest(e.to_string()),
            AnalysisError::Store(_) => AppError::Internal(e.to_string()),
            AnalysisError::Provider(_) => AppError::Upstream(e.to_string()),
        }
    }
}
