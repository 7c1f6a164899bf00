//! HTTP surface: one axum router per endpoint family under `/api/v1`,
//! problem-shaped errors, bearer auth, per-family rate limits, and the
//! socket.io layer for the event fabric.

mod admin_routes;
mod auth_routes;
mod combat_routes;
mod faction_routes;
mod governance_routes;
mod message_routes;
mod nav_routes;
mod planet_routes;
mod player_routes;
mod provisioner_routes;
mod regional_routes;
mod security_routes;
mod team_routes;
mod trade_routes;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::tokens;
use crate::database::{global, DbClient, Versioned};
use crate::engine::advisory::AdvisoryEngine;
use crate::error::{Error, ErrorCode, Result};
use crate::fabric::{socket, EventFabric};
use crate::models::{Account, AccountId, DomainEvent, Pagination, Player, Role};
use crate::security::{RateStatus, SecurityEnvelope};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub db: DbClient,
    pub fabric: EventFabric,
    pub security: SecurityEnvelope,
    pub advisory: AdvisoryEngine,
    pub http: reqwest::Client,
}

/// Per-request context for an authenticated call.
pub struct Ctx {
    pub account: Account,
    pub player: Versioned<Player>,
    pub request_id: String,
    pub rate: RateStatus,
}

impl Ctx {
    pub fn is_admin(&self) -> bool {
        self.account.role == Role::Administrator
    }
}

/// Context for unauthenticated endpoints (register, login, webhook).
pub struct PublicCtx {
    pub request_id: String,
    pub rate: RateStatus,
}

pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn source_address(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("direct")
        .trim()
        .to_string()
}

/// Authenticate the bearer token, resolve the player, and charge the
/// family rate budget.
pub async fn authed(state: &AppState, headers: &HeaderMap, family: &str) -> Result<Ctx> {
    let request_id = request_id(headers);
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(Error::AuthenticationRequired)?;
    let claims = tokens::verify_access_token(token)?;
    let account_id = claims.account_id()?;

    let budget = state.security.effective_budget(Some(account_id), family);
    let rate = state
        .security
        .limiter
        .check(&format!("{}:{}", account_id, family), budget)?;

    let mut conn = state.db.conn().await?;
    let account = global::get_account(&mut conn, account_id).await?;
    if !account.is_active() {
        return Err(Error::AccountDisabled);
    }
    let player = global::get_player_by_account(&mut conn, account_id)
        .await?
        .ok_or(Error::NotFound("player"))?;
    Ok(Ctx {
        account,
        player,
        request_id,
        rate,
    })
}

/// Rate-limit an unauthenticated call by source address.
pub fn public(state: &AppState, headers: &HeaderMap, family: &str) -> Result<PublicCtx> {
    let request_id = request_id(headers);
    let budget = state.security.effective_budget(None, family);
    let rate = state
        .security
        .limiter
        .check(&format!("{}:{}", source_address(headers), family), budget)?;
    Ok(PublicCtx { request_id, rate })
}

/// Every degraded advisory call is audited and surfaced on the admin
/// scope, whatever the advisory kind.
pub(crate) async fn record_advisory_degradation(
    state: &AppState,
    account: AccountId,
    kind: &str,
    request_id: &str,
) {
    if let Ok(mut conn) = state.db.conn().await {
        global::insert_audit(
            &mut conn,
            Some(account),
            "advisory.degraded",
            json!({ "kind": kind }),
            Some(request_id),
        )
        .await
        .ok();
    }
    state
        .fabric
        .publish(&DomainEvent::AdvisoryDegraded {
            provider: kind.to_string(),
        })
        .await
        .ok();
}

fn rate_headers(rate: &RateStatus) -> [(&'static str, String); 3] {
    [
        ("X-RateLimit-Limit", rate.limit.to_string()),
        ("X-RateLimit-Remaining", rate.remaining.to_string()),
        ("X-RateLimit-Reset", rate.reset_secs.to_string()),
    ]
}

/// Success response with the rate headers and the echoed request id.
pub fn respond<T: serde::Serialize>(
    status: StatusCode,
    request_id: &str,
    rate: &RateStatus,
    value: T,
) -> Response {
    let mut response = (status, Json(value)).into_response();
    let headers = response.headers_mut();
    for (name, value) in rate_headers(rate) {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// The problem envelope every failing request returns.
pub struct ApiError {
    pub error: Error,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: Error, request_id: &str) -> ApiError {
        ApiError {
            error,
            request_id: request_id.to_string(),
        }
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        ErrorCode::InsufficientPermissions
        | ErrorCode::FactionRestriction
        | ErrorCode::TeamPermissionDenied => StatusCode::FORBIDDEN,
        ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
        ErrorCode::ValidationError | ErrorCode::InsufficientCredits => StatusCode::BAD_REQUEST,
        ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error.code();
        let body = json!({
            "error": {
                "code": code.as_str(),
                "message": self.error.to_string(),
                "details": self.error.details(),
                "timestamp": Utc::now().to_rfc3339(),
                "request_id": self.request_id,
            }
        });
        let mut response = (status_for(code), Json(body)).into_response();
        if let Error::RateLimited { retry_after_secs } = &self.error {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&self.request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

/// Shorthand used by every handler.
pub type ApiResult = std::result::Result<Response, ApiError>;

pub fn fail(request_id: &str) -> impl Fn(Error) -> ApiError + '_ {
    move |error| ApiError::new(error, request_id)
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    20
}

impl PageQuery {
    pub fn clamped(&self) -> (u32, u32) {
        (self.page.max(1), self.per_page.clamp(1, 100))
    }

    pub fn pagination(&self, total: u64) -> Pagination {
        let (page, per_page) = self.clamped();
        Pagination::new(total, page, per_page)
    }
}

pub struct WebApiServer {
    state: Arc<AppState>,
}

impl WebApiServer {
    pub fn new(
        db: &DbClient,
        fabric: &EventFabric,
        security: &SecurityEnvelope,
        advisory: &AdvisoryEngine,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                db: db.clone(),
                fabric: fabric.clone(),
                security: security.clone(),
                advisory: advisory.clone(),
                http: reqwest::Client::new(),
            }),
        }
    }

    pub fn router(&self) -> axum::Router {
        let (socketio_layer, _io) = socket::build_layer(self.state.fabric.clone());
        axum::Router::new()
            .nest("/api/v1/auth", auth_routes::router())
            .nest("/api/v1/self", player_routes::router())
            .nest("/api/v1/navigation", nav_routes::router())
            .nest("/api/v1/trade", trade_routes::router())
            .nest("/api/v1/combat", combat_routes::router())
            .nest("/api/v1/planets", planet_routes::router())
            .nest("/api/v1/teams", team_routes::router())
            .nest("/api/v1/messages", message_routes::router())
            .nest("/api/v1/factions", faction_routes::router())
            .nest("/api/v1/governance", governance_routes::router())
            .nest("/api/v1/security", security_routes::router())
            .nest("/api/v1/regions", regional_routes::router())
            .nest("/api/v1/admin", admin_routes::router())
            .nest("/api/v1/provisioner", provisioner_routes::router())
            .layer(socketio_layer)
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
            .await
            .map_err(|e| Error::Unavailable(format!("bind: {}", e)))?;
        info!(
            "Listening on {}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default()
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Unavailable(format!("serve: {}", e)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(ErrorCode::AuthenticationRequired),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_for(ErrorCode::ValidationError), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::Conflict), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorCode::RateLimitExceeded),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_page_query_clamps() {
        let q = PageQuery {
            page: 0,
            per_page: 100_000,
        };
        assert_eq!(q.clamped(), (1, 100));
    }
}
