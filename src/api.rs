//! Local Ingress (§4.G): a small HTTP surface letting LAN clients push
//! print jobs directly, subject to tenant checks, feeding the same
//! Registry the Event Pipeline uses.
//!
//! Access control here is tenant-id matching only, not a bearer-token
//! scheme (§4.G).

use axum::extract::{FromRequest, Json, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::config::DaemonConfig;
use crate::registry::{PrinterRegistry, Role, StationTicket};

#[derive(Clone)]
pub struct IngressState {
    pub registry: Arc<PrinterRegistry>,
    pub config: Arc<DaemonConfig>,
    pub start_time: std::time::Instant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    KitchenOrder,
    CustomerTicket,
    CashReport,
    Addition,
    StationTicket,
}

#[derive(Debug, Deserialize)]
pub struct PrintMetadata {
    pub order_id: Option<String>,
    pub ticket_id: Option<String>,
    pub restaurant_id: String,
    pub device_id: String,
    pub job_id: Option<String>,
    pub addition_group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocalPrintRequest {
    pub escpos_base64: String,
    pub job_type: JobType,
    pub role: Option<String>,
    pub station_id: Option<String>,
    pub copies: Option<u32>,
    pub open_cash_drawer: Option<bool>,
    pub metadata: PrintMetadata,
}

#[derive(Debug, Deserialize)]
pub struct StationTicketRequestItem {
    pub station_id: String,
    pub copies: Option<u32>,
    pub escpos_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct StationTicketsRequest {
    pub tickets: Vec<StationTicketRequestItem>,
    pub metadata: PrintMetadata,
}

#[derive(Debug, Deserialize)]
pub struct CashDrawerRequest {
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PrintApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl PrintApiResponse {
    fn ok(printer_name: Option<String>) -> Self {
        Self {
            success: true,
            printed_at: Some(chrono::Utc::now().to_rfc3339()),
            printer_name,
            error: None,
            retryable: None,
        }
    }

    fn fail(error: impl Into<String>, retryable: bool) -> Self {
        Self { success: false, printed_at: None, printer_name: None, error: Some(error.into()), retryable: Some(retryable) }
    }
}

struct ApiError(StatusCode, PrintApiResponse);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

/// A `Json<T>` extractor that turns deserialization failures (missing
/// fields, bad types, malformed body) into a `400` with the same
/// `{success:false, retryable:false}` envelope every handler returns,
/// instead of axum's default `422` plain-text rejection.
struct ApiJson<T>(T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S>,
    <Json<T> as FromRequest<S>>::Rejection: std::fmt::Display,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError(
                StatusCode::BAD_REQUEST,
                PrintApiResponse::fail(rejection.to_string(), false),
            )),
        }
    }
}

fn role_from_str(role: &str) -> Option<Role> {
    match role {
        "customer_ticket" => Some(Role::CustomerTicket),
        "kitchen_default" => Some(Role::KitchenDefault),
        "fiscal" => Some(Role::Fiscal),
        "station" => Some(Role::Station),
        _ => None,
    }
}

fn default_role_for_job(job_type: &JobType) -> Role {
    match job_type {
        JobType::KitchenOrder | JobType::Addition => Role::KitchenDefault,
        JobType::CustomerTicket => Role::CustomerTicket,
        JobType::CashReport => Role::Fiscal,
        JobType::StationTicket => Role::Station,
    }
}

fn check_tenant(state: &IngressState, restaurant_id: &str) -> Result<(), ApiError> {
    if restaurant_id != state.config.restaurant_id {
        return Err(ApiError(
            StatusCode::FORBIDDEN,
            PrintApiResponse::fail("restaurant_id does not match configured tenant", false),
        ));
    }
    Ok(())
}

async fn handle_print(
    State(state): State<IngressState>,
    ApiJson(request): ApiJson<LocalPrintRequest>,
) -> Result<Json<PrintApiResponse>, ApiError> {
    check_tenant(&state, &request.metadata.restaurant_id)?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&request.escpos_base64)
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, PrintApiResponse::fail(format!("invalid base64: {e}"), false)))?;

    let role = request
        .role
        .as_deref()
        .and_then(role_from_str)
        .unwrap_or_else(|| default_role_for_job(&request.job_type));

    let copies = request.copies.unwrap_or(1).max(1);
    let mut last_result = None;
    for _ in 0..copies {
        let result = state.registry.print_by_role(role, &bytes, request.station_id.as_deref()).await;
        last_result = Some(result);
    }
    let result = last_result.expect("copies is always >= 1");

    if result.success && request.open_cash_drawer.unwrap_or(false) {
        state.registry.open_cash_drawer_by_role(role).await;
    }

    if result.success {
        Ok(Json(PrintApiResponse::ok(result.printer_name)))
    } else {
        debug!(error = ?result.error, "local print request failed");
        Ok(Json(PrintApiResponse::fail(
            result.error.unwrap_or_else(|| "print failed".to_string()),
            true,
        )))
    }
}

async fn handle_station_tickets(
    State(state): State<IngressState>,
    ApiJson(request): ApiJson<StationTicketsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_tenant(&state, &request.metadata.restaurant_id)?;

    let tickets: Vec<StationTicket> = request
        .tickets
        .into_iter()
        .map(|t| StationTicket {
            station_id: t.station_id,
            copies: t.copies.unwrap_or(1).max(1),
            payload_base64: t.escpos_base64,
        })
        .collect();

    let results = state.registry.print_station_tickets(tickets).await;
    let responses: Vec<PrintApiResponse> = results
        .into_iter()
        .map(|r| {
            if r.success {
                PrintApiResponse::ok(r.printer_name)
            } else {
                PrintApiResponse::fail(r.error.unwrap_or_else(|| "print failed".to_string()), true)
            }
        })
        .collect();

    Ok(Json(serde_json::json!({ "results": responses })))
}

async fn handle_cash_drawer(
    State(state): State<IngressState>,
    Json(request): Json<CashDrawerRequest>,
) -> Json<PrintApiResponse> {
    let role = request
        .role
        .as_deref()
        .and_then(role_from_str)
        .unwrap_or(Role::CustomerTicket);

    let opened = state.registry.open_cash_drawer_by_role(role).await;
    if opened {
        Json(PrintApiResponse::ok(None))
    } else {
        Json(PrintApiResponse::fail("no printer configured for role", true))
    }
}

#[derive(Debug, Serialize)]
struct DiscoveryResponse {
    device_id: String,
    restaurant_id: String,
    version: String,
    mode: String,
    status: String,
    printer_count: usize,
    role_availability: std::collections::HashMap<String, bool>,
    capabilities: DiscoveryCapabilities,
}

#[derive(Debug, Serialize)]
struct DiscoveryCapabilities {
    cash_drawer: bool,
    station_routing: bool,
    multi_printer: bool,
}

async fn handle_discovery(State(state): State<IngressState>) -> Json<DiscoveryResponse> {
    let printer_count = state.registry.printer_count().await;
    let mode = if printer_count > 1 { "multi-printer" } else { "legacy" };

    Json(DiscoveryResponse {
        device_id: state.config.device_id.clone(),
        restaurant_id: state.config.restaurant_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: mode.to_string(),
        status: "ok".to_string(),
        printer_count,
        role_availability: state.registry.role_availability().await,
        capabilities: DiscoveryCapabilities {
            cash_drawer: true,
            station_routing: true,
            multi_printer: printer_count > 1,
        },
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string(), timestamp: chrono::Utc::now().to_rfc3339() })
}

pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/api/discovery", get(handle_discovery))
        .route("/api/print", post(handle_print))
        .route("/api/print/station-tickets", post(handle_station_tickets))
        .route("/api/cash-drawer/open", post(handle_cash_drawer))
        .route("/api/health", get(handle_health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(AllowOrigin::predicate(|origin, _| {
                            let o = origin.as_bytes();
                            o.starts_with(b"http://localhost")
                                || o.starts_with(b"https://localhost")
                                || o.starts_with(b"http://127.0.0.1")
                        }))
                        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                        .allow_headers(tower_http::cors::Any),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_from_str_rejects_unknown_roles() {
        assert!(role_from_str("not_a_role").is_none());
        assert_eq!(role_from_str("fiscal"), Some(Role::Fiscal));
    }

    #[test]
    fn default_role_for_job_matches_kitchen_orders_to_kitchen_default() {
        assert_eq!(default_role_for_job(&JobType::KitchenOrder), Role::KitchenDefault);
        assert_eq!(default_role_for_job(&JobType::CashReport), Role::Fiscal);
    }

    #[tokio::test]
    async fn tenant_mismatch_is_rejected_before_dispatch() {
        let registry = Arc::new(PrinterRegistry::new());
        let config = Arc::new(DaemonConfig { restaurant_id: "tenant-a".to_string(), ..Default::default() });
        let state = IngressState { registry, config, start_time: std::time::Instant::now() };

        let result = check_tenant(&state, "tenant-b");
        assert!(result.is_err());
    }
}
