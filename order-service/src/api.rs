use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::*;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::settlement::{CreateOrder, OrderLineRequest, SettlementEngine, SignalHandling, UnpaidItem};
use crate::webhook::{parse_event, WebhookVerifier, SIGNATURE_HEADER};

#[derive(Clone)]
pub struct AppState {
    pub engine: SettlementEngine,
    pub verifier: Arc<WebhookVerifier>,
    pub staff_token: Arc<str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub restaurant_id: Uuid,
    pub table_id: Uuid,
    pub customer_name: Option<String>,
    pub items: Vec<OrderLineBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineBody {
    pub menu_item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub total_amount: Money,
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentRequest {
    pub payment_type: PaymentType,
    #[serde(default)]
    pub item_ids: Vec<Uuid>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub intent_id: Uuid,
    pub amount: Money,
    pub platform_fee: Money,
    pub processor_client_secret: String,
    pub covered_item_ids: BTreeSet<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/payment-intents", post(create_payment_intent))
        .route("/orders/:id/status", patch(update_status))
        .route("/restaurants/:id/kitchen-orders", get(kitchen_orders))
        .route("/tables/:id/orders", get(table_orders))
        .route("/tables/:id/unpaid-items", get(unpaid_items))
        .route("/webhooks/payments", post(payment_webhook))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn require_staff(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ServiceError::Unauthorized)?;

    if state.staff_token.is_empty() || !constant_time_eq(presented.as_bytes(), state.staff_token.as_bytes()) {
        return Err(ServiceError::Unauthorized);
    }
    Ok(())
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ServiceError> {
    let order = state
        .engine
        .create_order(CreateOrder {
            restaurant_id: request.restaurant_id,
            table_id: request.table_id,
            customer_name: request.customer_name,
            items: request
                .items
                .into_iter()
                .map(|line| OrderLineRequest {
                    menu_item_id: line.menu_item_id,
                    quantity: line.quantity,
                })
                .collect(),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: order.id,
            total_amount: order.total_amount,
            status: order.status,
        }),
    ))
}

pub async fn get_order(State(state): State<AppState>, Path(order_id): Path<Uuid>) -> Result<Json<Order>, ServiceError> {
    Ok(Json(state.engine.order(order_id).await?))
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CreatePaymentIntentRequest>,
) -> Result<(StatusCode, Json<PaymentIntentResponse>), ServiceError> {
    let opened = state
        .engine
        .open_intent(
            order_id,
            IntentRequest {
                payment_type: request.payment_type,
                item_ids: request.item_ids.into_iter().collect(),
                customer_name: request.customer_name,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentIntentResponse {
            intent_id: opened.intent.id,
            amount: opened.intent.amount,
            platform_fee: opened.platform_fee,
            processor_client_secret: opened.client_secret,
            covered_item_ids: opened.intent.covered_item_ids,
        }),
    ))
}

pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ServiceError> {
    require_staff(&state, &headers)?;
    Ok(Json(state.engine.advance_status(order_id, request.status).await?))
}

pub async fn kitchen_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(restaurant_id): Path<Uuid>,
) -> Result<Json<Vec<Order>>, ServiceError> {
    require_staff(&state, &headers)?;
    Ok(Json(state.engine.kitchen_orders(restaurant_id).await?))
}

pub async fn table_orders(
    State(state): State<AppState>,
    Path(table_id): Path<Uuid>,
) -> Result<Json<Vec<Order>>, ServiceError> {
    Ok(Json(state.engine.table_orders(table_id).await?))
}

pub async fn unpaid_items(
    State(state): State<AppState>,
    Path(table_id): Path<Uuid>,
) -> Result<Json<Vec<UnpaidItem>>, ServiceError> {
    Ok(Json(state.engine.unpaid_items(table_id).await?))
}

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    state.verifier.verify(signature, &body, Utc::now())?;

    let signal = parse_event(&body).map_err(|e| ServiceError::BadRequest(format!("malformed event: {}", e)))?;
    let Some(signal) = signal else {
        return Ok(Json(WebhookAck { received: true }));
    };

    let event_id = signal.event_id.clone();
    match state.engine.handle_signal(signal).await? {
        SignalHandling::Applied(update) => info!(
            "Event {} applied to intent {} ({})",
            event_id, update.intent.id, update.intent.status
        ),
        SignalHandling::Duplicate(update) => {
            info!("Event {} redelivered for intent {}", event_id, update.intent.id)
        }
        SignalHandling::Ignored => {}
    }
    Ok(Json(WebhookAck { received: true }))
}

pub async fn health_check() -> &'static str {
    "OK"
}
