use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::*;
use uuid::Uuid;

use crate::error::ServiceError;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::restaurants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbRestaurant {
    pub id: Uuid,
    pub payment_enabled: bool,
    pub processor_account_id: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::restaurant_tables)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbTable {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub table_number: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::menu_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbMenuPrice {
    pub price: BigDecimal,
    pub is_available: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbOrder {
    pub id: Uuid,
    pub table_id: Uuid,
    pub restaurant_id: Uuid,
    pub customer_name: Option<String>,
    pub total_amount: BigDecimal,
    pub amount_paid: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub position: i32,
    pub menu_item_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_price: BigDecimal,
    pub is_paid: bool,
    pub paid_by_intent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::payment_intents)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbPaymentIntent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub table_id: Uuid,
    pub restaurant_id: Uuid,
    pub amount: BigDecimal,
    pub payment_type: String,
    pub covered_item_ids: Vec<Uuid>,
    pub customer_name: Option<String>,
    pub status: String,
    pub external_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Order> for DbOrder {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            table_id: order.table_id,
            restaurant_id: order.restaurant_id,
            customer_name: order.customer_name.clone(),
            total_amount: order.total_amount.to_decimal(),
            amount_paid: order.amount_paid.to_decimal(),
            status: order.status.as_str().to_string(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

pub fn db_order_items(order: &Order) -> Vec<DbOrderItem> {
    order
        .items
        .iter()
        .enumerate()
        .map(|(position, item)| DbOrderItem {
            id: item.id,
            order_id: order.id,
            position: position as i32,
            menu_item_id: item.menu_item_id,
            quantity: item.quantity as i32,
            unit_price: item.unit_price.to_decimal(),
            total_price: item.total_price.to_decimal(),
            is_paid: item.is_paid,
            paid_by_intent_id: item.paid_by_payment_intent_id,
        })
        .collect()
}

impl TryFrom<DbOrderItem> for OrderItem {
    type Error = ServiceError;

    fn try_from(row: DbOrderItem) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            menu_item_id: row.menu_item_id,
            quantity: u32::try_from(row.quantity).map_err(ServiceError::corrupt)?,
            unit_price: Money::from_decimal(&row.unit_price).map_err(ServiceError::corrupt)?,
            total_price: Money::from_decimal(&row.total_price).map_err(ServiceError::corrupt)?,
            is_paid: row.is_paid,
            paid_by_payment_intent_id: row.paid_by_intent_id,
        })
    }
}

/// Rebuilds the aggregate from its order row and item rows (in display order).
pub fn order_from_rows(row: DbOrder, items: Vec<DbOrderItem>) -> Result<Order, ServiceError> {
    let items = items
        .into_iter()
        .map(OrderItem::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Order {
        id: row.id,
        table_id: row.table_id,
        restaurant_id: row.restaurant_id,
        customer_name: row.customer_name,
        items,
        total_amount: Money::from_decimal(&row.total_amount).map_err(ServiceError::corrupt)?,
        amount_paid: Money::from_decimal(&row.amount_paid).map_err(ServiceError::corrupt)?,
        status: row.status.parse().map_err(ServiceError::corrupt)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

impl From<&PaymentIntent> for DbPaymentIntent {
    fn from(intent: &PaymentIntent) -> Self {
        Self {
            id: intent.id,
            order_id: intent.order_id,
            table_id: intent.table_id,
            restaurant_id: intent.restaurant_id,
            amount: intent.amount.to_decimal(),
            payment_type: intent.payment_type.as_str().to_string(),
            covered_item_ids: intent.covered_item_ids.iter().copied().collect(),
            customer_name: intent.customer_name.clone(),
            status: intent.status.as_str().to_string(),
            external_reference: intent.external_reference.clone(),
            failure_reason: intent.failure_reason.clone(),
            created_at: intent.created_at,
            updated_at: intent.updated_at,
        }
    }
}

impl TryFrom<DbPaymentIntent> for PaymentIntent {
    type Error = ServiceError;

    fn try_from(row: DbPaymentIntent) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            table_id: row.table_id,
            restaurant_id: row.restaurant_id,
            amount: Money::from_decimal(&row.amount).map_err(ServiceError::corrupt)?,
            payment_type: row.payment_type.parse().map_err(ServiceError::corrupt)?,
            covered_item_ids: row.covered_item_ids.into_iter().collect(),
            customer_name: row.customer_name,
            status: row.status.parse().map_err(ServiceError::corrupt)?,
            external_reference: row.external_reference,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<OutboxEvent> for DbOutboxEvent {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
            processed: event.processed,
            created_at: event.created_at,
        }
    }
}

impl From<DbOutboxEvent> for OutboxEvent {
    fn from(row: DbOutboxEvent) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            event_data: row.event_data,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}
