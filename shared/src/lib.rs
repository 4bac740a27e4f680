use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod commission;
pub mod error;
pub mod intent;
pub mod kitchen;
pub mod money;
pub mod order;

pub use commission::{compute_fee, DEFAULT_COMMISSION_RATE};
pub use error::{ErrorKind, OrderError, ParseEnumError};
pub use intent::{plan_intent, reservations, IntentPlan, IntentRequest, IntentStatus, PaymentIntent, PaymentType, Transition};
pub use kitchen::{is_kitchen_visible, kitchen_queue};
pub use money::{Money, MoneyError, Rate};
pub use order::{NewOrderLine, Order, OrderItem, OrderStatus, Settled};

/// Domain events recorded in the outbox alongside the state change they
/// describe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    OrderCreated {
        order_id: Uuid,
        restaurant_id: Uuid,
        table_id: Uuid,
        total_amount: Money,
    },
    PaymentIntentOpened {
        intent_id: Uuid,
        order_id: Uuid,
        payment_type: PaymentType,
        amount: Money,
        item_ids: Vec<Uuid>,
    },
    PaymentIntentCompleted {
        intent_id: Uuid,
        order_id: Uuid,
        amount: Money,
        item_ids: Vec<Uuid>,
        amount_paid: Money,
    },
    PaymentIntentFailed {
        intent_id: Uuid,
        order_id: Uuid,
        reason: String,
    },
    /// The order is fully paid and enters the kitchen queue.
    OrderReceived {
        order_id: Uuid,
        restaurant_id: Uuid,
        table_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        restaurant_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
}

impl OrderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated { .. } => "OrderCreated",
            OrderEvent::PaymentIntentOpened { .. } => "PaymentIntentOpened",
            OrderEvent::PaymentIntentCompleted { .. } => "PaymentIntentCompleted",
            OrderEvent::PaymentIntentFailed { .. } => "PaymentIntentFailed",
            OrderEvent::OrderReceived { .. } => "OrderReceived",
            OrderEvent::OrderStatusChanged { .. } => "OrderStatusChanged",
        }
    }

    /// Events are keyed by order so consumers see one order's history in order.
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            OrderEvent::OrderCreated { order_id, .. }
            | OrderEvent::PaymentIntentOpened { order_id, .. }
            | OrderEvent::PaymentIntentCompleted { order_id, .. }
            | OrderEvent::PaymentIntentFailed { order_id, .. }
            | OrderEvent::OrderReceived { order_id, .. }
            | OrderEvent::OrderStatusChanged { order_id, .. } => *order_id,
        }
    }

    /// Events for a completed intent; `settled.received` adds the kitchen
    /// hand-off.
    pub fn settled(order: &Order, intent: &PaymentIntent, settled: &Settled) -> Vec<OrderEvent> {
        let mut events = vec![OrderEvent::PaymentIntentCompleted {
            intent_id: intent.id,
            order_id: order.id,
            amount: intent.amount,
            item_ids: settled.newly_paid.clone(),
            amount_paid: order.amount_paid,
        }];
        if settled.received {
            events.push(OrderEvent::OrderReceived {
                order_id: order.id,
                restaurant_id: order.restaurant_id,
                table_id: order.table_id,
            });
        }
        events
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(event: &OrderEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event)?,
            processed: false,
            created_at: Utc::now(),
        })
    }
}
