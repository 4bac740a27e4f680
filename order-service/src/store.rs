use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

use crate::error::ServiceError;

/// Where a table lives, as reported by the table subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePlacement {
    pub table_id: Uuid,
    pub restaurant_id: Uuid,
    pub table_number: i32,
}

/// A restaurant's payment-processor onboarding state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAccount {
    pub restaurant_id: Uuid,
    pub payment_enabled: bool,
    pub processor_account_id: Option<String>,
}

impl PaymentAccount {
    /// The connected account to charge on, if the restaurant can take payments.
    pub fn connected_account(&self) -> Option<&str> {
        if !self.payment_enabled {
            return None;
        }
        self.processor_account_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Result of applying a completion or failure signal to an intent.
#[derive(Debug, Clone)]
pub struct IntentUpdate {
    pub intent: PaymentIntent,
    pub order: Order,
    pub transition: Transition,
    pub settled: Settled,
}

/// Persistence for orders, their items and payment intents.
///
/// Every method that changes an order runs under an exclusive lock on that
/// order and records its outbox events in the same unit of work.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn table_placement(&self, table_id: Uuid) -> Result<Option<TablePlacement>, ServiceError>;

    /// Current price of an available menu item of `restaurant_id`.
    async fn menu_item_price(
        &self,
        restaurant_id: Uuid,
        menu_item_id: Uuid,
    ) -> Result<Option<Money>, ServiceError>;

    async fn payment_account(&self, restaurant_id: Uuid) -> Result<Option<PaymentAccount>, ServiceError>;

    async fn insert_order(&self, order: &Order) -> Result<(), ServiceError>;

    async fn load_order(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError>;

    /// Newest first.
    async fn table_orders(&self, table_id: Uuid) -> Result<Vec<Order>, ServiceError>;

    /// Orders in the kitchen queue of `restaurant_id`, oldest first.
    async fn kitchen_orders(&self, restaurant_id: Uuid) -> Result<Vec<Order>, ServiceError>;

    async fn pending_intents(&self, order_ids: &[Uuid]) -> Result<Vec<PaymentIntent>, ServiceError>;

    /// Checks `request` against the intents pending on the order and records
    /// the new pending intent, as one atomic step.
    async fn reserve_intent(
        &self,
        order_id: Uuid,
        request: &IntentRequest,
    ) -> Result<PaymentIntent, ServiceError>;

    async fn attach_external_reference(&self, intent_id: Uuid, reference: &str) -> Result<(), ServiceError>;

    async fn load_intent(&self, intent_id: Uuid) -> Result<Option<PaymentIntent>, ServiceError>;

    async fn find_intent_by_reference(&self, reference: &str) -> Result<Option<PaymentIntent>, ServiceError>;

    async fn complete_intent(
        &self,
        intent_id: Uuid,
        reference: Option<&str>,
    ) -> Result<IntentUpdate, ServiceError>;

    async fn fail_intent(&self, intent_id: Uuid, reason: &str) -> Result<IntentUpdate, ServiceError>;

    /// Ids of intents still pending that were opened before `opened_before`.
    async fn stale_intents(&self, opened_before: DateTime<Utc>) -> Result<Vec<Uuid>, ServiceError>;

    async fn advance_status(&self, order_id: Uuid, next: OrderStatus) -> Result<Order, ServiceError>;

    /// Oldest first.
    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, ServiceError>;

    async fn mark_published(&self, event_id: Uuid) -> Result<(), ServiceError>;
}

// Mutations shared by every store. Each runs on an aggregate the caller holds
// locked and returns the outbox events to record with it.

pub(crate) fn apply_reservation(
    order: &Order,
    pending: &[PaymentIntent],
    request: &IntentRequest,
) -> Result<(PaymentIntent, OrderEvent), ServiceError> {
    let plan = plan_intent(order, pending, request)?;
    let intent = PaymentIntent::open(order, plan, request);
    let event = OrderEvent::PaymentIntentOpened {
        intent_id: intent.id,
        order_id: order.id,
        payment_type: intent.payment_type,
        amount: intent.amount,
        item_ids: intent.covered_item_ids.iter().copied().collect(),
    };
    Ok((intent, event))
}

pub(crate) fn apply_completion(
    order: &mut Order,
    intent: &mut PaymentIntent,
    reference: Option<&str>,
) -> Result<(Transition, Settled, Vec<OrderEvent>), ServiceError> {
    if intent.status.is_terminal() {
        return Ok((
            Transition::AlreadyTerminal(intent.status),
            Settled::default(),
            Vec::new(),
        ));
    }
    let items = intent.settlement_items(order);
    let settled = order.mark_items_paid(&items, intent.id)?;
    let transition = intent.complete(reference);
    let events = OrderEvent::settled(order, intent, &settled);
    Ok((transition, settled, events))
}

pub(crate) fn apply_failure(intent: &mut PaymentIntent, reason: &str) -> (Transition, Vec<OrderEvent>) {
    let transition = intent.fail(reason);
    let events = match transition {
        Transition::Applied => vec![OrderEvent::PaymentIntentFailed {
            intent_id: intent.id,
            order_id: intent.order_id,
            reason: reason.to_string(),
        }],
        Transition::AlreadyTerminal(_) => Vec::new(),
    };
    (transition, events)
}

pub(crate) fn apply_status(order: &mut Order, next: OrderStatus) -> Result<OrderEvent, ServiceError> {
    let from = order.status;
    order.advance_status(next)?;
    Ok(OrderEvent::OrderStatusChanged {
        order_id: order.id,
        restaurant_id: order.restaurant_id,
        from,
        to: next,
    })
}
