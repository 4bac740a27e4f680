use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::*;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::store::*;

/// Reference data for running without a database.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSeed {
    #[serde(default)]
    pub restaurants: Vec<PaymentAccount>,
    #[serde(default)]
    pub tables: Vec<TablePlacement>,
    #[serde(default)]
    pub menu_items: Vec<SeedMenuItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedMenuItem {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub price: Money,
    #[serde(default = "available")]
    pub is_available: bool,
}

fn available() -> bool {
    true
}

#[derive(Default)]
struct State {
    restaurants: HashMap<Uuid, PaymentAccount>,
    tables: HashMap<Uuid, TablePlacement>,
    menu_items: HashMap<Uuid, SeedMenuItem>,
    orders: HashMap<Uuid, Order>,
    intents: HashMap<Uuid, PaymentIntent>,
    outbox: VecDeque<OutboxEvent>,
}

impl State {
    fn order(&self, order_id: Uuid) -> Result<&Order, ServiceError> {
        self.orders
            .get(&order_id)
            .ok_or_else(|| ServiceError::not_found("order", order_id))
    }

    fn intent(&self, intent_id: Uuid) -> Result<&PaymentIntent, ServiceError> {
        self.intents
            .get(&intent_id)
            .ok_or_else(|| ServiceError::not_found("payment intent", intent_id))
    }

    fn pending_for(&self, order_id: Uuid) -> Vec<PaymentIntent> {
        self.intents
            .values()
            .filter(|intent| intent.order_id == order_id && intent.status == IntentStatus::Pending)
            .cloned()
            .collect()
    }

    /// Appends unpublished rows, dropping the oldest beyond `capacity`.
    fn record(&mut self, rows: Vec<OutboxEvent>, capacity: usize) {
        self.outbox.extend(rows);
        let excess = self.outbox.len().saturating_sub(capacity);
        if excess > 0 {
            self.outbox.drain(..excess);
            warn!("In-memory outbox full, dropped {} unpublished event(s)", excess);
        }
    }

    /// Serializes first so a failure leaves the state untouched.
    fn outbox_rows(events: &[OrderEvent]) -> Result<Vec<OutboxEvent>, ServiceError> {
        events
            .iter()
            .map(|event| OutboxEvent::new(event).map_err(ServiceError::from))
            .collect()
    }
}

/// Unpublished events kept when nothing relays them.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 10_000;

/// Keeps everything in process behind one async mutex, which serialises all
/// writers. Published events are dropped from the outbox.
pub struct MemoryStore {
    state: Mutex<State>,
    outbox_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::from_seed(CatalogSeed::default())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> Self {
        let state = State {
            restaurants: seed
                .restaurants
                .into_iter()
                .map(|account| (account.restaurant_id, account))
                .collect(),
            tables: seed
                .tables
                .into_iter()
                .map(|table| (table.table_id, table))
                .collect(),
            menu_items: seed
                .menu_items
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity;
        self
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn table_placement(&self, table_id: Uuid) -> Result<Option<TablePlacement>, ServiceError> {
        Ok(self.state.lock().await.tables.get(&table_id).copied())
    }

    async fn menu_item_price(
        &self,
        restaurant_id: Uuid,
        menu_item_id: Uuid,
    ) -> Result<Option<Money>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .menu_items
            .get(&menu_item_id)
            .filter(|item| item.restaurant_id == restaurant_id && item.is_available)
            .map(|item| item.price))
    }

    async fn payment_account(&self, restaurant_id: Uuid) -> Result<Option<PaymentAccount>, ServiceError> {
        Ok(self.state.lock().await.restaurants.get(&restaurant_id).cloned())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), ServiceError> {
        let rows = State::outbox_rows(&[OrderEvent::OrderCreated {
            order_id: order.id,
            restaurant_id: order.restaurant_id,
            table_id: order.table_id,
            total_amount: order.total_amount,
        }])?;
        let mut state = self.state.lock().await;
        state.orders.insert(order.id, order.clone());
        state.record(rows, self.outbox_capacity);
        Ok(())
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn table_orders(&self, table_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| order.table_id == table_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn kitchen_orders(&self, restaurant_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        let state = self.state.lock().await;
        Ok(kitchen_queue(state.orders.values().cloned(), restaurant_id))
    }

    async fn pending_intents(&self, order_ids: &[Uuid]) -> Result<Vec<PaymentIntent>, ServiceError> {
        let state = self.state.lock().await;
        Ok(order_ids
            .iter()
            .flat_map(|order_id| state.pending_for(*order_id))
            .collect())
    }

    async fn reserve_intent(
        &self,
        order_id: Uuid,
        request: &IntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let mut state = self.state.lock().await;
        let order = state.order(order_id)?;
        let pending = state.pending_for(order_id);
        let (intent, event) = apply_reservation(order, &pending, request)?;
        let rows = State::outbox_rows(&[event])?;

        state.intents.insert(intent.id, intent.clone());
        state.record(rows, self.outbox_capacity);
        Ok(intent)
    }

    async fn attach_external_reference(&self, intent_id: Uuid, reference: &str) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        let intent = state
            .intents
            .get_mut(&intent_id)
            .ok_or_else(|| ServiceError::not_found("payment intent", intent_id))?;
        if intent.external_reference.is_none() {
            intent.external_reference = Some(reference.to_string());
            intent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn load_intent(&self, intent_id: Uuid) -> Result<Option<PaymentIntent>, ServiceError> {
        Ok(self.state.lock().await.intents.get(&intent_id).cloned())
    }

    async fn find_intent_by_reference(&self, reference: &str) -> Result<Option<PaymentIntent>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .intents
            .values()
            .find(|intent| intent.external_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn complete_intent(
        &self,
        intent_id: Uuid,
        reference: Option<&str>,
    ) -> Result<IntentUpdate, ServiceError> {
        let mut state = self.state.lock().await;
        let mut intent = state.intent(intent_id)?.clone();
        let mut order = state.order(intent.order_id)?.clone();

        let (transition, settled, events) = apply_completion(&mut order, &mut intent, reference)?;
        let rows = State::outbox_rows(&events)?;

        state.orders.insert(order.id, order.clone());
        state.intents.insert(intent.id, intent.clone());
        state.record(rows, self.outbox_capacity);
        Ok(IntentUpdate {
            intent,
            order,
            transition,
            settled,
        })
    }

    async fn fail_intent(&self, intent_id: Uuid, reason: &str) -> Result<IntentUpdate, ServiceError> {
        let mut state = self.state.lock().await;
        let mut intent = state.intent(intent_id)?.clone();
        let order = state.order(intent.order_id)?.clone();

        let (transition, events) = apply_failure(&mut intent, reason);
        let rows = State::outbox_rows(&events)?;

        state.intents.insert(intent.id, intent.clone());
        state.record(rows, self.outbox_capacity);
        Ok(IntentUpdate {
            intent,
            order,
            transition,
            settled: Settled::default(),
        })
    }

    async fn stale_intents(&self, opened_before: DateTime<Utc>) -> Result<Vec<Uuid>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .intents
            .values()
            .filter(|intent| intent.status == IntentStatus::Pending && intent.created_at < opened_before)
            .map(|intent| intent.id)
            .collect())
    }

    async fn advance_status(&self, order_id: Uuid, next: OrderStatus) -> Result<Order, ServiceError> {
        let mut state = self.state.lock().await;
        let mut order = state.order(order_id)?.clone();
        let event = apply_status(&mut order, next)?;
        let rows = State::outbox_rows(&[event])?;

        state.orders.insert(order.id, order.clone());
        state.record(rows, self.outbox_capacity);
        Ok(order)
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|event| !event.processed)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), ServiceError> {
        self.state
            .lock()
            .await
            .outbox
            .retain(|event| event.id != event_id);
        Ok(())
    }
}
