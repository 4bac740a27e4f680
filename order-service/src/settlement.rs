use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use shared::*;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::processor::{CancelOutcome, ChargeRequest, PaymentProcessor};
use crate::store::{IntentUpdate, OrderStore};
use crate::webhook::{PaymentSignal, SignalOutcome};

pub const EXPIRED_REASON: &str = "expired";

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub commission_rate: Rate,
    pub currency: String,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            commission_rate: DEFAULT_COMMISSION_RATE,
            currency: "eur".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderLineRequest {
    pub menu_item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub restaurant_id: Uuid,
    pub table_id: Uuid,
    pub customer_name: Option<String>,
    pub items: Vec<OrderLineRequest>,
}

#[derive(Debug, Clone)]
pub struct OpenedIntent {
    pub intent: PaymentIntent,
    pub platform_fee: Money,
    pub client_secret: String,
}

/// An unpaid line item of a table, as offered to a diner choosing what to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpaidItem {
    #[serde(flatten)]
    pub item: OrderItem,
    pub reserved: bool,
}

/// Outcome of one reaper sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Charges canceled and intents failed, items released.
    pub expired: usize,
    /// Charges found already paid; their intents were completed.
    pub settled: usize,
    /// Left pending because the processor could not confirm the cancel.
    pub deferred: usize,
}

enum Reaped {
    Expired,
    Settled,
    Untouched,
}

#[derive(Debug, Clone)]
pub enum SignalHandling {
    Applied(IntentUpdate),
    /// The intent was already terminal; nothing changed.
    Duplicate(IntentUpdate),
    /// No known intent matches the signal.
    Ignored,
}

/// Coordinates orders, payment intents and the payment processor.
#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn OrderStore>,
    processor: Arc<dyn PaymentProcessor>,
    settings: PaymentSettings,
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn OrderStore>, processor: Arc<dyn PaymentProcessor>, settings: PaymentSettings) -> Self {
        Self {
            store,
            processor,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub async fn create_order(&self, request: CreateOrder) -> Result<Order, ServiceError> {
        let placement = self
            .store
            .table_placement(request.table_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("table", request.table_id))?;
        if placement.restaurant_id != request.restaurant_id {
            return Err(ServiceError::BadRequest(format!(
                "table {} does not belong to restaurant {}",
                request.table_id, request.restaurant_id
            )));
        }

        let mut lines = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let unit_price = self
                .store
                .menu_item_price(request.restaurant_id, line.menu_item_id)
                .await?
                .ok_or(ServiceError::MenuItemUnavailable(line.menu_item_id))?;
            lines.push(NewOrderLine {
                menu_item_id: line.menu_item_id,
                quantity: line.quantity,
                unit_price,
            });
        }

        let order = Order::create(
            request.table_id,
            request.restaurant_id,
            request.customer_name,
            lines,
        )?;
        self.store.insert_order(&order).await?;

        info!(
            "Created order {} at table {} ({} items, total {})",
            order.id,
            placement.table_number,
            order.items.len(),
            order.total_amount
        );
        Ok(order)
    }

    pub async fn order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.store
            .load_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", order_id))
    }

    pub async fn table_orders(&self, table_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        self.store.table_orders(table_id).await
    }

    pub async fn unpaid_items(&self, table_id: Uuid) -> Result<Vec<UnpaidItem>, ServiceError> {
        let orders = self.store.table_orders(table_id).await?;
        let order_ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();
        let pending = self.store.pending_intents(&order_ids).await?;

        let mut unpaid = Vec::new();
        for order in &orders {
            let reserved = reservations(order, &pending);
            unpaid.extend(order.unpaid_items().map(|item| UnpaidItem {
                item: item.clone(),
                reserved: reserved.contains_key(&item.id),
            }));
        }
        Ok(unpaid)
    }

    pub async fn open_intent(&self, order_id: Uuid, request: IntentRequest) -> Result<OpenedIntent, ServiceError> {
        let order = self.order(order_id).await?;
        let account = self.store.payment_account(order.restaurant_id).await?;
        let Some(connected_account) = account.as_ref().and_then(|account| account.connected_account()) else {
            return Err(ServiceError::PaymentsNotEnabled(order.restaurant_id));
        };

        let mut intent = self.store.reserve_intent(order_id, &request).await?;
        let platform_fee = compute_fee(intent.amount, self.settings.commission_rate);
        info!(
            "Reserved {} intent {} on order {} for {} ({} items)",
            intent.payment_type,
            intent.id,
            order_id,
            intent.amount,
            intent.covered_item_ids.len()
        );

        let charge = self
            .processor
            .create_charge(ChargeRequest {
                intent: &intent,
                application_fee: platform_fee,
                currency: &self.settings.currency,
                connected_account,
            })
            .await;

        let charge = match charge {
            Ok(charge) => charge,
            Err(err) => {
                warn!("Processor refused intent {}: {}", intent.id, err);
                if let Err(release_err) = self
                    .store
                    .fail_intent(intent.id, &format!("processor error: {}", err))
                    .await
                {
                    error!("Failed to release intent {}: {}", intent.id, release_err);
                }
                return Err(err.into());
            }
        };

        self.store
            .attach_external_reference(intent.id, &charge.external_reference)
            .await?;
        intent.external_reference = Some(charge.external_reference);

        Ok(OpenedIntent {
            intent,
            platform_fee,
            client_secret: charge.client_secret,
        })
    }

    pub async fn complete_intent(&self, intent_id: Uuid, reference: Option<&str>) -> Result<IntentUpdate, ServiceError> {
        let update = self.store.complete_intent(intent_id, reference).await?;
        match update.transition {
            Transition::Applied => {
                info!(
                    "Intent {} completed: {} item(s) paid on order {}, {} of {} collected",
                    intent_id,
                    update.settled.newly_paid.len(),
                    update.order.id,
                    update.order.amount_paid,
                    update.order.total_amount
                );
                if update.settled.received {
                    info!("Order {} fully paid, sent to kitchen", update.order.id);
                }
            }
            Transition::AlreadyTerminal(IntentStatus::Failed) => {
                warn!(
                    "Success reported for failed intent {} on order {}; left unchanged",
                    intent_id, update.order.id
                );
            }
            Transition::AlreadyTerminal(status) => {
                info!("Intent {} already {}, completion ignored", intent_id, status);
            }
        }
        Ok(update)
    }

    pub async fn fail_intent(&self, intent_id: Uuid, reason: &str) -> Result<IntentUpdate, ServiceError> {
        let update = self.store.fail_intent(intent_id, reason).await?;
        match update.transition {
            Transition::Applied => info!(
                "Intent {} failed ({}), released {} item(s)",
                intent_id,
                reason,
                update.intent.covered_item_ids.len()
            ),
            Transition::AlreadyTerminal(status) => {
                info!("Intent {} already {}, failure ignored", intent_id, status)
            }
        }
        Ok(update)
    }

    /// Applies a verified processor signal. Unknown intents are ignored so the
    /// processor stops redelivering.
    pub async fn handle_signal(&self, signal: PaymentSignal) -> Result<SignalHandling, ServiceError> {
        let by_id = match signal.intent_id {
            Some(intent_id) => self.store.load_intent(intent_id).await?,
            None => None,
        };
        let intent = match by_id {
            Some(intent) => Some(intent),
            None => {
                self.store
                    .find_intent_by_reference(&signal.external_reference)
                    .await?
            }
        };
        let Some(intent) = intent else {
            info!(
                "Ignoring event {}: no intent for {}",
                signal.event_id, signal.external_reference
            );
            return Ok(SignalHandling::Ignored);
        };

        if let Some(reference) = intent.external_reference.as_deref() {
            if reference != signal.external_reference {
                warn!(
                    "Ignoring event {}: intent {} belongs to charge {}, not {}",
                    signal.event_id, intent.id, reference, signal.external_reference
                );
                return Ok(SignalHandling::Ignored);
            }
        }

        if let Some(order_id) = signal.order_id {
            if order_id != intent.order_id {
                warn!(
                    "Ignoring event {}: intent {} belongs to order {}, not {}",
                    signal.event_id, intent.id, intent.order_id, order_id
                );
                return Ok(SignalHandling::Ignored);
            }
        }

        let update = match signal.outcome {
            SignalOutcome::Succeeded => {
                self.complete_intent(intent.id, Some(&signal.external_reference))
                    .await?
            }
            SignalOutcome::Failed { reason } => self.fail_intent(intent.id, &reason).await?,
        };
        Ok(match update.transition {
            Transition::Applied => SignalHandling::Applied(update),
            Transition::AlreadyTerminal(_) => SignalHandling::Duplicate(update),
        })
    }

    pub async fn advance_status(&self, order_id: Uuid, next: OrderStatus) -> Result<Order, ServiceError> {
        let order = self.store.advance_status(order_id, next).await?;
        info!("Order {} moved to {}", order_id, next);
        Ok(order)
    }

    pub async fn kitchen_orders(&self, restaurant_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        self.store.kitchen_orders(restaurant_id).await
    }

    /// Cancels the processor charge of every pending intent opened longer than
    /// `timeout` ago, then fails the intent. A charge the diner managed to pay
    /// first settles its intent instead. Intents whose cancel cannot be
    /// confirmed stay pending for the next sweep.
    pub async fn reap_stale_intents(&self, timeout: chrono::Duration) -> Result<ReapSummary, ServiceError> {
        let stale = self.store.stale_intents(Utc::now() - timeout).await?;
        let mut summary = ReapSummary::default();
        if stale.is_empty() {
            return Ok(summary);
        }

        let results = futures::future::join_all(stale.iter().map(|intent_id| self.reap_intent(*intent_id))).await;

        for (intent_id, result) in stale.iter().zip(results) {
            match result {
                Ok(Reaped::Expired) => summary.expired += 1,
                Ok(Reaped::Settled) => summary.settled += 1,
                Ok(Reaped::Untouched) => {}
                Err(err) => {
                    summary.deferred += 1;
                    error!("Failed to expire intent {}: {}", intent_id, err);
                }
            }
        }
        Ok(summary)
    }

    async fn reap_intent(&self, intent_id: Uuid) -> Result<Reaped, ServiceError> {
        let Some(intent) = self.store.load_intent(intent_id).await? else {
            return Ok(Reaped::Untouched);
        };
        if intent.status.is_terminal() {
            return Ok(Reaped::Untouched);
        }

        if let Some(reference) = intent.external_reference.as_deref() {
            let account = self.store.payment_account(intent.restaurant_id).await?;
            let connected_account = account
                .as_ref()
                .and_then(|account| account.processor_account_id.as_deref())
                .ok_or(ServiceError::PaymentsNotEnabled(intent.restaurant_id))?;

            if self.processor.cancel_charge(reference, connected_account).await? == CancelOutcome::AlreadySucceeded {
                warn!("Stale intent {} was paid before it could be canceled", intent_id);
                let update = self.complete_intent(intent_id, Some(reference)).await?;
                return Ok(match update.transition {
                    Transition::Applied => Reaped::Settled,
                    Transition::AlreadyTerminal(_) => Reaped::Untouched,
                });
            }
        }

        let update = self.fail_intent(intent_id, EXPIRED_REASON).await?;
        Ok(match update.transition {
            Transition::Applied => Reaped::Expired,
            Transition::AlreadyTerminal(_) => Reaped::Untouched,
        })
    }
}
