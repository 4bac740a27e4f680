use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::*;
use crate::schema::*;
use crate::store::*;

pub type DbPool = Pool<AsyncPgConnection>;

const KITCHEN_STATUSES: [&str; 4] = ["received", "preparing", "ready", "served"];

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Loads the order under `SELECT ... FOR UPDATE`. Must run inside a transaction.
async fn lock_order(conn: &mut AsyncPgConnection, order_id: Uuid) -> Result<Order, ServiceError> {
    let row = orders::table
        .filter(orders::id.eq(order_id))
        .select(DbOrder::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::not_found("order", order_id))?;

    let items = order_items::table
        .filter(order_items::order_id.eq(order_id))
        .order(order_items::position.asc())
        .select(DbOrderItem::as_select())
        .load(conn)
        .await?;

    order_from_rows(row, items)
}

/// Attaches item rows to each order row, keeping the row order.
async fn with_items(conn: &mut AsyncPgConnection, rows: Vec<DbOrder>) -> Result<Vec<Order>, ServiceError> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let item_rows = order_items::table
        .filter(order_items::order_id.eq_any(&ids))
        .order((order_items::order_id.asc(), order_items::position.asc()))
        .select(DbOrderItem::as_select())
        .load(conn)
        .await?;

    let mut by_order: HashMap<Uuid, Vec<DbOrderItem>> = HashMap::new();
    for item in item_rows {
        by_order.entry(item.order_id).or_default().push(item);
    }

    rows.into_iter()
        .map(|row| {
            let items = by_order.remove(&row.id).unwrap_or_default();
            order_from_rows(row, items)
        })
        .collect()
}

async fn pending_for(conn: &mut AsyncPgConnection, order_ids: &[Uuid]) -> Result<Vec<PaymentIntent>, ServiceError> {
    payment_intents::table
        .filter(payment_intents::order_id.eq_any(order_ids))
        .filter(payment_intents::status.eq(IntentStatus::Pending.as_str()))
        .order(payment_intents::created_at.asc())
        .select(DbPaymentIntent::as_select())
        .load(conn)
        .await?
        .into_iter()
        .map(PaymentIntent::try_from)
        .collect()
}

async fn load_intent_row(conn: &mut AsyncPgConnection, intent_id: Uuid) -> Result<PaymentIntent, ServiceError> {
    payment_intents::table
        .find(intent_id)
        .select(DbPaymentIntent::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::not_found("payment intent", intent_id))
        .and_then(PaymentIntent::try_from)
}

/// Locks the order owning `intent_id`, then reads the intent. Intents only
/// change under their order's lock, so the pair is consistent.
async fn lock_intent(conn: &mut AsyncPgConnection, intent_id: Uuid) -> Result<(Order, PaymentIntent), ServiceError> {
    let order_id: Uuid = payment_intents::table
        .find(intent_id)
        .select(payment_intents::order_id)
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::not_found("payment intent", intent_id))?;
    let order = lock_order(conn, order_id).await?;
    let intent = load_intent_row(conn, intent_id).await?;
    Ok((order, intent))
}

async fn write_order(conn: &mut AsyncPgConnection, order: &Order, changed_items: &[Uuid]) -> Result<(), ServiceError> {
    diesel::update(orders::table.find(order.id))
        .set((
            orders::amount_paid.eq(order.amount_paid.to_decimal()),
            orders::status.eq(order.status.as_str()),
            orders::updated_at.eq(order.updated_at),
        ))
        .execute(conn)
        .await?;

    for item in changed_items.iter().filter_map(|id| order.item(*id)) {
        diesel::update(order_items::table.find(item.id))
            .set((
                order_items::is_paid.eq(item.is_paid),
                order_items::paid_by_intent_id.eq(item.paid_by_payment_intent_id),
            ))
            .execute(conn)
            .await?;
    }
    Ok(())
}

async fn write_intent(conn: &mut AsyncPgConnection, intent: &PaymentIntent) -> Result<(), ServiceError> {
    diesel::update(payment_intents::table.find(intent.id))
        .set((
            payment_intents::status.eq(intent.status.as_str()),
            payment_intents::external_reference.eq(&intent.external_reference),
            payment_intents::failure_reason.eq(&intent.failure_reason),
            payment_intents::updated_at.eq(intent.updated_at),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

async fn record_events(conn: &mut AsyncPgConnection, events: &[OrderEvent]) -> Result<(), ServiceError> {
    if events.is_empty() {
        return Ok(());
    }
    let rows = events
        .iter()
        .map(|event| OutboxEvent::new(event).map(DbOutboxEvent::from))
        .collect::<Result<Vec<_>, _>>()?;

    diesel::insert_into(outbox_events::table)
        .values(&rows)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl OrderStore for PgStore {
    async fn table_placement(&self, table_id: Uuid) -> Result<Option<TablePlacement>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let table = restaurant_tables::table
            .find(table_id)
            .select(DbTable::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(table.map(|table| TablePlacement {
            table_id: table.id,
            restaurant_id: table.restaurant_id,
            table_number: table.table_number,
        }))
    }

    async fn menu_item_price(
        &self,
        restaurant_id: Uuid,
        menu_item_id: Uuid,
    ) -> Result<Option<Money>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let row = menu_items::table
            .filter(menu_items::id.eq(menu_item_id))
            .filter(menu_items::restaurant_id.eq(restaurant_id))
            .select(DbMenuPrice::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        match row {
            Some(row) if row.is_available => Ok(Some(
                Money::from_decimal(&row.price).map_err(ServiceError::corrupt)?,
            )),
            _ => Ok(None),
        }
    }

    async fn payment_account(&self, restaurant_id: Uuid) -> Result<Option<PaymentAccount>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let restaurant = restaurants::table
            .find(restaurant_id)
            .select(DbRestaurant::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(restaurant.map(|row| PaymentAccount {
            restaurant_id: row.id,
            payment_enabled: row.payment_enabled,
            processor_account_id: row.processor_account_id,
        }))
    }

    async fn insert_order(&self, order: &Order) -> Result<(), ServiceError> {
        let mut conn = self.pool.get().await?;
        let row = DbOrder::from(order);
        let items = db_order_items(order);
        let event = OrderEvent::OrderCreated {
            order_id: order.id,
            restaurant_id: order.restaurant_id,
            table_id: order.table_id,
            total_amount: order.total_amount,
        };

        conn.transaction::<_, ServiceError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(orders::table)
                    .values(&row)
                    .execute(conn)
                    .await?;

                diesel::insert_into(order_items::table)
                    .values(&items)
                    .execute(conn)
                    .await?;

                record_events(conn, &[event]).await
            })
        })
        .await
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let row = orders::table
            .find(order_id)
            .select(DbOrder::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        match row {
            Some(row) => Ok(with_items(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn table_orders(&self, table_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let rows = orders::table
            .filter(orders::table_id.eq(table_id))
            .order(orders::created_at.desc())
            .select(DbOrder::as_select())
            .load(&mut conn)
            .await?;
        with_items(&mut conn, rows).await
    }

    async fn kitchen_orders(&self, restaurant_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let rows = orders::table
            .filter(orders::restaurant_id.eq(restaurant_id))
            .filter(orders::status.eq_any(KITCHEN_STATUSES))
            .order(orders::created_at.asc())
            .select(DbOrder::as_select())
            .load(&mut conn)
            .await?;
        let orders = with_items(&mut conn, rows).await?;
        Ok(kitchen_queue(orders, restaurant_id))
    }

    async fn pending_intents(&self, order_ids: &[Uuid]) -> Result<Vec<PaymentIntent>, ServiceError> {
        let mut conn = self.pool.get().await?;
        pending_for(&mut conn, order_ids).await
    }

    async fn reserve_intent(
        &self,
        order_id: Uuid,
        request: &IntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let mut conn = self.pool.get().await?;
        let request = request.clone();

        conn.transaction::<_, ServiceError, _>(|conn| {
            Box::pin(async move {
                let order = lock_order(conn, order_id).await?;
                let pending = pending_for(conn, &[order_id]).await?;
                let (intent, event) = apply_reservation(&order, &pending, &request)?;

                diesel::insert_into(payment_intents::table)
                    .values(&DbPaymentIntent::from(&intent))
                    .execute(conn)
                    .await?;
                record_events(conn, &[event]).await?;
                Ok(intent)
            })
        })
        .await
    }

    async fn attach_external_reference(&self, intent_id: Uuid, reference: &str) -> Result<(), ServiceError> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            payment_intents::table
                .filter(payment_intents::id.eq(intent_id))
                .filter(payment_intents::external_reference.is_null()),
        )
        .set((
            payment_intents::external_reference.eq(reference),
            payment_intents::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        if updated == 0 {
            load_intent_row(&mut conn, intent_id).await?;
        }
        Ok(())
    }

    async fn load_intent(&self, intent_id: Uuid) -> Result<Option<PaymentIntent>, ServiceError> {
        let mut conn = self.pool.get().await?;
        payment_intents::table
            .find(intent_id)
            .select(DbPaymentIntent::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .map(PaymentIntent::try_from)
            .transpose()
    }

    async fn find_intent_by_reference(&self, reference: &str) -> Result<Option<PaymentIntent>, ServiceError> {
        let mut conn = self.pool.get().await?;
        payment_intents::table
            .filter(payment_intents::external_reference.eq(reference))
            .select(DbPaymentIntent::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .map(PaymentIntent::try_from)
            .transpose()
    }

    async fn complete_intent(
        &self,
        intent_id: Uuid,
        reference: Option<&str>,
    ) -> Result<IntentUpdate, ServiceError> {
        let mut conn = self.pool.get().await?;
        let reference = reference.map(str::to_string);

        conn.transaction::<_, ServiceError, _>(|conn| {
            Box::pin(async move {
                let (mut order, mut intent) = lock_intent(conn, intent_id).await?;
                let (transition, settled, events) =
                    apply_completion(&mut order, &mut intent, reference.as_deref())?;

                if transition == Transition::Applied {
                    write_order(conn, &order, &settled.newly_paid).await?;
                    write_intent(conn, &intent).await?;
                    record_events(conn, &events).await?;
                }
                Ok(IntentUpdate {
                    intent,
                    order,
                    transition,
                    settled,
                })
            })
        })
        .await
    }

    async fn fail_intent(&self, intent_id: Uuid, reason: &str) -> Result<IntentUpdate, ServiceError> {
        let mut conn = self.pool.get().await?;
        let reason = reason.to_string();

        conn.transaction::<_, ServiceError, _>(|conn| {
            Box::pin(async move {
                let (order, mut intent) = lock_intent(conn, intent_id).await?;
                let (transition, events) = apply_failure(&mut intent, &reason);

                if transition == Transition::Applied {
                    write_intent(conn, &intent).await?;
                    record_events(conn, &events).await?;
                }
                Ok(IntentUpdate {
                    intent,
                    order,
                    transition,
                    settled: Settled::default(),
                })
            })
        })
        .await
    }

    async fn stale_intents(&self, opened_before: DateTime<Utc>) -> Result<Vec<Uuid>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let ids = payment_intents::table
            .filter(payment_intents::status.eq(IntentStatus::Pending.as_str()))
            .filter(payment_intents::created_at.lt(opened_before))
            .select(payment_intents::id)
            .load::<Uuid>(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn advance_status(&self, order_id: Uuid, next: OrderStatus) -> Result<Order, ServiceError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, ServiceError, _>(|conn| {
            Box::pin(async move {
                let mut order = lock_order(conn, order_id).await?;
                let event = apply_status(&mut order, next)?;
                write_order(conn, &order, &[]).await?;
                record_events(conn, &[event]).await?;
                Ok(order)
            })
        })
        .await
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let rows = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .select(DbOutboxEvent::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), ServiceError> {
        let mut conn = self.pool.get().await?;
        diesel::update(outbox_events::table.filter(outbox_events::id.eq(event_id)))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
