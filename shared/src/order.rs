use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrderError, ParseEnumError};
use crate::money::Money;

/// Order lifecycle. Variants are declared in lifecycle order so the derived
/// `Ord` is the forward direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Received,
    Preparing,
    Ready,
    Served,
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Received => "received",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Served => "served",
            OrderStatus::Paid => "paid",
        }
    }

    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::PendingPayment => Some(OrderStatus::Received),
            OrderStatus::Received => Some(OrderStatus::Preparing),
            OrderStatus::Preparing => Some(OrderStatus::Ready),
            OrderStatus::Ready => Some(OrderStatus::Served),
            OrderStatus::Served => Some(OrderStatus::Paid),
            OrderStatus::Paid => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            "received" => Ok(OrderStatus::Received),
            "preparing" => Ok(OrderStatus::Preparing),
            "ready" => Ok(OrderStatus::Ready),
            "served" => Ok(OrderStatus::Served),
            "paid" => Ok(OrderStatus::Paid),
            other => Err(ParseEnumError {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub menu_item_id: Uuid,
    pub quantity: u32,
    /// Menu price at the time the order was placed.
    pub unit_price: Money,
    pub total_price: Money,
    pub is_paid: bool,
    pub paid_by_payment_intent_id: Option<Uuid>,
}

/// One requested line, with the unit price already snapshotted from the menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub menu_item_id: Uuid,
    pub quantity: i32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub table_id: Uuid,
    pub restaurant_id: Uuid,
    pub customer_name: Option<String>,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a settlement changed on the order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settled {
    pub newly_paid: Vec<Uuid>,
    /// The order became fully paid and entered the kitchen queue.
    pub received: bool,
}

impl Order {
    pub fn create(
        table_id: Uuid,
        restaurant_id: Uuid,
        customer_name: Option<String>,
        lines: Vec<NewOrderLine>,
    ) -> Result<Order, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::EmptyOrder);
        }

        let id = Uuid::new_v4();
        let items = lines
            .into_iter()
            .map(|line| {
                if line.quantity <= 0 {
                    return Err(OrderError::InvalidQuantity {
                        menu_item_id: line.menu_item_id,
                        quantity: line.quantity,
                    });
                }
                // a free line would stay unpaid forever: no intent can charge 0
                if line.unit_price.is_zero() {
                    return Err(OrderError::UnpricedItem(line.menu_item_id));
                }
                let quantity = line.quantity as u32;
                Ok(OrderItem {
                    id: Uuid::new_v4(),
                    order_id: id,
                    menu_item_id: line.menu_item_id,
                    quantity,
                    unit_price: line.unit_price,
                    total_price: line.unit_price.times(quantity)?,
                    is_paid: false,
                    paid_by_payment_intent_id: None,
                })
            })
            .collect::<Result<Vec<_>, OrderError>>()?;

        let total_amount = items
            .iter()
            .try_fold(Money::ZERO, |acc, item| acc.checked_add(item.total_price))?;

        let now = Utc::now();
        Ok(Order {
            id,
            table_id,
            restaurant_id,
            customer_name: customer_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            items,
            total_amount,
            amount_paid: Money::ZERO,
            status: OrderStatus::PendingPayment,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn item(&self, item_id: Uuid) -> Option<&OrderItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn unpaid_items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.iter().filter(|item| !item.is_paid)
    }

    pub fn is_fully_paid(&self) -> bool {
        self.items.iter().all(|item| item.is_paid)
    }

    pub fn outstanding(&self) -> Result<Money, OrderError> {
        Ok(self.total_amount.checked_sub(self.amount_paid)?)
    }

    /// Marks `item_ids` as settled by `intent_id`.
    ///
    /// Items already settled by the same intent are skipped, so replaying a
    /// settlement is harmless. Nothing is changed if any item is unknown or was
    /// settled by a different intent.
    pub fn mark_items_paid(
        &mut self,
        item_ids: &BTreeSet<Uuid>,
        intent_id: Uuid,
    ) -> Result<Settled, OrderError> {
        for item_id in item_ids {
            let item = self
                .item(*item_id)
                .ok_or(OrderError::ItemNotFound(*item_id))?;
            if item.is_paid && item.paid_by_payment_intent_id != Some(intent_id) {
                return Err(OrderError::AlreadyPaid {
                    item_id: item.id,
                    paid_by: item.paid_by_payment_intent_id,
                });
            }
        }

        let mut settled = Settled::default();
        for item in self.items.iter_mut() {
            if item_ids.contains(&item.id) && !item.is_paid {
                item.is_paid = true;
                item.paid_by_payment_intent_id = Some(intent_id);
                settled.newly_paid.push(item.id);
            }
        }

        self.amount_paid = self
            .items
            .iter()
            .filter(|item| item.is_paid)
            .map(|item| item.total_price)
            .sum();

        if self.is_fully_paid() && self.status < OrderStatus::Received {
            self.status = OrderStatus::Received;
            settled.received = true;
        }
        if !settled.newly_paid.is_empty() {
            self.updated_at = Utc::now();
        }
        Ok(settled)
    }

    /// Kitchen-driven move, exactly one step forward. Leaving
    /// `PendingPayment` only happens through settlement.
    pub fn advance_status(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        let allowed = self.status != OrderStatus::PendingPayment && self.status.next() == Some(next);
        if !allowed {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn cents(value: i64) -> Money {
        Money::from_cents(value).unwrap()
    }

    /// Items A (8.50 x 2) and B (13.50 x 1).
    pub(crate) fn two_item_order() -> Order {
        Order::create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some("Ana".to_string()),
            vec![
                NewOrderLine {
                    menu_item_id: Uuid::new_v4(),
                    quantity: 2,
                    unit_price: cents(850),
                },
                NewOrderLine {
                    menu_item_id: Uuid::new_v4(),
                    quantity: 1,
                    unit_price: cents(1350),
                },
            ],
        )
        .unwrap()
    }

    fn ids(ids: &[Uuid]) -> BTreeSet<Uuid> {
        ids.iter().copied().collect()
    }

    #[test]
    fn create_sums_line_totals() {
        let order = two_item_order();
        assert_eq!(order.total_amount, cents(3050));
        assert_eq!(order.items[0].total_price, cents(1700));
        assert_eq!(order.items[1].total_price, cents(1350));
        assert_eq!(order.amount_paid, Money::ZERO);
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert!(order.items.iter().all(|item| item.order_id == order.id));
    }

    #[test]
    fn create_rejects_empty_and_non_positive_quantities() {
        let table = Uuid::new_v4();
        let restaurant = Uuid::new_v4();
        assert_eq!(
            Order::create(table, restaurant, None, vec![]),
            Err(OrderError::EmptyOrder)
        );

        let menu_item_id = Uuid::new_v4();
        let zero = NewOrderLine {
            menu_item_id,
            quantity: 0,
            unit_price: cents(100),
        };
        assert_eq!(
            Order::create(table, restaurant, None, vec![zero]),
            Err(OrderError::InvalidQuantity {
                menu_item_id,
                quantity: 0
            })
        );
    }

    #[test]
    fn create_rejects_free_lines() {
        let free = Uuid::new_v4();
        let result = Order::create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            vec![
                NewOrderLine {
                    menu_item_id: Uuid::new_v4(),
                    quantity: 1,
                    unit_price: cents(1000),
                },
                NewOrderLine {
                    menu_item_id: free,
                    quantity: 1,
                    unit_price: Money::ZERO,
                },
            ],
        );
        assert_eq!(result, Err(OrderError::UnpricedItem(free)));
        assert_eq!(
            OrderError::UnpricedItem(free).kind(),
            crate::error::ErrorKind::Validation
        );
    }

    #[test]
    fn blank_customer_name_is_dropped() {
        let order = Order::create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some("   ".to_string()),
            vec![NewOrderLine {
                menu_item_id: Uuid::new_v4(),
                quantity: 1,
                unit_price: cents(100),
            }],
        )
        .unwrap();
        assert_eq!(order.customer_name, None);
    }

    #[test]
    fn partial_settlement_keeps_order_pending() {
        let mut order = two_item_order();
        let a = order.items[0].id;
        let intent = Uuid::new_v4();

        let settled = order.mark_items_paid(&ids(&[a]), intent).unwrap();
        assert_eq!(settled.newly_paid, vec![a]);
        assert!(!settled.received);
        assert_eq!(order.amount_paid, cents(1700));
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert_eq!(order.items[0].paid_by_payment_intent_id, Some(intent));
        assert_eq!(order.outstanding().unwrap(), cents(1350));
    }

    #[test]
    fn full_settlement_moves_order_to_received() {
        let mut order = two_item_order();
        let (a, b) = (order.items[0].id, order.items[1].id);

        order.mark_items_paid(&ids(&[a]), Uuid::new_v4()).unwrap();
        let settled = order.mark_items_paid(&ids(&[b]), Uuid::new_v4()).unwrap();

        assert!(settled.received);
        assert!(order.is_fully_paid());
        assert_eq!(order.amount_paid, order.total_amount);
        assert_eq!(order.status, OrderStatus::Received);
    }

    #[test]
    fn replaying_a_settlement_changes_nothing() {
        let mut order = two_item_order();
        let a = order.items[0].id;
        let intent = Uuid::new_v4();

        order.mark_items_paid(&ids(&[a]), intent).unwrap();
        let before = order.clone();
        let replay = order.mark_items_paid(&ids(&[a]), intent).unwrap();

        assert!(replay.newly_paid.is_empty());
        assert_eq!(order, before);
    }

    #[test]
    fn settlement_by_another_intent_is_rejected_without_side_effects() {
        let mut order = two_item_order();
        let (a, b) = (order.items[0].id, order.items[1].id);
        let first = Uuid::new_v4();
        order.mark_items_paid(&ids(&[a]), first).unwrap();
        let before = order.clone();

        let err = order.mark_items_paid(&ids(&[a, b]), Uuid::new_v4()).unwrap_err();
        assert_eq!(
            err,
            OrderError::AlreadyPaid {
                item_id: a,
                paid_by: Some(first)
            }
        );
        assert_eq!(order, before);
    }

    #[test]
    fn settlement_of_unknown_item_is_rejected() {
        let mut order = two_item_order();
        let stranger = Uuid::new_v4();
        assert_eq!(
            order.mark_items_paid(&ids(&[stranger]), Uuid::new_v4()),
            Err(OrderError::ItemNotFound(stranger))
        );
    }

    #[test]
    fn status_moves_one_step_forward_only() {
        let mut order = two_item_order();
        let all: BTreeSet<Uuid> = order.items.iter().map(|item| item.id).collect();

        assert!(order.advance_status(OrderStatus::Received).is_err());
        assert!(order.advance_status(OrderStatus::Preparing).is_err());

        order.mark_items_paid(&all, Uuid::new_v4()).unwrap();
        assert!(order.advance_status(OrderStatus::Received).is_err());
        assert!(order.advance_status(OrderStatus::Ready).is_err());

        for next in [
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::Served,
            OrderStatus::Paid,
        ] {
            order.advance_status(next).unwrap();
            assert_eq!(order.status, next);
        }

        for earlier in [OrderStatus::PendingPayment, OrderStatus::Served, OrderStatus::Paid] {
            assert_eq!(
                order.advance_status(earlier),
                Err(OrderError::InvalidTransition {
                    from: OrderStatus::Paid,
                    to: earlier
                })
            );
        }
    }
}
