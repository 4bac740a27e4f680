use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrderError, ParseEnumError};
use crate::money::Money;
use crate::order::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    /// One diner pays for the items they pick.
    Individual,
    /// Everything still unpaid on the order.
    Table,
    /// A diner pays for a subset while others settle the rest.
    Partial,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Individual => "individual",
            PaymentType::Table => "table",
            PaymentType::Partial => "partial",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(PaymentType::Individual),
            "table" => Ok(PaymentType::Table),
            "partial" => Ok(PaymentType::Partial),
            other => Err(ParseEnumError {
                kind: "payment type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Completed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Completed => "completed",
            IntentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentStatus::Pending)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntentStatus::Pending),
            "completed" => Ok(IntentStatus::Completed),
            "failed" => Ok(IntentStatus::Failed),
            other => Err(ParseEnumError {
                kind: "payment intent status",
                value: other.to_string(),
            }),
        }
    }
}

/// A diner's request to pay. `item_ids` is ignored for [`PaymentType::Table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub payment_type: PaymentType,
    pub item_ids: BTreeSet<Uuid>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentPlan {
    pub covered_item_ids: BTreeSet<Uuid>,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub table_id: Uuid,
    pub restaurant_id: Uuid,
    pub amount: Money,
    pub payment_type: PaymentType,
    /// Empty only for legacy whole-order payments recorded without item
    /// tracking; those settle whatever is unpaid when they complete.
    pub covered_item_ids: BTreeSet<Uuid>,
    pub customer_name: Option<String>,
    pub status: IntentStatus,
    pub external_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The intent had already reached this terminal status; nothing changed.
    AlreadyTerminal(IntentStatus),
}

/// Checks `request` against the order and the intents currently pending on it,
/// and works out which items the new intent covers and what it charges.
pub fn plan_intent(
    order: &Order,
    pending: &[PaymentIntent],
    request: &IntentRequest,
) -> Result<IntentPlan, OrderError> {
    let reserved = reservations(order, pending);
    let reserved_by = |item_id: &Uuid| -> Result<(), OrderError> {
        match reserved.get(item_id) {
            Some(intent_id) => Err(OrderError::ItemAlreadyReserved {
                item_id: *item_id,
                intent_id: *intent_id,
            }),
            None => Ok(()),
        }
    };

    match request.payment_type {
        PaymentType::Table => {
            let amount = order.outstanding()?;
            let covered_item_ids: BTreeSet<Uuid> = order.unpaid_items().map(|item| item.id).collect();
            if amount.is_zero() || covered_item_ids.is_empty() {
                return Err(OrderError::NothingToPay);
            }
            covered_item_ids.iter().try_for_each(|item_id| reserved_by(item_id))?;
            Ok(IntentPlan {
                covered_item_ids,
                amount,
            })
        }
        PaymentType::Individual | PaymentType::Partial => {
            if request.item_ids.is_empty() {
                return Err(OrderError::NoItemsSelected);
            }
            let mut amount = Money::ZERO;
            for item_id in &request.item_ids {
                let item = order
                    .item(*item_id)
                    .ok_or(OrderError::ItemNotFound(*item_id))?;
                if item.is_paid {
                    return Err(OrderError::ItemAlreadyPaid(item.id));
                }
                reserved_by(item_id)?;
                amount = amount.checked_add(item.total_price)?;
            }
            if amount.is_zero() {
                return Err(OrderError::NothingToPay);
            }
            Ok(IntentPlan {
                covered_item_ids: request.item_ids.clone(),
                amount,
            })
        }
    }
}

/// Unpaid items of `order` held by a pending intent, keyed by item id.
pub fn reservations(order: &Order, intents: &[PaymentIntent]) -> HashMap<Uuid, Uuid> {
    intents
        .iter()
        .filter(|intent| intent.order_id == order.id && intent.status == IntentStatus::Pending)
        .flat_map(|intent| {
            intent
                .settlement_items(order)
                .into_iter()
                .map(move |item_id| (item_id, intent.id))
        })
        .collect()
}

impl PaymentIntent {
    pub fn open(order: &Order, plan: IntentPlan, request: &IntentRequest) -> PaymentIntent {
        let now = Utc::now();
        PaymentIntent {
            id: Uuid::new_v4(),
            order_id: order.id,
            table_id: order.table_id,
            restaurant_id: order.restaurant_id,
            amount: plan.amount,
            payment_type: request.payment_type,
            covered_item_ids: plan.covered_item_ids,
            customer_name: request
                .customer_name
                .as_ref()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            status: IntentStatus::Pending,
            external_reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The items this intent settles on completion.
    pub fn settlement_items(&self, order: &Order) -> BTreeSet<Uuid> {
        if self.covered_item_ids.is_empty() {
            order.unpaid_items().map(|item| item.id).collect()
        } else {
            self.covered_item_ids.clone()
        }
    }

    pub fn complete(&mut self, external_reference: Option<&str>) -> Transition {
        if self.status.is_terminal() {
            return Transition::AlreadyTerminal(self.status);
        }
        self.status = IntentStatus::Completed;
        if self.external_reference.is_none() {
            self.external_reference = external_reference.map(str::to_string);
        }
        self.updated_at = Utc::now();
        Transition::Applied
    }

    pub fn fail(&mut self, reason: &str) -> Transition {
        if self.status.is_terminal() {
            return Transition::AlreadyTerminal(self.status);
        }
        self.status = IntentStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.updated_at = Utc::now();
        Transition::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::{cents, two_item_order};

    fn request(payment_type: PaymentType, item_ids: &[Uuid]) -> IntentRequest {
        IntentRequest {
            payment_type,
            item_ids: item_ids.iter().copied().collect(),
            customer_name: None,
        }
    }

    fn open(order: &Order, pending: &[PaymentIntent], req: &IntentRequest) -> Result<PaymentIntent, OrderError> {
        let plan = plan_intent(order, pending, req)?;
        Ok(PaymentIntent::open(order, plan, req))
    }

    #[test]
    fn table_intent_charges_everything_outstanding() {
        let order = two_item_order();
        let intent = open(&order, &[], &request(PaymentType::Table, &[])).unwrap();

        assert_eq!(intent.amount, cents(3050));
        assert_eq!(intent.covered_item_ids.len(), 2);
        assert_eq!(intent.status, IntentStatus::Pending);
        assert_eq!(intent.table_id, order.table_id);
    }

    #[test]
    fn table_intent_after_partial_payment_charges_the_remainder() {
        let mut order = two_item_order();
        let (a, b) = (order.items[0].id, order.items[1].id);
        order
            .mark_items_paid(&[a].into_iter().collect(), Uuid::new_v4())
            .unwrap();

        let intent = open(&order, &[], &request(PaymentType::Table, &[])).unwrap();
        assert_eq!(intent.amount, cents(1350));
        assert_eq!(intent.covered_item_ids, BTreeSet::from([b]));
    }

    #[test]
    fn table_intent_on_settled_order_has_nothing_to_pay() {
        let mut order = two_item_order();
        let all = order.items.iter().map(|item| item.id).collect();
        order.mark_items_paid(&all, Uuid::new_v4()).unwrap();

        assert_eq!(
            open(&order, &[], &request(PaymentType::Table, &[])),
            Err(OrderError::NothingToPay)
        );
    }

    #[test]
    fn partial_intent_charges_selected_items() {
        let order = two_item_order();
        let a = order.items[0].id;
        let intent = open(&order, &[], &request(PaymentType::Partial, &[a])).unwrap();
        assert_eq!(intent.amount, cents(1700));
        assert_eq!(intent.payment_type, PaymentType::Partial);
    }

    #[test]
    fn partial_intent_that_charges_nothing_is_refused() {
        let mut order = two_item_order();
        let b = order.items[1].id;
        order.items[1].total_price = Money::ZERO;

        assert_eq!(
            plan_intent(&order, &[], &request(PaymentType::Partial, &[b])),
            Err(OrderError::NothingToPay)
        );
    }

    #[test]
    fn item_intents_need_a_selection_of_known_unpaid_items() {
        let mut order = two_item_order();
        let a = order.items[0].id;
        let stranger = Uuid::new_v4();

        assert_eq!(
            open(&order, &[], &request(PaymentType::Individual, &[])),
            Err(OrderError::NoItemsSelected)
        );
        assert_eq!(
            open(&order, &[], &request(PaymentType::Individual, &[stranger])),
            Err(OrderError::ItemNotFound(stranger))
        );

        order
            .mark_items_paid(&[a].into_iter().collect(), Uuid::new_v4())
            .unwrap();
        assert_eq!(
            open(&order, &[], &request(PaymentType::Partial, &[a])),
            Err(OrderError::ItemAlreadyPaid(a))
        );
    }

    #[test]
    fn pending_intent_reserves_its_items() {
        let order = two_item_order();
        let (a, b) = (order.items[0].id, order.items[1].id);
        let first = open(&order, &[], &request(PaymentType::Partial, &[a])).unwrap();
        let pending = vec![first.clone()];

        assert_eq!(
            open(&order, &pending, &request(PaymentType::Partial, &[a, b])),
            Err(OrderError::ItemAlreadyReserved {
                item_id: a,
                intent_id: first.id
            })
        );
        assert!(matches!(
            open(&order, &pending, &request(PaymentType::Table, &[])),
            Err(OrderError::ItemAlreadyReserved { .. })
        ));
        assert!(open(&order, &pending, &request(PaymentType::Partial, &[b])).is_ok());
    }

    #[test]
    fn failed_intent_releases_its_items() {
        let order = two_item_order();
        let a = order.items[0].id;
        let mut first = open(&order, &[], &request(PaymentType::Partial, &[a])).unwrap();
        assert_eq!(first.fail("card declined"), Transition::Applied);

        let retry = open(&order, &[first], &request(PaymentType::Partial, &[a]));
        assert!(retry.is_ok());
    }

    #[test]
    fn terminal_intents_do_not_change() {
        let order = two_item_order();
        let mut intent = open(&order, &[], &request(PaymentType::Table, &[])).unwrap();

        assert_eq!(intent.complete(Some("pi_123")), Transition::Applied);
        let completed = intent.clone();
        assert_eq!(
            intent.complete(Some("pi_other")),
            Transition::AlreadyTerminal(IntentStatus::Completed)
        );
        assert_eq!(
            intent.fail("late failure"),
            Transition::AlreadyTerminal(IntentStatus::Completed)
        );
        assert_eq!(intent, completed);
        assert_eq!(intent.external_reference.as_deref(), Some("pi_123"));
    }

    #[test]
    fn legacy_whole_order_intent_settles_what_is_unpaid() {
        let order = two_item_order();
        let mut legacy = open(&order, &[], &request(PaymentType::Table, &[])).unwrap();
        legacy.payment_type = PaymentType::Individual;
        legacy.covered_item_ids.clear();

        assert_eq!(legacy.settlement_items(&order).len(), 2);
        let a = order.items[0].id;
        assert!(matches!(
            open(&order, &[legacy], &request(PaymentType::Partial, &[a])),
            Err(OrderError::ItemAlreadyReserved { .. })
        ));
    }
}
