use thiserror::Error;
use uuid::Uuid;

use crate::money::MoneyError;
use crate::order::OrderStatus;

/// How a caller should treat a rejected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Transition,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order must contain at least one item")]
    EmptyOrder,

    #[error("invalid quantity {quantity} for menu item {menu_item_id}")]
    InvalidQuantity { menu_item_id: Uuid, quantity: i32 },

    #[error("menu item {0} has no price and cannot be ordered")]
    UnpricedItem(Uuid),

    #[error("no items selected for payment")]
    NoItemsSelected,

    #[error("item {0} does not belong to this order")]
    ItemNotFound(Uuid),

    #[error("item {item_id} was already settled by another payment")]
    AlreadyPaid { item_id: Uuid, paid_by: Option<Uuid> },

    #[error("item {0} is already paid")]
    ItemAlreadyPaid(Uuid),

    #[error("item {item_id} is reserved by pending payment intent {intent_id}")]
    ItemAlreadyReserved { item_id: Uuid, intent_id: Uuid },

    #[error("nothing left to pay on this order")]
    NothingToPay,

    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::EmptyOrder
            | OrderError::InvalidQuantity { .. }
            | OrderError::UnpricedItem(_)
            | OrderError::NoItemsSelected
            | OrderError::Money(_) => ErrorKind::Validation,
            OrderError::ItemNotFound(_) => ErrorKind::NotFound,
            OrderError::AlreadyPaid { .. }
            | OrderError::ItemAlreadyPaid(_)
            | OrderError::ItemAlreadyReserved { .. }
            | OrderError::NothingToPay => ErrorKind::Conflict,
            OrderError::InvalidTransition { .. } => ErrorKind::Transition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
