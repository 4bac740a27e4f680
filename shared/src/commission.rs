use crate::money::{Money, Rate};

/// Platform commission declared to the processor alongside each charge.
pub const DEFAULT_COMMISSION_RATE: Rate = Rate::from_basis_points(300);

pub fn compute_fee(amount: Money, rate: Rate) -> Money {
    amount.percentage_of(rate)
}
