use uuid::Uuid;

use crate::order::{Order, OrderStatus};

/// An order is in the kitchen queue once it has been fully paid and until it
/// is closed.
pub fn is_kitchen_visible(order: &Order) -> bool {
    order.status >= OrderStatus::Received && order.status != OrderStatus::Paid
}

/// Kitchen queue for one restaurant, oldest first.
pub fn kitchen_queue<I>(orders: I, restaurant_id: Uuid) -> Vec<Order>
where
    I: IntoIterator<Item = Order>,
{
    let mut queue: Vec<Order> = orders
        .into_iter()
        .filter(|order| order.restaurant_id == restaurant_id && is_kitchen_visible(order))
        .collect();
    queue.sort_by_key(|order| (order.created_at, order.id));
    queue
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;

    use super::*;
    use crate::order::tests::two_item_order;

    fn paid(mut order: Order) -> Order {
        let all: BTreeSet<Uuid> = order.items.iter().map(|item| item.id).collect();
        order.mark_items_paid(&all, Uuid::new_v4()).unwrap();
        order
    }

    #[test]
    fn only_paid_open_orders_are_visible() {
        let pending = two_item_order();
        assert!(!is_kitchen_visible(&pending));

        let mut order = paid(two_item_order());
        assert!(is_kitchen_visible(&order));
        for next in [OrderStatus::Preparing, OrderStatus::Ready, OrderStatus::Served] {
            order.advance_status(next).unwrap();
            assert!(is_kitchen_visible(&order));
        }
        order.advance_status(OrderStatus::Paid).unwrap();
        assert!(!is_kitchen_visible(&order));
    }

    #[test]
    fn queue_is_filtered_by_restaurant_and_oldest_first() {
        let restaurant_id = Uuid::new_v4();
        let mut older = paid(two_item_order());
        let mut newer = paid(two_item_order());
        let mut unpaid = two_item_order();
        let elsewhere = paid(two_item_order());

        for order in [&mut older, &mut newer, &mut unpaid] {
            order.restaurant_id = restaurant_id;
        }
        older.created_at = newer.created_at - Duration::minutes(5);

        let queue = kitchen_queue(
            vec![newer.clone(), unpaid, elsewhere, older.clone()],
            restaurant_id,
        );
        let ids: Vec<Uuid> = queue.iter().map(|order| order.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }
}
