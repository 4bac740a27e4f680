diesel::table! {
    restaurants (id) {
        id -> Uuid,
        name -> Varchar,
        payment_enabled -> Bool,
        processor_account_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    restaurant_tables (id) {
        id -> Uuid,
        restaurant_id -> Uuid,
        table_number -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    menu_items (id) {
        id -> Uuid,
        restaurant_id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        is_available -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        table_id -> Uuid,
        restaurant_id -> Uuid,
        customer_name -> Nullable<Varchar>,
        total_amount -> Numeric,
        amount_paid -> Numeric,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        position -> Int4,
        menu_item_id -> Uuid,
        quantity -> Int4,
        unit_price -> Numeric,
        total_price -> Numeric,
        is_paid -> Bool,
        paid_by_intent_id -> Nullable<Uuid>,
    }
}

diesel::table! {
    payment_intents (id) {
        id -> Uuid,
        order_id -> Uuid,
        table_id -> Uuid,
        restaurant_id -> Uuid,
        amount -> Numeric,
        payment_type -> Varchar,
        covered_item_ids -> Array<Uuid>,
        customer_name -> Nullable<Varchar>,
        status -> Varchar,
        external_reference -> Nullable<Varchar>,
        failure_reason -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(restaurant_tables -> restaurants (restaurant_id));
diesel::joinable!(menu_items -> restaurants (restaurant_id));
diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(payment_intents -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    restaurants,
    restaurant_tables,
    menu_items,
    orders,
    order_items,
    payment_intents,
    outbox_events,
);
