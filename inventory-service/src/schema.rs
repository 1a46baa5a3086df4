diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Varchar,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Nullable<Bool>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        price -> Numeric,
        sku -> Nullable<Varchar>,
        is_active -> Bool,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    reservation_line_items (id) {
        id -> Uuid,
        reservation_id -> Varchar,
        product_id -> Uuid,
        quantity -> Int4,
        status -> Varchar,
        expires_at -> Timestamptz,
        reserved_by -> Nullable<Varchar>,
        reason -> Varchar,
        reference_id -> Nullable<Varchar>,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    stock_ledger (product_id) {
        product_id -> Uuid,
        total_quantity -> Int4,
        reserved_quantity -> Int4,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(reservation_line_items -> products (product_id));
diesel::joinable!(stock_ledger -> products (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    outbox_events,
    products,
    reservation_line_items,
    stock_ledger,
);
