diesel::table! {
    orders (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        display_number -> Int8,
        status -> Varchar,
        created_at -> Timestamptz,
        total -> Numeric,
        client_request_id -> Nullable<Varchar>,
    }
}

diesel::table! {
    order_lines (id) {
        id -> Uuid,
        order_id -> Uuid,
        line_no -> Int4,
        sku -> Varchar,
        name -> Varchar,
        quantity -> Int4,
        unit_price -> Numeric,
    }
}

diesel::table! {
    outbox_messages (id) {
        id -> Uuid,
        occurred_at -> Timestamptz,
        message_type -> Varchar,
        payload -> Text,
        correlation_id -> Nullable<Varchar>,
        published_at -> Nullable<Timestamptz>,
        attempts -> Int4,
        next_attempt_at -> Nullable<Timestamptz>,
        dead_lettered_at -> Nullable<Timestamptz>,
        last_error -> Nullable<Text>,
    }
}

diesel::joinable!(order_lines -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    order_lines,
    outbox_messages,
);
