diesel::table! {
    stock_items (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        sku -> Varchar,
        name -> Varchar,
        quantity -> Int4,
        unit_price -> Numeric,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reservations (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        request_key -> Nullable<Varchar>,
        lines -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    stock_items,
    reservations,
);
