diesel::table! {
    events (id) {
        id -> Uuid,
        name -> Varchar,
        starts_at -> Timestamptz,
        location -> Varchar,
        event_type -> Varchar,
        organizer_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_categories (id) {
        id -> Uuid,
        event_id -> Uuid,
        name -> Varchar,
        unit_price -> Numeric,
        available_count -> Int4,
        total_capacity -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    reservations (id) {
        id -> Uuid,
        event_id -> Uuid,
        category_id -> Uuid,
        quantity -> Int4,
        unit_price -> Numeric,
        status -> Varchar,
        buyer_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        cancelled_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(ticket_categories -> events (event_id));
diesel::joinable!(reservations -> ticket_categories (category_id));

diesel::allow_tables_to_appear_in_same_query!(
    events,
    ticket_categories,
    reservations,
);
