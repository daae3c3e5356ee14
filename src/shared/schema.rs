diesel::table! {
    tickets (id) {
        id -> Uuid,
        ticket_number -> Int8,
        requester_id -> Varchar,
        requester_name -> Varchar,
        requester_email -> Varchar,
        category -> Varchar,
        description -> Text,
        priority -> Varchar,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_counters (id) {
        id -> Int4,
        last_number -> Int8,
    }
}

diesel::table! {
    notification_outbox (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        recipient -> Varchar,
        subject -> Varchar,
        body -> Text,
        status -> Varchar,
        attempts -> Int4,
        last_error -> Nullable<Text>,
        created_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    password_reset_sagas (ticket_id) {
        ticket_id -> Uuid,
        state -> Varchar,
        error -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    tickets,
    ticket_counters,
    notification_outbox,
    password_reset_sagas,
);
