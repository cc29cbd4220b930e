diesel::table! {
    jobs (id) {
        id -> Varchar,
        contract_address -> Varchar,
        chain_id -> Int8,
        events -> Array<Text>,
        event_addresses -> Nullable<Array<Text>>,
        abi -> Jsonb,
        ends_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        is_active -> Bool,
    }
}

diesel::table! {
    contract_listeners (chain_id, contract_address) {
        chain_id -> Int8,
        contract_address -> Varchar,
        abi -> Jsonb,
        subscribed_jobs -> Array<Text>,
        events_being_listened -> Array<Text>,
        start_time -> Timestamptz,
        is_active -> Bool,
    }
}

diesel::table! {
    listener_cursors (chain_id) {
        chain_id -> Int8,
        last_processed_block -> Numeric,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    contract_events (id) {
        id -> Int8,
        job_id -> Varchar,
        chain_id -> Int8,
        contract_address -> Varchar,
        event_name -> Varchar,
        sender -> Varchar,
        receiver -> Varchar,
        value -> Numeric,
        transaction_hash -> Varchar,
        block_number -> Numeric,
        detected_at -> Timestamptz,
    }
}

diesel::table! {
    derived_address_activity (id) {
        id -> Int8,
        yapper_id -> Varchar,
        yapper_user_id -> Varchar,
        job_id -> Varchar,
        yapper_address -> Varchar,
        address -> Varchar,
        last_event_name -> Nullable<Varchar>,
        total_value -> Numeric,
        interaction_count -> Int8,
        interacted -> Bool,
        last_transaction_hash -> Nullable<Varchar>,
        last_updated -> Timestamptz,
    }
}

diesel::table! {
    failed_tasks (id) {
        id -> Int8,
        task_kind -> Varchar,
        idempotency_key -> Varchar,
        payload -> Jsonb,
        error -> Text,
        attempts -> Int4,
        failed_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    jobs,
    contract_listeners,
    listener_cursors,
    contract_events,
    derived_address_activity,
    failed_tasks,
);
