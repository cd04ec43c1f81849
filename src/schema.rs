// Kept in sync by hand with `DbContext::init_schema`.

diesel::table! {
    adjustment_requests (id) {
        id -> Text,
        saved_recipe_id -> Text,
        feedback_id -> Text,
        status -> Text,
        attempt_count -> Integer,
        provider_used -> Nullable<Text>,
        input_snapshot -> Text,
        output_variant_id -> Nullable<Text>,
        error_kind -> Nullable<Text>,
        error_message -> Nullable<Text>,
        retry_of -> Nullable<Text>,
        cancel_requested -> Integer,
        lease_owner -> Nullable<Text>,
        lease_expires_at -> Nullable<Text>,
        created_at -> Text,
        started_at -> Nullable<Text>,
        updated_at -> Text,
        completed_at -> Nullable<Text>,
        processing_time_ms -> Nullable<BigInt>,
    }
}

diesel::table! {
    adjustment_transitions (id) {
        id -> Integer,
        request_id -> Text,
        from_status -> Nullable<Text>,
        to_status -> Text,
        at -> Text,
    }
}

diesel::table! {
    recipe_variations (id) {
        id -> Text,
        saved_recipe_id -> Text,
        version_number -> Integer,
        ingredients -> Text,
        steps -> Text,
        adjustment_summary -> Text,
        is_active -> Integer,
        source_request_id -> Nullable<Text>,
        content_hash -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    change_records (id) {
        id -> Text,
        variation_id -> Text,
        position -> Integer,
        field_path -> Text,
        before_value -> Nullable<Text>,
        after_value -> Nullable<Text>,
        change_type -> Text,
    }
}

diesel::table! {
    adjustment_events (request_id) {
        request_id -> Text,
        saved_recipe_id -> Text,
        payload -> Text,
        created_at -> Text,
        delivered_at -> Nullable<Text>,
        delivery_attempts -> Integer,
        last_error -> Nullable<Text>,
    }
}

diesel::joinable!(adjustment_transitions -> adjustment_requests (request_id));
diesel::joinable!(change_records -> recipe_variations (variation_id));

diesel::allow_tables_to_appear_in_same_query!(
    adjustment_requests,
    adjustment_transitions,
    recipe_variations,
    change_records,
    adjustment_events,
);
