//! Diesel ORM models for database tables.
//!
//! Field order matches the column order in `schema.rs`; records are loaded
//! positionally.

use diesel::prelude::*;

use crate::schema;

/// Adjustment request record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::adjustment_requests)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AdjustmentRequestRecord {
    pub id: String,
    pub saved_recipe_id: String,
    pub feedback_id: String,
    pub status: String,
    pub attempt_count: i32,
    pub provider_used: Option<String>,
    pub input_snapshot: String,
    pub output_variant_id: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub retry_of: Option<String>,
    pub cancel_requested: i32,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub processing_time_ms: Option<i64>,
}

/// New adjustment request for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::adjustment_requests)]
pub struct NewAdjustmentRequest<'a> {
    pub id: &'a str,
    pub saved_recipe_id: &'a str,
    pub feedback_id: &'a str,
    pub status: &'a str,
    pub attempt_count: i32,
    pub input_snapshot: &'a str,
    pub retry_of: Option<&'a str>,
    pub cancel_requested: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Status transition record.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::adjustment_transitions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TransitionRecord {
    pub id: i32,
    pub request_id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::adjustment_transitions)]
pub struct NewTransition<'a> {
    pub request_id: &'a str,
    pub from_status: Option<&'a str>,
    pub to_status: &'a str,
    pub at: &'a str,
}

/// Recipe variation record.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::recipe_variations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct VariationRecord {
    pub id: String,
    pub saved_recipe_id: String,
    pub version_number: i32,
    pub ingredients: String,
    pub steps: String,
    pub adjustment_summary: String,
    pub is_active: i32,
    pub source_request_id: Option<String>,
    pub content_hash: String,
    pub created_at: String,
}

/// Change record row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::change_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChangeRecordRow {
    pub id: String,
    pub variation_id: String,
    pub position: i32,
    pub field_path: String,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    pub change_type: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::change_records)]
pub struct NewChangeRecord<'a> {
    pub id: &'a str,
    pub variation_id: &'a str,
    pub position: i32,
    pub field_path: &'a str,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    pub change_type: &'a str,
}

/// Completion event waiting in (or delivered from) the outbox.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::adjustment_events)]
#[diesel(primary_key(request_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventRecord {
    pub request_id: String,
    pub saved_recipe_id: String,
    pub payload: String,
    pub created_at: String,
    pub delivered_at: Option<String>,
    pub delivery_attempts: i32,
    pub last_error: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::adjustment_events)]
pub struct NewEvent<'a> {
    pub request_id: &'a str,
    pub saved_recipe_id: &'a str,
    pub payload: &'a str,
    pub created_at: &'a str,
    pub delivery_attempts: i32,
}
