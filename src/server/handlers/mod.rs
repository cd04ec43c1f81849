//! HTTP request handlers for the adjustment API.

mod adjustments;
mod api;
mod versions;

// Re-export handlers for use by the router
pub use adjustments::{
    cancel_adjustment, get_adjustment, get_adjustment_result, get_history, retry_adjustment,
    submit_adjustment,
};
pub use api::health;
pub use versions::{activate_version, get_active, list_versions, rollback_version, version_diff};
