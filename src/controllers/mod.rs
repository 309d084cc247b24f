pub mod admin;
pub mod bookings;
pub mod payment;
pub mod profile;
pub mod support;
pub mod trips;

use axum::Router;
use std::sync::Arc;

/// Every `/api` route.
pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(trips::routes())
        .merge(bookings::routes())
        .merge(payment::routes())
        .merge(profile::routes())
        .merge(support::routes())
        .merge(admin::routes())
}
