//! Router assembly: liveness plus the push/pull protocol.

mod health;
mod sync;

use crate::AppState;
use axum::Router;

pub fn create_routes() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(sync::routes())
}
