//! Protocol logic behind the sync routes, independent of axum extractors.

mod pull;
mod push;

pub use pull::handle_pull;
pub use push::{decide, handle_push, Decision, NextState, MAX_BATCH};
