//! Request identity: bearer token and tenant.

mod middleware;
mod tenant;

pub use middleware::*;
pub use tenant::*;
