//! Database module for PostgreSQL persistence.

mod feed;
mod ledger;
mod pool;
mod records;

pub use feed::*;
pub use ledger::*;
pub use pool::*;
pub use records::*;
