//! SQLite store implementations for revenc.
//!
//! Implements the `JobStore` and `UserStore` ports from
//! `revenc-core` on top of sqlx. Jobs are stored one row per job
//! with the frozen configuration as a JSON document column; status
//! writes are compare-and-set at the SQL level.

pub mod factory;
pub mod repositories;
pub mod setup;

pub use factory::StoreFactory;
pub use repositories::{SqliteJobStore, SqliteUserStore};
pub use setup::setup_database;
