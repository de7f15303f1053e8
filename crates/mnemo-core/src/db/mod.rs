//! Local persistence for mnemo

mod connection;
mod migrations;
mod store;
mod sync_data;

pub use connection::Database;
pub use store::{LocalStore, SqliteLocalStore};
pub use sync_data::SyncData;
