//! Data persistence layer
//!
//! SQLite-based storage for app state (stored credential) and console drafts.

mod app_state;
mod database;
mod drafts;
mod migrations;

pub use app_state::AppStateStore;
pub use database::{Database, DatabaseError};
pub use drafts::DraftStore;
