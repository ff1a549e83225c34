//! # parley-store
//!
//! Durable storage for the Parley chat server, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle with typed CRUD
//! helpers for every record, and the asynchronous [`ChatStore`] trait that
//! the delivery core talks to. [`SqliteStore`] bridges the two.

pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod store;
pub mod users;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use store::{ChatStore, SqliteStore};
