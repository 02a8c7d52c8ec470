//! # concord-store
//!
//! Local persistence for a Concord node, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for the four
//! record families the protocol core needs to survive a restart:
//! communities (with their signed descriptions), join requests,
//! installations, outbound delivery envelopes, plus synced bookmarks.

pub mod bookmarks;
pub mod communities;
pub mod database;
pub mod installations;
pub mod join_requests;
pub mod migrations;
pub mod models;
pub mod raw_messages;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
