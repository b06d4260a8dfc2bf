//! Client-side entity cache for a kanban board backend.
//!
//! A [`board::BoardStore`] serves the lists of one board from a TTL cache,
//! refreshes them from the API, and applies mutations optimistically with
//! rollback on failure.

pub mod board;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;

pub use board::{BoardApi, BoardSnapshot, BoardStore, HttpBoardApi};
pub use cache::TtlCache;
pub use error::{ApiError, MutationError};
