//! Client-side cache of a kanban board.
//!
//! - `client`: the `BoardApi` seam and its HTTP implementation
//! - `store`: published board state and the TTL-cached fetcher
//! - `mutator`: optimistic mutations with rollback
//! - `views`: per-card labels and members derived from the tree

mod api_types;
mod cache;
mod client;
mod ids;
mod mutator;
mod store;
mod tree;
mod types;
mod views;

#[cfg(test)]
pub(crate) mod fake;

pub use cache::{BoardLabels, BoardLists};
pub use client::{BoardApi, HttpBoardApi};
pub use ids::is_temp;
pub use mutator::Pending;
pub use store::{BoardSnapshot, BoardStore, FetchOutcome, StoreOptions};
pub use types::{
  Card, CardLabel, CardMember, CardPatch, DueStatus, Label, List, Profile, DUE_SOON_WINDOW_HOURS,
};
pub use views::{labels_for_card, members_for_card};
