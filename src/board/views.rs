//! Per-card views derived from the published list tree.
//!
//! Nothing here fetches; an unknown card simply has no labels or members.

use super::tree;
use super::types::{Label, List, Profile};

/// Labels attached to a card.
///
/// The board-level definition wins over the copy embedded in the join row,
/// since labels can be renamed or recolored after the lists were fetched.
/// The embedded copy is only used when the board has no definition with
/// that id.
pub fn labels_for_card(lists: &[List], board_labels: &[Label], card_id: &str) -> Vec<Label> {
  let Some(card) = tree::find_card(lists, card_id) else {
    return Vec::new();
  };

  card
    .card_labels
    .iter()
    .filter_map(|row| {
      board_labels
        .iter()
        .find(|label| label.id == row.label_id)
        .or(row.label.as_ref())
        .cloned()
    })
    .collect()
}

/// Member profiles of a card. Join rows carry full profiles.
pub fn members_for_card(lists: &[List], card_id: &str) -> Vec<Profile> {
  tree::find_card(lists, card_id)
    .map(|card| {
      card
        .card_members
        .iter()
        .map(|member| member.profile.clone())
        .collect()
    })
    .unwrap_or_default()
}
