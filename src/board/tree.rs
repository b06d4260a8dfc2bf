//! Lookups and positional edits over a board's list tree.

use super::types::{Card, List};

/// Where a card sits in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardLocation {
  pub list_index: usize,
  pub card_index: usize,
}

pub fn list_index(lists: &[List], list_id: &str) -> Option<usize> {
  lists.iter().position(|list| list.id == list_id)
}

pub fn find_list<'a>(lists: &'a [List], list_id: &str) -> Option<&'a List> {
  lists.iter().find(|list| list.id == list_id)
}

pub fn find_list_mut<'a>(lists: &'a mut [List], list_id: &str) -> Option<&'a mut List> {
  lists.iter_mut().find(|list| list.id == list_id)
}

pub fn locate_card(lists: &[List], card_id: &str) -> Option<CardLocation> {
  lists.iter().enumerate().find_map(|(list_index, list)| {
    list
      .cards
      .iter()
      .position(|card| card.id == card_id)
      .map(|card_index| CardLocation {
        list_index,
        card_index,
      })
  })
}

pub fn find_card<'a>(lists: &'a [List], card_id: &str) -> Option<&'a Card> {
  let at = locate_card(lists, card_id)?;
  Some(&lists[at.list_index].cards[at.card_index])
}

pub fn find_card_mut<'a>(lists: &'a mut [List], card_id: &str) -> Option<&'a mut Card> {
  let at = locate_card(lists, card_id)?;
  Some(&mut lists[at.list_index].cards[at.card_index])
}

/// Rewrite card positions to match their order in the list.
pub fn renumber(list: &mut List) {
  for (index, card) in list.cards.iter_mut().enumerate() {
    card.position = index as i64;
  }
}

/// Index a card lands at after being removed from `old_index` and reinserted
/// at the requested `new_position`.
///
/// `new_position` addresses the list as it was before the removal. Within
/// the same list, a forward move shifts down by one because everything after
/// `old_index` moved up. The result is clamped to `target_len`, the length of
/// the target list after the removal.
pub fn insertion_index(
  same_list: bool,
  old_index: usize,
  new_position: usize,
  target_len: usize,
) -> usize {
  let index = if same_list && old_index < new_position {
    new_position - 1
  } else {
    new_position
  };
  index.min(target_len)
}

/// Move a card to `to_list_id` at `new_position`.
///
/// Returns the effective insertion index, or `None` (tree untouched) when
/// the card or target list is unknown. Positions of both affected lists are
/// renumbered and the card's `list_id` reassigned.
pub fn move_card(
  lists: &mut [List],
  card_id: &str,
  to_list_id: &str,
  new_position: usize,
) -> Option<usize> {
  let from = locate_card(lists, card_id)?;
  let to_list_index = list_index(lists, to_list_id)?;
  let same_list = from.list_index == to_list_index;

  let mut card = lists[from.list_index].cards.remove(from.card_index);
  let target_len = lists[to_list_index].cards.len();
  let index = insertion_index(same_list, from.card_index, new_position, target_len);

  card.list_id = to_list_id.to_string();
  lists[to_list_index].cards.insert(index, card);

  renumber(&mut lists[from.list_index]);
  if !same_list {
    renumber(&mut lists[to_list_index]);
  }

  Some(index)
}

/// Remove a card, returning it with the id of the list it was in and its
/// index there.
pub fn remove_card(lists: &mut [List], card_id: &str) -> Option<(String, usize, Card)> {
  let at = locate_card(lists, card_id)?;
  let list = &mut lists[at.list_index];
  let card = list.cards.remove(at.card_index);
  renumber(list);
  Some((list.id.clone(), at.card_index, card))
}

/// Insert a card into a list at `index` (clamped). Returns false if the list
/// is gone.
pub fn insert_card(lists: &mut [List], list_id: &str, index: usize, mut card: Card) -> bool {
  let Some(list) = find_list_mut(lists, list_id) else {
    return false;
  };
  card.list_id = list.id.clone();
  let index = index.min(list.cards.len());
  list.cards.insert(index, card);
  renumber(list);
  true
}
