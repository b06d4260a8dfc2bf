//! Optimistic mutations of the board in view.
//!
//! Every mutation goes through [`BoardStore::apply_optimistic`]:
//!
//! 1. validate and snapshot the lists
//! 2. apply the change locally and write it through to the cache
//! 3. send the request
//! 4. on success merge the server's canonical entity into current state
//! 5. on failure restore the snapshot, or undo just this change when newer
//!    edits have landed since, and return the error
//!
//! Steps 1 and 2 run when the mutation method is called, not when the
//! returned future is first polled, so local state follows call order.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::MutationError;

use super::cache::BoardLists;
use super::ids::{TempIdSender, TempIds};
use super::store::{BoardStore, Inner, ReplayFn};
use super::tree;
use super::types::{Card, CardLabel, CardMember, CardPatch, List, Profile};

/// A mutation whose local effect has been applied and whose request is
/// pending. Resolves once the server has answered and state is settled.
pub type Pending<T> = BoxFuture<'static, Result<T, MutationError>>;

/// Reverts one mutation on whatever the lists look like now.
type Undo = Box<dyn FnOnce(&mut Vec<List>, &TempIds) + Send>;

/// Local effect of a mutation: how to revert it, plus whatever the
/// reconcile step needs to know about the optimistic result.
struct Applied<B> {
  undo: Undo,
  baseline: B,
}

impl<B> Applied<B> {
  fn new(baseline: B, undo: impl FnOnce(&mut Vec<List>, &TempIds) + Send + 'static) -> Self {
    Self {
      undo: Box::new(undo),
      baseline,
    }
  }
}

/// Canonical entities returned by the server.
trait Canonical {
  /// Server id of a created entity.
  fn server_id(&self) -> Option<&str>;
}

impl Canonical for () {
  fn server_id(&self) -> Option<&str> {
    None
  }
}

impl Canonical for List {
  fn server_id(&self) -> Option<&str> {
    Some(&self.id)
  }
}

impl Canonical for Card {
  fn server_id(&self) -> Option<&str> {
    Some(&self.id)
  }
}

impl Canonical for CardLabel {
  fn server_id(&self) -> Option<&str> {
    Some(&self.id)
  }
}

impl Canonical for CardMember {
  fn server_id(&self) -> Option<&str> {
    Some(&self.id)
  }
}

fn not_found(what: &str, id: &str) -> MutationError {
  MutationError::validation(format!("{} {} not found", what, id))
}

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str, MutationError> {
  let value = value.trim();
  if value.is_empty() {
    return Err(MutationError::validation(format!("{} cannot be empty", what)));
  }
  Ok(value)
}

/// Take the server's copy of a created or updated card, keeping local
/// edits made since `baseline` was applied. Placement stays local.
fn merge_card(local: &mut Card, baseline: &Card, canonical: &Card) {
  local.id = canonical.id.clone();
  local.created_at = canonical.created_at;
  local.updated_at = canonical.updated_at;
  local.created_by = canonical.created_by.clone();

  if local.title == baseline.title {
    local.title = canonical.title.clone();
  }
  if local.description == baseline.description {
    local.description = canonical.description.clone();
  }
  if local.start_date == baseline.start_date {
    local.start_date = canonical.start_date;
  }
  if local.due_date == baseline.due_date {
    local.due_date = canonical.due_date;
  }
  if local.is_complete == baseline.is_complete {
    local.is_complete = canonical.is_complete;
  }
  local.refresh_due_status(Utc::now());
}

fn merge_list(local: &mut List, baseline: &List, canonical: &List) {
  local.id = canonical.id.clone();
  local.board_id = canonical.board_id.clone();
  local.position = canonical.position;
  local.created_at = canonical.created_at;
  local.updated_at = canonical.updated_at;
  if local.name == baseline.name {
    local.name = canonical.name.clone();
  }
  for card in &mut local.cards {
    card.list_id = canonical.id.clone();
  }
}

fn apply_patch(card: &mut Card, patch: &CardPatch) {
  if let Some(title) = &patch.title {
    card.title = title.trim().to_string();
  }
  if let Some(description) = &patch.description {
    card.description = description.clone();
  }
  if let Some(start_date) = patch.start_date {
    card.start_date = start_date;
  }
  if let Some(due_date) = patch.due_date {
    card.due_date = due_date;
  }
  if let Some(is_complete) = patch.is_complete {
    card.is_complete = is_complete;
  }
  card.refresh_due_status(Utc::now());
}

/// Put back the patched fields of `card` that still hold the optimistic value.
fn revert_patch(card: &mut Card, patch: &CardPatch, before: &Card, applied: &Card) {
  if patch.title.is_some() && card.title == applied.title {
    card.title = before.title.clone();
  }
  if patch.description.is_some() && card.description == applied.description {
    card.description = before.description.clone();
  }
  if patch.start_date.is_some() && card.start_date == applied.start_date {
    card.start_date = before.start_date;
  }
  if patch.due_date.is_some() && card.due_date == applied.due_date {
    card.due_date = before.due_date;
  }
  if patch.is_complete.is_some() && card.is_complete == applied.is_complete {
    card.is_complete = before.is_complete;
  }
  card.refresh_due_status(Utc::now());
}

impl BoardStore {
  /// Shared optimistic-update machinery.
  ///
  /// `apply` edits a draft of the lists and returns an undo plus a baseline
  /// for `reconcile`. It is journaled and may run again on fetched lists,
  /// so it has to be idempotent: an effect that is already there or whose
  /// target is gone makes it return an error, which replays ignore.
  /// `remote` builds the request future from the baseline. A create passes
  /// the `temp` id sender of the entity it makes so that requests waiting
  /// on it are released once it settles.
  fn apply_optimistic<A, B, R, Fut>(
    &self,
    what: String,
    temp: Option<TempIdSender>,
    apply: A,
    remote: impl FnOnce(&B) -> Fut,
    reconcile: impl FnOnce(&mut Vec<List>, B, &R, &TempIds) + Send + 'static,
  ) -> Result<Pending<R>, MutationError>
  where
    A: Fn(&mut Vec<List>, &TempIds) -> Result<Applied<B>, MutationError> + Send + Sync + 'static,
    B: Send + 'static,
    R: Canonical + Send + 'static,
    Fut: Future<Output = Result<R, MutationError>> + Send + 'static,
  {
    let inner = Arc::clone(&self.inner);

    let (board_id, entry, snapshot, applied_at, Applied { undo, baseline }) = {
      let mut state = inner.lock();
      let board_id = state
        .view
        .board_id
        .clone()
        .ok_or_else(|| MutationError::validation("no board is loaded"))?;

      let mut draft = state.view.lists.clone();
      let applied = apply(&mut draft, &inner.ids)?;
      let snapshot = std::mem::replace(&mut state.view.lists, draft);

      let replay: ReplayFn = Arc::new(move |lists: &mut Vec<List>, ids: &TempIds| {
        let _ = apply(lists, ids);
      });
      let entry = state.record(&board_id, replay);
      state.view.loading = false;
      state.revision += 1;
      inner.commit(&state);
      (board_id, entry, snapshot, state.revision, applied)
    };
    debug!("Applied {} optimistically", what);

    let request = remote(&baseline);
    let settle = Settle {
      inner: Arc::clone(&inner),
      entry,
    };

    Ok(
      async move {
        let _settle = settle;
        let result = request.await;

        match &result {
          Ok(canonical) => {
            let mut state = inner.lock();
            let active = state.view.board_id.as_deref() == Some(board_id.as_str());
            if active {
              reconcile(&mut state.view.lists, baseline, canonical, &inner.ids);
              state.revision += 1;
            } else if let Some(mut lists) = inner.cache.get(&BoardLists(&board_id)) {
              reconcile(&mut lists, baseline, canonical, &inner.ids);
              inner
                .cache
                .set(&BoardLists(&board_id), &lists, inner.options.ttl);
            }
            // Under the lock, so no fetch replays the create under its temp id
            if let (Some(temp), Some(id)) = (temp, canonical.server_id()) {
              inner.ids.resolve(temp, id);
            }
            state.settle(entry);
            if active {
              inner.commit(&state);
            }
            drop(state);
            info!("{} succeeded", what);
          }
          Err(error) => {
            {
              let mut state = inner.lock();
              state.forget(entry);
              if state.view.board_id.as_deref() == Some(board_id.as_str()) {
                if state.revision == applied_at {
                  state.view.lists = snapshot;
                } else {
                  // Newer edits or a fetch landed in the meantime; keep them
                  undo(&mut state.view.lists, &inner.ids);
                }
                state.revision += 1;
                inner.commit(&state);
              } else if let Some(mut lists) = inner.cache.get(&BoardLists(&board_id)) {
                undo(&mut lists, &inner.ids);
                inner
                  .cache
                  .set(&BoardLists(&board_id), &lists, inner.options.ttl);
              }
            }
            if let Some(temp) = temp {
              inner.ids.fail(temp, error.clone());
            }
            warn!("{} failed, rolled back: {}", what, error);
          }
        }

        result
      }
      .boxed(),
    )
  }

  /// Board id in view, for building requests.
  fn active_board(&self) -> Result<String, MutationError> {
    self
      .inner
      .lock()
      .view
      .board_id
      .clone()
      .ok_or_else(|| MutationError::validation("no board is loaded"))
  }

  /// Append a new list to the board.
  pub fn create_list(&self, name: &str) -> Result<Pending<List>, MutationError> {
    let name = non_empty(name, "list name")?.to_string();
    let board_id = self.active_board()?;

    let temp = self.inner.ids.allocate("list");
    let temp_id = temp.temp_id().to_string();
    let now = Utc::now();

    let inner = Arc::clone(&self.inner);
    let request_name = name.clone();

    self.apply_optimistic(
      format!("create list {:?}", name),
      Some(temp),
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&temp_id);
        if tree::find_list(lists, &id).is_some() {
          return Err(MutationError::validation(format!("list {} already exists", id)));
        }
        let position = lists.iter().map(|l| l.position + 1).max().unwrap_or(0);
        let list = List {
          id,
          board_id: board_id.clone(),
          name: name.clone(),
          position,
          created_at: now,
          updated_at: now,
          is_archived: false,
          cards: Vec::new(),
        };
        lists.push(list.clone());

        let temp_id = temp_id.clone();
        Ok(Applied::new(list, move |lists, ids| {
          let id = ids.current(&temp_id);
          lists.retain(|l| l.id != id);
        }))
      },
      |baseline: &List| {
        let board_id = baseline.board_id.clone();
        async move {
          inner
            .api
            .create_list(&board_id, &request_name)
            .await
            .map_err(MutationError::from)
        }
      },
      |lists: &mut Vec<List>, baseline: List, canonical: &List, _: &TempIds| {
        // Deleted locally in the meantime: don't resurrect
        if tree::find_list(lists, &baseline.id).is_none() {
          return;
        }
        // A fetch may already have brought the server's copy
        lists.retain(|l| l.id != canonical.id);
        if let Some(local) = tree::find_list_mut(lists, &baseline.id) {
          merge_list(local, &baseline, canonical);
        }
      },
    )
  }

  pub fn rename_list(&self, list_id: &str, name: &str) -> Result<Pending<()>, MutationError> {
    let name = non_empty(name, "list name")?.to_string();
    let list_id = self.inner.ids.current(list_id);
    let inner = Arc::clone(&self.inner);
    let request_name = name.clone();
    let target = list_id.clone();

    self.apply_optimistic(
      format!("rename list {} to {:?}", list_id, name),
      None,
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&list_id);
        let list = tree::find_list_mut(lists, &id).ok_or_else(|| not_found("list", &id))?;
        let previous = std::mem::replace(&mut list.name, name.clone());

        let (list_id, name) = (list_id.clone(), name.clone());
        Ok(Applied::new((), move |lists, ids| {
          if let Some(list) = tree::find_list_mut(lists, &ids.current(&list_id)) {
            if list.name == name {
              list.name = previous;
            }
          }
        }))
      },
      |_| async move {
        let id = inner.ids.server_id(&target).await?;
        inner
          .api
          .rename_list(&id, &request_name)
          .await
          .map_err(MutationError::from)
      },
      |_, _, _, _| {},
    )
  }

  /// Archive a list. It leaves the active view like a delete does.
  pub fn archive_list(&self, list_id: &str) -> Result<Pending<()>, MutationError> {
    let inner = Arc::clone(&self.inner);
    self.remove_list(list_id, "archive", move |id| async move {
      inner.api.archive_list(&id).await.map_err(MutationError::from)
    })
  }

  pub fn delete_list(&self, list_id: &str) -> Result<Pending<()>, MutationError> {
    let inner = Arc::clone(&self.inner);
    self.remove_list(list_id, "delete", move |id| async move {
      inner.api.delete_list(&id).await.map_err(MutationError::from)
    })
  }

  fn remove_list<F, Fut>(
    &self,
    list_id: &str,
    verb: &str,
    send: F,
  ) -> Result<Pending<()>, MutationError>
  where
    F: FnOnce(String) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), MutationError>> + Send + 'static,
  {
    let list_id = self.inner.ids.current(list_id);
    let inner = Arc::clone(&self.inner);
    let target = list_id.clone();

    self.apply_optimistic(
      format!("{} list {}", verb, list_id),
      None,
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&list_id);
        let index = tree::list_index(lists, &id).ok_or_else(|| not_found("list", &id))?;
        let removed = lists.remove(index);

        Ok(Applied::new((), move |lists, ids| {
          let mut removed = removed;
          removed.id = ids.current(&removed.id);
          if tree::find_list(lists, &removed.id).is_none() {
            let index = index.min(lists.len());
            lists.insert(index, removed);
          }
        }))
      },
      |_| async move {
        let id = inner.ids.server_id(&target).await?;
        send(id).await
      },
      |_, _, _, _| {},
    )
  }

  /// Append a new card to a list.
  pub fn create_card(&self, list_id: &str, title: &str) -> Result<Pending<Card>, MutationError> {
    let title = non_empty(title, "card title")?.to_string();
    let board_id = self.active_board()?;
    let list_id = self.inner.ids.current(list_id);

    let temp = self.inner.ids.allocate("card");
    let temp_id = temp.temp_id().to_string();
    let now = Utc::now();
    let created_by = self.inner.options.user_id.clone();

    let inner = Arc::clone(&self.inner);
    let request_title = title.clone();
    let target = list_id.clone();

    self.apply_optimistic(
      format!("create card {:?}", title),
      Some(temp),
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&temp_id);
        if tree::find_card(lists, &id).is_some() {
          return Err(MutationError::validation(format!("card {} already exists", id)));
        }
        let in_list = ids.current(&list_id);
        let list = tree::find_list_mut(lists, &in_list).ok_or_else(|| not_found("list", &in_list))?;
        let mut card = Card {
          id,
          list_id: in_list.clone(),
          title: title.clone(),
          description: None,
          position: list.cards.len() as i64,
          created_at: now,
          updated_at: now,
          start_date: None,
          due_date: None,
          is_complete: false,
          due_status: Default::default(),
          created_by: created_by.clone(),
          card_labels: Vec::new(),
          card_members: Vec::new(),
        };
        card.refresh_due_status(now);
        list.cards.push(card.clone());

        let temp_id = temp_id.clone();
        Ok(Applied::new(card, move |lists, ids| {
          tree::remove_card(lists, &ids.current(&temp_id));
        }))
      },
      |_| async move {
        let list_id = inner.ids.server_id(&target).await?;
        inner
          .api
          .create_card(&board_id, &list_id, &request_title)
          .await
          .map_err(MutationError::from)
      },
      |lists: &mut Vec<List>, baseline: Card, canonical: &Card, _: &TempIds| {
        if tree::find_card(lists, &baseline.id).is_none() {
          return;
        }
        // A fetch may already have brought the server's copy
        tree::remove_card(lists, &canonical.id);
        if let Some(local) = tree::find_card_mut(lists, &baseline.id) {
          merge_card(local, &baseline, canonical);
        }
      },
    )
  }

  /// Change user-editable fields of a card.
  pub fn update_card(
    &self,
    card_id: &str,
    patch: CardPatch,
  ) -> Result<Pending<Card>, MutationError> {
    if patch.is_empty() {
      return Err(MutationError::validation("nothing to update"));
    }
    if let Some(title) = &patch.title {
      non_empty(title, "card title")?;
    }

    let card_id = self.inner.ids.current(card_id);
    let inner = Arc::clone(&self.inner);
    let request_patch = CardPatch {
      title: patch.title.as_ref().map(|t| t.trim().to_string()),
      ..patch.clone()
    };
    let target = card_id.clone();

    self.apply_optimistic(
      format!("update card {}", card_id),
      None,
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&card_id);
        let card = tree::find_card_mut(lists, &id).ok_or_else(|| not_found("card", &id))?;
        let before = card.clone();
        apply_patch(card, &patch);
        let applied = card.clone();

        let (card_id, patch, baseline) = (card_id.clone(), patch.clone(), applied.clone());
        Ok(Applied::new(baseline, move |lists, ids| {
          if let Some(card) = tree::find_card_mut(lists, &ids.current(&card_id)) {
            revert_patch(card, &patch, &before, &applied);
          }
        }))
      },
      |_| async move {
        let id = inner.ids.server_id(&target).await?;
        inner
          .api
          .update_card(&id, &request_patch)
          .await
          .map_err(MutationError::from)
      },
      |lists: &mut Vec<List>, baseline: Card, canonical: &Card, ids: &TempIds| {
        if let Some(local) = tree::find_card_mut(lists, &ids.current(&baseline.id)) {
          merge_card(local, &baseline, canonical);
        }
      },
    )
  }

  pub fn delete_card(&self, card_id: &str) -> Result<Pending<()>, MutationError> {
    let card_id = self.inner.ids.current(card_id);
    let inner = Arc::clone(&self.inner);
    let target = card_id.clone();

    self.apply_optimistic(
      format!("delete card {}", card_id),
      None,
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&card_id);
        let (list_id, index, card) =
          tree::remove_card(lists, &id).ok_or_else(|| not_found("card", &id))?;

        Ok(Applied::new((), move |lists, ids| {
          let mut card = card;
          card.id = ids.current(&card.id);
          if tree::find_card(lists, &card.id).is_none() {
            tree::insert_card(lists, &ids.current(&list_id), index, card);
          }
        }))
      },
      |_| async move {
        let id = inner.ids.server_id(&target).await?;
        inner.api.delete_card(&id).await.map_err(MutationError::from)
      },
      |_, _, _, _| {},
    )
  }

  /// Move a card to `to_list_id` at `position`, which addresses the target
  /// list as it is before the card leaves its current place.
  ///
  /// Moving a card onto the index a move already put it at changes nothing,
  /// which keeps replays onto fetched lists harmless.
  pub fn move_card(
    &self,
    card_id: &str,
    to_list_id: &str,
    position: usize,
  ) -> Result<Pending<Card>, MutationError> {
    let card_id = self.inner.ids.current(card_id);
    let to_list_id = self.inner.ids.current(to_list_id);
    let inner = Arc::clone(&self.inner);
    let target_card = card_id.clone();
    let target_list = to_list_id.clone();

    self.apply_optimistic(
      format!("move card {} to {}:{}", card_id, to_list_id, position),
      None,
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let (card_id, to_list_id) = (ids.current(&card_id), ids.current(&to_list_id));
        let from = tree::locate_card(lists, &card_id).ok_or_else(|| not_found("card", &card_id))?;
        if tree::find_list(lists, &to_list_id).is_none() {
          return Err(not_found("list", &to_list_id));
        }
        let from_list_id = lists[from.list_index].id.clone();
        let index = tree::move_card(lists, &card_id, &to_list_id, position)
          .ok_or_else(|| not_found("card", &card_id))?;

        Ok(Applied::new(index, move |lists, ids| {
          let card_id = ids.current(&card_id);
          let still_there = tree::find_card(lists, &card_id)
            .is_some_and(|card| card.list_id == ids.current(&to_list_id));
          let from_list_id = ids.current(&from_list_id);
          if still_there && tree::find_list(lists, &from_list_id).is_some() {
            if let Some((_, _, card)) = tree::remove_card(lists, &card_id) {
              tree::insert_card(lists, &from_list_id, from.card_index, card);
            }
          }
        }))
      },
      |index: &usize| {
        let index = *index;
        async move {
          let card_id = inner.ids.server_id(&target_card).await?;
          let list_id = inner.ids.server_id(&target_list).await?;
          inner
            .api
            .move_card(&card_id, &list_id, index)
            .await
            .map_err(MutationError::from)
        }
      },
      |lists: &mut Vec<List>, _: usize, canonical: &Card, _: &TempIds| {
        if let Some(local) = tree::find_card_mut(lists, &canonical.id) {
          local.updated_at = canonical.updated_at;
        }
      },
    )
  }

  /// Attach a board label to a card.
  pub fn attach_label(
    &self,
    card_id: &str,
    label_id: &str,
  ) -> Result<Pending<CardLabel>, MutationError> {
    let label_id = non_empty(label_id, "label id")?.to_string();
    let card_id = self.inner.ids.current(card_id);
    let definition = {
      let state = self.inner.lock();
      state.view.labels.iter().find(|l| l.id == label_id).cloned()
    };

    let temp = self.inner.ids.allocate("card-label");
    let temp_id = temp.temp_id().to_string();
    let now = Utc::now();
    let inner = Arc::clone(&self.inner);
    let target = card_id.clone();
    let request_label = label_id.clone();

    self.apply_optimistic(
      format!("attach label {} to card {}", label_id, card_id),
      Some(temp),
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&card_id);
        let card = tree::find_card_mut(lists, &id).ok_or_else(|| not_found("card", &id))?;
        if card.card_labels.iter().any(|row| row.label_id == label_id) {
          return Err(MutationError::validation("label is already attached"));
        }
        card.card_labels.push(CardLabel {
          id: ids.current(&temp_id),
          card_id: id,
          label_id: label_id.clone(),
          created_at: now,
          label: definition.clone(),
        });

        let (card_id, temp_id) = (card_id.clone(), temp_id.clone());
        Ok(Applied::new(temp_id.clone(), move |lists, ids| {
          if let Some(card) = tree::find_card_mut(lists, &ids.current(&card_id)) {
            let id = ids.current(&temp_id);
            card.card_labels.retain(|row| row.id != id);
          }
        }))
      },
      |_| async move {
        let card_id = inner.ids.server_id(&target).await?;
        inner
          .api
          .attach_label(&card_id, &request_label)
          .await
          .map_err(MutationError::from)
      },
      |lists: &mut Vec<List>, temp_id: String, canonical: &CardLabel, _: &TempIds| {
        let rows = lists
          .iter_mut()
          .flat_map(|list| list.cards.iter_mut())
          .flat_map(|card| card.card_labels.iter_mut());
        for row in rows.filter(|row| row.id == temp_id) {
          row.id = canonical.id.clone();
          row.card_id = canonical.card_id.clone();
          row.created_at = canonical.created_at;
          if canonical.label.is_some() {
            row.label = canonical.label.clone();
          }
        }
      },
    )
  }

  /// Detach a label from a card.
  pub fn detach_label(&self, card_id: &str, label_id: &str) -> Result<Pending<()>, MutationError> {
    let card_id = self.inner.ids.current(card_id);
    let label_id = label_id.to_string();
    let row_id = {
      let state = self.inner.lock();
      tree::find_card(&state.view.lists, &card_id)
        .ok_or_else(|| not_found("card", &card_id))?
        .card_labels
        .iter()
        .find(|row| row.label_id == label_id)
        .map(|row| row.id.clone())
        .ok_or_else(|| MutationError::validation("label is not attached"))?
    };
    let inner = Arc::clone(&self.inner);

    self.apply_optimistic(
      format!("detach label {} from card {}", label_id, card_id),
      None,
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&card_id);
        let card = tree::find_card_mut(lists, &id).ok_or_else(|| not_found("card", &id))?;
        let index = card
          .card_labels
          .iter()
          .position(|row| row.label_id == label_id)
          .ok_or_else(|| MutationError::validation("label is not attached"))?;
        let row = card.card_labels.remove(index);

        let card_id = card_id.clone();
        Ok(Applied::new((), move |lists, ids| {
          if let Some(card) = tree::find_card_mut(lists, &ids.current(&card_id)) {
            if !card.card_labels.iter().any(|r| r.label_id == row.label_id) {
              let index = index.min(card.card_labels.len());
              card.card_labels.insert(index, row);
            }
          }
        }))
      },
      |_| async move {
        let id = inner.ids.server_id(&row_id).await?;
        inner.api.detach_label(&id).await.map_err(MutationError::from)
      },
      |_, _, _, _| {},
    )
  }

  /// Add a member to a card.
  pub fn attach_member(
    &self,
    card_id: &str,
    profile: Profile,
  ) -> Result<Pending<CardMember>, MutationError> {
    non_empty(&profile.id, "profile id")?;
    let card_id = self.inner.ids.current(card_id);

    let temp = self.inner.ids.allocate("card-member");
    let temp_id = temp.temp_id().to_string();
    let now = Utc::now();
    let inner = Arc::clone(&self.inner);
    let target = card_id.clone();
    let profile_id = profile.id.clone();

    self.apply_optimistic(
      format!("attach member {} to card {}", profile.id, card_id),
      Some(temp),
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&card_id);
        let card = tree::find_card_mut(lists, &id).ok_or_else(|| not_found("card", &id))?;
        if card.card_members.iter().any(|row| row.profile_id == profile.id) {
          return Err(MutationError::validation("member is already on the card"));
        }
        card.card_members.push(CardMember {
          id: ids.current(&temp_id),
          card_id: id,
          profile_id: profile.id.clone(),
          created_at: now,
          profile: profile.clone(),
        });

        let (card_id, temp_id) = (card_id.clone(), temp_id.clone());
        Ok(Applied::new(temp_id.clone(), move |lists, ids| {
          if let Some(card) = tree::find_card_mut(lists, &ids.current(&card_id)) {
            let id = ids.current(&temp_id);
            card.card_members.retain(|row| row.id != id);
          }
        }))
      },
      |_| async move {
        let card_id = inner.ids.server_id(&target).await?;
        inner
          .api
          .attach_member(&card_id, &profile_id)
          .await
          .map_err(MutationError::from)
      },
      |lists: &mut Vec<List>, temp_id: String, canonical: &CardMember, _: &TempIds| {
        // Keep the local profile; the row only gains its server id
        let rows = lists
          .iter_mut()
          .flat_map(|list| list.cards.iter_mut())
          .flat_map(|card| card.card_members.iter_mut());
        for row in rows.filter(|row| row.id == temp_id) {
          row.id = canonical.id.clone();
          row.card_id = canonical.card_id.clone();
          row.created_at = canonical.created_at;
        }
      },
    )
  }

  /// Remove a member from a card.
  pub fn detach_member(
    &self,
    card_id: &str,
    profile_id: &str,
  ) -> Result<Pending<()>, MutationError> {
    let card_id = self.inner.ids.current(card_id);
    let profile_id = profile_id.to_string();
    let row_id = {
      let state = self.inner.lock();
      tree::find_card(&state.view.lists, &card_id)
        .ok_or_else(|| not_found("card", &card_id))?
        .card_members
        .iter()
        .find(|row| row.profile_id == profile_id)
        .map(|row| row.id.clone())
        .ok_or_else(|| MutationError::validation("member is not on the card"))?
    };
    let inner = Arc::clone(&self.inner);

    self.apply_optimistic(
      format!("detach member {} from card {}", profile_id, card_id),
      None,
      move |lists: &mut Vec<List>, ids: &TempIds| {
        let id = ids.current(&card_id);
        let card = tree::find_card_mut(lists, &id).ok_or_else(|| not_found("card", &id))?;
        let index = card
          .card_members
          .iter()
          .position(|row| row.profile_id == profile_id)
          .ok_or_else(|| MutationError::validation("member is not on the card"))?;
        let row = card.card_members.remove(index);

        let card_id = card_id.clone();
        Ok(Applied::new((), move |lists, ids| {
          if let Some(card) = tree::find_card_mut(lists, &ids.current(&card_id)) {
            if !card.card_members.iter().any(|r| r.profile_id == row.profile_id) {
              let index = index.min(card.card_members.len());
              card.card_members.insert(index, row);
            }
          }
        }))
      },
      |_| async move {
        let id = inner.ids.server_id(&row_id).await?;
        inner.api.detach_member(&id).await.map_err(MutationError::from)
      },
      |_, _, _, _| {},
    )
  }
}

/// Marks the journal entry settled once the pending future finishes or is
/// dropped.
struct Settle {
  inner: Arc<Inner>,
  entry: u64,
}

impl Drop for Settle {
  fn drop(&mut self) {
    self.inner.lock().settle(self.entry);
  }
}
