//! Published board state and the per-board entity fetcher.
//!
//! `BoardStore` holds the lists, cards and labels of the board currently in
//! view. Reads are served from the TTL cache first and then replaced by the
//! authoritative collection from the API. Mutations live in `mutator.rs`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{CacheSource, TtlCache};
use crate::error::ApiError;

use super::cache::{BoardLabels, BoardLists};
use super::client::BoardApi;
use super::ids::TempIds;
use super::tree;
use super::types::{Card, Label, List, Profile};
use super::views;

/// What observers see of a board.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSnapshot {
  /// Board in view, `None` when nothing is loaded
  pub board_id: Option<String>,
  pub lists: Vec<List>,
  /// Board-level label definitions
  pub labels: Vec<Label>,
  /// True only until something has been published for this board
  pub loading: bool,
  /// Message of the last failed fetch
  pub error: Option<String>,
  /// Where `lists` last came from
  pub source: Option<CacheSource>,
}

impl BoardSnapshot {
  pub fn list(&self, list_id: &str) -> Option<&List> {
    tree::find_list(&self.lists, list_id)
  }

  pub fn card(&self, card_id: &str) -> Option<&Card> {
    tree::find_card(&self.lists, card_id)
  }

  /// First card with the given title, for callers that only know titles.
  pub fn card_by_title(&self, title: &str) -> Option<&Card> {
    self
      .lists
      .iter()
      .flat_map(|list| list.cards.iter())
      .find(|card| card.title == title)
  }
}

/// Result of a `load` call. Failures are reported here rather than as `Err`
/// because the previously published state stays usable.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
  /// Empty board id: nothing was requested
  Skipped,
  /// Fresh data published and cached
  Refreshed,
  /// The request failed; whatever was published before is still there
  Failed(ApiError),
  /// The response arrived for a board no longer in view, or was overtaken
  /// by a newer fetch, and was ignored
  Discarded,
}

/// Options for a `BoardStore`.
#[derive(Debug, Clone)]
pub struct StoreOptions {
  /// TTL of cache entries written by fetches and mutations
  pub ttl: Duration,
  /// Profile id recorded as `created_by` on optimistic cards
  pub user_id: Option<String>,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(60),
      user_id: None,
    }
  }
}

/// Re-applies a mutation's local effect. Must be idempotent, since a
/// response fetched after the mutation reached the server already has it.
pub(super) type ReplayFn = Arc<dyn Fn(&mut Vec<List>, &TempIds) + Send + Sync>;

/// A locally applied mutation, kept so fetched lists can be rebased on it.
pub(super) struct Replay {
  id: u64,
  board_id: String,
  /// Request not settled yet
  pending: bool,
  apply: ReplayFn,
}

pub(super) struct BoardState {
  pub(super) view: BoardSnapshot,
  /// Bumped on every change to `view.lists`
  pub(super) revision: u64,
  /// Bumped on every fetch start and scope change
  pub(super) fetch_seq: u64,
  journal: Vec<Replay>,
  next_replay: u64,
  /// First journal id the fetch in progress has to replay
  replay_from: Option<u64>,
}

impl BoardState {
  fn new() -> Self {
    Self {
      view: BoardSnapshot::default(),
      revision: 0,
      fetch_seq: 0,
      journal: Vec::new(),
      next_replay: 0,
      replay_from: None,
    }
  }

  /// Journal a mutation applied to `board_id`, pending until settled.
  pub(super) fn record(&mut self, board_id: &str, apply: ReplayFn) -> u64 {
    let id = self.next_replay;
    self.next_replay += 1;
    self.journal.push(Replay {
      id,
      board_id: board_id.to_string(),
      pending: true,
      apply,
    });
    id
  }

  /// The mutation's request succeeded or was abandoned.
  pub(super) fn settle(&mut self, id: u64) {
    if let Some(entry) = self.journal.iter_mut().find(|e| e.id == id) {
      entry.pending = false;
    }
    self.prune();
  }

  /// The mutation was rolled back and must never be replayed.
  pub(super) fn forget(&mut self, id: u64) {
    self.journal.retain(|e| e.id != id);
  }

  pub(super) fn has_pending(&self) -> bool {
    self.journal.iter().any(|e| e.pending)
  }

  /// Oldest journal entry a fetch of `board_id` starting now may not see:
  /// the oldest pending one, or whatever is recorded next.
  fn replay_watermark(&self, board_id: &str) -> u64 {
    self
      .journal
      .iter()
      .filter(|e| e.pending && e.board_id == board_id)
      .map(|e| e.id)
      .min()
      .unwrap_or(self.next_replay)
  }

  /// Re-apply journaled mutations of `board_id` from `from` on to freshly
  /// fetched lists. Returns how many were replayed.
  fn rebase(&self, board_id: &str, from: u64, lists: &mut Vec<List>, ids: &TempIds) -> usize {
    let mut replayed = 0;
    for entry in &self.journal {
      if entry.board_id == board_id && (entry.pending || entry.id >= from) {
        (entry.apply)(lists, ids);
        replayed += 1;
      }
    }
    replayed
  }

  /// Drop settled entries no fetch in progress still needs.
  fn prune(&mut self) {
    let board_id = self.view.board_id.clone();
    let from = self.replay_from;
    self.journal.retain(|e| {
      e.pending || (Some(&e.board_id) == board_id.as_ref() && from.is_some_and(|f| e.id >= f))
    });
  }
}

pub(super) struct Inner {
  pub(super) api: Arc<dyn BoardApi>,
  pub(super) cache: TtlCache,
  pub(super) options: StoreOptions,
  pub(super) ids: TempIds,
  state: Mutex<BoardState>,
  tx: watch::Sender<BoardSnapshot>,
}

impl Inner {
  // Never held across an await
  pub(super) fn lock(&self) -> MutexGuard<'_, BoardState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(super) fn publish(&self, state: &BoardState) {
    self.tx.send_replace(state.view.clone());
  }

  /// Forget temporary ids once no mutation can still refer to them.
  fn forget_settled_ids(&self, state: &BoardState) {
    if !state.has_pending() {
      self.ids.clear_settled();
    }
  }

  /// Write the published lists to the cache and publish them.
  pub(super) fn commit(&self, state: &BoardState) {
    if let Some(board_id) = &state.view.board_id {
      self
        .cache
        .set(&BoardLists(board_id), &state.view.lists, self.options.ttl);
    }
    self.publish(state);
  }
}

/// Client-side cache of one board at a time, with optimistic mutations.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct BoardStore {
  pub(super) inner: Arc<Inner>,
}

impl BoardStore {
  /// Create a store whose cache TTL is the cache's default TTL.
  pub fn new(api: Arc<dyn BoardApi>, cache: TtlCache) -> Self {
    let options = StoreOptions {
      ttl: cache.default_ttl(),
      ..StoreOptions::default()
    };
    Self::with_options(api, cache, options)
  }

  pub fn with_options(api: Arc<dyn BoardApi>, cache: TtlCache, options: StoreOptions) -> Self {
    let (tx, _rx) = watch::channel(BoardSnapshot::default());
    Self {
      inner: Arc::new(Inner {
        api,
        cache,
        options,
        ids: TempIds::new(),
        state: Mutex::new(BoardState::new()),
        tx,
      }),
    }
  }

  /// Current published state.
  pub fn snapshot(&self) -> BoardSnapshot {
    self.inner.lock().view.clone()
  }

  /// Receiver that always holds the latest published state.
  pub fn subscribe(&self) -> watch::Receiver<BoardSnapshot> {
    self.inner.tx.subscribe()
  }

  pub fn cache(&self) -> &TtlCache {
    &self.inner.cache
  }

  /// Load the lists of `board_id` and make it the board in view.
  ///
  /// A fresh cache entry is published before the request goes out. The
  /// response replaces the published lists unless it has been superseded.
  pub async fn load(&self, board_id: &str) -> FetchOutcome {
    let board_id = board_id.trim();
    if board_id.is_empty() {
      debug!("Ignoring load with empty board id");
      return FetchOutcome::Skipped;
    }

    let seq = {
      let mut state = self.inner.lock();

      if state.view.board_id.as_deref() != Some(board_id) {
        state.view = BoardSnapshot {
          board_id: Some(board_id.to_string()),
          loading: true,
          ..BoardSnapshot::default()
        };
        state.revision += 1;
        state.replay_from = None;
        state.prune();
        self.inner.forget_settled_ids(&state);
      }

      // Once something is published for this board it is at least as new as
      // the cache, since every change is written through.
      if state.view.loading {
        if let Some(lists) = self.inner.cache.get(&BoardLists(board_id)) {
          debug!("Serving cached lists for board {}", board_id);
          state.view.lists = lists;
          state.view.loading = false;
          state.view.source = Some(CacheSource::Cache);
          state.revision += 1;
        }
      }
      if state.view.labels.is_empty() {
        if let Some(labels) = self.inner.cache.get(&BoardLabels(board_id)) {
          state.view.labels = labels;
        }
      }

      state.fetch_seq += 1;
      state.replay_from = Some(state.replay_watermark(board_id));
      self.inner.publish(&state);
      state.fetch_seq
    };

    let api = &self.inner.api;
    let (lists, labels) = tokio::join!(api.fetch_lists(board_id), api.fetch_labels(board_id));

    let mut state = self.inner.lock();
    if state.fetch_seq != seq || state.view.board_id.as_deref() != Some(board_id) {
      debug!("Discarding superseded fetch for board {}", board_id);
      return FetchOutcome::Discarded;
    }

    match labels {
      Ok(labels) => {
        self
          .inner
          .cache
          .set(&BoardLabels(board_id), &labels, self.inner.options.ttl);
        state.view.labels = labels;
      }
      Err(e) => warn!("Failed to load labels for board {}: {}", board_id, e),
    }

    let from = state.replay_from.take().unwrap_or(state.next_replay);
    let outcome = match lists {
      Ok(mut lists) => {
        info!("Loaded {} lists for board {}", lists.len(), board_id);
        // Local edits made while the request was out go back on top
        let replayed = state.rebase(board_id, from, &mut lists, &self.inner.ids);
        if replayed > 0 {
          debug!("Replayed {} local mutations onto board {}", replayed, board_id);
        }
        state.view.lists = lists;
        state.view.loading = false;
        state.view.error = None;
        state.view.source = Some(CacheSource::Network);
        state.revision += 1;
        FetchOutcome::Refreshed
      }
      Err(e) => {
        warn!("Failed to load lists for board {}: {}", board_id, e);
        state.view.error = Some(format!("Error loading lists: {}", e));
        state.view.loading = false;
        FetchOutcome::Failed(e)
      }
    };

    state.prune();
    if matches!(outcome, FetchOutcome::Refreshed) {
      self.inner.commit(&state);
    } else {
      self.inner.publish(&state);
    }
    outcome
  }

  /// Take the board out of view. Responses still in flight are ignored.
  pub fn unload(&self) {
    let mut state = self.inner.lock();
    state.view = BoardSnapshot::default();
    state.revision += 1;
    state.fetch_seq += 1;
    state.replay_from = None;
    state.prune();
    self.inner.forget_settled_ids(&state);
    self.inner.publish(&state);
  }

  /// Replace the board-level label definitions, e.g. after a label was
  /// edited elsewhere.
  pub fn set_labels(&self, labels: Vec<Label>) {
    let mut state = self.inner.lock();
    if let Some(board_id) = state.view.board_id.clone() {
      self
        .inner
        .cache
        .set(&BoardLabels(&board_id), &labels, self.inner.options.ttl);
    }
    state.view.labels = labels;
    self.inner.publish(&state);
  }

  /// Labels of a card, resolved against the latest board definitions.
  pub fn card_labels(&self, card_id: &str) -> Vec<Label> {
    let card_id = self.inner.ids.current(card_id);
    let state = self.inner.lock();
    views::labels_for_card(&state.view.lists, &state.view.labels, &card_id)
  }

  /// Member profiles of a card.
  pub fn card_members(&self, card_id: &str) -> Vec<Profile> {
    let card_id = self.inner.ids.current(card_id);
    let state = self.inner.lock();
    views::members_for_card(&state.view.lists, &card_id)
  }
}

impl std::fmt::Debug for BoardStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.inner.lock();
    f.debug_struct("BoardStore")
      .field("board_id", &state.view.board_id)
      .field("lists", &state.view.lists.len())
      .field("revision", &state.revision)
      .field(
        "pending",
        &state.journal.iter().filter(|e| e.pending).count(),
      )
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::board::fake::{sample_board, FakeApi};
  use std::sync::Arc;

  fn store(api: &Arc<FakeApi>) -> BoardStore {
    BoardStore::new(api.clone(), TtlCache::in_memory())
  }

  #[tokio::test]
  async fn test_empty_board_id_does_nothing() {
    let api = Arc::new(FakeApi::new());
    let store = store(&api);

    assert_eq!(store.load("  ").await, FetchOutcome::Skipped);
    assert_eq!(store.snapshot(), BoardSnapshot::default());
    assert!(api.calls().is_empty());
  }

  #[tokio::test]
  async fn test_load_publishes_and_caches() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);

    assert_eq!(store.load("b1").await, FetchOutcome::Refreshed);

    let snapshot = store.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.source, Some(CacheSource::Network));
    assert_eq!(snapshot.lists.len(), 2);
    assert_eq!(snapshot.labels.len(), 2);
    assert_eq!(
      store.cache().get(&BoardLists("b1")),
      Some(snapshot.lists.clone())
    );
  }

  #[tokio::test]
  async fn test_cached_lists_are_served_before_the_network() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let cache = TtlCache::in_memory();
    let cached = vec![sample_board().lists[0].clone()];
    cache.set(&BoardLists("b1"), &cached, Duration::from_secs(60));

    let store = BoardStore::new(api.clone(), cache);
    let mut rx = store.subscribe();
    let gate = api.hold("fetch_lists");

    let load = tokio::spawn({
      let store = store.clone();
      async move { store.load("b1").await }
    });

    rx.changed().await.unwrap();
    let first = rx.borrow_and_update().clone();
    assert!(!first.loading);
    assert_eq!(first.source, Some(CacheSource::Cache));
    assert_eq!(first.lists, cached);

    gate.notify_one();
    assert_eq!(load.await.unwrap(), FetchOutcome::Refreshed);
    assert_eq!(store.snapshot().lists.len(), 2);
  }

  #[tokio::test]
  async fn test_loading_flag_only_before_first_publish() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);
    store.load("b1").await;

    let mut rx = store.subscribe();
    let gate = api.hold("fetch_lists");
    let refetch = tokio::spawn({
      let store = store.clone();
      async move { store.load("b1").await }
    });

    rx.changed().await.unwrap();
    assert!(!rx.borrow_and_update().loading);
    gate.notify_one();
    refetch.await.unwrap();
    assert!(!store.snapshot().loading);
  }

  #[tokio::test]
  async fn test_failed_refetch_keeps_published_state() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);
    store.load("b1").await;
    let before = store.snapshot();

    api.fail_next("fetch_lists", ApiError::Network("connection reset".into()));
    let outcome = store.load("b1").await;

    assert_eq!(
      outcome,
      FetchOutcome::Failed(ApiError::Network("connection reset".into()))
    );
    let after = store.snapshot();
    assert_eq!(after.lists, before.lists);
    assert_eq!(
      after.error.as_deref(),
      Some("Error loading lists: network error: connection reset")
    );
  }

  #[tokio::test]
  async fn test_failed_first_load_clears_loading_and_reports() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);
    api.fail_next(
      "fetch_lists",
      ApiError::Server {
        status: 503,
        message: "maintenance".into(),
      },
    );

    assert!(matches!(store.load("b1").await, FetchOutcome::Failed(_)));
    let snapshot = store.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.lists.is_empty());
    assert!(snapshot.error.unwrap().contains("maintenance"));
  }

  #[tokio::test]
  async fn test_label_failure_keeps_lists() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);
    api.fail_next("fetch_labels", ApiError::Timeout);

    assert_eq!(store.load("b1").await, FetchOutcome::Refreshed);
    assert!(store.snapshot().labels.is_empty());
    assert_eq!(store.snapshot().lists.len(), 2);
  }

  #[tokio::test]
  async fn test_response_for_unmounted_board_is_ignored() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);
    let gate = api.hold("fetch_lists");

    let load = tokio::spawn({
      let store = store.clone();
      async move { store.load("b1").await }
    });
    tokio::task::yield_now().await;
    store.unload();
    gate.notify_one();

    assert_eq!(load.await.unwrap(), FetchOutcome::Discarded);
    assert_eq!(store.snapshot(), BoardSnapshot::default());
    assert_eq!(store.cache().get(&BoardLists("b1")), None);
  }

  #[tokio::test]
  async fn test_switching_boards_resets_state() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);
    store.load("b1").await;

    // Unknown board: the fake answers with no lists
    assert_eq!(store.load("b2").await, FetchOutcome::Refreshed);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.board_id.as_deref(), Some("b2"));
    assert!(snapshot.lists.is_empty());
  }

  #[tokio::test]
  async fn test_write_on_other_board_does_not_block_load() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);
    assert_eq!(store.load("b2").await, FetchOutcome::Refreshed);

    let gate = api.hold("create_list");
    let create = tokio::spawn(store.create_list("X").unwrap());
    tokio::task::yield_now().await;

    assert_eq!(store.load("b1").await, FetchOutcome::Refreshed);
    let snapshot = store.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.lists, sample_board().lists);

    gate.notify_one();
    let created = create.await.unwrap().unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.board_id.as_deref(), Some("b1"));
    assert!(!snapshot.loading);
    assert_eq!(snapshot.lists, sample_board().lists);
    assert_eq!(
      store.cache().get(&BoardLists("b1")),
      Some(sample_board().lists)
    );
    let other = store.cache().get(&BoardLists("b2")).unwrap();
    assert_eq!(other.len(), 1);
    assert_eq!(other[0].id, created.id);
  }

  #[tokio::test]
  async fn test_unload_forgets_settled_temp_ids() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);
    store.load("b1").await;

    let pending = store.create_card("l1", "Draft").unwrap();
    let temp_id = store.snapshot().card_by_title("Draft").unwrap().id.clone();
    pending.await.unwrap();
    assert_eq!(store.inner.ids.current(&temp_id), "c-100");

    store.unload();
    assert_eq!(store.inner.ids.current(&temp_id), temp_id);
  }

  #[tokio::test]
  async fn test_set_labels_replaces_definitions() {
    let api = Arc::new(FakeApi::with_board(sample_board()));
    let store = store(&api);
    store.load("b1").await;

    let mut labels = store.snapshot().labels;
    labels[0].name = Some("Renamed".into());
    store.set_labels(labels.clone());

    assert_eq!(store.snapshot().labels, labels);
    assert_eq!(store.cache().get(&BoardLabels("b1")), Some(labels));
  }
}
