//! In-memory `BoardApi` for tests.
//!
//! Behaves like a small backend: assigns ids and positions, applies writes,
//! and can be told to fail or hold a given operation.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::client::BoardApi;
use super::tree;
use super::types::{Card, CardLabel, CardMember, CardPatch, DueStatus, Label, List, Profile};
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct FakeBoard {
  pub board_id: String,
  pub lists: Vec<List>,
  pub labels: Vec<Label>,
}

pub fn label(id: &str, name: &str, color: &str) -> Label {
  Label {
    id: id.to_string(),
    board_id: "b1".to_string(),
    name: Some(name.to_string()),
    color: color.to_string(),
  }
}

pub fn profile(id: &str, name: &str) -> Profile {
  Profile {
    id: id.to_string(),
    full_name: Some(name.to_string()),
    username: None,
    avatar_url: None,
  }
}

pub fn card(id: &str, list_id: &str, title: &str, position: i64) -> Card {
  let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
  Card {
    id: id.to_string(),
    list_id: list_id.to_string(),
    title: title.to_string(),
    description: None,
    position,
    created_at: at,
    updated_at: at,
    start_date: None,
    due_date: None,
    is_complete: false,
    due_status: DueStatus::None,
    created_by: Some("u1".to_string()),
    card_labels: Vec::new(),
    card_members: Vec::new(),
  }
}

pub fn list(id: &str, name: &str, position: i64, cards: Vec<Card>) -> List {
  let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
  List {
    id: id.to_string(),
    board_id: "b1".to_string(),
    name: name.to_string(),
    position,
    created_at: at,
    updated_at: at,
    is_archived: false,
    cards,
  }
}

/// Board b1: "Todo" [c1 "Write docs", c2 "Review"], "Done" [c3 "Release"].
/// c1 carries label lb1 whose embedded copy is stale, and member u1.
pub fn sample_board() -> FakeBoard {
  let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
  let mut c1 = card("c1", "l1", "Write docs", 0);
  c1.card_labels.push(CardLabel {
    id: "cl1".to_string(),
    card_id: "c1".to_string(),
    label_id: "lb1".to_string(),
    created_at: at,
    label: Some(label("lb1", "bug", "orange")),
  });
  c1.card_members.push(CardMember {
    id: "cm1".to_string(),
    card_id: "c1".to_string(),
    profile_id: "u1".to_string(),
    created_at: at,
    profile: profile("u1", "Ada Lovelace"),
  });

  FakeBoard {
    board_id: "b1".to_string(),
    lists: vec![
      list(
        "l1",
        "Todo",
        0,
        vec![c1, card("c2", "l1", "Review", 1)],
      ),
      list("l2", "Done", 1, vec![card("c3", "l2", "Release", 0)]),
    ],
    labels: vec![label("lb1", "Bug", "red"), label("lb2", "Feature", "green")],
  }
}

pub struct FakeApi {
  board: Mutex<FakeBoard>,
  failures: Mutex<HashMap<&'static str, ApiError>>,
  gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
  calls: Mutex<Vec<String>>,
  next_id: AtomicU64,
}

impl FakeApi {
  pub fn new() -> Self {
    Self::with_board(FakeBoard {
      board_id: "b1".to_string(),
      lists: Vec::new(),
      labels: Vec::new(),
    })
  }

  pub fn with_board(board: FakeBoard) -> Self {
    Self {
      board: Mutex::new(board),
      failures: Mutex::new(HashMap::new()),
      gates: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      next_id: AtomicU64::new(100),
    }
  }

  /// Make the next call of `op` fail with `error`.
  pub fn fail_next(&self, op: &'static str, error: ApiError) {
    self.failures.lock().unwrap().insert(op, error);
  }

  /// Make the next call of `op` wait until the returned gate is notified.
  pub fn hold(&self, op: &'static str) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    self.gates.lock().unwrap().insert(op, gate.clone());
    gate
  }

  /// Names of the operations called so far, in order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  /// Lists as the backend sees them.
  pub fn server_lists(&self) -> Vec<List> {
    self.board.lock().unwrap().lists.clone()
  }

  fn next_id(&self, prefix: &str) -> String {
    format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
  }

  async fn enter(&self, op: &'static str) -> Result<(), ApiError> {
    self.calls.lock().unwrap().push(op.to_string());
    let gate = self.gates.lock().unwrap().remove(op);
    if let Some(gate) = gate {
      gate.notified().await;
    }
    match self.failures.lock().unwrap().remove(op) {
      Some(error) => Err(error),
      None => Ok(()),
    }
  }
}

fn not_found(what: &str) -> ApiError {
  ApiError::Server {
    status: 404,
    message: format!("{} not found", what),
  }
}

#[async_trait]
impl BoardApi for FakeApi {
  async fn fetch_lists(&self, board_id: &str) -> Result<Vec<List>, ApiError> {
    self.enter("fetch_lists").await?;
    let board = self.board.lock().unwrap();
    if board.board_id != board_id {
      return Ok(Vec::new());
    }
    Ok(board.lists.clone())
  }

  async fn fetch_labels(&self, board_id: &str) -> Result<Vec<Label>, ApiError> {
    self.enter("fetch_labels").await?;
    let board = self.board.lock().unwrap();
    if board.board_id != board_id {
      return Ok(Vec::new());
    }
    Ok(board.labels.clone())
  }

  async fn create_list(&self, board_id: &str, name: &str) -> Result<List, ApiError> {
    self.enter("create_list").await?;
    let id = self.next_id("l");
    let mut board = self.board.lock().unwrap();
    let position = board.lists.iter().map(|l| l.position + 1).max().unwrap_or(0);
    let mut created = list(&id, name, position, Vec::new());
    created.board_id = board_id.to_string();
    created.created_at = Utc::now();
    created.updated_at = created.created_at;
    board.lists.push(created.clone());
    Ok(created)
  }

  async fn rename_list(&self, list_id: &str, name: &str) -> Result<(), ApiError> {
    self.enter("rename_list").await?;
    let mut board = self.board.lock().unwrap();
    let list = tree::find_list_mut(&mut board.lists, list_id).ok_or_else(|| not_found("list"))?;
    list.name = name.to_string();
    Ok(())
  }

  async fn archive_list(&self, list_id: &str) -> Result<(), ApiError> {
    self.enter("archive_list").await?;
    let mut board = self.board.lock().unwrap();
    let before = board.lists.len();
    board.lists.retain(|l| l.id != list_id);
    if board.lists.len() == before {
      return Err(not_found("list"));
    }
    Ok(())
  }

  async fn delete_list(&self, list_id: &str) -> Result<(), ApiError> {
    self.enter("delete_list").await?;
    let mut board = self.board.lock().unwrap();
    let before = board.lists.len();
    board.lists.retain(|l| l.id != list_id);
    if board.lists.len() == before {
      return Err(not_found("list"));
    }
    Ok(())
  }

  async fn create_card(
    &self,
    _board_id: &str,
    list_id: &str,
    title: &str,
  ) -> Result<Card, ApiError> {
    self.enter("create_card").await?;
    let id = self.next_id("c");
    let mut board = self.board.lock().unwrap();
    let list = tree::find_list_mut(&mut board.lists, list_id).ok_or_else(|| not_found("list"))?;
    let mut created = card(&id, list_id, title, list.cards.len() as i64);
    created.created_at = Utc::now();
    created.updated_at = created.created_at;
    list.cards.push(created.clone());
    Ok(created)
  }

  async fn update_card(&self, card_id: &str, patch: &CardPatch) -> Result<Card, ApiError> {
    self.enter("update_card").await?;
    let mut board = self.board.lock().unwrap();
    let card = tree::find_card_mut(&mut board.lists, card_id).ok_or_else(|| not_found("card"))?;
    if let Some(title) = &patch.title {
      card.title = title.clone();
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
    card.updated_at = Utc::now();
    card.refresh_due_status(Utc::now());
    Ok(card.clone())
  }

  async fn move_card(
    &self,
    card_id: &str,
    list_id: &str,
    position: usize,
  ) -> Result<Card, ApiError> {
    self.enter("move_card").await?;
    let mut board = self.board.lock().unwrap();
    if tree::find_list(&board.lists, list_id).is_none() {
      return Err(not_found("list"));
    }
    let (_, _, mut moved) =
      tree::remove_card(&mut board.lists, card_id).ok_or_else(|| not_found("card"))?;
    moved.updated_at = Utc::now();
    tree::insert_card(&mut board.lists, list_id, position, moved);
    tree::find_card(&board.lists, card_id)
      .cloned()
      .ok_or_else(|| not_found("card"))
  }

  async fn delete_card(&self, card_id: &str) -> Result<(), ApiError> {
    self.enter("delete_card").await?;
    let mut board = self.board.lock().unwrap();
    tree::remove_card(&mut board.lists, card_id)
      .map(|_| ())
      .ok_or_else(|| not_found("card"))
  }

  async fn attach_label(&self, card_id: &str, label_id: &str) -> Result<CardLabel, ApiError> {
    self.enter("attach_label").await?;
    let id = self.next_id("cl");
    let mut board = self.board.lock().unwrap();
    let definition = board.labels.iter().find(|l| l.id == label_id).cloned();
    let card = tree::find_card_mut(&mut board.lists, card_id).ok_or_else(|| not_found("card"))?;
    let row = CardLabel {
      id,
      card_id: card_id.to_string(),
      label_id: label_id.to_string(),
      created_at: Utc::now(),
      label: definition,
    };
    card.card_labels.push(row.clone());
    Ok(row)
  }

  async fn detach_label(&self, card_label_id: &str) -> Result<(), ApiError> {
    self.enter("detach_label").await?;
    let mut board = self.board.lock().unwrap();
    for card in board.lists.iter_mut().flat_map(|l| l.cards.iter_mut()) {
      card.card_labels.retain(|row| row.id != card_label_id);
    }
    Ok(())
  }

  async fn attach_member(&self, card_id: &str, profile_id: &str) -> Result<CardMember, ApiError> {
    self.enter("attach_member").await?;
    let id = self.next_id("cm");
    let mut board = self.board.lock().unwrap();
    let card = tree::find_card_mut(&mut board.lists, card_id).ok_or_else(|| not_found("card"))?;
    let row = CardMember {
      id,
      card_id: card_id.to_string(),
      profile_id: profile_id.to_string(),
      created_at: Utc::now(),
      profile: profile(profile_id, "From server"),
    };
    card.card_members.push(row.clone());
    Ok(row)
  }

  async fn detach_member(&self, card_member_id: &str) -> Result<(), ApiError> {
    self.enter("detach_member").await?;
    let mut board = self.board.lock().unwrap();
    for card in board.lists.iter_mut().flat_map(|l| l.cards.iter_mut()) {
      card.card_members.retain(|row| row.id != card_member_id);
    }
    Ok(())
  }
}
