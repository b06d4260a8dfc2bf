//! Serde types matching the board API's request and response bodies.
//!
//! These types are separate from domain types so that missing nested
//! collections, unordered rows and server-side extras are dealt with in one
//! place before anything reaches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Card, CardLabel, CardMember, CardPatch, DueStatus, Label, List, Profile};

// ============================================================================
// Nested rows
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCardLabel {
  pub id: String,
  pub card_id: String,
  pub label_id: String,
  pub created_at: DateTime<Utc>,
  pub label: Option<Label>,
}

impl From<ApiCardLabel> for CardLabel {
  fn from(row: ApiCardLabel) -> Self {
    CardLabel {
      id: row.id,
      card_id: row.card_id,
      label_id: row.label_id,
      created_at: row.created_at,
      label: row.label,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiCardMember {
  pub id: String,
  pub card_id: String,
  pub profile_id: String,
  pub created_at: DateTime<Utc>,
  pub profile: Option<Profile>,
}

impl From<ApiCardMember> for CardMember {
  fn from(row: ApiCardMember) -> Self {
    // Rows fetched without the profile join still carry the id
    let profile = row.profile.unwrap_or_else(|| Profile {
      id: row.profile_id.clone(),
      full_name: None,
      username: None,
      avatar_url: None,
    });

    CardMember {
      id: row.id,
      card_id: row.card_id,
      profile_id: row.profile_id,
      created_at: row.created_at,
      profile,
    }
  }
}

// ============================================================================
// Cards and lists
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCard {
  pub id: String,
  pub list_id: String,
  pub title: String,
  pub description: Option<String>,
  #[serde(default)]
  pub position: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub start_date: Option<DateTime<Utc>>,
  pub due_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub is_complete: bool,
  pub created_by: Option<String>,
  pub card_labels: Option<Vec<ApiCardLabel>>,
  pub card_members: Option<Vec<ApiCardMember>>,
}

impl ApiCard {
  pub fn into_card(self, now: DateTime<Utc>) -> Card {
    let mut card = Card {
      id: self.id,
      list_id: self.list_id,
      title: self.title,
      description: self.description,
      position: self.position,
      created_at: self.created_at,
      updated_at: self.updated_at,
      start_date: self.start_date,
      due_date: self.due_date,
      is_complete: self.is_complete,
      due_status: DueStatus::None,
      created_by: self.created_by,
      card_labels: self
        .card_labels
        .unwrap_or_default()
        .into_iter()
        .map(CardLabel::from)
        .collect(),
      card_members: self
        .card_members
        .unwrap_or_default()
        .into_iter()
        .map(CardMember::from)
        .collect(),
    };
    card.refresh_due_status(now);
    card
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiList {
  pub id: String,
  pub board_id: String,
  pub name: String,
  #[serde(default)]
  pub position: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub is_archived: bool,
  pub cards: Option<Vec<ApiCard>>,
}

impl ApiList {
  pub fn into_list(self, now: DateTime<Utc>) -> List {
    let mut cards: Vec<Card> = self
      .cards
      .unwrap_or_default()
      .into_iter()
      .map(|card| card.into_card(now))
      .collect();
    cards.sort_by_key(|card| card.position);

    List {
      id: self.id,
      board_id: self.board_id,
      name: self.name,
      position: self.position,
      created_at: self.created_at,
      updated_at: self.updated_at,
      is_archived: self.is_archived,
      cards,
    }
  }
}

/// Normalize a fetched collection: archived lists dropped, lists and cards
/// ordered by position.
pub fn normalize_lists(lists: Vec<ApiList>, now: DateTime<Utc>) -> Vec<List> {
  let mut lists: Vec<List> = lists
    .into_iter()
    .filter(|list| !list.is_archived)
    .map(|list| list.into_list(now))
    .collect();
  lists.sort_by_key(|list| list.position);
  lists
}

// ============================================================================
// Response envelopes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiListsResponse {
  pub lists: Vec<ApiList>,
}

#[derive(Debug, Deserialize)]
pub struct ApiListResponse {
  pub list: ApiList,
}

#[derive(Debug, Deserialize)]
pub struct ApiCardResponse {
  pub card: ApiCard,
}

#[derive(Debug, Deserialize)]
pub struct ApiLabelsResponse {
  pub labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
pub struct ApiCardLabelResponse {
  pub card_label: ApiCardLabel,
}

#[derive(Debug, Deserialize)]
pub struct ApiCardMemberResponse {
  pub card_member: ApiCardMember,
}

/// Body of a non-2xx response
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub error: String,
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CreateListRequest<'a> {
  pub name: &'a str,
  pub board_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RenameListRequest<'a> {
  pub id: &'a str,
  pub name: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ArchiveListRequest<'a> {
  pub id: &'a str,
  pub is_archived: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateCardRequest<'a> {
  pub title: &'a str,
  pub list_id: &'a str,
  pub board_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct UpdateCardRequest<'a> {
  #[serde(flatten)]
  pub patch: &'a CardPatch,
}

#[derive(Debug, Serialize)]
pub struct MoveCardRequest<'a> {
  pub list_id: &'a str,
  pub position: usize,
}

#[derive(Debug, Serialize)]
pub struct AttachLabelRequest<'a> {
  pub card_id: &'a str,
  pub label_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AttachMemberRequest<'a> {
  pub card_id: &'a str,
  pub profile_id: &'a str,
}
