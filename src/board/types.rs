use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How far ahead a due date counts as "due soon".
pub const DUE_SOON_WINDOW_HOURS: i64 = 24;

/// A column of cards on a board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
  pub id: String,
  pub board_id: String,
  pub name: String,
  pub position: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub is_archived: bool,
  /// Ordered by position
  #[serde(default)]
  pub cards: Vec<Card>,
}

/// A card within a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
  pub id: String,
  pub list_id: String,
  pub title: String,
  pub description: Option<String>,
  pub position: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub start_date: Option<DateTime<Utc>>,
  pub due_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub is_complete: bool,
  #[serde(default)]
  pub due_status: DueStatus,
  pub created_by: Option<String>,
  #[serde(default)]
  pub card_labels: Vec<CardLabel>,
  #[serde(default)]
  pub card_members: Vec<CardMember>,
}

impl Card {
  /// Recompute `due_status` from the card's dates.
  pub fn refresh_due_status(&mut self, now: DateTime<Utc>) {
    self.due_status = DueStatus::derive(self.due_date, self.is_complete, now);
  }
}

/// Derived deadline state of a card
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueStatus {
  DueSoon,
  Overdue,
  Complete,
  #[default]
  None,
}

impl DueStatus {
  pub fn derive(due_date: Option<DateTime<Utc>>, is_complete: bool, now: DateTime<Utc>) -> Self {
    let Some(due) = due_date else {
      return DueStatus::None;
    };

    if is_complete {
      DueStatus::Complete
    } else if due < now {
      DueStatus::Overdue
    } else if due - now <= Duration::hours(DUE_SOON_WINDOW_HOURS) {
      DueStatus::DueSoon
    } else {
      DueStatus::None
    }
  }
}

/// Board-scoped label definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
  pub id: String,
  pub board_id: String,
  pub name: Option<String>,
  pub color: String,
}

/// Join row between a card and a label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardLabel {
  pub id: String,
  pub card_id: String,
  pub label_id: String,
  pub created_at: DateTime<Utc>,
  /// Copy of the label taken when the board was fetched; may be stale
  pub label: Option<Label>,
}

/// User profile attached to cards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  pub id: String,
  pub full_name: Option<String>,
  pub username: Option<String>,
  pub avatar_url: Option<String>,
}

/// Join row between a card and a member profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMember {
  pub id: String,
  pub card_id: String,
  pub profile_id: String,
  pub created_at: DateTime<Utc>,
  pub profile: Profile,
}

/// Partial update of a card's user-editable fields.
///
/// `None` leaves a field alone. The date fields take `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CardPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<Option<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_date: Option<Option<DateTime<Utc>>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<Option<DateTime<Utc>>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_complete: Option<bool>,
}

impl CardPatch {
  pub fn title(title: impl Into<String>) -> Self {
    Self {
      title: Some(title.into()),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}
