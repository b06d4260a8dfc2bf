//! Command-line operations against one board.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::fmt::Write;

use crate::board::{BoardSnapshot, BoardStore, DueStatus, FetchOutcome, Pending};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Show the board's lists and cards
  #[command(alias = "ls")]
  Lists,
  /// Append a list to the board
  CreateList { name: String },
  /// Rename a list
  RenameList { list: String, name: String },
  /// Archive a list
  ArchiveList { list: String },
  /// Delete a list and its cards
  DeleteList { list: String },
  /// Append a card to a list
  CreateCard { list: String, title: String },
  /// Move a card to a list, at a position counted before the move
  MoveCard {
    card: String,
    list: String,
    #[arg(short, long, default_value_t = 0)]
    position: usize,
  },
  /// Delete a card
  DeleteCard { card: String },
}

/// Load `board_id`, run `command` and return the board as text.
pub async fn run(store: &BoardStore, board_id: &str, command: Command) -> Result<String> {
  match store.load(board_id).await {
    FetchOutcome::Failed(e) => return Err(eyre!("Failed to load board {}: {}", board_id, e)),
    FetchOutcome::Skipped => return Err(eyre!("No board given")),
    FetchOutcome::Refreshed | FetchOutcome::Discarded => {}
  }

  let snapshot = store.snapshot();
  match command {
    Command::Lists => {}
    Command::CreateList { name } => {
      settle(store.create_list(&name)).await?;
    }
    Command::RenameList { list, name } => {
      let list = resolve_list(&snapshot, &list)?;
      settle(store.rename_list(&list, &name)).await?;
    }
    Command::ArchiveList { list } => {
      let list = resolve_list(&snapshot, &list)?;
      settle(store.archive_list(&list)).await?;
    }
    Command::DeleteList { list } => {
      let list = resolve_list(&snapshot, &list)?;
      settle(store.delete_list(&list)).await?;
    }
    Command::CreateCard { list, title } => {
      let list = resolve_list(&snapshot, &list)?;
      settle(store.create_card(&list, &title)).await?;
    }
    Command::MoveCard {
      card,
      list,
      position,
    } => {
      let card = resolve_card(&snapshot, &card)?;
      let list = resolve_list(&snapshot, &list)?;
      settle(store.move_card(&card, &list, position)).await?;
    }
    Command::DeleteCard { card } => {
      let card = resolve_card(&snapshot, &card)?;
      settle(store.delete_card(&card)).await?;
    }
  }

  Ok(render(store))
}

async fn settle<T>(pending: Result<Pending<T>, crate::error::MutationError>) -> Result<T> {
  Ok(pending?.await?)
}

/// List id for a reference that is either an id or a list name.
///
/// Names match case-insensitively; an ambiguous name is an error.
fn resolve_list(snapshot: &BoardSnapshot, reference: &str) -> Result<String> {
  if let Some(list) = snapshot.list(reference) {
    return Ok(list.id.clone());
  }

  let wanted = reference.to_lowercase();
  let matches: Vec<_> = snapshot
    .lists
    .iter()
    .filter(|l| l.name.to_lowercase() == wanted)
    .collect();
  match matches.as_slice() {
    [list] => Ok(list.id.clone()),
    [] => Err(eyre!("No list named {:?}", reference)),
    _ => Err(eyre!("List name {:?} is ambiguous, use its id", reference)),
  }
}

/// Card id for a reference that is either an id or an exact title.
fn resolve_card(snapshot: &BoardSnapshot, reference: &str) -> Result<String> {
  snapshot
    .card(reference)
    .or_else(|| snapshot.card_by_title(reference))
    .map(|c| c.id.clone())
    .ok_or_else(|| eyre!("No card {:?}", reference))
}

fn due_marker(status: DueStatus) -> &'static str {
  match status {
    DueStatus::DueSoon => " (due soon)",
    DueStatus::Overdue => " (overdue)",
    DueStatus::Complete => " (done)",
    DueStatus::None => "",
  }
}

/// Text rendering of the board in view.
pub fn render(store: &BoardStore) -> String {
  let snapshot = store.snapshot();
  let mut out = String::new();

  if let Some(error) = &snapshot.error {
    let _ = writeln!(out, "! {}", error);
  }
  for list in &snapshot.lists {
    let _ = writeln!(out, "{} [{}]", list.name, list.id);
    for card in &list.cards {
      let _ = write!(out, "  {}. {}{}", card.position, card.title, due_marker(card.due_status));

      let labels: Vec<String> = store
        .card_labels(&card.id)
        .into_iter()
        .map(|l| l.name.unwrap_or(l.color))
        .collect();
      if !labels.is_empty() {
        let _ = write!(out, " #{}", labels.join(" #"));
      }

      let members: Vec<String> = store
        .card_members(&card.id)
        .into_iter()
        .filter_map(|p| p.full_name.or(p.username))
        .collect();
      if !members.is_empty() {
        let _ = write!(out, " @{}", members.join(" @"));
      }
      let _ = writeln!(out, " [{}]", card.id);
    }
  }
  out
}
