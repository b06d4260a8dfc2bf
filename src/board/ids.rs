//! Temporary ids for optimistically created entities.
//!
//! A created list, card or join row is shown under a local id until the
//! server answers with the real one. Requests that target such an entity
//! wait here for the create to settle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::error::MutationError;

const TEMP_PREFIX: &str = "temp-";

type Settlement = Option<Result<String, MutationError>>;

pub fn is_temp(id: &str) -> bool {
  id.starts_with(TEMP_PREFIX)
}

/// Sending half handed to the mutation that creates the entity.
pub struct TempIdSender {
  temp_id: String,
  tx: watch::Sender<Settlement>,
}

impl TempIdSender {
  pub fn temp_id(&self) -> &str {
    &self.temp_id
  }
}

#[derive(Default)]
pub struct TempIds {
  next: AtomicU64,
  pending: Mutex<HashMap<String, watch::Receiver<Settlement>>>,
  /// temp id -> server id
  resolved: Mutex<HashMap<String, String>>,
}

impl TempIds {
  pub fn new() -> Self {
    Self::default()
  }

  /// Allocate a fresh temporary id, e.g. `temp-card-3`.
  pub fn allocate(&self, kind: &str) -> TempIdSender {
    let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
    let temp_id = format!("{}{}-{}", TEMP_PREFIX, kind, n);
    let (tx, rx) = watch::channel(None);
    lock(&self.pending).insert(temp_id.clone(), rx);
    TempIdSender { temp_id, tx }
  }

  /// Best id known right now for local lookups.
  pub fn current(&self, id: &str) -> String {
    if !is_temp(id) {
      return id.to_string();
    }
    lock(&self.resolved)
      .get(id)
      .cloned()
      .unwrap_or_else(|| id.to_string())
  }

  /// Record the server id for a created entity and wake waiters.
  pub fn resolve(&self, sender: TempIdSender, server_id: &str) {
    lock(&self.resolved).insert(sender.temp_id.clone(), server_id.to_string());
    lock(&self.pending).remove(&sender.temp_id);
    sender.tx.send_replace(Some(Ok(server_id.to_string())));
  }

  /// Mark a create as failed; waiters receive the same error.
  ///
  /// The settled receiver stays registered so late callers see it too.
  pub fn fail(&self, sender: TempIdSender, error: MutationError) {
    sender.tx.send_replace(Some(Err(error)));
  }

  /// Forget every settled create: resolved mappings, failures and creates
  /// whose mutation was dropped. Creates still in flight stay registered.
  ///
  /// Only safe once nothing refers to the temporary ids any more.
  pub fn clear_settled(&self) {
    let mut pending = lock(&self.pending);
    let mut resolved = lock(&self.resolved);
    let before = pending.len() + resolved.len();

    pending.retain(|_, rx| rx.borrow().is_none() && rx.has_changed().is_ok());
    resolved.clear();

    let forgotten = before - pending.len();
    if forgotten > 0 {
      debug!("Forgot {} settled temporary ids", forgotten);
    }
  }

  /// Server id for `id`, waiting for a pending create if necessary.
  pub async fn server_id(&self, id: &str) -> Result<String, MutationError> {
    let current = self.current(id);
    if !is_temp(&current) {
      return Ok(current);
    }

    let rx = lock(&self.pending).get(&current).cloned();
    let Some(mut rx) = rx else {
      return Err(MutationError::validation(format!("{} was never created", id)));
    };

    let settled = rx.wait_for(Option::is_some).await.map(|s| (*s).clone());
    match settled {
      Ok(Some(result)) => result,
      // The creating mutation was dropped before it settled
      Ok(None) | Err(_) => Err(MutationError::Network(format!(
        "creation of {} was abandoned",
        id
      ))),
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
