//! Cache key namespaces for board data.

use crate::cache::CacheKey;

use super::types::{Label, List};

/// Lists (with embedded cards) of one board.
#[derive(Debug, Clone, Copy)]
pub struct BoardLists<'a>(pub &'a str);

impl CacheKey for BoardLists<'_> {
  type Value = Vec<List>;

  fn namespace() -> &'static str {
    "lists"
  }

  fn scope(&self) -> &str {
    self.0
  }
}

/// Label definitions of one board.
#[derive(Debug, Clone, Copy)]
pub struct BoardLabels<'a>(pub &'a str);

impl CacheKey for BoardLabels<'_> {
  type Value = Vec<Label>;

  fn namespace() -> &'static str {
    "labels"
  }

  fn scope(&self) -> &str {
    self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_lists_and_labels_of_same_board_use_different_keys() {
    assert_ne!(BoardLists("b1").cache_hash(), BoardLabels("b1").cache_hash());
    assert_eq!(BoardLists("b1").description(), "lists for b1");
  }
}
