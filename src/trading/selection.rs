//! Accounts selected for manual multi-account order entry.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    selected: BTreeSet<String>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership. Returns true if the account is now selected.
    pub fn toggle(&mut self, account_id: &str) -> bool {
        if self.selected.remove(account_id) {
            false
        } else {
            self.selected.insert(account_id.to_string());
            true
        }
    }

    pub fn remove(&mut self, account_id: &str) {
        self.selected.remove(account_id);
    }

    pub fn is_selected(&self, account_id: &str) -> bool {
        self.selected.contains(account_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}
