use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Fixed cell key the history list is persisted under
const HISTORY_KEY: &str = "snapsight.history";

/// A record of a previously uploaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Object key of the upload; unique per stored object
    pub id: String,
    /// Original file name
    pub name: String,
    /// Upload date as display text
    pub date: String,
    /// Inline thumbnail data URL, or a placeholder path
    pub thumbnail: String,
    /// Owner of the upload
    pub user_id: String,
}

/// Session-scoped string cells, the storage model history persists into.
///
/// Cells hold raw serialized text; readers own the parse and its failure
/// handling, so a corrupt cell degrades instead of failing the read.
#[derive(Debug, Default)]
pub struct SessionStore {
    cells: RwLock<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a cell's raw text
    pub fn get(&self, key: &str) -> Option<String> {
        self.cells.read().get(key).cloned()
    }

    /// Replace a cell's raw text wholesale
    pub fn set(&self, key: &str, value: String) {
        self.cells.write().insert(key.to_string(), value);
    }
}

/// History of uploads for the current session
#[derive(Debug, Default)]
pub struct HistoryStore {
    store: SessionStore,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an upload at the front of the list.
    ///
    /// A save with an id that is already present is silently ignored; the
    /// full list is persisted back under the fixed key.
    pub fn save_history_item(&self, item: HistoryItem) {
        let mut items = self.read_all();

        if items.iter().any(|existing| existing.id == item.id) {
            debug!(id = %item.id, "History item already recorded, ignoring duplicate");
            return;
        }

        items.insert(0, item);

        match serde_json::to_string(&items) {
            Ok(serialized) => self.store.set(HISTORY_KEY, serialized),
            Err(e) => warn!(error = %e, "Failed to serialize history list"),
        }
    }

    /// History items belonging to a user, newest first.
    ///
    /// Returns an empty list when nothing is stored or the stored cell does
    /// not parse; never an error.
    pub fn get_history_items(&self, user_id: &str) -> Vec<HistoryItem> {
        self.read_all()
            .into_iter()
            .filter(|item| item.user_id == user_id)
            .collect()
    }

    /// Replace the persisted list wholesale (useful for testing corrupt storage)
    pub fn set_raw(&self, raw: String) {
        self.store.set(HISTORY_KEY, raw);
    }

    fn read_all(&self) -> Vec<HistoryItem> {
        let Some(raw) = self.store.get(HISTORY_KEY) else {
            return Vec::new();
        };

        match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Stored history did not parse, treating as empty");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_item(id: &str, user_id: &str) -> HistoryItem {
        HistoryItem {
            id: id.to_string(),
            name: "photo.jpg".to_string(),
            date: "2024-01-15".to_string(),
            thumbnail: "/placeholder.svg".to_string(),
            user_id: user_id.to_string(),
        }
    }

    #[test]
    fn test_saved_item_is_returned_for_its_user() {
        let store = HistoryStore::new();
        let item = create_item("uploads/1-photo.jpg", "user-a");

        store.save_history_item(item.clone());

        assert_eq!(store.get_history_items("user-a"), vec![item]);
    }

    #[test]
    fn test_duplicate_id_is_ignored() {
        let store = HistoryStore::new();
        let item = create_item("uploads/1-photo.jpg", "user-a");

        store.save_history_item(item.clone());
        store.save_history_item(item.clone());

        assert_eq!(store.get_history_items("user-a").len(), 1);
    }

    #[test]
    fn test_items_are_front_inserted() {
        let store = HistoryStore::new();
        store.save_history_item(create_item("uploads/1-old.jpg", "user-a"));
        store.save_history_item(create_item("uploads/2-new.jpg", "user-a"));

        let items = store.get_history_items("user-a");
        assert_eq!(items[0].id, "uploads/2-new.jpg");
        assert_eq!(items[1].id, "uploads/1-old.jpg");
    }

    #[test]
    fn test_filter_by_user() {
        let store = HistoryStore::new();
        store.save_history_item(create_item("uploads/1-a.jpg", "user-a"));
        store.save_history_item(create_item("uploads/2-b.jpg", "user-b"));

        let items = store.get_history_items("user-a");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "uploads/1-a.jpg");
    }

    #[test]
    fn test_empty_store_returns_empty_list() {
        let store = HistoryStore::new();
        assert!(store.get_history_items("user-a").is_empty());
    }

    #[test]
    fn test_corrupt_storage_degrades_to_empty_list() {
        let store = HistoryStore::new();
        store.set_raw("{{{not json".to_string());

        assert!(store.get_history_items("user-a").is_empty());
    }

    #[test]
    fn test_save_after_corruption_starts_fresh() {
        let store = HistoryStore::new();
        store.set_raw("{{{not json".to_string());

        let item = create_item("uploads/1-photo.jpg", "user-a");
        store.save_history_item(item.clone());

        assert_eq!(store.get_history_items("user-a"), vec![item]);
    }
}
