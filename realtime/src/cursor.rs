//! Resume position persistence.
//!
//! The cursor is stored under `<client>_after_id` together with its write time
//! under `<client>_after_id_ts` (epoch millis). A cursor older than
//! [`STALENESS_WINDOW`] is treated as absent, so a reloaded client starts a
//! fresh session instead of replaying a backlog of already-seen events.

use crate::storage::SessionStorage;
use chrono::{DateTime, TimeZone, Utc};
use log::*;
use std::sync::Arc;
use std::time::Duration;

/// Sentinel position meaning "from the beginning".
pub const CURSOR_BEGINNING: &str = "0";

/// Maximum age of a persisted cursor that may still be resumed from.
pub const STALENESS_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Opaque position token; never assumed numeric.
    pub position: String,
    pub persisted_at: DateTime<Utc>,
}

/// Cursor persistence that never fails.
///
/// Storage errors are logged and treated as "no persisted cursor".
#[derive(Clone)]
pub struct CursorStore {
    storage: Arc<dyn SessionStorage>,
    position_key: String,
    timestamp_key: String,
}

impl CursorStore {
    pub fn new(client_name: &str, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            position_key: format!("{client_name}_after_id"),
            timestamp_key: format!("{client_name}_after_id_ts"),
        }
    }

    /// Restores the persisted cursor.
    ///
    /// Returns `None` for a fresh session: nothing persisted, storage
    /// unavailable, or a cursor older than the staleness window.
    pub fn load(&self) -> Option<Cursor> {
        self.load_at(Utc::now())
    }

    fn load_at(&self, now: DateTime<Utc>) -> Option<Cursor> {
        let position = match self.storage.get(&self.position_key) {
            Ok(Some(position)) if !position.is_empty() => position,
            Ok(_) => return None,
            Err(e) => {
                warn!("Cursor storage unavailable, starting fresh session: {e}");
                return None;
            }
        };

        let persisted_at = match self.storage.get(&self.timestamp_key) {
            Ok(Some(millis)) => millis
                .parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            Ok(None) => None,
            Err(e) => {
                warn!("Cursor storage unavailable, starting fresh session: {e}");
                return None;
            }
        };

        let Some(persisted_at) = persisted_at else {
            debug!("Persisted cursor {position} has no valid timestamp, ignoring it");
            return None;
        };

        let age_ms = (now - persisted_at).num_milliseconds();
        if age_ms > STALENESS_WINDOW.as_millis() as i64 {
            debug!(
                "Persisted cursor {position} is stale (written {}), ignoring it",
                persisted_at.to_rfc3339()
            );
            return None;
        }

        Some(Cursor {
            position,
            persisted_at,
        })
    }

    /// Persists `position` stamped with the current time.
    pub fn save(&self, position: &str) {
        let now = Utc::now().timestamp_millis().to_string();

        if let Err(e) = self
            .storage
            .set(&self.position_key, position)
            .and_then(|_| self.storage.set(&self.timestamp_key, &now))
        {
            warn!("Failed to persist cursor {position}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{storage_error, Error, StorageErrorKind};
    use crate::storage::MemoryStorage;
    use chrono::Duration as TimeDelta;

    struct UnavailableStorage;

    impl SessionStorage for UnavailableStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, Error> {
            Err(storage_error(StorageErrorKind::Unavailable, "private mode"))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), Error> {
            Err(storage_error(StorageErrorKind::Unavailable, "private mode"))
        }
    }

    fn memory_store() -> (CursorStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (CursorStore::new("kitchen", storage.clone()), storage)
    }

    #[test]
    fn test_load_without_save_is_fresh_session() {
        let (store, _) = memory_store();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_save_then_load_within_window_returns_position() {
        let (store, storage) = memory_store();
        store.save("5-0");

        let cursor = store.load().unwrap();
        assert_eq!(cursor.position, "5-0");
        assert_eq!(
            storage.get("kitchen_after_id").unwrap(),
            Some("5-0".to_string())
        );
        assert!(storage.get("kitchen_after_id_ts").unwrap().is_some());
    }

    #[test]
    fn test_load_after_staleness_window_is_fresh_session() {
        let (store, _) = memory_store();
        store.save("5-0");

        let window = TimeDelta::minutes(5);
        let later = Utc::now() + window + TimeDelta::seconds(1);
        assert_eq!(store.load_at(later), None);

        let just_inside = Utc::now() + window - TimeDelta::seconds(5);
        assert!(store.load_at(just_inside).is_some());
    }

    #[test]
    fn test_load_with_old_timestamp_is_fresh_session() {
        let (store, storage) = memory_store();
        let six_minutes_ago = (Utc::now() - TimeDelta::minutes(6)).timestamp_millis();
        storage.set("kitchen_after_id", "3-0").unwrap();
        storage
            .set("kitchen_after_id_ts", &six_minutes_ago.to_string())
            .unwrap();

        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_load_with_unparsable_timestamp_is_fresh_session() {
        let (store, storage) = memory_store();
        storage.set("kitchen_after_id", "3-0").unwrap();
        storage.set("kitchen_after_id_ts", "yesterday").unwrap();

        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_keys_are_scoped_by_client_name() {
        let storage = Arc::new(MemoryStorage::new());
        let kitchen = CursorStore::new("kitchen", storage.clone());
        let waiter = CursorStore::new("waiter", storage);

        kitchen.save("9-0");
        assert_eq!(waiter.load(), None);
        assert_eq!(kitchen.load().unwrap().position, "9-0");
    }

    #[test]
    fn test_unavailable_storage_never_fails() {
        let store = CursorStore::new("kitchen", Arc::new(UnavailableStorage));
        store.save("5-0");
        assert_eq!(store.load(), None);
    }
}
