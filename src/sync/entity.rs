use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::storage::{MilkRecord, Note, TrashedRecord};

use super::paths;

/// A synchronized entity kind.
///
/// Ties an entity type to its remote collection, its pending marker and
/// the key its merged view sorts by (descending).
pub trait Syncable:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Remote collection this kind lives under.
    const COLLECTION: &'static str;

    type SortKey: Ord;

    fn id(&self) -> &str;
    fn is_pending(&self) -> bool;
    fn set_pending(&mut self, pending: bool);
    fn sort_key(&self) -> Self::SortKey;
}

impl Syncable for MilkRecord {
    const COLLECTION: &'static str = paths::RECORDS;

    type SortKey = (chrono::NaiveDate, i64);

    fn id(&self) -> &str {
        &self.id
    }

    fn is_pending(&self) -> bool {
        self.pending
    }

    fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    fn sort_key(&self) -> Self::SortKey {
        (self.date, self.timestamp)
    }
}

impl Syncable for Note {
    const COLLECTION: &'static str = paths::NOTES;

    type SortKey = i64;

    fn id(&self) -> &str {
        &self.id
    }

    fn is_pending(&self) -> bool {
        self.pending
    }

    fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    fn sort_key(&self) -> Self::SortKey {
        self.timestamp
    }
}

impl Syncable for TrashedRecord {
    const COLLECTION: &'static str = paths::TRASH;

    type SortKey = i64;

    fn id(&self) -> &str {
        &self.record.id
    }

    fn is_pending(&self) -> bool {
        self.record.pending
    }

    fn set_pending(&mut self, pending: bool) {
        self.record.pending = pending;
    }

    fn sort_key(&self) -> Self::SortKey {
        self.deleted_at
    }
}

/// Decode a full-collection snapshot.
///
/// The remote delivers `{identifier: entity}` objects, or null for an
/// empty collection. The map key is authoritative for the identifier and
/// overwrites any embedded id field. Entries that fail to decode are
/// logged and skipped; the remote is schemaless and one bad entry must
/// not blank the whole mirror.
pub fn entities_from_snapshot<T: Syncable>(snapshot: &Value) -> Vec<T> {
    let Some(map) = snapshot.as_object() else {
        if !snapshot.is_null() {
            log::warn!(
                "snapshot for {} is not an object, treating as empty",
                T::COLLECTION
            );
        }
        return Vec::new();
    };

    let mut entities = Vec::with_capacity(map.len());
    for (id, value) in map {
        let mut value = value.clone();
        if let Some(object) = value.as_object_mut() {
            object.insert("id".to_string(), Value::String(id.clone()));
        }
        match serde_json::from_value::<T>(value) {
            Ok(entity) => entities.push(entity),
            Err(e) => {
                log::warn!("skipping undecodable {} entry {}: {}", T::COLLECTION, id, e);
            }
        }
    }
    entities
}
