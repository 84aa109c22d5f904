use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::ids;

/// Milking shift a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Shift {
    Day,
    Night,
}

/// Payment state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Paid,
    #[default]
    Unpaid,
}

/// One dairy production entry.
///
/// `pending` is local-only state: it is forced on while a mutation waits
/// in the upsert queue and omitted from JSON when false, so a drained
/// entity never carries the marker to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilkRecord {
    pub id: String,
    pub date: NaiveDate,
    /// Liters delivered.
    pub quantity: f64,
    pub total_price: f64,
    /// Derived: `total_price / quantity`, zero when quantity is zero.
    pub price_per_liter: f64,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shift: Option<Shift>,
    #[serde(default)]
    pub status: PaymentStatus,
    #[serde(default, rename = "pendingSync", skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// Create payload for a record; the store derives the rest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInput {
    pub date: NaiveDate,
    pub quantity: f64,
    pub total_price: f64,
    #[serde(default)]
    pub shift: Option<Shift>,
    #[serde(default)]
    pub status: Option<PaymentStatus>,
}

impl MilkRecord {
    pub fn new(input: RecordInput) -> Self {
        Self {
            id: ids::generate(),
            date: input.date,
            quantity: input.quantity,
            total_price: input.total_price,
            price_per_liter: price_per_liter(input.quantity, input.total_price),
            timestamp: Utc::now().timestamp_millis(),
            shift: input.shift,
            status: input.status.unwrap_or_default(),
            pending: true,
        }
    }
}

/// Derived unit price. Zero quantity yields zero instead of a division
/// artifact.
pub fn price_per_liter(quantity: f64, total_price: f64) -> f64 {
    if quantity > 0.0 {
        total_price / quantity
    } else {
        0.0
    }
}

/// A freeform note with an optional reminder flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub date: NaiveDate,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub remind_me: bool,
    #[serde(default, rename = "pendingSync", skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// Create payload for a note.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInput {
    pub title: String,
    pub content: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub remind_me: bool,
}

impl Note {
    pub fn new(input: NoteInput) -> Self {
        Self {
            id: ids::generate(),
            title: input.title,
            content: input.content,
            date: input.date,
            timestamp: Utc::now().timestamp_millis(),
            remind_me: input.remind_me,
            pending: true,
        }
    }
}

/// A soft-deleted record as it sits in the remote trash collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashedRecord {
    #[serde(flatten)]
    pub record: MilkRecord,
    /// Deletion time, unix milliseconds.
    pub deleted_at: i64,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(date: &str, quantity: f64, total_price: f64) -> RecordInput {
        RecordInput {
            date: date.parse().unwrap(),
            quantity,
            total_price,
            shift: None,
            status: None,
        }
    }

    #[test]
    fn test_price_per_liter_derivation() {
        let record = MilkRecord::new(input("2024-03-01", 10.0, 500.0));
        assert_eq!(record.price_per_liter, 50.0);
        assert_eq!(record.status, PaymentStatus::Unpaid);
        assert!(record.pending);

        let free = MilkRecord::new(input("2024-03-01", 0.0, 500.0));
        assert_eq!(free.price_per_liter, 0.0);
    }

    #[test]
    fn test_pending_marker_not_serialized_when_clear() {
        let mut record = MilkRecord::new(input("2024-03-01", 10.0, 500.0));
        record.pending = false;

        let value = serde_json::to_value(&record).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("pendingSync"));
        assert_eq!(object["date"], "2024-03-01");
        assert_eq!(object["totalPrice"], 500.0);
        assert_eq!(object["pricePerLiter"], 50.0);
        assert_eq!(object["status"], "UNPAID");

        record.pending = true;
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["pendingSync"], true);
    }

    #[test]
    fn test_record_deserializes_without_status() {
        let raw = r#"{
            "id": "1700000000000-abc123def",
            "date": "2024-01-05",
            "quantity": 12.5,
            "totalPrice": 625.0,
            "pricePerLiter": 50.0,
            "timestamp": 1700000000000,
            "shift": "NIGHT"
        }"#;
        let record: MilkRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.status, PaymentStatus::Unpaid);
        assert_eq!(record.shift, Some(Shift::Night));
        assert!(!record.pending);
    }

    #[test]
    fn test_trashed_record_flattens() {
        let mut record = MilkRecord::new(input("2024-03-01", 10.0, 500.0));
        record.pending = false;
        let id = record.id.clone();
        let trashed = TrashedRecord {
            record,
            deleted_at: 1700000000123,
        };

        let value = serde_json::to_value(&trashed).unwrap();
        assert_eq!(value["id"], id.as_str());
        assert_eq!(value["deletedAt"], 1700000000123i64);

        let back: TrashedRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, trashed);
    }
}
