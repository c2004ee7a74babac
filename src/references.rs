//! Reference catalogs — the allowed values task payloads are checked against.
//!
//! Catalog kinds are a closed enumeration; requests addressing a catalog by
//! its string key go through [`ReferenceKind::from_key`] and unknown keys are
//! rejected at the boundary.

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Which catalog an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    OperationKinds,
    Statuses,
    VehiclePlates,
    Drivers,
    TerminalContracts,
    TimeSlots,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 6] = [
        Self::OperationKinds,
        Self::Statuses,
        Self::VehiclePlates,
        Self::Drivers,
        Self::TerminalContracts,
        Self::TimeSlots,
    ];

    /// Stable string key used in persisted data and request paths.
    pub fn key(&self) -> &'static str {
        match self {
            Self::OperationKinds => "operation_kinds",
            Self::Statuses => "statuses",
            Self::VehiclePlates => "vehicle_plates",
            Self::Drivers => "drivers",
            Self::TerminalContracts => "terminal_contracts",
            Self::TimeSlots => "time_slots",
        }
    }

    /// Resolve a string key, rejecting anything outside the closed set.
    pub fn from_key(key: &str) -> Result<Self, ValidationError> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.key() == key)
            .ok_or_else(|| ValidationError::UnknownCatalog {
                key: key.to_string(),
            })
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

fn generate_reference_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();
    format!("ref_{timestamp}_{suffix}")
}

/// One allowed value in a catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl ReferenceItem {
    pub fn new(value: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_reference_id(),
            value: value.into(),
            description: description.into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn seeded(id: &str, value: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            value: value.to_string(),
            description: description.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// All six catalogs, persisted as one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceBook {
    #[serde(default)]
    pub operation_kinds: Vec<ReferenceItem>,
    #[serde(default)]
    pub statuses: Vec<ReferenceItem>,
    #[serde(default)]
    pub vehicle_plates: Vec<ReferenceItem>,
    #[serde(default)]
    pub drivers: Vec<ReferenceItem>,
    #[serde(default)]
    pub terminal_contracts: Vec<ReferenceItem>,
    #[serde(default)]
    pub time_slots: Vec<ReferenceItem>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ReferenceBook {
    fn default() -> Self {
        Self::seeded()
    }
}

impl ReferenceBook {
    /// Book pre-filled with the portal's standard values.
    pub fn seeded() -> Self {
        Self {
            operation_kinds: vec![
                ReferenceItem::seeded("op_import", "import", ""),
                ReferenceItem::seeded("op_export", "export", ""),
            ],
            statuses: vec![
                ReferenceItem::seeded("status_new", "new", ""),
                ReferenceItem::seeded("status_waiting", "waiting", ""),
                ReferenceItem::seeded("status_in_work", "in_work", ""),
                ReferenceItem::seeded("status_completed", "completed", ""),
                ReferenceItem::seeded("status_skipped", "skipped", ""),
                ReferenceItem::seeded("status_stopped", "stopped", ""),
            ],
            vehicle_plates: vec![
                ReferenceItem::seeded("plate_a001aa78", "A001AA78", ""),
                ReferenceItem::seeded("plate_b002bb78", "B002BB78", ""),
                ReferenceItem::seeded("plate_c003cc78", "C003CC78", ""),
            ],
            drivers: vec![
                ReferenceItem::seeded("driver_ivanov", "I. Ivanov", ""),
                ReferenceItem::seeded("driver_petrov", "P. Petrov", ""),
                ReferenceItem::seeded("driver_sidorov", "S. Sidorov", ""),
            ],
            terminal_contracts: vec![
                ReferenceItem::seeded("contract_001", "Contract 001/2025", "Primary terminal contract"),
                ReferenceItem::seeded("contract_002", "Contract 002/2025", "Secondary contract"),
            ],
            time_slots: vec![
                ReferenceItem::seeded("ts_0100_0400", "01:00-04:00", ""),
                ReferenceItem::seeded("ts_0430_0730", "04:30-07:30", ""),
                ReferenceItem::seeded("ts_0800_1200", "08:00-12:00", ""),
                ReferenceItem::seeded("ts_1300_1600", "13:00-16:00", ""),
                ReferenceItem::seeded("ts_1630_1930", "16:30-19:30", ""),
                ReferenceItem::seeded("ts_2000_0000", "20:00-00:00", ""),
            ],
            updated_at: Utc::now(),
        }
    }

    /// Completely empty book (test and migration helper).
    pub fn empty() -> Self {
        Self {
            operation_kinds: Vec::new(),
            statuses: Vec::new(),
            vehicle_plates: Vec::new(),
            drivers: Vec::new(),
            terminal_contracts: Vec::new(),
            time_slots: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn items(&self, kind: ReferenceKind) -> &Vec<ReferenceItem> {
        match kind {
            ReferenceKind::OperationKinds => &self.operation_kinds,
            ReferenceKind::Statuses => &self.statuses,
            ReferenceKind::VehiclePlates => &self.vehicle_plates,
            ReferenceKind::Drivers => &self.drivers,
            ReferenceKind::TerminalContracts => &self.terminal_contracts,
            ReferenceKind::TimeSlots => &self.time_slots,
        }
    }

    fn items_mut(&mut self, kind: ReferenceKind) -> &mut Vec<ReferenceItem> {
        match kind {
            ReferenceKind::OperationKinds => &mut self.operation_kinds,
            ReferenceKind::Statuses => &mut self.statuses,
            ReferenceKind::VehiclePlates => &mut self.vehicle_plates,
            ReferenceKind::Drivers => &mut self.drivers,
            ReferenceKind::TerminalContracts => &mut self.terminal_contracts,
            ReferenceKind::TimeSlots => &mut self.time_slots,
        }
    }

    /// Active items of one catalog.
    pub fn active_items(&self, kind: ReferenceKind) -> Vec<&ReferenceItem> {
        self.items(kind).iter().filter(|i| i.is_active).collect()
    }

    /// Check that `value` is an active entry of `kind`.
    pub fn validate_value(&self, kind: ReferenceKind, value: &str) -> Result<(), ValidationError> {
        let active = self.active_items(kind);
        if active.is_empty() {
            return Err(ValidationError::EmptyCatalog {
                catalog: kind.key().to_string(),
            });
        }
        if active.iter().any(|item| item.value == value) {
            return Ok(());
        }
        Err(ValidationError::UnknownReference {
            catalog: kind.key().to_string(),
            value: value.to_string(),
            available: active
                .iter()
                .map(|item| format!("'{}'", item.value))
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    fn has_duplicate_value(&self, kind: ReferenceKind, value: &str) -> bool {
        self.active_items(kind)
            .iter()
            .any(|item| item.value.eq_ignore_ascii_case(value))
    }

    /// Validate and append a new catalog item.
    pub fn add_item(
        &mut self,
        kind: ReferenceKind,
        value: &str,
        description: &str,
    ) -> Result<ReferenceItem, ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "value",
                message: "value cannot be empty".into(),
            });
        }
        if value.len() > 100 {
            return Err(ValidationError::InvalidValue {
                field: "value",
                message: "value cannot exceed 100 characters".into(),
            });
        }
        if description.len() > 255 {
            return Err(ValidationError::InvalidValue {
                field: "description",
                message: "description cannot exceed 255 characters".into(),
            });
        }
        if self.has_duplicate_value(kind, value) {
            return Err(ValidationError::InvalidValue {
                field: "value",
                message: format!("an entry with this value already exists: {value}"),
            });
        }

        let item = ReferenceItem::new(value, description);
        self.items_mut(kind).push(item.clone());
        self.updated_at = Utc::now();
        Ok(item)
    }

    /// Remove a catalog item by id. Returns false if the id was not present.
    pub fn remove_item(&mut self, kind: ReferenceKind, item_id: &str) -> bool {
        let items = self.items_mut(kind);
        let before = items.len();
        items.retain(|item| item.id != item_id);
        if items.len() != before {
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Backfill catalogs that are empty with the seeded defaults.
    ///
    /// Runs on load so books persisted before a catalog existed pick up
    /// its standard values.
    pub fn backfill_missing(&mut self) -> bool {
        let seed = Self::seeded();
        let mut changed = false;
        for kind in ReferenceKind::ALL {
            if self.items(kind).is_empty() {
                *self.items_mut(kind) = seed.items(kind).clone();
                changed = true;
            }
        }
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_key_roundtrip() {
        for kind in ReferenceKind::ALL {
            assert_eq!(ReferenceKind::from_key(kind.key()).unwrap(), kind);
        }
    }

    #[test]
    fn kind_from_key_rejects_unknown() {
        let err = ReferenceKind::from_key("warehouses").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownCatalog { key } if key == "warehouses"));
    }

    #[test]
    fn seeded_book_validates_known_values() {
        let book = ReferenceBook::seeded();
        assert!(
            book.validate_value(ReferenceKind::TimeSlots, "08:00-12:00")
                .is_ok()
        );
        assert!(
            book.validate_value(ReferenceKind::VehiclePlates, "A001AA78")
                .is_ok()
        );
    }

    #[test]
    fn unknown_value_error_lists_alternatives() {
        let book = ReferenceBook::seeded();
        let err = book
            .validate_value(ReferenceKind::Drivers, "Nobody")
            .unwrap_err();
        match err {
            ValidationError::UnknownReference { available, .. } => {
                assert!(available.contains("'I. Ivanov'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_catalog_is_an_error() {
        let book = ReferenceBook::empty();
        let err = book
            .validate_value(ReferenceKind::Drivers, "anyone")
            .unwrap_err();
        assert!(matches!(err, ValidationError::EmptyCatalog { .. }));
    }

    #[test]
    fn inactive_items_do_not_validate() {
        let mut book = ReferenceBook::seeded();
        book.drivers[0].is_active = false;
        let err = book
            .validate_value(ReferenceKind::Drivers, "I. Ivanov")
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownReference { .. }));
    }

    #[test]
    fn add_item_rejects_duplicates_case_insensitive() {
        let mut book = ReferenceBook::seeded();
        let err = book
            .add_item(ReferenceKind::VehiclePlates, "a001aa78", "")
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { .. }));
    }

    #[test]
    fn add_and_remove_item() {
        let mut book = ReferenceBook::seeded();
        let item = book
            .add_item(ReferenceKind::Drivers, "N. Novikov", "night shift")
            .unwrap();
        assert!(
            book.validate_value(ReferenceKind::Drivers, "N. Novikov")
                .is_ok()
        );
        assert!(book.remove_item(ReferenceKind::Drivers, &item.id));
        assert!(!book.remove_item(ReferenceKind::Drivers, &item.id));
    }

    #[test]
    fn backfill_fills_only_empty_catalogs() {
        let mut book = ReferenceBook::empty();
        book.add_item(ReferenceKind::Drivers, "Solo Driver", "")
            .unwrap();
        assert!(book.backfill_missing());
        assert_eq!(book.drivers.len(), 1, "non-empty catalog left untouched");
        assert!(!book.time_slots.is_empty());
        assert!(!book.backfill_missing());
    }
}
