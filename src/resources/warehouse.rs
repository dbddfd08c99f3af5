//! Archival warehouse (BigQuery) dataset and partitioned table.
//!
//! Field modes are fixed at creation. The only schema change converged in
//! place is appending `NULLABLE` columns; everything else (mode changes in
//! either direction, type changes, renames, removals, reordering) replaces
//! the table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Declared, Dependency, ResourceKind, UpdateMode};

/// Dataset holding the archive table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveDataset {
    pub dataset_id: String,
    pub project: String,
    pub location: String,
    pub delete_contents_on_destroy: bool,
}

impl Declared for ArchiveDataset {
    const KIND: ResourceKind = ResourceKind::ArchiveDataset;

    fn name(&self) -> &str {
        &self.dataset_id
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["dataset_id", "location"]
    }
}

/// Column mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    Required,
    Nullable,
    Repeated,
}

/// One column of the table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: FieldMode,
}

impl SchemaField {
    pub fn new(name: &str, field_type: &str, mode: FieldMode) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            mode,
        }
    }
}

/// Time partitioning of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePartitioning {
    #[serde(rename = "type")]
    pub partition_type: String,
    pub field: String,
}

/// Day-partitioned archive of raw scan findings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveTable {
    pub table_id: String,
    pub project: String,
    pub dataset: String,
    pub schema: Vec<SchemaField>,
    pub time_partitioning: TimePartitioning,
    pub deletion_protection: bool,
}

impl Declared for ArchiveTable {
    const KIND: ResourceKind = ResourceKind::ArchiveTable;

    fn name(&self) -> &str {
        &self.table_id
    }

    fn references(&self) -> Vec<Dependency> {
        vec![Dependency::reference(ResourceKind::ArchiveDataset, &self.dataset)]
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["table_id", "dataset", "time_partitioning"]
    }

    fn update_mode(&self, field: &str, old: &Value, new: &Value) -> UpdateMode {
        if field == "schema" {
            return classify_schema_change(old, new);
        }
        if field == "project" || self.immutable_fields().contains(&field) {
            UpdateMode::Replace
        } else {
            UpdateMode::InPlace
        }
    }
}

/// Classify a change between two recorded schemas.
pub fn classify_schema_change(old: &Value, new: &Value) -> UpdateMode {
    let (Ok(old), Ok(new)) = (
        serde_json::from_value::<Vec<SchemaField>>(old.clone()),
        serde_json::from_value::<Vec<SchemaField>>(new.clone()),
    ) else {
        return UpdateMode::Replace;
    };

    if new.len() < old.len() || old.iter().zip(&new).any(|(o, n)| o != n) {
        return UpdateMode::Replace;
    }

    if new[old.len()..].iter().all(|f| f.mode == FieldMode::Nullable) {
        UpdateMode::InPlace
    } else {
        UpdateMode::Replace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Vec<SchemaField> {
        vec![
            SchemaField::new("asset_id", "STRING", FieldMode::Required),
            SchemaField::new("cve_id", "STRING", FieldMode::Required),
        ]
    }

    fn value(fields: &[SchemaField]) -> Value {
        serde_json::to_value(fields).unwrap()
    }

    #[test]
    fn test_schema_serializes_wire_names() {
        let v = value(&schema());
        assert_eq!(v[0], json!({"name": "asset_id", "type": "STRING", "mode": "REQUIRED"}));
    }

    #[test]
    fn test_relaxing_mode_replaces() {
        let mut relaxed = schema();
        relaxed[1].mode = FieldMode::Nullable;
        assert_eq!(
            classify_schema_change(&value(&schema()), &value(&relaxed)),
            UpdateMode::Replace
        );
    }

    #[test]
    fn test_appending_nullable_is_in_place() {
        let mut extended = schema();
        extended.push(SchemaField::new("severity", "STRING", FieldMode::Nullable));
        assert_eq!(
            classify_schema_change(&value(&schema()), &value(&extended)),
            UpdateMode::InPlace
        );
    }

    #[test]
    fn test_appending_required_or_removing_replaces() {
        let mut extended = schema();
        extended.push(SchemaField::new("severity", "STRING", FieldMode::Required));
        assert_eq!(
            classify_schema_change(&value(&schema()), &value(&extended)),
            UpdateMode::Replace
        );

        let shrunk = vec![schema()[0].clone()];
        assert_eq!(
            classify_schema_change(&value(&schema()), &value(&shrunk)),
            UpdateMode::Replace
        );
    }

    #[test]
    fn test_unparseable_schema_replaces() {
        assert_eq!(
            classify_schema_change(&json!("garbage"), &value(&schema())),
            UpdateMode::Replace
        );
    }
}
