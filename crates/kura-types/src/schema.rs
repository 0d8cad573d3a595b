//! Model schemas.
//!
//! A model is a tenant table projected through the VFS. Its schema is the
//! declared fields (held in the `fields` metadata table) plus the implicit
//! columns every model table carries: `id`, the four ACL sets, and the
//! lifecycle timestamps. `ColumnClass` decides which of those a caller may
//! write through the filesystem.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::acl::{ACL_COLUMNS, AclSets};
use crate::record::RecordMeta;

/// Declared type of a model field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Boolean,
    Json,
    Timestamp,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Real => "real",
            FieldType::Boolean => "boolean",
            FieldType::Json => "json",
            FieldType::Timestamp => "timestamp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(FieldType::Text),
            "integer" => Some(FieldType::Integer),
            "real" => Some(FieldType::Real),
            "boolean" => Some(FieldType::Boolean),
            "json" => Some(FieldType::Json),
            "timestamp" => Some(FieldType::Timestamp),
            _ => None,
        }
    }

    /// Whether a JSON value is storable under this type. `Null` is always
    /// storable; requiredness is checked separately.
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match (self, value) {
            (_, JsonValue::Null) => true,
            (FieldType::Text, JsonValue::String(_)) => true,
            (FieldType::Integer, JsonValue::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Real, JsonValue::Number(_)) => true,
            (FieldType::Boolean, JsonValue::Bool(_)) => true,
            (FieldType::Json, _) => true,
            (FieldType::Timestamp, JsonValue::Number(n)) => n.is_i64() || n.is_u64(),
            _ => false,
        }
    }
}

/// One declared field of a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            default_value: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A model: declared fields plus row-level ACL and lifecycle state of the
/// model itself (models are records of the `models` metadata table).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub acl: AclSets,
    #[serde(default)]
    pub meta: RecordMeta,
    /// Platform metadata tables (`models`, `fields`) are system models and
    /// only appear for sudo callers.
    #[serde(default)]
    pub system: bool,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
            acl: AclSets::open(),
            meta: RecordMeta::default(),
            system: false,
        }
    }

    /// Look up a declared field.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Classify a column of this model, declared or implicit.
    pub fn classify(&self, column: &str) -> Option<ColumnClass> {
        match column {
            "id" => Some(ColumnClass::Identity),
            "created_at" | "updated_at" | "trashed_at" => Some(ColumnClass::Timestamp),
            c if ACL_COLUMNS.contains(&c) => Some(ColumnClass::Acl),
            c => self.field(c).map(|_| ColumnClass::Declared),
        }
    }

    /// Every column a caller can see through the VFS, in listing order
    /// (name ascending). `deleted_at` is deliberately absent.
    pub fn visible_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = vec!["id", "created_at", "updated_at", "trashed_at"];
        cols.extend(ACL_COLUMNS);
        cols.extend(self.fields.iter().map(|f| f.name.as_str()));
        cols.sort_unstable();
        cols
    }

    /// Declared column type, if the column is a declared field.
    pub fn field_type(&self, column: &str) -> Option<FieldType> {
        self.field(column).map(|f| f.field_type)
    }
}

/// Who may write a column through the VFS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnClass {
    /// `id`: immutable, mode `0o444`.
    Identity,
    /// Lifecycle timestamps: managed by the platform, mode `0o444`.
    Timestamp,
    /// ACL sets: managed through dedicated APIs, mode `0o444` here.
    Acl,
    /// A declared field: writable, mode `0o644`.
    Declared,
}

impl ColumnClass {
    /// Permission bits the VFS reports for this column.
    pub fn mode(&self) -> u32 {
        match self {
            ColumnClass::Declared => 0o644,
            _ => 0o444,
        }
    }

    /// Whether the VFS accepts writes to this column.
    pub fn writable(&self) -> bool {
        matches!(self, ColumnClass::Declared)
    }
}
