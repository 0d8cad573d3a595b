//! Typed SQL surface the data mounts speak.
//!
//! All statements are built from the schema snapshot (validated
//! identifiers) with record ids and values bound as parameters. Table
//! references are namespace-qualified by the tenant connection.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value as JsonValue;

use kura_types::{AclSets, FieldType, ModelSchema, RecordMeta};

use crate::db::{DbError, TenantConn};
use crate::pipeline::RecordState;

/// Which lifecycle slice of a model a mount exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordScope {
    /// `trashed_at IS NULL`.
    Live,
    /// `trashed_at IS NOT NULL`.
    Trashed,
}

impl RecordScope {
    fn predicate(&self) -> &'static str {
        match self {
            RecordScope::Live => "trashed_at IS NULL",
            RecordScope::Trashed => "trashed_at IS NOT NULL",
        }
    }

    /// Whether a record's lifecycle state falls inside this scope.
    pub fn admits(&self, meta: &RecordMeta) -> bool {
        match self {
            RecordScope::Live => meta.is_live(),
            RecordScope::Trashed => meta.is_trashed(),
        }
    }
}

/// Listing row: id plus the ACL needed for visibility filtering.
#[derive(Debug, Clone)]
pub struct RecordSummary {
    pub id: String,
    pub acl: AclSets,
}

/// One fully loaded record.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    /// Declared field values, by column name.
    pub values: BTreeMap<String, JsonValue>,
    pub meta: RecordMeta,
    pub acl: AclSets,
}

impl Record {
    /// The pipeline's view of this row.
    pub fn state(&self) -> RecordState {
        RecordState {
            meta: self.meta,
            acl: self.acl.clone(),
        }
    }

    /// JSON value of any column visible through the VFS.
    pub fn column_value(&self, column: &str) -> Option<JsonValue> {
        match column {
            "id" => Some(JsonValue::String(self.id.clone())),
            "created_at" => Some(self.meta.created_at.into()),
            "updated_at" => Some(self.meta.updated_at.into()),
            "trashed_at" => Some(self.meta.trashed_at.map(JsonValue::from).unwrap_or(JsonValue::Null)),
            "access_read" => Some(set_to_json(&self.acl.read)),
            "access_edit" => Some(set_to_json(&self.acl.edit)),
            "access_full" => Some(set_to_json(&self.acl.full)),
            "access_deny" => Some(set_to_json(&self.acl.deny)),
            c => self.values.get(c).cloned(),
        }
    }
}

/// Record access for one tenant connection.
pub struct RecordStore<'a> {
    db: &'a TenantConn,
}

impl<'a> RecordStore<'a> {
    pub fn new(db: &'a TenantConn) -> Self {
        Self { db }
    }

    /// Ids (with ACL) of the model's records inside the scope, id-ascending.
    pub fn list(&self, model: &ModelSchema, scope: RecordScope) -> Result<Vec<RecordSummary>, DbError> {
        let table = self.db.qualified(&model.name);
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT id, access_read, access_edit, access_full, access_deny
                 FROM {table}
                 WHERE deleted_at IS NULL AND {}
                 ORDER BY id",
                scope.predicate()
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok(RecordSummary {
                    id: row.get(0)?,
                    acl: AclSets {
                        read: json_set_from_text(&row.get::<_, String>(1)?),
                        edit: json_set_from_text(&row.get::<_, String>(2)?),
                        full: json_set_from_text(&row.get::<_, String>(3)?),
                        deny: json_set_from_text(&row.get::<_, String>(4)?),
                    },
                })
            })?;
            rows.collect()
        })
    }

    /// Fetch one record regardless of lifecycle state; callers decide what
    /// the state means. `None` only when the id is absent.
    pub fn fetch(&self, model: &ModelSchema, id: &str) -> Result<Option<Record>, DbError> {
        let table = self.db.qualified(&model.name);
        let declared: Vec<&str> = model.fields.iter().map(|f| f.name.as_str()).collect();
        let mut columns: Vec<String> = declared.iter().map(|f| format!("\"{f}\"")).collect();
        columns.extend(
            [
                "access_read",
                "access_edit",
                "access_full",
                "access_deny",
                "created_at",
                "updated_at",
                "trashed_at",
                "deleted_at",
            ]
            .map(String::from),
        );

        self.db.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {} FROM {table} WHERE id = ?1",
                columns.join(", ")
            ))?;
            let mut rows = stmt.query([id])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };

            let mut values = BTreeMap::new();
            for (i, field) in model.fields.iter().enumerate() {
                values.insert(
                    field.name.clone(),
                    sql_to_json(field.field_type, row.get_ref(i)?),
                );
            }
            let base = declared.len();
            let acl = AclSets {
                read: json_set_from_text(&row.get::<_, String>(base)?),
                edit: json_set_from_text(&row.get::<_, String>(base + 1)?),
                full: json_set_from_text(&row.get::<_, String>(base + 2)?),
                deny: json_set_from_text(&row.get::<_, String>(base + 3)?),
            };
            let meta = RecordMeta {
                created_at: row.get(base + 4)?,
                updated_at: row.get(base + 5)?,
                trashed_at: row.get(base + 6)?,
                deleted_at: row.get(base + 7)?,
            };
            Ok(Some(Record {
                id: id.to_string(),
                values,
                meta,
                acl,
            }))
        })
    }

    /// Set one declared column. The caller has already run the pipeline.
    pub fn update_field(
        &self,
        model: &ModelSchema,
        id: &str,
        field: &str,
        value: &JsonValue,
    ) -> Result<(), DbError> {
        let Some(field_type) = model.field_type(field) else {
            return Err(DbError::Sqlite(rusqlite::Error::InvalidColumnName(
                field.to_string(),
            )));
        };
        let table = self.db.qualified(&model.name);
        self.db.with_conn(|c| {
            c.execute(
                &format!(
                    "UPDATE {table} SET \"{field}\" = ?1, updated_at = unixepoch()
                     WHERE id = ?2 AND deleted_at IS NULL"
                ),
                rusqlite::params![json_to_sql(field_type, value), id],
            )?;
            Ok(())
        })
    }

    /// Soft-delete: set `trashed_at`, leave everything else untouched.
    pub fn trash(&self, model: &ModelSchema, id: &str) -> Result<(), DbError> {
        let table = self.db.qualified(&model.name);
        self.db.with_conn(|c| {
            c.execute(
                &format!(
                    "UPDATE {table}
                     SET trashed_at = unixepoch(), updated_at = unixepoch()
                     WHERE id = ?1 AND trashed_at IS NULL AND deleted_at IS NULL"
                ),
                [id],
            )?;
            Ok(())
        })
    }
}

/// Stringify a column value the way the VFS serves it: booleans as
/// `true`/`false`, numbers in their shortest decimal form, `null` as the
/// empty string, strings raw, arrays and objects as canonical JSON.
pub fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        v => v.to_string(),
    }
}

fn sql_to_json(field_type: FieldType, value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => match field_type {
            FieldType::Boolean => JsonValue::Bool(i != 0),
            _ => i.into(),
        },
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => {
            let s = String::from_utf8_lossy(bytes).into_owned();
            match field_type {
                FieldType::Json => serde_json::from_str(&s).unwrap_or(JsonValue::String(s)),
                _ => JsonValue::String(s),
            }
        }
        ValueRef::Blob(_) => JsonValue::Null,
    }
}

fn json_to_sql(field_type: FieldType, value: &JsonValue) -> SqlValue {
    match (field_type, value) {
        (_, JsonValue::Null) => SqlValue::Null,
        (FieldType::Boolean, JsonValue::Bool(b)) => SqlValue::Integer(*b as i64),
        (FieldType::Integer | FieldType::Timestamp, JsonValue::Number(n)) => {
            n.as_i64().map(SqlValue::Integer).unwrap_or(SqlValue::Null)
        }
        (FieldType::Real, JsonValue::Number(n)) => {
            n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null)
        }
        (FieldType::Text, JsonValue::String(s)) => SqlValue::Text(s.clone()),
        (FieldType::Json, v) => SqlValue::Text(v.to_string()),
        // The pipeline's type validation keeps this arm unreachable for
        // declared writes; serialize defensively anyway.
        (_, v) => SqlValue::Text(stringify(v)),
    }
}

fn set_to_json(set: &BTreeSet<String>) -> JsonValue {
    JsonValue::Array(set.iter().cloned().map(JsonValue::String).collect())
}

pub(crate) fn json_set_from_text(text: &str) -> BTreeSet<String> {
    serde_json::from_str::<Vec<String>>(text)
        .map(|v| v.into_iter().collect())
        .unwrap_or_default()
}

pub(crate) fn text_from_json_set(set: &BTreeSet<String>) -> String {
    serde_json::to_string(&set.iter().collect::<Vec<_>>()).unwrap_or_else(|_| "[]".to_string())
}
