//! Model metadata: loading, caching, provisioning.
//!
//! Each namespace carries `models` and `fields` metadata tables; the
//! registry projects them into [`SchemaSnapshot`]s and caches one snapshot
//! per namespace (one registry serves one database, so the cache key is the
//! namespace). Snapshots are replaced atomically: readers hold an `Arc` and
//! always see a consistent view.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value as JsonValue;
use tracing::debug;

use kura_types::{AclSets, FieldSchema, FieldType, ModelSchema, RecordMeta};

use crate::db::{DbError, TenantConn};
use crate::store::{json_set_from_text, text_from_json_set};

/// Default snapshot lifetime.
pub const DEFAULT_SCHEMA_CACHE_TTL: Duration = Duration::from_secs(30);

/// A consistent view of one namespace's models.
#[derive(Debug)]
pub struct SchemaSnapshot {
    pub models: BTreeMap<String, ModelSchema>,
    loaded_at: Instant,
}

impl SchemaSnapshot {
    /// Look up a model by name.
    pub fn model(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }

    fn fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }
}

/// Loads and caches model metadata for every namespace of one database.
pub struct SchemaRegistry {
    cache: DashMap<String, Arc<SchemaSnapshot>>,
    ttl: Duration,
}

impl SchemaRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Current snapshot for the connection's namespace, from cache when
    /// fresh.
    pub fn snapshot(&self, db: &TenantConn) -> Result<Arc<SchemaSnapshot>, DbError> {
        let ns = db.namespace();
        if let Some(snap) = self.cache.get(ns) {
            if snap.fresh(self.ttl) {
                return Ok(Arc::clone(snap.value()));
            }
        }
        let snap = Arc::new(self.load(db)?);
        self.cache.insert(ns.to_string(), Arc::clone(&snap));
        debug!(ns, models = snap.models.len(), "schema snapshot refreshed");
        Ok(snap)
    }

    /// Drop the cached snapshot for a namespace.
    pub fn invalidate(&self, ns: &str) {
        self.cache.remove(ns);
    }

    /// Create the metadata tables if absent. Idempotent; runs inside the
    /// request transaction.
    pub fn ensure_meta(&self, db: &TenantConn) -> Result<(), DbError> {
        let models = db.qualified("models");
        let fields = db.qualified("fields");
        db.with_conn(|c| {
            c.execute_batch(&format!(
                r#"
CREATE TABLE IF NOT EXISTS {models} (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    access_read TEXT NOT NULL DEFAULT '[]',
    access_edit TEXT NOT NULL DEFAULT '[]',
    access_full TEXT NOT NULL DEFAULT '[]',
    access_deny TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL DEFAULT (unixepoch()),
    updated_at INTEGER NOT NULL DEFAULT (unixepoch()),
    trashed_at INTEGER,
    deleted_at INTEGER
);
CREATE TABLE IF NOT EXISTS {fields} (
    id TEXT PRIMARY KEY,
    model TEXT NOT NULL,
    name TEXT NOT NULL,
    "type" TEXT NOT NULL,
    required INTEGER NOT NULL DEFAULT 0,
    default_value TEXT,
    description TEXT,
    access_read TEXT NOT NULL DEFAULT '[]',
    access_edit TEXT NOT NULL DEFAULT '[]',
    access_full TEXT NOT NULL DEFAULT '[]',
    access_deny TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL DEFAULT (unixepoch()),
    updated_at INTEGER NOT NULL DEFAULT (unixepoch()),
    trashed_at INTEGER,
    deleted_at INTEGER,
    UNIQUE(model, name)
);
"#
            ))
        })
    }

    /// Register a model: metadata rows plus the backing table.
    pub fn create_model(&self, db: &TenantConn, schema: &ModelSchema) -> Result<(), DbError> {
        validate_ident(&schema.name)?;
        for f in &schema.fields {
            validate_ident(&f.name)?;
        }
        self.ensure_meta(db)?;

        let models = db.qualified("models");
        let fields = db.qualified("fields");
        db.with_conn(|c| {
            c.execute(
                &format!(
                    "INSERT INTO {models} (id, name, access_read, access_edit, access_full, access_deny)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                rusqlite::params![
                    format!("model-{}", schema.name),
                    schema.name,
                    text_from_json_set(&schema.acl.read),
                    text_from_json_set(&schema.acl.edit),
                    text_from_json_set(&schema.acl.full),
                    text_from_json_set(&schema.acl.deny),
                ],
            )?;
            for f in &schema.fields {
                c.execute(
                    &format!(
                        "INSERT INTO {fields} (id, model, name, \"type\", required, default_value, description)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    rusqlite::params![
                        format!("field-{}-{}", schema.name, f.name),
                        schema.name,
                        f.name,
                        f.field_type.as_str(),
                        f.required as i64,
                        f.default_value.as_ref().map(JsonValue::to_string),
                        f.description,
                    ],
                )?;
            }
            c.execute_batch(&model_table_ddl(db, schema))?;
            Ok(())
        })?;

        self.invalidate(db.namespace());
        Ok(())
    }

    /// Patch one field's metadata row. Column storage is untouched; type
    /// migration belongs to a higher-level endpoint.
    pub fn apply_field_patch(
        &self,
        db: &TenantConn,
        model: &str,
        field: &FieldSchema,
    ) -> Result<(), DbError> {
        let fields = db.qualified("fields");
        db.with_conn(|c| {
            c.execute(
                &format!(
                    "UPDATE {fields}
                     SET \"type\" = ?1, required = ?2, default_value = ?3, description = ?4,
                         updated_at = unixepoch()
                     WHERE model = ?5 AND name = ?6"
                ),
                rusqlite::params![
                    field.field_type.as_str(),
                    field.required as i64,
                    field.default_value.as_ref().map(JsonValue::to_string),
                    field.description,
                    model,
                    field.name,
                ],
            )
        })?;
        self.invalidate(db.namespace());
        Ok(())
    }

    fn load(&self, db: &TenantConn) -> Result<SchemaSnapshot, DbError> {
        self.ensure_meta(db)?;

        let mut models: BTreeMap<String, ModelSchema> = builtin_models()
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();

        let models_table = db.qualified("models");
        let fields_table = db.qualified("fields");
        db.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT name, access_read, access_edit, access_full, access_deny,
                        created_at, updated_at, trashed_at
                 FROM {models_table} WHERE deleted_at IS NULL"
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let name: String = row.get(0)?;
                let acl = AclSets {
                    read: json_set_from_text(&row.get::<_, String>(1)?),
                    edit: json_set_from_text(&row.get::<_, String>(2)?),
                    full: json_set_from_text(&row.get::<_, String>(3)?),
                    deny: json_set_from_text(&row.get::<_, String>(4)?),
                };
                let meta = RecordMeta {
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                    trashed_at: row.get(7)?,
                    deleted_at: None,
                };
                let mut schema = ModelSchema::new(name.clone(), Vec::new());
                schema.acl = acl;
                schema.meta = meta;
                models.insert(name, schema);
            }

            let mut stmt = c.prepare(&format!(
                "SELECT model, name, \"type\", required, default_value, description
                 FROM {fields_table}
                 WHERE deleted_at IS NULL AND trashed_at IS NULL
                 ORDER BY model, name"
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let model: String = row.get(0)?;
                let name: String = row.get(1)?;
                let type_str: String = row.get(2)?;
                let field_type = FieldType::parse(&type_str).unwrap_or(FieldType::Text);
                let default_value = row
                    .get::<_, Option<String>>(4)?
                    .and_then(|s| serde_json::from_str(&s).ok());
                let mut field = FieldSchema::new(name, field_type);
                field.required = row.get::<_, i64>(3)? != 0;
                field.default_value = default_value;
                field.description = row.get(5)?;
                if let Some(schema) = models.get_mut(&model) {
                    if !schema.system {
                        schema.fields.push(field);
                    }
                }
            }
            Ok(())
        })?;

        Ok(SchemaSnapshot {
            models,
            loaded_at: Instant::now(),
        })
    }
}

/// The platform metadata tables, projected as system models.
fn builtin_models() -> Vec<ModelSchema> {
    let mut models = ModelSchema::new("models", vec![FieldSchema::new("name", FieldType::Text).required()]);
    models.system = true;

    let mut fields = ModelSchema::new(
        "fields",
        vec![
            FieldSchema::new("model", FieldType::Text).required(),
            FieldSchema::new("name", FieldType::Text).required(),
            FieldSchema::new("type", FieldType::Text).required(),
            FieldSchema::new("required", FieldType::Boolean),
            FieldSchema::new("default_value", FieldType::Json),
            FieldSchema::new("description", FieldType::Text),
        ],
    );
    fields.system = true;

    vec![models, fields]
}

fn validate_ident(name: &str) -> Result<(), DbError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(DbError::InvalidNamespace(name.to_string()))
    }
}

fn sql_type(t: FieldType) -> &'static str {
    match t {
        FieldType::Text | FieldType::Json => "TEXT",
        FieldType::Integer | FieldType::Boolean | FieldType::Timestamp => "INTEGER",
        FieldType::Real => "REAL",
    }
}

fn model_table_ddl(db: &TenantConn, schema: &ModelSchema) -> String {
    let table = db.qualified(&schema.name);
    let mut columns = vec!["id TEXT PRIMARY KEY".to_string()];
    for f in &schema.fields {
        columns.push(format!("\"{}\" {}", f.name, sql_type(f.field_type)));
    }
    columns.extend(
        [
            "access_read TEXT NOT NULL DEFAULT '[]'",
            "access_edit TEXT NOT NULL DEFAULT '[]'",
            "access_full TEXT NOT NULL DEFAULT '[]'",
            "access_deny TEXT NOT NULL DEFAULT '[]'",
            "created_at INTEGER NOT NULL DEFAULT (unixepoch())",
            "updated_at INTEGER NOT NULL DEFAULT (unixepoch())",
            "trashed_at INTEGER",
            "deleted_at INTEGER",
        ]
        .map(String::from),
    );
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n);",
        columns.join(",\n    ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Pool;
    use tempfile::TempDir;

    fn products() -> ModelSchema {
        ModelSchema::new(
            "products",
            vec![
                FieldSchema::new("name", FieldType::Text).required(),
                FieldSchema::new("price", FieldType::Real),
            ],
        )
    }

    async fn setup() -> (Pool, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = Pool::open(dir.path(), 2).unwrap();
        (pool, dir)
    }

    #[tokio::test]
    async fn test_create_model_and_snapshot() {
        let (pool, _dir) = setup().await;
        let registry = SchemaRegistry::new(DEFAULT_SCHEMA_CACHE_TTL);

        let db = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "acme").unwrap();
        registry.create_model(&db, &products()).unwrap();

        let snap = registry.snapshot(&db).unwrap();
        let model = snap.model("products").unwrap();
        assert_eq!(model.fields.len(), 2);
        assert_eq!(model.field("price").unwrap().field_type, FieldType::Real);
        assert!(model.field("name").unwrap().required);

        // System models are present and flagged.
        assert!(snap.model("models").unwrap().system);
        assert!(snap.model("fields").unwrap().system);
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_until_invalidated() {
        let (pool, _dir) = setup().await;
        let registry = SchemaRegistry::new(Duration::from_secs(3600));

        let db = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "acme").unwrap();
        registry.create_model(&db, &products()).unwrap();

        let a = registry.snapshot(&db).unwrap();
        let b = registry.snapshot(&db).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        registry.invalidate("acme");
        let c = registry.snapshot(&db).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_apply_field_patch() {
        let (pool, _dir) = setup().await;
        let registry = SchemaRegistry::new(DEFAULT_SCHEMA_CACHE_TTL);

        let db = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "acme").unwrap();
        registry.create_model(&db, &products()).unwrap();

        let mut patched = FieldSchema::new("price", FieldType::Real);
        patched.description = Some("unit price in cents".into());
        registry.apply_field_patch(&db, "products", &patched).unwrap();

        let snap = registry.snapshot(&db).unwrap();
        assert_eq!(
            snap.model("products").unwrap().field("price").unwrap().description.as_deref(),
            Some("unit price in cents")
        );
    }

    #[tokio::test]
    async fn test_model_table_created() {
        let (pool, _dir) = setup().await;
        let registry = SchemaRegistry::new(DEFAULT_SCHEMA_CACHE_TTL);

        let db = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "acme").unwrap();
        registry.create_model(&db, &products()).unwrap();

        db.with_conn(|c| {
            c.execute(
                &format!(
                    "INSERT INTO {} (id, name, price) VALUES ('p1', 'Widget', 9.99)",
                    db.qualified("products")
                ),
                [],
            )
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_model_name_rejected() {
        let (pool, _dir) = setup().await;
        let registry = SchemaRegistry::new(DEFAULT_SCHEMA_CACHE_TTL);
        let db = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "acme").unwrap();

        let bad = ModelSchema::new("pro ducts", vec![]);
        assert!(registry.create_model(&db, &bad).is_err());
    }
}
