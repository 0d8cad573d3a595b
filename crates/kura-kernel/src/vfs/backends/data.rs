//! Data mount: records projected as `/model/record-id/field`.
//!
//! Three levels, nothing deeper. Depth 0 lists the models the caller may
//! see, depth 1 the record ids inside the mount's lifecycle scope, depth 2
//! the columns of one record as files, depth 3 is the column value itself.
//! Mutations run the observer pipeline before touching the store; the
//! trashed scope is read-only in full.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use kura_types::{FieldType, ModelSchema};

use crate::context::SystemContext;
use crate::pipeline::{ObserverCtx, Operation};
use crate::schema_registry::SchemaSnapshot;
use crate::store::{Record, RecordScope, RecordStore, stringify};
use crate::vfs::entry::{FileType, FsEntry};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::mount::Mount;
use crate::vfs::path;

/// Records of one lifecycle scope, as a filesystem.
pub struct DataMount {
    ctx: Arc<SystemContext>,
    scope: RecordScope,
}

impl DataMount {
    /// The live tree (`trashed_at IS NULL`), writable.
    pub fn live(ctx: Arc<SystemContext>) -> Self {
        Self {
            ctx,
            scope: RecordScope::Live,
        }
    }

    /// The trash tree (`trashed_at IS NOT NULL`), read-only in full.
    pub fn trashed(ctx: Arc<SystemContext>) -> Self {
        Self {
            ctx,
            scope: RecordScope::Trashed,
        }
    }

    fn snapshot(&self, p: &str) -> VfsResult<Arc<SchemaSnapshot>> {
        self.ctx
            .schemas
            .snapshot(&self.ctx.db)
            .map_err(|e| VfsError::io(p, e))
    }

    fn model_visible(&self, model: &ModelSchema) -> bool {
        if model.meta.is_hard_deleted() || model.meta.is_trashed() {
            return false;
        }
        if model.system {
            return self.ctx.is_sudo();
        }
        self.ctx.is_sudo() || model.acl.visible_to(self.ctx.identity())
    }

    fn model<'s>(&self, snap: &'s SchemaSnapshot, name: &str, p: &str) -> VfsResult<&'s ModelSchema> {
        snap.model(name)
            .filter(|m| self.model_visible(m))
            .ok_or_else(|| VfsError::not_found(p))
    }

    /// Fetch a record the caller may see in this scope, or `ENOENT`.
    fn fetch_visible(&self, model: &ModelSchema, id: &str, p: &str) -> VfsResult<Record> {
        let record = RecordStore::new(&self.ctx.db)
            .fetch(model, id)
            .map_err(|e| VfsError::io(p, e))?
            .ok_or_else(|| VfsError::not_found(p))?;
        if !self.scope.admits(&record.meta) {
            return Err(VfsError::not_found(p));
        }
        if !self.ctx.is_sudo() && !record.acl.visible_to(self.ctx.identity()) {
            return Err(VfsError::not_found(p));
        }
        Ok(record)
    }

    fn dir_entry(&self, name: impl Into<String>, mtime: Option<i64>) -> FsEntry {
        let mode = match self.scope {
            RecordScope::Live => 0o755,
            RecordScope::Trashed => 0o555,
        };
        let mut entry = FsEntry::directory(name).with_mode(mode);
        entry.mtime = mtime;
        entry
    }

    fn field_entry(&self, model: &ModelSchema, record: &Record, column: &str) -> Option<FsEntry> {
        let class = model.classify(column)?;
        let value = record.column_value(column)?;
        let mode = match self.scope {
            RecordScope::Live => class.mode(),
            RecordScope::Trashed => 0o444,
        };
        Some(
            FsEntry::file(column, stringify(&value).len() as u64, mode)
                .with_mtime(record.meta.updated_at),
        )
    }

    fn check_live_scope(&self, p: &str) -> VfsResult<()> {
        match self.scope {
            RecordScope::Live => Ok(()),
            RecordScope::Trashed => Err(VfsError::read_only(p)),
        }
    }
}

#[async_trait]
impl Mount for DataMount {
    async fn stat(&self, p: &str) -> VfsResult<FsEntry> {
        let p = path::normalize(p);
        let segs = path::segments(&p);
        match segs[..] {
            [] => Ok(self.dir_entry("", None)),
            [model_name] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let mtime = (model.meta.updated_at != 0).then_some(model.meta.updated_at);
                Ok(self.dir_entry(model_name, mtime))
            }
            [model_name, id] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let record = self.fetch_visible(model, id, &p)?;
                Ok(self.dir_entry(id, Some(record.meta.updated_at)))
            }
            [model_name, id, column] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let record = self.fetch_visible(model, id, &p)?;
                self.field_entry(model, &record, column)
                    .ok_or_else(|| VfsError::not_found(&p))
            }
            _ => Err(VfsError::not_found(&p)),
        }
    }

    async fn readdir(&self, p: &str) -> VfsResult<Vec<FsEntry>> {
        let p = path::normalize(p);
        let segs = path::segments(&p);
        match segs[..] {
            [] => {
                let snap = self.snapshot(&p)?;
                Ok(snap
                    .models
                    .values()
                    .filter(|m| self.model_visible(m))
                    .map(|m| {
                        let mtime = (m.meta.updated_at != 0).then_some(m.meta.updated_at);
                        self.dir_entry(m.name.clone(), mtime)
                    })
                    .collect())
            }
            [model_name] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let summaries = RecordStore::new(&self.ctx.db)
                    .list(model, self.scope)
                    .map_err(|e| VfsError::io(&p, e))?;
                Ok(summaries
                    .into_iter()
                    .filter(|s| self.ctx.is_sudo() || s.acl.visible_to(self.ctx.identity()))
                    .map(|s| self.dir_entry(s.id, None))
                    .collect())
            }
            [model_name, id] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let record = self.fetch_visible(model, id, &p)?;
                Ok(model
                    .visible_columns()
                    .into_iter()
                    .filter_map(|c| self.field_entry(model, &record, c))
                    .collect())
            }
            [_, _, _] => Err(VfsError::not_a_directory(&p)),
            _ => Err(VfsError::not_found(&p)),
        }
    }

    async fn read(&self, p: &str) -> VfsResult<Vec<u8>> {
        let p = path::normalize(p);
        let segs = path::segments(&p);
        match segs[..] {
            [] | [_] | [_, _] => Err(VfsError::is_a_directory(&p)),
            [model_name, id, column] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let record = self.fetch_visible(model, id, &p)?;
                model
                    .classify(column)
                    .and_then(|_| record.column_value(column))
                    .map(|v| stringify(&v).into_bytes())
                    .ok_or_else(|| VfsError::not_found(&p))
            }
            _ => Err(VfsError::not_found(&p)),
        }
    }

    fn writable(&self) -> bool {
        self.scope == RecordScope::Live
    }

    async fn write(&self, p: &str, content: &[u8]) -> VfsResult<()> {
        let p = path::normalize(p);
        self.check_live_scope(&p)?;
        let segs = path::segments(&p);
        let [model_name, id, column] = segs[..] else {
            return match segs.len() {
                0..=2 => Err(VfsError::is_a_directory(&p)),
                _ => Err(VfsError::not_found(&p)),
            };
        };

        let snap = self.snapshot(&p)?;
        let model = self.model(&snap, model_name, &p)?;
        let class = model
            .classify(column)
            .ok_or_else(|| VfsError::not_found(&p))?;
        if !class.writable() {
            return Err(VfsError::read_only(&p));
        }
        let field_type = model
            .field_type(column)
            .ok_or_else(|| VfsError::not_found(&p))?;
        let value = parse_field_value(field_type, content, &p)?;

        let record = self.fetch_visible(model, id, &p)?;
        let state = record.state();
        let op = Operation::Update {
            model: model.name.clone(),
            id: id.to_string(),
            changes: [(column.to_string(), value.clone())].into_iter().collect(),
        };
        self.ctx
            .pipeline
            .run(
                &op,
                &ObserverCtx {
                    model,
                    caller: &self.ctx.caller,
                    identity: self.ctx.identity(),
                    sudo: self.ctx.is_sudo(),
                    record: Some(&state),
                },
            )
            .await?;

        RecordStore::new(&self.ctx.db)
            .update_field(model, id, column, &value)
            .map_err(|e| VfsError::io(&p, e))
    }

    async fn mkdir(&self, p: &str) -> VfsResult<()> {
        // Models and records are created through higher-level APIs.
        Err(VfsError::read_only(path::normalize(p)))
    }

    async fn unlink(&self, p: &str) -> VfsResult<()> {
        let p = path::normalize(p);
        self.check_live_scope(&p)?;
        match path::segments(&p)[..] {
            // Fields cannot be deleted individually.
            [_, _, _] => Err(VfsError::read_only(&p)),
            [] | [_] | [_, _] => Err(VfsError::is_a_directory(&p)),
            _ => Err(VfsError::not_found(&p)),
        }
    }

    async fn rmdir(&self, p: &str) -> VfsResult<()> {
        let p = path::normalize(p);
        self.check_live_scope(&p)?;
        let segs = path::segments(&p);
        match segs[..] {
            [] | [_] => Err(VfsError::permission_denied(&p)),
            [model_name, id] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let record = self.fetch_visible(model, id, &p)?;
                let state = record.state();
                let op = Operation::Trash {
                    model: model.name.clone(),
                    id: id.to_string(),
                };
                self.ctx
                    .pipeline
                    .run(
                        &op,
                        &ObserverCtx {
                            model,
                            caller: &self.ctx.caller,
                            identity: self.ctx.identity(),
                            sudo: self.ctx.is_sudo(),
                            record: Some(&state),
                        },
                    )
                    .await?;
                RecordStore::new(&self.ctx.db)
                    .trash(model, id)
                    .map_err(|e| VfsError::io(&p, e))
            }
            [_, _, _] => Err(VfsError::not_a_directory(&p)),
            _ => Err(VfsError::not_found(&p)),
        }
    }

    async fn get_usage(&self, p: &str) -> VfsResult<u64> {
        let p = path::normalize(p);
        let segs = path::segments(&p);
        match segs[..] {
            [] | [_] => Ok(0),
            [model_name, id] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let record = self.fetch_visible(model, id, &p)?;
                Ok(model
                    .visible_columns()
                    .into_iter()
                    .filter_map(|c| record.column_value(c))
                    .map(|v| stringify(&v).len() as u64)
                    .sum())
            }
            [_, _, _] => Ok(self.stat(&p).await?.size),
            _ => Err(VfsError::not_found(&p)),
        }
    }

    /// Depth alone decides the shape: three levels of directories over
    /// files, nothing deeper.
    fn probe(&self, p: &str) -> Option<FileType> {
        match path::segments(&path::normalize(p)).len() {
            0..=2 => Some(FileType::Directory),
            3 => Some(FileType::File),
            _ => None,
        }
    }
}

/// Parse a written byte payload into the declared field type. Empty input
/// is `null`; anything unparseable is `EINVAL`.
fn parse_field_value(field_type: FieldType, content: &[u8], p: &str) -> VfsResult<JsonValue> {
    let text = std::str::from_utf8(content)
        .map_err(|_| VfsError::invalid(p, "value is not valid UTF-8"))?;
    if text.is_empty() {
        return Ok(JsonValue::Null);
    }
    match field_type {
        FieldType::Text => Ok(JsonValue::String(text.to_string())),
        FieldType::Integer | FieldType::Timestamp => text
            .trim()
            .parse::<i64>()
            .map(JsonValue::from)
            .map_err(|_| VfsError::invalid(p, "expected an integer")),
        FieldType::Real => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .ok_or_else(|| VfsError::invalid(p, "expected a number")),
        FieldType::Boolean => match text.trim() {
            "true" | "1" => Ok(JsonValue::Bool(true)),
            "false" | "0" => Ok(JsonValue::Bool(false)),
            _ => Err(VfsError::invalid(p, "expected true or false")),
        },
        FieldType::Json => serde_json::from_str(text)
            .map_err(|_| VfsError::invalid(p, "expected valid JSON")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Pool, TenantConn};
    use crate::pipeline::Pipeline;
    use crate::schema_registry::{DEFAULT_SCHEMA_CACHE_TTL, SchemaRegistry};
    use kura_types::{Caller, FieldSchema, Role};
    use std::time::Instant;
    use tempfile::TempDir;

    struct Fixture {
        pool: Pool,
        schemas: Arc<SchemaRegistry>,
        pipeline: Arc<Pipeline>,
        _dir: TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let pool = Pool::open(dir.path(), 2).unwrap();
            let schemas = Arc::new(SchemaRegistry::new(DEFAULT_SCHEMA_CACHE_TTL));
            let schema = ModelSchema::new(
                "products",
                vec![
                    FieldSchema::new("name", FieldType::Text).required(),
                    FieldSchema::new("price", FieldType::Real),
                ],
            );
            let db = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "acme")
                .unwrap();
            schemas.create_model(&db, &schema).unwrap();
            db.with_conn(|c| {
                c.execute_batch(&format!(
                    r#"INSERT INTO {t} (id, name, price) VALUES
                         ('prod-001', 'Widget', 9.99),
                         ('prod-002', 'Gadget', 19.99);
                       INSERT INTO {t} (id, name, price, trashed_at) VALUES
                         ('prod-003', 'Relic', 1.0, unixepoch());"#,
                    t = db.qualified("products")
                ))
            })
            .unwrap();
            drop(db);
            Self {
                pool,
                schemas,
                pipeline: Arc::new(Pipeline::standard()),
                _dir: dir,
            }
        }

        async fn ctx(&self, caller: Caller) -> Arc<SystemContext> {
            let db = TenantConn::attach(
                self.pool.acquire().await.unwrap(),
                self.pool.data_dir(),
                "acme",
            )
            .unwrap();
            Arc::new(SystemContext::new(
                caller,
                "acme",
                Arc::new(db),
                Arc::clone(&self.schemas),
                Arc::clone(&self.pipeline),
                Instant::now(),
            ))
        }

        async fn user_ctx(&self) -> Arc<SystemContext> {
            self.ctx(Caller::new("user-1", "alice", Role::User)).await
        }
    }

    fn names(entries: &[FsEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_depth0_lists_user_models_only() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert_eq!(names(&mount.readdir("/").await.unwrap()), vec!["products"]);
    }

    #[tokio::test]
    async fn test_sudo_sees_system_models() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.ctx(Caller::new("u", "root", Role::Root)).await);
        assert_eq!(
            names(&mount.readdir("/").await.unwrap()),
            vec!["fields", "models", "products"]
        );
    }

    #[tokio::test]
    async fn test_depth1_lists_live_ids() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert_eq!(
            names(&mount.readdir("/products").await.unwrap()),
            vec!["prod-001", "prod-002"]
        );
    }

    #[tokio::test]
    async fn test_trashed_scope_lists_trashed_ids() {
        let fx = Fixture::new().await;
        let mount = DataMount::trashed(fx.user_ctx().await);
        assert_eq!(
            names(&mount.readdir("/products").await.unwrap()),
            vec!["prod-003"]
        );
    }

    #[tokio::test]
    async fn test_read_field_values() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert_eq!(mount.read("/products/prod-001/name").await.unwrap(), b"Widget");
        assert_eq!(mount.read("/products/prod-001/price").await.unwrap(), b"9.99");
    }

    #[tokio::test]
    async fn test_field_modes() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert_eq!(mount.stat("/products/prod-001/id").await.unwrap().mode, 0o444);
        assert_eq!(mount.stat("/products/prod-001/created_at").await.unwrap().mode, 0o444);
        assert_eq!(mount.stat("/products/prod-001/access_read").await.unwrap().mode, 0o444);
        assert_eq!(mount.stat("/products/prod-001/name").await.unwrap().mode, 0o644);
    }

    #[tokio::test]
    async fn test_field_size_is_stringified_byte_length() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert_eq!(mount.stat("/products/prod-001/name").await.unwrap().size, 6);
        assert_eq!(mount.stat("/products/prod-001/price").await.unwrap().size, 4);
    }

    #[tokio::test]
    async fn test_write_readonly_column_is_erofs() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        let err = mount.write("/products/prod-001/id", b"new-id").await.unwrap_err();
        assert_eq!(err.kind(), "EROFS");
        // No row change.
        assert_eq!(mount.read("/products/prod-001/id").await.unwrap(), b"prod-001");
    }

    #[tokio::test]
    async fn test_write_then_read_same_transaction() {
        let fx = Fixture::new().await;
        let ctx = fx.user_ctx().await;
        ctx.db.begin().unwrap();
        let mount = DataMount::live(Arc::clone(&ctx));

        mount.write("/products/prod-001/name", b"Sprocket").await.unwrap();
        assert_eq!(mount.read("/products/prod-001/name").await.unwrap(), b"Sprocket");
        ctx.db.commit().unwrap();
    }

    #[tokio::test]
    async fn test_write_type_mismatch_is_einval() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        let err = mount.write("/products/prod-001/price", b"cheap").await.unwrap_err();
        assert_eq!(err.kind(), "EINVAL");
    }

    #[tokio::test]
    async fn test_rmdir_soft_deletes() {
        let fx = Fixture::new().await;
        let ctx = fx.user_ctx().await;
        let live = DataMount::live(Arc::clone(&ctx));

        live.rmdir("/products/prod-002").await.unwrap();
        assert!(live.stat("/products/prod-002").await.unwrap_err().is_not_found());

        let trashed = DataMount::trashed(ctx);
        let entry = trashed.stat("/products/prod-002").await.unwrap();
        assert!(entry.is_dir());
    }

    #[tokio::test]
    async fn test_rmdir_root_and_model_denied() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert_eq!(mount.rmdir("/").await.unwrap_err().kind(), "EACCES");
        assert_eq!(mount.rmdir("/products").await.unwrap_err().kind(), "EACCES");
    }

    #[tokio::test]
    async fn test_trashed_mount_refuses_all_mutators() {
        let fx = Fixture::new().await;
        let mount = DataMount::trashed(fx.user_ctx().await);
        assert!(!mount.writable());
        assert_eq!(mount.write("/products/prod-003/name", b"X").await.unwrap_err().kind(), "EROFS");
        assert_eq!(mount.rmdir("/products/prod-003").await.unwrap_err().kind(), "EROFS");
        assert_eq!(mount.unlink("/products/prod-003/name").await.unwrap_err().kind(), "EROFS");
        assert_eq!(mount.mkdir("/products/new").await.unwrap_err().kind(), "EROFS");
    }

    #[tokio::test]
    async fn test_mkdir_always_erofs() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert_eq!(mount.mkdir("/widgets").await.unwrap_err().kind(), "EROFS");
    }

    #[tokio::test]
    async fn test_unlink_semantics() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert_eq!(mount.unlink("/products/prod-001").await.unwrap_err().kind(), "EISDIR");
        assert_eq!(mount.unlink("/products/prod-001/name").await.unwrap_err().kind(), "EROFS");
    }

    #[tokio::test]
    async fn test_depth4_does_not_exist() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert!(mount.stat("/products/prod-001/name/deep").await.unwrap_err().is_not_found());
        assert_eq!(mount.readdir("/products/prod-001/name").await.unwrap_err().kind(), "ENOTDIR");
    }

    #[tokio::test]
    async fn test_acl_deny_hides_record() {
        let fx = Fixture::new().await;
        let ctx = fx.user_ctx().await;
        ctx.db
            .with_conn(|c| {
                c.execute(
                    &format!(
                        "UPDATE {} SET access_deny = '[\"user-1\"]' WHERE id = 'prod-001'",
                        ctx.db.qualified("products")
                    ),
                    [],
                )
            })
            .unwrap();
        let mount = DataMount::live(Arc::clone(&ctx));
        assert_eq!(names(&mount.readdir("/products").await.unwrap()), vec!["prod-002"]);
        assert!(mount.stat("/products/prod-001").await.unwrap_err().is_not_found());

        // Sudo bypasses ACL entirely.
        let sudo_ctx = fx.ctx(Caller::new("u", "root", Role::Root)).await;
        let mount = DataMount::live(sudo_ctx);
        assert!(mount.stat("/products/prod-001").await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_by_depth() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        assert_eq!(mount.probe("/"), Some(FileType::Directory));
        assert_eq!(mount.probe("/products"), Some(FileType::Directory));
        assert_eq!(mount.probe("/products/x"), Some(FileType::Directory));
        assert_eq!(mount.probe("/products/x/f"), Some(FileType::File));
        assert_eq!(mount.probe("/a/b/c/d"), None);
    }

    #[tokio::test]
    async fn test_record_listing_hides_deleted_at() {
        let fx = Fixture::new().await;
        let mount = DataMount::live(fx.user_ctx().await);
        let cols = mount.readdir("/products/prod-001").await.unwrap();
        let names = names(&cols);
        assert!(names.contains(&"name"));
        assert!(names.contains(&"trashed_at"));
        assert!(!names.contains(&"deleted_at"));
        assert!(names.windows(2).all(|w| w[0] < w[1]));
    }
}
