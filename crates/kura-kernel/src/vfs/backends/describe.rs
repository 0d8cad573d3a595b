//! Describe mount: schema metadata as files.
//!
//! ```text
//! /                       every visible model
//! /model                  .json  .yaml  fields/
//! /model/fields           one YAML document per declared field
//! /model/fields/name      the field document (writable, via the pipeline)
//! /model/.json            the full model schema, canonical JSON
//! /model/.yaml            the full model schema, YAML
//! ```
//!
//! Field-document writes patch the `fields` metadata row only; column
//! storage migration belongs to higher-level endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use kura_types::{FieldSchema, FieldType, ModelSchema};

use crate::context::SystemContext;
use crate::pipeline::{ObserverCtx, Operation};
use crate::schema_registry::SchemaSnapshot;
use crate::vfs::entry::{FileType, FsEntry};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::mount::Mount;
use crate::vfs::path;

/// Schema metadata as a filesystem.
pub struct DescribeMount {
    ctx: Arc<SystemContext>,
}

impl DescribeMount {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self { ctx }
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

    fn render_model_json(model: &ModelSchema, p: &str) -> VfsResult<Vec<u8>> {
        serde_json::to_vec(model).map_err(|e| VfsError::io(p, e))
    }

    fn render_model_yaml(model: &ModelSchema, p: &str) -> VfsResult<Vec<u8>> {
        serde_yaml::to_string(model)
            .map(String::into_bytes)
            .map_err(|e| VfsError::io(p, e))
    }

    fn render_field_yaml(field: &FieldSchema, p: &str) -> VfsResult<Vec<u8>> {
        serde_yaml::to_string(field)
            .map(String::into_bytes)
            .map_err(|e| VfsError::io(p, e))
    }

    fn field<'m>(&self, model: &'m ModelSchema, name: &str, p: &str) -> VfsResult<&'m FieldSchema> {
        model.field(name).ok_or_else(|| VfsError::not_found(p))
    }
}

#[async_trait]
impl Mount for DescribeMount {
    async fn stat(&self, p: &str) -> VfsResult<FsEntry> {
        let p = path::normalize(p);
        let segs = path::segments(&p);
        match segs[..] {
            [] => Ok(FsEntry::directory("")),
            [model_name] => {
                let snap = self.snapshot(&p)?;
                self.model(&snap, model_name, &p)?;
                Ok(FsEntry::directory(model_name))
            }
            [model_name, doc] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                match doc {
                    "fields" => Ok(FsEntry::directory("fields")),
                    ".json" => {
                        let body = Self::render_model_json(model, &p)?;
                        Ok(FsEntry::file(".json", body.len() as u64, 0o444))
                    }
                    ".yaml" => {
                        let body = Self::render_model_yaml(model, &p)?;
                        Ok(FsEntry::file(".yaml", body.len() as u64, 0o444))
                    }
                    _ => Err(VfsError::not_found(&p)),
                }
            }
            [model_name, "fields", field_name] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let field = self.field(model, field_name, &p)?;
                let body = Self::render_field_yaml(field, &p)?;
                Ok(FsEntry::file(field_name, body.len() as u64, 0o644))
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
                    .map(|m| FsEntry::directory(m.name.clone()))
                    .collect())
            }
            [model_name] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                Ok(vec![
                    FsEntry::file(
                        ".json",
                        Self::render_model_json(model, &p)?.len() as u64,
                        0o444,
                    ),
                    FsEntry::file(
                        ".yaml",
                        Self::render_model_yaml(model, &p)?.len() as u64,
                        0o444,
                    ),
                    FsEntry::directory("fields"),
                ])
            }
            [model_name, "fields"] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let mut entries = Vec::with_capacity(model.fields.len());
                for field in &model.fields {
                    let body = Self::render_field_yaml(field, &p)?;
                    entries.push(FsEntry::file(field.name.clone(), body.len() as u64, 0o644));
                }
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(entries)
            }
            [_, ".json" | ".yaml"] => Err(VfsError::not_a_directory(&p)),
            [_, "fields", _] => Err(VfsError::not_a_directory(&p)),
            _ => Err(VfsError::not_found(&p)),
        }
    }

    async fn read(&self, p: &str) -> VfsResult<Vec<u8>> {
        let p = path::normalize(p);
        let segs = path::segments(&p);
        match segs[..] {
            [] | [_] => Err(VfsError::is_a_directory(&p)),
            [model_name, doc] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                match doc {
                    "fields" => Err(VfsError::is_a_directory(&p)),
                    ".json" => Self::render_model_json(model, &p),
                    ".yaml" => Self::render_model_yaml(model, &p),
                    _ => Err(VfsError::not_found(&p)),
                }
            }
            [model_name, "fields", field_name] => {
                let snap = self.snapshot(&p)?;
                let model = self.model(&snap, model_name, &p)?;
                let field = self.field(model, field_name, &p)?;
                Self::render_field_yaml(field, &p)
            }
            _ => Err(VfsError::not_found(&p)),
        }
    }

    fn writable(&self) -> bool {
        true
    }

    /// Only field documents accept writes; everything else is a rendered
    /// view.
    async fn write(&self, p: &str, content: &[u8]) -> VfsResult<()> {
        let p = path::normalize(p);
        let [model_name, "fields", field_name] = path::segments(&p)[..] else {
            return Err(VfsError::read_only(&p));
        };

        let snap = self.snapshot(&p)?;
        let model = self.model(&snap, model_name, &p)?;
        let existing = self.field(model, field_name, &p)?;

        let doc: serde_yaml::Value = serde_yaml::from_slice(content)
            .map_err(|_| VfsError::invalid(&p, "expected a YAML document"))?;
        let doc: JsonValue = serde_json::to_value(doc)
            .map_err(|_| VfsError::invalid(&p, "expected a YAML document"))?;

        let mut patched = existing.clone();
        if let Some(t) = doc.get("type") {
            let t = t
                .as_str()
                .and_then(FieldType::parse)
                .ok_or_else(|| VfsError::invalid(&p, "unknown field type"))?;
            patched.field_type = t;
        }
        if let Some(r) = doc.get("required") {
            patched.required = r
                .as_bool()
                .ok_or_else(|| VfsError::invalid(&p, "required must be a boolean"))?;
        }
        if let Some(d) = doc.get("default_value") {
            patched.default_value = (!d.is_null()).then(|| d.clone());
        }
        if let Some(d) = doc.get("description") {
            patched.description = d.as_str().map(str::to_string);
        }

        let op = Operation::SchemaPatch {
            model: model.name.clone(),
            field: field_name.to_string(),
            doc,
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
                    record: None,
                },
            )
            .await?;

        self.ctx
            .schemas
            .apply_field_patch(&self.ctx.db, &model.name, &patched)
            .map_err(|e| VfsError::io(&p, e))
    }

    fn probe(&self, p: &str) -> Option<FileType> {
        let p = path::normalize(p);
        match path::segments(&p)[..] {
            [] | [_] => Some(FileType::Directory),
            [_, "fields"] => Some(FileType::Directory),
            [_, ".json" | ".yaml"] => Some(FileType::File),
            [_, "fields", _] => Some(FileType::File),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Pool, TenantConn};
    use crate::pipeline::Pipeline;
    use crate::schema_registry::{DEFAULT_SCHEMA_CACHE_TTL, SchemaRegistry};
    use kura_types::{Caller, Role};
    use std::time::Instant;
    use tempfile::TempDir;

    async fn fixture() -> (Arc<SystemContext>, TempDir) {
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
        let db = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "acme").unwrap();
        schemas.create_model(&db, &schema).unwrap();
        let ctx = Arc::new(SystemContext::new(
            Caller::new("user-1", "alice", Role::User),
            "acme",
            Arc::new(db),
            schemas,
            Arc::new(Pipeline::standard()),
            Instant::now(),
        ));
        (ctx, dir)
    }

    #[tokio::test]
    async fn test_root_lists_models() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(ctx);
        let names: Vec<String> = mount
            .readdir("/")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["products"]);
    }

    #[tokio::test]
    async fn test_model_dir_layout() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(ctx);
        let entries = mount.readdir("/products").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".json", ".yaml", "fields"]);
        assert!(entries[0].is_file());
        assert_eq!(entries[0].mode, 0o444);
        assert!(entries[2].is_dir());
    }

    #[tokio::test]
    async fn test_model_json_document() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(ctx);
        let body = mount.read("/products/.json").await.unwrap();
        let doc: JsonValue = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["name"], "products");
        assert_eq!(doc["fields"][1]["type"], "real");

        // stat size matches the rendered body
        let entry = mount.stat("/products/.json").await.unwrap();
        assert_eq!(entry.size, body.len() as u64);
    }

    #[tokio::test]
    async fn test_field_yaml_document() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(ctx);
        let body = String::from_utf8(mount.read("/products/fields/price").await.unwrap()).unwrap();
        assert!(body.contains("name: price"));
        assert!(body.contains("type: real"));
    }

    #[tokio::test]
    async fn test_fields_dir_lists_declared_fields() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(ctx);
        let names: Vec<String> = mount
            .readdir("/products/fields")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["name", "price"]);
    }

    #[tokio::test]
    async fn test_field_doc_write_patches_metadata() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(Arc::clone(&ctx));
        mount
            .write(
                "/products/fields/price",
                b"description: unit price in cents\nrequired: true\n",
            )
            .await
            .unwrap();

        let body = String::from_utf8(mount.read("/products/fields/price").await.unwrap()).unwrap();
        assert!(body.contains("unit price in cents"));
        assert!(body.contains("required: true"));
    }

    #[tokio::test]
    async fn test_model_documents_are_read_only() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(ctx);
        assert_eq!(mount.write("/products/.json", b"{}").await.unwrap_err().kind(), "EROFS");
        assert_eq!(mount.write("/products", b"x").await.unwrap_err().kind(), "EROFS");
    }

    #[tokio::test]
    async fn test_unknown_field_write_is_enoent() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(ctx);
        let err = mount.write("/products/fields/bogus", b"type: text").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_trashed_model_patch_is_protected() {
        let (ctx, _d) = fixture().await;
        ctx.db
            .with_conn(|c| {
                c.execute(
                    &format!(
                        "UPDATE {} SET trashed_at = unixepoch() WHERE name = 'products'",
                        ctx.db.qualified("models")
                    ),
                    [],
                )
            })
            .unwrap();
        ctx.schemas.invalidate("acme");

        // Trashed models vanish from the describe tree entirely.
        let mount = DescribeMount::new(ctx);
        let err = mount.write("/products/fields/price", b"required: true").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_system_models_sudo_only() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(Arc::clone(&ctx));
        assert!(mount.stat("/models").await.unwrap_err().is_not_found());

        let sudo = ctx.with_sudo(|| async {
            let mount = DescribeMount::new(Arc::clone(&ctx));
            mount.stat("/models").await.is_ok()
        });
        assert!(sudo.await);
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_einval() {
        let (ctx, _d) = fixture().await;
        let mount = DescribeMount::new(ctx);
        let err = mount
            .write("/products/fields/price", b"type: [unclosed")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "EINVAL");
    }
}
