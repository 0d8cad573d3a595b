//! Observer pipeline.
//!
//! Every mutation that reaches a data-backed mount (field updates, soft
//! deletes, schema patches) traverses this ring before touching the store.
//! Observers run in order; the first rejection wins and surfaces to the
//! caller with its stable code intact.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use kura_types::{AclSets, Caller, ModelSchema, RecordMeta};

/// Stable rejection codes, named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCode {
    ValidationError,
    SchemaError,
    SoftDeleteProtection,
    HardDeleteProtection,
    InsufficientPermissions,
}

impl PipelineCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineCode::ValidationError => "VALIDATION_ERROR",
            PipelineCode::SchemaError => "SCHEMA_ERROR",
            PipelineCode::SoftDeleteProtection => "SOFT_DELETE_PROTECTION",
            PipelineCode::HardDeleteProtection => "HARD_DELETE_PROTECTION",
            PipelineCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
        }
    }
}

impl std::fmt::Display for PipelineCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline rejection.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct PipelineError {
    pub code: PipelineCode,
    pub message: String,
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            code: PipelineCode::ValidationError,
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self {
            code: PipelineCode::SchemaError,
            message: message.into(),
        }
    }

    pub fn soft_delete(message: impl Into<String>) -> Self {
        Self {
            code: PipelineCode::SoftDeleteProtection,
            message: message.into(),
        }
    }

    pub fn hard_delete(message: impl Into<String>) -> Self {
        Self {
            code: PipelineCode::HardDeleteProtection,
            message: message.into(),
        }
    }

    pub fn permissions(message: impl Into<String>) -> Self {
        Self {
            code: PipelineCode::InsufficientPermissions,
            message: message.into(),
        }
    }
}

/// A mutation travelling through the ring.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Update columns of one record: `{id, field: parsed value, …}`.
    Update {
        model: String,
        id: String,
        changes: BTreeMap<String, JsonValue>,
    },
    /// Soft-delete one record.
    Trash { model: String, id: String },
    /// Patch one field's schema document.
    SchemaPatch {
        model: String,
        field: String,
        doc: JsonValue,
    },
}

impl Operation {
    pub fn model(&self) -> &str {
        match self {
            Operation::Update { model, .. }
            | Operation::Trash { model, .. }
            | Operation::SchemaPatch { model, .. } => model,
        }
    }
}

/// Lifecycle and ACL state of the row an operation targets.
#[derive(Debug, Clone)]
pub struct RecordState {
    pub meta: RecordMeta,
    pub acl: AclSets,
}

/// Everything an observer may consult.
pub struct ObserverCtx<'a> {
    pub model: &'a ModelSchema,
    pub caller: &'a Caller,
    pub identity: &'a BTreeSet<String>,
    pub sudo: bool,
    /// Present for operations addressing an existing row.
    pub record: Option<&'a RecordState>,
}

/// One link of the ring.
#[async_trait]
pub trait Observer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, op: &Operation, ctx: &ObserverCtx<'_>) -> Result<(), PipelineError>;
}

/// The ordered ring of observers.
pub struct Pipeline {
    observers: Vec<Arc<dyn Observer>>,
}

impl Pipeline {
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self { observers }
    }

    /// The default ring: schema guard, immutable columns, type validation,
    /// ACL gate, soft-delete protection, hard-delete protection.
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(SchemaGuard),
            Arc::new(ImmutableColumns),
            Arc::new(TypeValidation),
            Arc::new(AclGate),
            Arc::new(SoftDeleteGuard),
            Arc::new(HardDeleteGuard),
        ])
    }

    pub async fn run(&self, op: &Operation, ctx: &ObserverCtx<'_>) -> Result<(), PipelineError> {
        for obs in &self.observers {
            if let Err(e) = obs.check(op, ctx).await {
                debug!(observer = obs.name(), code = %e.code, model = op.model(), "pipeline rejected");
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Rejects operations naming columns or fields the model does not declare.
struct SchemaGuard;

#[async_trait]
impl Observer for SchemaGuard {
    fn name(&self) -> &'static str {
        "schema-guard"
    }

    async fn check(&self, op: &Operation, ctx: &ObserverCtx<'_>) -> Result<(), PipelineError> {
        match op {
            Operation::Update { changes, .. } => {
                for column in changes.keys() {
                    if ctx.model.classify(column).is_none() {
                        return Err(PipelineError::schema(format!(
                            "model {:?} has no column {column:?}",
                            ctx.model.name
                        )));
                    }
                }
                Ok(())
            }
            Operation::SchemaPatch { field, .. } => match ctx.model.field(field) {
                Some(_) => Ok(()),
                None => Err(PipelineError::schema(format!(
                    "model {:?} declares no field {field:?}",
                    ctx.model.name
                ))),
            },
            Operation::Trash { .. } => Ok(()),
        }
    }
}

/// Backstop for writes to platform-managed columns. Mounts refuse these
/// with `EROFS` before building an operation; anything arriving here by
/// another route is still rejected.
struct ImmutableColumns;

#[async_trait]
impl Observer for ImmutableColumns {
    fn name(&self) -> &'static str {
        "immutable-columns"
    }

    async fn check(&self, op: &Operation, ctx: &ObserverCtx<'_>) -> Result<(), PipelineError> {
        if let Operation::Update { changes, .. } = op {
            for column in changes.keys() {
                if let Some(class) = ctx.model.classify(column) {
                    if !class.writable() {
                        return Err(PipelineError::validation(format!(
                            "column {column:?} is managed by the platform"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Declared-type check for every changed value.
struct TypeValidation;

#[async_trait]
impl Observer for TypeValidation {
    fn name(&self) -> &'static str {
        "type-validation"
    }

    async fn check(&self, op: &Operation, ctx: &ObserverCtx<'_>) -> Result<(), PipelineError> {
        if let Operation::Update { changes, .. } = op {
            for (column, value) in changes {
                let Some(field) = ctx.model.field(column) else {
                    continue;
                };
                if field.required && value.is_null() {
                    return Err(PipelineError::validation(format!(
                        "field {column:?} is required"
                    )));
                }
                if !field.field_type.accepts(value) {
                    return Err(PipelineError::validation(format!(
                        "field {column:?} expects {}",
                        field.field_type.as_str()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Callers need edit access on the row (or the model, for schema patches).
/// Sudo bypasses.
struct AclGate;

#[async_trait]
impl Observer for AclGate {
    fn name(&self) -> &'static str {
        "acl-gate"
    }

    async fn check(&self, op: &Operation, ctx: &ObserverCtx<'_>) -> Result<(), PipelineError> {
        if ctx.sudo {
            return Ok(());
        }
        let acl = match (op, ctx.record) {
            (Operation::SchemaPatch { .. }, _) => &ctx.model.acl,
            (_, Some(record)) => &record.acl,
            (_, None) => return Ok(()),
        };
        if acl.editable_by(ctx.identity) {
            Ok(())
        } else {
            Err(PipelineError::permissions(format!(
                "{} may not modify this {}",
                ctx.caller.username,
                match op {
                    Operation::SchemaPatch { .. } => "model",
                    _ => "record",
                }
            )))
        }
    }
}

/// Trashed rows are frozen until restored; trashing twice is refused.
struct SoftDeleteGuard;

#[async_trait]
impl Observer for SoftDeleteGuard {
    fn name(&self) -> &'static str {
        "soft-delete-protection"
    }

    async fn check(&self, op: &Operation, ctx: &ObserverCtx<'_>) -> Result<(), PipelineError> {
        let trashed = ctx.record.map(|r| r.meta.is_trashed()).unwrap_or(false);
        match op {
            Operation::Update { id, .. } if trashed => Err(PipelineError::soft_delete(format!(
                "record {id:?} is in the trash"
            ))),
            Operation::Trash { id, .. } if trashed => Err(PipelineError::soft_delete(format!(
                "record {id:?} is already trashed"
            ))),
            Operation::SchemaPatch { .. } if ctx.model.meta.is_trashed() => Err(
                PipelineError::soft_delete(format!("model {:?} is in the trash", ctx.model.name)),
            ),
            _ => Ok(()),
        }
    }
}

/// Hard-deleted rows are untouchable through any surface.
struct HardDeleteGuard;

#[async_trait]
impl Observer for HardDeleteGuard {
    fn name(&self) -> &'static str {
        "hard-delete-protection"
    }

    async fn check(&self, _op: &Operation, ctx: &ObserverCtx<'_>) -> Result<(), PipelineError> {
        if ctx.record.map(|r| r.meta.is_hard_deleted()).unwrap_or(false)
            || ctx.model.meta.is_hard_deleted()
        {
            return Err(PipelineError::hard_delete("row is deleted".to_string()));
        }
        Ok(())
    }
}
