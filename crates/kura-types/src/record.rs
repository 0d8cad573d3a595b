//! Record lifecycle metadata.
//!
//! Every row carries four timestamps (epoch seconds): `created_at` and
//! `updated_at` always set, `trashed_at` marking soft delete, `deleted_at`
//! marking hard delete. Hard-deleted rows are never exposed through any
//! mount.

use serde::{Deserialize, Serialize};

/// Lifecycle timestamps of one record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub created_at: i64,
    pub updated_at: i64,
    pub trashed_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl RecordMeta {
    /// Live: not trashed, not hard-deleted.
    pub fn is_live(&self) -> bool {
        self.trashed_at.is_none() && self.deleted_at.is_none()
    }

    /// In trash: trashed but not hard-deleted.
    pub fn is_trashed(&self) -> bool {
        self.trashed_at.is_some() && self.deleted_at.is_none()
    }

    /// Hard-deleted: invisible everywhere.
    pub fn is_hard_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
