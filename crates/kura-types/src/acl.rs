//! Row-level ACL identity sets.
//!
//! Every record (and every model metadata row) carries four sets of opaque
//! identifiers: `access_read`, `access_edit`, `access_full`, `access_deny`.
//! Visibility: the caller's identity set must intersect read ∪ edit ∪ full
//! and must not intersect deny. An empty union means the row is open to the
//! whole tenant. Deny always wins.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::caller::AccessLevel;

/// The ACL column names, in storage order.
pub const ACL_COLUMNS: [&str; 4] = ["access_read", "access_edit", "access_full", "access_deny"];

/// The four identity sets stored on each row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclSets {
    pub read: BTreeSet<String>,
    pub edit: BTreeSet<String>,
    pub full: BTreeSet<String>,
    pub deny: BTreeSet<String>,
}

impl AclSets {
    /// An empty ACL: open to every caller of the tenant.
    pub fn open() -> Self {
        Self::default()
    }

    /// True when no grant set names anyone.
    pub fn is_open(&self) -> bool {
        self.read.is_empty() && self.edit.is_empty() && self.full.is_empty()
    }

    /// Effective access for the given identity set.
    pub fn access_for(&self, ids: &BTreeSet<String>) -> AccessLevel {
        if !self.deny.is_disjoint(ids) {
            return AccessLevel::None;
        }
        if !self.full.is_disjoint(ids) {
            return AccessLevel::Full;
        }
        if !self.edit.is_disjoint(ids) {
            return AccessLevel::Edit;
        }
        if !self.read.is_disjoint(ids) {
            return AccessLevel::Read;
        }
        if self.is_open() {
            // Open rows default to edit: tenant members own their data
            // unless an ACL narrows it.
            return AccessLevel::Edit;
        }
        AccessLevel::None
    }

    /// Whether the identity set may see the row at all.
    pub fn visible_to(&self, ids: &BTreeSet<String>) -> bool {
        self.access_for(ids) >= AccessLevel::Read
    }

    /// Whether the identity set may update the row.
    pub fn editable_by(&self, ids: &BTreeSet<String>) -> bool {
        self.access_for(ids) >= AccessLevel::Edit
    }
}
