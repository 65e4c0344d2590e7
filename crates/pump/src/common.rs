//! 📦 Common data structures -- the cargo that rides the pump.
//!
//! 🎬 COLD OPEN: INT. REDIS LIST, 3:47 AM
//!
//! A request came in. Someone called `DELETE /v1/policies/42`. The middleware
//! wrote it down, because somebody in compliance once said the word "audit" in a
//! meeting and nobody has slept well since. The record now sits in the shared
//! store, waiting. Waiting for a pump. Any pump. Whichever instance of the fleet
//! wins the lock this tick.
//!
//! This module defines that record ([`AnalyticsRecord`]) and the [`Batch`] that
//! carries a pile of them through one drain cycle. They exist in memory between
//! "read" and "purge". After that, they belong to the sinks. 🦆

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 🏷️ A record's identity in the store. A string, because every store we know
/// of is happy with strings and the middleware already hands us one.
pub type RecordId = String;

/// 🎯 One audit/usage record: who did what, to which path, and how it went.
///
/// Identity fields (`id`, `method`, `path`, `status`, `timestamp`, `username`)
/// are never touched by the pump. `detail` is the heavy, optional part that a
/// pump may drop via `omit_detailed_recording`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub id: RecordId,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// 📎 The arbitrary payload. Request bodies, decider output, policy dumps.
    /// Whatever the request layer felt like attaching. Sometimes it's huge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl AnalyticsRecord {
    /// 🏗️ Builds a record stamped with "now". Detail and username start empty.
    pub fn new(
        id: impl Into<RecordId>,
        method: impl Into<String>,
        path: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            path: path.into(),
            status,
            timestamp: Utc::now(),
            username: None,
            detail: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// ✂️ Same record, minus the heavy payload. Identity stays intact.
    pub(crate) fn without_detail(&self) -> Self {
        Self {
            detail: None,
            ..self.clone()
        }
    }
}

/// 📦 A `Batch`: everything one drain cycle pulled out of the store.
///
/// Ordered the way the store handed it over. Never persisted. It lives
/// between `read_batch` and `purge`, and then it is gone, like a sprint goal.
///
/// `unreadable_ids` are store entries we could not decode. They don't go to
/// any sink (there's nothing to send), but they DO get purged, otherwise one
/// corrupt entry would squat at the head of the queue forever.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub records: Vec<AnalyticsRecord>,
    pub unreadable_ids: Vec<RecordId>,
}

impl Batch {
    pub fn new(records: Vec<AnalyticsRecord>) -> Self {
        Self {
            records,
            unreadable_ids: Vec::new(),
        }
    }

    /// 🕳️ Nothing to send and nothing to purge. A no-op cycle.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.unreadable_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 🗑️ Every id this cycle is responsible for purging, decodable or not.
    /// Duplicates are collapsed, first occurrence wins the ordering.
    pub fn ids(&self) -> Vec<RecordId> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|record| &record.id)
            .chain(self.unreadable_ids.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}
