//! 🔍 Filters -- the bouncer at each pump's door.
//!
//! Every pump gets its own velvet rope. A record that fails pump B's filter
//! just doesn't get into club B. Club A never hears about it. Nobody cries.
//!
//! Rules, per attribute:
//! - allow-list (`methods`, `paths`, `usernames`, `status_codes`): if it's
//!   non-empty, the record has to be on it.
//! - skip-list (`skip_*`): if the record is on it, it's out.
//! - `min_status` / `max_status`: inclusive range on the response status.
//!
//! Paths match by prefix, methods case-insensitively. An empty filter lets
//! everyone in. 🦆

use serde::Deserialize;

use crate::common::AnalyticsRecord;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PumpFilters {
    pub methods: Vec<String>,
    pub skip_methods: Vec<String>,
    pub paths: Vec<String>,
    pub skip_paths: Vec<String>,
    pub usernames: Vec<String>,
    pub skip_usernames: Vec<String>,
    pub status_codes: Vec<u16>,
    pub skip_status_codes: Vec<u16>,
    pub min_status: Option<u16>,
    pub max_status: Option<u16>,
}

impl PumpFilters {
    /// 🕳️ True when the filter would let literally anything through.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// ✅ Does this record get past the bouncer?
    pub fn matches(&self, record: &AnalyticsRecord) -> bool {
        let method_ok = allowed(&self.methods, &self.skip_methods, |m| {
            m.eq_ignore_ascii_case(&record.method)
        });
        let path_ok = allowed(&self.paths, &self.skip_paths, |p| {
            record.path.starts_with(p.as_str())
        });
        let status_ok = allowed(&self.status_codes, &self.skip_status_codes, |s| {
            *s == record.status
        }) && self.min_status.is_none_or(|min| record.status >= min)
            && self.max_status.is_none_or(|max| record.status <= max);

        // -- 👤 anonymous records can't be on an allow-list, but they dodge every skip-list
        let username_ok = match record.username.as_deref() {
            Some(name) => allowed(&self.usernames, &self.skip_usernames, |u| u == name),
            None => self.usernames.is_empty(),
        };

        method_ok && path_ok && status_ok && username_ok
    }
}

fn allowed<T>(allow: &[T], skip: &[T], hit: impl Fn(&T) -> bool) -> bool {
    (allow.is_empty() || allow.iter().any(&hit)) && !skip.iter().any(&hit)
}
