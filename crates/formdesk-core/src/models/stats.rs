use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::form::{FormCategory, FormRecord};

/// Aggregate counts over all non-deleted forms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormStats {
    pub total_forms: u64,
    pub active_forms: u64,
    pub inactive_forms: u64,
    pub recent_uploads: u64,
    pub forms_by_category: BTreeMap<FormCategory, u64>,
    /// A form counts once for every state it applies to.
    pub forms_by_state: BTreeMap<String, u64>,
}

impl FormStats {
    /// Compute statistics from a scan. Deleted records are skipped.
    pub fn from_records<'a, I>(records: I, now: DateTime<Utc>, recent_days: i64) -> Self
    where
        I: IntoIterator<Item = &'a FormRecord>,
    {
        let recent_since = now - Duration::days(recent_days);
        let mut stats = FormStats::default();

        for record in records.into_iter().filter(|r| !r.is_deleted) {
            stats.total_forms += 1;
            if record.is_active {
                stats.active_forms += 1;
            }
            if record.created_at >= recent_since {
                stats.recent_uploads += 1;
            }
            *stats.forms_by_category.entry(record.category).or_insert(0) += 1;
            for state in &record.state_applicability {
                *stats.forms_by_state.entry(state.clone()).or_insert(0) += 1;
            }
        }

        stats.inactive_forms = stats.total_forms - stats.active_forms;
        stats
    }
}
