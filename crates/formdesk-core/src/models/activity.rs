use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// User action recorded in the activity log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityAction {
    View,
    Download,
    Upload,
    Edit,
    Delete,
    Search,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::View => "view",
            ActivityAction::Download => "download",
            ActivityAction::Upload => "upload",
            ActivityAction::Edit => "edit",
            ActivityAction::Delete => "delete",
            ActivityAction::Search => "search",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(ActivityAction::View),
            "download" => Ok(ActivityAction::Download),
            "upload" => Ok(ActivityAction::Upload),
            "edit" => Ok(ActivityAction::Edit),
            "delete" => Ok(ActivityAction::Delete),
            "search" => Ok(ActivityAction::Search),
            other => Err(format!("Unknown activity action: {}", other)),
        }
    }
}

/// Entry in the `user_activity` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub user_id: String,
    pub action: ActivityAction,
    pub form_id: Option<Uuid>,
    pub metadata: Option<JsonValue>,
    pub timestamp: DateTime<Utc>,
}

/// Counter bumped in a per-day analytics document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsCounter {
    Views,
    Downloads,
    Searches,
}

/// Per-form, per-day analytics aggregate, keyed `{form_id}_{yyyy-mm-dd}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyFormAnalytics {
    pub form_id: Uuid,
    pub date: NaiveDate,
    pub views: i64,
    pub downloads: i64,
    pub searches: i64,
    pub unique_users: BTreeSet<String>,
}

impl DailyFormAnalytics {
    pub fn empty(form_id: Uuid, date: NaiveDate) -> Self {
        DailyFormAnalytics {
            form_id,
            date,
            views: 0,
            downloads: 0,
            searches: 0,
            unique_users: BTreeSet::new(),
        }
    }

    pub fn document_id(form_id: Uuid, date: NaiveDate) -> String {
        format!("{}_{}", form_id, date.format("%Y-%m-%d"))
    }

    pub fn record(&mut self, counter: AnalyticsCounter, user_id: &str) {
        match counter {
            AnalyticsCounter::Views => self.views += 1,
            AnalyticsCounter::Downloads => self.downloads += 1,
            AnalyticsCounter::Searches => self.searches += 1,
        }
        self.unique_users.insert(user_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_uses_iso_date() {
        let id = Uuid::nil();
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(
            DailyFormAnalytics::document_id(id, date),
            "00000000-0000-0000-0000-000000000000_2024-03-07"
        );
    }

    #[test]
    fn record_counts_and_tracks_unique_users() {
        let mut day = DailyFormAnalytics::empty(Uuid::new_v4(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        day.record(AnalyticsCounter::Views, "a");
        day.record(AnalyticsCounter::Views, "a");
        day.record(AnalyticsCounter::Downloads, "b");
        assert_eq!(day.views, 2);
        assert_eq!(day.downloads, 1);
        assert_eq!(day.searches, 0);
        assert_eq!(day.unique_users.len(), 2);
    }

    #[test]
    fn action_names_round_trip() {
        for action in [
            ActivityAction::View,
            ActivityAction::Download,
            ActivityAction::Upload,
            ActivityAction::Edit,
            ActivityAction::Delete,
            ActivityAction::Search,
        ] {
            assert_eq!(action.as_str().parse::<ActivityAction>().unwrap(), action);
        }
    }
}
