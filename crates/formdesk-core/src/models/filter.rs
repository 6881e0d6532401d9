use std::collections::BTreeSet;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::form::{FormCategory, FormRecord, LineOfBusiness};
use crate::AppError;

/// Filter shared by listing, search and subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormFilter {
    pub category: Option<FormCategory>,
    pub line_of_business: Option<LineOfBusiness>,
    pub is_active: Option<bool>,
    /// Matches records applicable to ANY of these state codes.
    #[serde(default)]
    pub states: BTreeSet<String>,
    pub query: Option<String>,
}

impl FormFilter {
    /// Non-blank free-text query, if any.
    pub fn text_query(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    /// Structured match, ignoring the text query and the deletion flag.
    pub fn matches(&self, record: &FormRecord) -> bool {
        if let Some(category) = self.category {
            if record.category != category {
                return false;
            }
        }
        if let Some(lob) = self.line_of_business {
            if record.line_of_business != lob {
                return false;
            }
        }
        if let Some(active) = self.is_active {
            if record.is_active != active {
                return false;
            }
        }
        if !self.states.is_empty()
            && !record
                .state_applicability
                .iter()
                .any(|s| self.states.contains(s))
        {
            return false;
        }
        true
    }

    /// The narrowing applied on top of keyword search: category and activity only.
    pub fn search_narrowing(&self) -> FormFilter {
        FormFilter {
            category: self.category,
            is_active: self.is_active,
            ..Default::default()
        }
    }
}

/// Opaque position in the `updated_at DESC, id DESC` ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormCursor(String);

impl FormCursor {
    pub fn after(record: &FormRecord) -> Self {
        Self::from_position(record.updated_at, record.id)
    }

    pub fn from_position(updated_at: DateTime<Utc>, id: Uuid) -> Self {
        let raw = format!("{}|{}", updated_at.timestamp_micros(), id);
        FormCursor(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Rebuild a cursor from a token previously handed out by [`FormCursor::as_str`].
    pub fn from_token(token: impl Into<String>) -> Self {
        FormCursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the `(updated_at, id)` position this cursor points after.
    pub fn position(&self) -> Result<(DateTime<Utc>, Uuid), AppError> {
        let invalid = || AppError::Validation("Invalid pagination cursor".to_string());

        let bytes = URL_SAFE_NO_PAD.decode(&self.0).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (micros, id) = raw.split_once('|').ok_or_else(invalid)?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let updated_at = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(invalid)?;
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;
        Ok((updated_at, id))
    }

    /// Whether `record` sorts strictly after the cursor position.
    pub fn precedes(&self, record: &FormRecord) -> Result<bool, AppError> {
        let (updated_at, id) = self.position()?;
        Ok(record.updated_at < updated_at || (record.updated_at == updated_at && record.id < id))
    }
}

/// One page of a structured listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormPage {
    pub records: Vec<FormRecord>,
    pub next_cursor: Option<FormCursor>,
    /// True when the page came back full. The next page may still be empty.
    pub has_more: bool,
}

impl FormPage {
    pub fn from_records(records: Vec<FormRecord>, page_size: usize) -> Self {
        let next_cursor = records.last().map(FormCursor::after);
        let has_more = page_size > 0 && records.len() == page_size;
        FormPage {
            records,
            next_cursor,
            has_more,
        }
    }
}

/// Newest-updated-first ordering used by every listing path.
pub fn newest_first(a: &FormRecord, b: &FormRecord) -> std::cmp::Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| b.id.cmp(&a.id))
}
