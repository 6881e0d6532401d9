use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keywords::{extract_keywords, KeywordSource};

/// Form category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FormCategory {
    Application,
    Policy,
    Endorsement,
    Certificate,
    Claims,
    Underwriting,
    Billing,
    Other,
}

impl FormCategory {
    pub const ALL: [FormCategory; 8] = [
        FormCategory::Application,
        FormCategory::Policy,
        FormCategory::Endorsement,
        FormCategory::Certificate,
        FormCategory::Claims,
        FormCategory::Underwriting,
        FormCategory::Billing,
        FormCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormCategory::Application => "Application",
            FormCategory::Policy => "Policy",
            FormCategory::Endorsement => "Endorsement",
            FormCategory::Certificate => "Certificate",
            FormCategory::Claims => "Claims",
            FormCategory::Underwriting => "Underwriting",
            FormCategory::Billing => "Billing",
            FormCategory::Other => "Other",
        }
    }
}

impl fmt::Display for FormCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown form category: {}", s))
    }
}

/// Line of business a form belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LineOfBusiness {
    Auto,
    Property,
    #[serde(rename = "General Liability")]
    GeneralLiability,
    #[serde(rename = "Workers Compensation")]
    WorkersCompensation,
    #[serde(rename = "Professional Liability")]
    ProfessionalLiability,
    Cyber,
    Umbrella,
    #[serde(rename = "Commercial Package")]
    CommercialPackage,
    #[serde(rename = "Personal Lines")]
    PersonalLines,
    Other,
}

impl LineOfBusiness {
    pub const ALL: [LineOfBusiness; 10] = [
        LineOfBusiness::Auto,
        LineOfBusiness::Property,
        LineOfBusiness::GeneralLiability,
        LineOfBusiness::WorkersCompensation,
        LineOfBusiness::ProfessionalLiability,
        LineOfBusiness::Cyber,
        LineOfBusiness::Umbrella,
        LineOfBusiness::CommercialPackage,
        LineOfBusiness::PersonalLines,
        LineOfBusiness::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LineOfBusiness::Auto => "Auto",
            LineOfBusiness::Property => "Property",
            LineOfBusiness::GeneralLiability => "General Liability",
            LineOfBusiness::WorkersCompensation => "Workers Compensation",
            LineOfBusiness::ProfessionalLiability => "Professional Liability",
            LineOfBusiness::Cyber => "Cyber",
            LineOfBusiness::Umbrella => "Umbrella",
            LineOfBusiness::CommercialPackage => "Commercial Package",
            LineOfBusiness::PersonalLines => "Personal Lines",
            LineOfBusiness::Other => "Other",
        }
    }
}

impl fmt::Display for LineOfBusiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineOfBusiness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LineOfBusiness::ALL
            .iter()
            .copied()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown line of business: {}", s))
    }
}

/// Caller-supplied fields for a new form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormMetadata {
    pub title: String,
    pub description: Option<String>,
    pub form_number: String,
    pub category: FormCategory,
    pub line_of_business: LineOfBusiness,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub state_applicability: Vec<String>,
    pub edition_date: NaiveDate,
    pub effective_date: NaiveDate,
    pub expiration_date: Option<NaiveDate>,
    pub is_active: bool,
    pub version: String,
}

impl FormMetadata {
    pub fn keyword_source(&self) -> KeywordSource<'_> {
        KeywordSource {
            title: &self.title,
            description: self.description.as_deref(),
            form_number: &self.form_number,
            tags: &self.tags,
            category: self.category,
            line_of_business: self.line_of_business,
        }
    }
}

/// A versioned insurance form as held in the forms collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRecord {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub form_number: String,
    pub category: FormCategory,
    pub line_of_business: LineOfBusiness,
    pub tags: Vec<String>,
    pub state_applicability: Vec<String>,
    pub edition_date: NaiveDate,
    pub effective_date: NaiveDate,
    pub expiration_date: Option<NaiveDate>,
    pub version: String,
    pub is_active: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub file_url: Option<String>,
    pub file_size: Option<i64>,
    pub created_by: String,
    pub modified_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub view_count: i64,
    pub download_count: i64,
    pub search_keywords: BTreeSet<String>,
}

impl FormRecord {
    /// Build a fresh record from creation metadata.
    ///
    /// The id is a placeholder until the store assigns one on insert.
    pub fn new(metadata: FormMetadata, user_id: &str, now: DateTime<Utc>) -> Self {
        let search_keywords = extract_keywords(&metadata.keyword_source());
        FormRecord {
            id: Uuid::nil(),
            title: metadata.title,
            description: metadata.description,
            form_number: metadata.form_number,
            category: metadata.category,
            line_of_business: metadata.line_of_business,
            tags: metadata.tags,
            state_applicability: metadata.state_applicability,
            edition_date: metadata.edition_date,
            effective_date: metadata.effective_date,
            expiration_date: metadata.expiration_date,
            version: metadata.version,
            is_active: metadata.is_active,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            file_url: None,
            file_size: None,
            created_by: user_id.to_string(),
            modified_by: user_id.to_string(),
            created_at: now,
            updated_at: now,
            view_count: 0,
            download_count: 0,
            search_keywords,
        }
    }

    pub fn keyword_source(&self) -> KeywordSource<'_> {
        KeywordSource {
            title: &self.title,
            description: self.description.as_deref(),
            form_number: &self.form_number,
            tags: &self.tags,
            category: self.category,
            line_of_business: self.line_of_business,
        }
    }

    /// The caller-editable part of this record.
    pub fn metadata(&self) -> FormMetadata {
        FormMetadata {
            title: self.title.clone(),
            description: self.description.clone(),
            form_number: self.form_number.clone(),
            category: self.category,
            line_of_business: self.line_of_business,
            tags: self.tags.clone(),
            state_applicability: self.state_applicability.clone(),
            edition_date: self.edition_date,
            effective_date: self.effective_date,
            expiration_date: self.expiration_date,
            is_active: self.is_active,
            version: self.version.clone(),
        }
    }

    /// Uploader alias kept for callers that think in upload terms.
    pub fn uploaded_by(&self) -> &str {
        &self.created_by
    }

    pub fn uploaded_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Merge a patch into this record, stamping audit fields.
    ///
    /// Keywords are recomputed from the merged record when the patch touches any field
    /// they are derived from.
    pub fn apply_patch(&mut self, patch: FormPatch, user_id: &str, now: DateTime<Utc>) {
        let refresh_keywords = patch.touches_keywords();

        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(form_number) = patch.form_number {
            self.form_number = form_number;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(line_of_business) = patch.line_of_business {
            self.line_of_business = line_of_business;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(states) = patch.state_applicability {
            self.state_applicability = states;
        }
        if let Some(edition_date) = patch.edition_date {
            self.edition_date = edition_date;
        }
        if let Some(effective_date) = patch.effective_date {
            self.effective_date = effective_date;
        }
        if let Some(expiration_date) = patch.expiration_date {
            self.expiration_date = expiration_date;
        }
        if let Some(version) = patch.version {
            self.version = version;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        if let Some(file_url) = patch.file_url {
            self.file_url = Some(file_url);
        }
        if let Some(file_size) = patch.file_size {
            self.file_size = Some(file_size);
        }

        if refresh_keywords {
            self.search_keywords = extract_keywords(&self.keyword_source());
        }
        self.modified_by = user_id.to_string();
        self.updated_at = now;
    }
}

/// Partial update for a form. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormPatch {
    pub title: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub form_number: Option<String>,
    pub category: Option<FormCategory>,
    pub line_of_business: Option<LineOfBusiness>,
    pub tags: Option<Vec<String>>,
    pub state_applicability: Option<Vec<String>>,
    pub edition_date: Option<NaiveDate>,
    pub effective_date: Option<NaiveDate>,
    /// `Some(None)` clears the expiration date.
    pub expiration_date: Option<Option<NaiveDate>>,
    pub version: Option<String>,
    pub is_active: Option<bool>,
    pub file_url: Option<String>,
    pub file_size: Option<i64>,
}

impl FormPatch {
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Whether any keyword source field is part of this patch.
    pub fn touches_keywords(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.tags.is_some()
            || self.form_number.is_some()
            || self.category.is_some()
            || self.line_of_business.is_some()
    }

    /// Names of the fields this patch sets, used in activity metadata.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.form_number.is_some() {
            fields.push("formNumber");
        }
        if self.category.is_some() {
            fields.push("category");
        }
        if self.line_of_business.is_some() {
            fields.push("lineOfBusiness");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        if self.state_applicability.is_some() {
            fields.push("stateApplicability");
        }
        if self.edition_date.is_some() {
            fields.push("editionDate");
        }
        if self.effective_date.is_some() {
            fields.push("effectiveDate");
        }
        if self.expiration_date.is_some() {
            fields.push("expirationDate");
        }
        if self.version.is_some() {
            fields.push("version");
        }
        if self.is_active.is_some() {
            fields.push("isActive");
        }
        if self.file_url.is_some() {
            fields.push("fileUrl");
        }
        if self.file_size.is_some() {
            fields.push("fileSize");
        }
        fields
    }

    /// Patch linking an uploaded file to its record.
    pub fn file_link(file_url: String, file_size: i64) -> Self {
        FormPatch {
            file_url: Some(file_url),
            file_size: Some(file_size),
            ..Default::default()
        }
    }
}
