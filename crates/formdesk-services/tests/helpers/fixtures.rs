//! Test fixtures: form metadata and minimal PDF blobs.

use chrono::NaiveDate;
use formdesk_core::models::{FormCategory, FormMetadata, LineOfBusiness};

pub const TEST_USER: &str = "user-test";

/// Metadata for a Property/Policy form applicable in Texas.
pub fn form_metadata(title: &str) -> FormMetadata {
    FormMetadata {
        title: title.to_string(),
        description: None,
        form_number: format!("FRM-{}", title.len()),
        category: FormCategory::Policy,
        line_of_business: LineOfBusiness::Property,
        tags: vec![],
        state_applicability: vec!["TX".to_string()],
        edition_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        effective_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        expiration_date: None,
        is_active: true,
        version: "1".to_string(),
    }
}

/// Minimal valid PDF.
pub fn create_test_pdf() -> Vec<u8> {
    b"%PDF-1.4
1 0 obj
<< /Type /Catalog /Pages 2 0 R >>
endobj
2 0 obj
<< /Type /Pages /Kids [3 0 R] /Count 1 >>
endobj
3 0 obj
<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>
endobj
trailer
<< /Root 1 0 R >>
%%EOF
"
    .to_vec()
}
