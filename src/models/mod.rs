use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Queued,
    Processing,
    Processed,
    Blocked,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Queued => "queued",
            IngestionStatus::Processing => "processing",
            IngestionStatus::Processed => "processed",
            IngestionStatus::Blocked => "blocked",
            IngestionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(IngestionStatus::Queued),
            "processing" => Some(IngestionStatus::Processing),
            "processed" => Some(IngestionStatus::Processed),
            "blocked" => Some(IngestionStatus::Blocked),
            "failed" => Some(IngestionStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ReviewStatus::Pending),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub job_id: Option<String>,
    pub owner_key: String,
    pub user_id: String,
    pub org_id: Option<String>,
    pub file_name: String,
    pub file_path: Option<String>,
    pub file_hash: String,
    pub content_hash: Option<String>,
    pub ingestion_status: IngestionStatus,
    pub review_status: ReviewStatus,
    pub supplier_name: Option<String>,
    pub supplier_address: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_address: Option<String>,
    pub customer_number: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub payment_terms_days: Option<i64>,
    pub net_amount: Option<f64>,
    pub vat_amount: Option<f64>,
    pub gross_amount: Option<f64>,
    pub vat_rate: Option<f64>,
    pub currency: String,
    pub iban: Option<String>,
    pub bic: Option<String>,
    pub tax_number: Option<String>,
    pub vat_id: Option<String>,
    pub payment_terms: Option<String>,
    pub payment_reference: Option<String>,
    pub line_items: Vec<LineItem>,
    pub extraction_provider: Option<String>,
    pub extraction_model: Option<String>,
    pub extraction_method: Option<String>,
    pub complexity_score: Option<i64>,
    pub confidence: f64,
    #[serde(skip_serializing)]
    pub ocr_text: Option<String>,
    pub extracted_json: String,
    pub validation_issues: Vec<ValidationIssue>,
    pub duplicate_of: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Invoice {
    pub fn new(owner: &Owner, job_id: Option<&str>, file_name: &str, file_hash: &str, now: &str) -> Self {
        Invoice {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.map(str::to_string),
            owner_key: owner.key(),
            user_id: owner.user_id.clone(),
            org_id: owner.org_id.clone(),
            file_name: file_name.to_string(),
            file_path: None,
            file_hash: file_hash.to_string(),
            content_hash: None,
            ingestion_status: IngestionStatus::Queued,
            review_status: ReviewStatus::Pending,
            supplier_name: None,
            supplier_address: None,
            recipient_name: None,
            recipient_address: None,
            customer_number: None,
            invoice_number: None,
            invoice_date: None,
            due_date: None,
            payment_terms_days: None,
            net_amount: None,
            vat_amount: None,
            gross_amount: None,
            vat_rate: None,
            currency: "EUR".to_string(),
            iban: None,
            bic: None,
            tax_number: None,
            vat_id: None,
            payment_terms: None,
            payment_reference: None,
            line_items: Vec::new(),
            extraction_provider: None,
            extraction_model: None,
            extraction_method: None,
            complexity_score: None,
            confidence: 0.0,
            ocr_text: None,
            extracted_json: "{}".to_string(),
            validation_issues: Vec::new(),
            duplicate_of: None,
            error_kind: None,
            error_message: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    pub fn owner(&self) -> Owner {
        Owner {
            user_id: self.user_id.clone(),
            org_id: self.org_id.clone(),
        }
    }

    pub fn has_hard_issues(&self) -> bool {
        self.validation_issues
            .iter()
            .any(|issue| issue.severity == Severity::Hard)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceOverride {
    pub id: String,
    pub invoice_id: String,
    pub field_name: String,
    pub override_value: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub id: String,
    pub file_name: String,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub supplier_name: Option<String>,
    pub gross_amount: Option<f64>,
    pub currency: String,
    pub ingestion_status: IngestionStatus,
    pub review_status: ReviewStatus,
    pub confidence: f64,
    pub issue_count: usize,
    pub duplicate_of: Option<String>,
}

impl From<&Invoice> for InvoiceSummary {
    fn from(invoice: &Invoice) -> Self {
        InvoiceSummary {
            id: invoice.id.clone(),
            file_name: invoice.file_name.clone(),
            invoice_number: invoice.invoice_number.clone(),
            invoice_date: invoice.invoice_date.clone(),
            supplier_name: invoice.supplier_name.clone(),
            gross_amount: invoice.gross_amount,
            currency: invoice.currency.clone(),
            ingestion_status: invoice.ingestion_status,
            review_status: invoice.review_status,
            confidence: invoice.confidence,
            issue_count: invoice.validation_issues.len(),
            duplicate_of: invoice.duplicate_of.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub overrides: Vec<InvoiceOverride>,
    pub duplicates: Vec<DuplicateDetection>,
    pub plausibility: Vec<PlausibilityCheck>,
}

/// Canonical field set produced by the extraction backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedInvoiceData {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub payment_terms_days: Option<i64>,
    pub supplier_name: Option<String>,
    pub supplier_address: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_address: Option<String>,
    pub customer_number: Option<String>,
    pub gross_amount: Option<f64>,
    pub net_amount: Option<f64>,
    pub vat_amount: Option<f64>,
    pub vat_rate: Option<f64>,
    pub currency: Option<String>,
    pub iban: Option<String>,
    pub bic: Option<String>,
    pub tax_number: Option<String>,
    pub vat_id: Option<String>,
    pub payment_terms: Option<String>,
    pub payment_reference: Option<String>,
    pub line_items: Vec<LineItem>,
    pub confidence: Option<f64>,
    pub extraction_notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploaded" => Some(JobStatus::Uploaded),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "partial" => Some(JobStatus::Partial),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Final status once every file of a job has an outcome.
    pub fn from_counts(succeeded: u32, failed: u32) -> Self {
        match (succeeded, failed) {
            (0, 0) => JobStatus::Completed,
            (_, 0) => JobStatus::Completed,
            (0, _) => JobStatus::Failed,
            _ => JobStatus::Partial,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub owner_key: String,
    pub user_id: String,
    pub org_id: Option<String>,
    pub status: JobStatus,
    pub total_files: u32,
    pub processed_files: u32,
    pub succeeded_files: u32,
    pub failed_files: u32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Job {
    pub fn progress(&self) -> f64 {
        if self.total_files == 0 {
            return 1.0;
        }
        f64::from(self.processed_files) / f64::from(self.total_files)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    pub id: String,
    pub job_id: String,
    pub invoice_id: Option<String>,
    pub file_name: String,
    pub stored_path: String,
    pub size_bytes: u64,
    pub status: String,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub remediation: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Member,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "viewer" => Some(Role::Viewer),
            "member" => Some(Role::Member),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Tenant scope for invoices, duplicates and quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub user_id: String,
    pub org_id: Option<String>,
}

impl Owner {
    pub fn key(&self) -> String {
        match &self.org_id {
            Some(org_id) => format!("org:{org_id}"),
            None => format!("user:{}", self.user_id),
        }
    }
}

/// Authenticated caller, resolved from a bearer token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub org_id: Option<String>,
    pub role: Role,
}

impl Identity {
    pub fn owner(&self) -> Owner {
        Owner {
            user_id: self.user_id.clone(),
            org_id: self.org_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub org_id: Option<String>,
    pub role: Role,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub monthly_quota: Option<u64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateDetection {
    pub id: String,
    pub invoice_id: String,
    pub duplicate_of: String,
    pub method: String,
    pub confidence: f64,
    pub review_status: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlausibilityCheck {
    pub id: String,
    pub invoice_id: String,
    pub check_type: String,
    pub severity: String,
    pub confidence: f64,
    pub details: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub openai_api_key_set: bool,
    pub anthropic_api_key_set: bool,
    pub openai_model: String,
    pub anthropic_model: String,
    pub complexity_threshold: u8,
    pub strict_validation: bool,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub year_month: String,
    pub gross_month: f64,
    pub gross_year: f64,
    pub invoices_month: u64,
    pub quota_limit: Option<u64>,
    pub status_counts: Vec<StatusCount>,
    pub open_duplicates: u64,
    pub recent: Vec<InvoiceSummary>,
    pub chart_months: Vec<String>,
    pub chart_gross: Vec<f64>,
    pub chart_count: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl ReportFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFrequency::Daily => "daily",
            ReportFrequency::Weekly => "weekly",
            ReportFrequency::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(ReportFrequency::Daily),
            "weekly" => Some(ReportFrequency::Weekly),
            "monthly" => Some(ReportFrequency::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledReport {
    pub id: String,
    pub owner_key: String,
    pub user_id: String,
    pub org_id: Option<String>,
    pub name: String,
    pub frequency: ReportFrequency,
    pub format: String,
    pub recipients: Vec<String>,
    pub active: bool,
    pub last_run_at: Option<String>,
    pub next_run_at: String,
    pub created_at: String,
}

impl ScheduledReport {
    pub fn owner(&self) -> Owner {
        Owner {
            user_id: self.user_id.clone(),
            org_id: self.org_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: String,
    pub channel: String,
    pub recipient: String,
    pub subject: String,
    pub status: String,
    pub error: Option<String>,
    pub job_id: Option<String>,
    pub report_id: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_key_prefers_organization() {
        let solo = Owner {
            user_id: "u1".into(),
            org_id: None,
        };
        let team = Owner {
            user_id: "u1".into(),
            org_id: Some("o1".into()),
        };
        assert_eq!(solo.key(), "user:u1");
        assert_eq!(team.key(), "org:o1");
    }

    #[test]
    fn job_status_from_counts() {
        assert_eq!(JobStatus::from_counts(3, 0), JobStatus::Completed);
        assert_eq!(JobStatus::from_counts(2, 1), JobStatus::Partial);
        assert_eq!(JobStatus::from_counts(0, 2), JobStatus::Failed);
    }

    #[test]
    fn roles_are_ordered() {
        assert!(Role::Viewer < Role::Member);
        assert!(Role::Member < Role::Admin);
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("owner"), None);
    }
}
