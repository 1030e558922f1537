//! Core data models used throughout Invoice Harvest.
//!
//! These types represent tenant configurations, Registry API protocol
//! values, operation audit records, and the registry/canonical invoice
//! rows that flow through the fetch pipeline.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Allowed values for [`TenantConfig::fetch_interval_minutes`].
pub const FETCH_INTERVALS_MINUTES: [u32; 8] = [15, 30, 60, 120, 240, 480, 720, 1440];

/// Placeholder for required string fields absent from a document.
pub const UNKNOWN: &str = "UNKNOWN";

/// Currency assumed when a document does not state one.
pub const DEFAULT_CURRENCY: &str = "PLN";

// ═══════════════════════════════════════════════════════════════════════
// Tenant configuration
// ═══════════════════════════════════════════════════════════════════════

/// Registry API deployment a tenant configuration talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Test,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(Environment::Test),
            "production" => Ok(Environment::Production),
            other => bail!("Unknown environment: '{}'. Must be test or production.", other),
        }
    }
}

/// A 10-digit tax identifier used to authenticate and scope queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Mod-11 check over the first nine digits with weights 6,5,7,2,3,4,5,6,7.
    ///
    /// Synthetic identifiers used against the test environment often fail
    /// this check, so callers treat a failure as a warning only.
    pub fn has_valid_checksum(&self) -> bool {
        const WEIGHTS: [u32; 9] = [6, 5, 7, 2, 3, 4, 5, 6, 7];
        let digits: Vec<u32> = self.0.bytes().map(|b| (b - b'0') as u32).collect();
        let sum: u32 = WEIGHTS.iter().zip(&digits).map(|(w, d)| w * d).sum();
        let check = sum % 11;
        check != 10 && check == digits[9]
    }
}

impl FromStr for TaxId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 10 || !s.bytes().all(|b| b.is_ascii_digit()) {
            bail!("tax id must be exactly 10 ASCII digits, got '{}'", s);
        }
        Ok(TaxId(s.to_string()))
    }
}

impl TryFrom<String> for TaxId {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.0
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-tenant Registry API configuration.
///
/// Mutated by config-save and by the fetch orchestrator after a
/// successful run (`last_fetch_at`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    pub tenant_id: String,
    pub environment: Environment,
    pub tax_id: TaxId,
    /// Access credential as produced by the CryptoBox, never plaintext.
    pub encrypted_credential: String,
    pub auto_fetch: bool,
    pub fetch_interval_minutes: u32,
    pub last_fetch_at: Option<DateTime<Utc>>,
}

impl TenantConfig {
    pub fn new(
        tenant_id: &str,
        environment: Environment,
        tax_id: TaxId,
        encrypted_credential: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            environment,
            tax_id,
            encrypted_credential,
            auto_fetch: false,
            fetch_interval_minutes: 60,
            last_fetch_at: None,
        }
    }

    /// Reject values a config-save must never persist.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tenant_id.trim().is_empty() {
            bail!("tenant_id must not be empty");
        }
        if self.encrypted_credential.is_empty() {
            bail!("encrypted credential must not be empty");
        }
        if !FETCH_INTERVALS_MINUTES.contains(&self.fetch_interval_minutes) {
            bail!(
                "fetch_interval_minutes must be one of {:?}, got {}",
                FETCH_INTERVALS_MINUTES,
                self.fetch_interval_minutes
            );
        }
        Ok(())
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.fetch_interval_minutes))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry API protocol values
// ═══════════════════════════════════════════════════════════════════════

/// Subject role a query is run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectType {
    /// Invoices received by the tenant.
    #[serde(rename = "subject1")]
    Subject1,
    /// Invoices issued by the tenant.
    #[serde(rename = "subject2")]
    Subject2,
    /// All invoices associated with the tenant.
    #[serde(rename = "subject3")]
    Subject3,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Subject1 => "subject1",
            SubjectType::Subject2 => "subject2",
            SubjectType::Subject3 => "subject3",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subject1" => Ok(SubjectType::Subject1),
            "subject2" => Ok(SubjectType::Subject2),
            "subject3" => Ok(SubjectType::Subject3),
            other => bail!(
                "Unknown subject type: '{}'. Must be subject1, subject2, or subject3.",
                other
            ),
        }
    }
}

/// Ephemeral authenticated context. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub session_token: String,
}

/// Authorization challenge returned by the first session call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub challenge: String,
    pub timestamp: String,
}

/// An asynchronous server-side search, resolved by polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub query_id: String,
    pub subject_type: SubjectType,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// One downloadable chunk of a query's result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePart {
    pub part_number: u32,
    #[serde(default)]
    pub size: u64,
}

/// Result of a single query status check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatus {
    #[serde(default)]
    pub items: Vec<PackagePart>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub total_items: u64,
}

impl QueryStatus {
    pub fn is_ready(&self) -> bool {
        !self.items.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Operation audit record
// ═══════════════════════════════════════════════════════════════════════

/// Stage an operation is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    SessionInit,
    QueryStart,
    QueryStatus,
    QueryResult,
    InvoiceFetch,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::SessionInit => "session_init",
            OperationType::QueryStart => "query_start",
            OperationType::QueryStatus => "query_status",
            OperationType::QueryResult => "query_result",
            OperationType::InvoiceFetch => "invoice_fetch",
        }
    }
}

impl FromStr for OperationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_init" => Ok(OperationType::SessionInit),
            "query_start" => Ok(OperationType::QueryStart),
            "query_status" => Ok(OperationType::QueryStatus),
            "query_result" => Ok(OperationType::QueryResult),
            "invoice_fetch" => Ok(OperationType::InvoiceFetch),
            other => Err(anyhow!("unknown operation type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Success,
    Error,
    Timeout,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
            OperationStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Error | OperationStatus::Timeout
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "processing" => Ok(OperationStatus::Processing),
            "success" => Ok(OperationStatus::Success),
            "error" => Ok(OperationStatus::Error),
            "timeout" => Ok(OperationStatus::Timeout),
            other => Err(anyhow!("unknown operation status '{}'", other)),
        }
    }
}

/// Persisted audit record of one fetch run.
///
/// Created at fetch start, mutated at each stage transition, and
/// finalized exactly once before the orchestrator returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub tenant_id: String,
    pub config_id: String,
    pub op_type: OperationType,
    pub status: OperationStatus,
    pub session_id: Option<String>,
    pub query_id: Option<String>,
    pub invoices_found: i64,
    pub invoices_processed: i64,
    pub invoices_new: i64,
    pub duplicates_found: i64,
    pub packages_count: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// A fresh `pending` operation at the `session_init` stage.
    pub fn begin(tenant_id: &str, config_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            config_id: config_id.to_string(),
            op_type: OperationType::SessionInit,
            status: OperationStatus::Pending,
            session_id: None,
            query_id: None,
            invoices_found: 0,
            invoices_processed: 0,
            invoices_new: 0,
            duplicates_found: 0,
            packages_count: 0,
            error_code: None,
            error_message: None,
            processing_time_ms: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Move to a new stage; the first transition flips `pending` to `processing`.
    pub fn advance(&mut self, op_type: OperationType) {
        if self.is_finalized() {
            return;
        }
        self.op_type = op_type;
        if self.status == OperationStatus::Pending {
            self.status = OperationStatus::Processing;
        }
    }

    /// Finalize as `success`. Returns `false` if already finalized.
    pub fn succeed(&mut self, processing_time_ms: i64) -> bool {
        self.finalize(OperationStatus::Success, None, None, processing_time_ms)
    }

    /// Finalize as `error` or `timeout`. Returns `false` if already finalized.
    pub fn fail(
        &mut self,
        status: OperationStatus,
        code: &str,
        message: String,
        processing_time_ms: i64,
    ) -> bool {
        self.finalize(
            status,
            Some(code.to_string()),
            Some(message),
            processing_time_ms,
        )
    }

    fn finalize(
        &mut self,
        status: OperationStatus,
        code: Option<String>,
        message: Option<String>,
        processing_time_ms: i64,
    ) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.status = status;
        self.error_code = code;
        self.error_message = message;
        self.processing_time_ms = processing_time_ms;
        self.completed_at = Some(Utc::now());
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry and canonical invoices
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryStatus {
    Fetched,
    Processed,
    Error,
    Duplicate,
}

impl RegistryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryStatus::Fetched => "fetched",
            RegistryStatus::Processed => "processed",
            RegistryStatus::Error => "error",
            RegistryStatus::Duplicate => "duplicate",
        }
    }
}

impl FromStr for RegistryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetched" => Ok(RegistryStatus::Fetched),
            "processed" => Ok(RegistryStatus::Processed),
            "error" => Ok(RegistryStatus::Error),
            "duplicate" => Ok(RegistryStatus::Duplicate),
            other => Err(anyhow!("unknown registry status '{}'", other)),
        }
    }
}

/// One row per distinct invoice seen for a tenant.
///
/// `(tenant_id, external_reference_number)` and `(tenant_id, content_hash)`
/// are each unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRegistryEntry {
    pub id: String,
    pub tenant_id: String,
    pub external_reference_number: String,
    pub content_hash: String,
    pub issue_date: Option<NaiveDate>,
    pub seller_tax_id: String,
    pub buyer_tax_id: Option<String>,
    pub total_amount_minor: i64,
    pub currency: String,
    pub status: RegistryStatus,
    pub canonical_invoice_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Display-facing invoice fields plus the raw document for traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalInvoice {
    pub id: String,
    pub tenant_id: String,
    pub registry_entry_id: String,
    pub invoice_number: String,
    pub issue_date: Option<NaiveDate>,
    pub seller_tax_id: String,
    pub seller_name: String,
    pub buyer_tax_id: Option<String>,
    pub buyer_name: Option<String>,
    pub net_amount_minor: Option<i64>,
    pub total_amount_minor: i64,
    pub currency: String,
    pub raw_xml: String,
    pub created_at: DateTime<Utc>,
}

/// Invoice schema variant detected inside a package document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaVariant {
    V1,
    V2,
    /// A schema revision this build does not extract. Carries the marker seen.
    Unknown(String),
}

impl fmt::Display for SchemaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVariant::V1 => f.write_str("v1"),
            SchemaVariant::V2 => f.write_str("v2"),
            SchemaVariant::Unknown(marker) => write!(f, "unknown({})", marker),
        }
    }
}

/// Fields extracted from one package document.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDocument {
    pub reference_number: String,
    pub variant: SchemaVariant,
    pub invoice_number: String,
    pub issue_date: Option<NaiveDate>,
    pub seller_tax_id: String,
    pub seller_name: String,
    pub buyer_tax_id: Option<String>,
    pub buyer_name: Option<String>,
    pub net_amount_minor: Option<i64>,
    pub total_amount_minor: i64,
    pub currency: String,
    /// Hex hash of the whitespace-normalized document body.
    pub content_hash: String,
    pub raw_xml: String,
}

impl InvoiceDocument {
    /// Registry row in `fetched` state for this document.
    pub fn to_registry_entry(&self, tenant_id: &str, now: DateTime<Utc>) -> InvoiceRegistryEntry {
        InvoiceRegistryEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            external_reference_number: self.reference_number.clone(),
            content_hash: self.content_hash.clone(),
            issue_date: self.issue_date,
            seller_tax_id: self.seller_tax_id.clone(),
            buyer_tax_id: self.buyer_tax_id.clone(),
            total_amount_minor: self.total_amount_minor,
            currency: self.currency.clone(),
            status: RegistryStatus::Fetched,
            canonical_invoice_id: None,
            first_seen_at: now,
            last_updated_at: now,
        }
    }

    pub fn to_canonical(
        &self,
        tenant_id: &str,
        registry_entry_id: &str,
        now: DateTime<Utc>,
    ) -> CanonicalInvoice {
        CanonicalInvoice {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            registry_entry_id: registry_entry_id.to_string(),
            invoice_number: self.invoice_number.clone(),
            issue_date: self.issue_date,
            seller_tax_id: self.seller_tax_id.clone(),
            seller_name: self.seller_name.clone(),
            buyer_tax_id: self.buyer_tax_id.clone(),
            buyer_name: self.buyer_name.clone(),
            net_amount_minor: self.net_amount_minor,
            total_amount_minor: self.total_amount_minor,
            currency: self.currency.clone(),
            raw_xml: self.raw_xml.clone(),
            created_at: now,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fetch requests and outcomes
// ═══════════════════════════════════════════════════════════════════════

/// One retrieval run for one tenant configuration and window.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub config_id: String,
    pub subject_type: SubjectType,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// Counts reported back to the caller after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    pub operation_id: String,
    pub status: OperationStatus,
    pub packages_count: i64,
    pub invoices_found: i64,
    pub invoices_processed: i64,
    pub invoices_new: i64,
    pub duplicates_found: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}

impl From<&Operation> for FetchOutcome {
    fn from(op: &Operation) -> Self {
        Self {
            operation_id: op.id.clone(),
            status: op.status,
            packages_count: op.packages_count,
            invoices_found: op.invoices_found,
            invoices_processed: op.invoices_processed,
            invoices_new: op.invoices_new,
            duplicates_found: op.duplicates_found,
            error_code: op.error_code.clone(),
            error_message: op.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tax_id_requires_ten_digits() {
        assert!("5811870973".parse::<TaxId>().is_ok());
        assert!("581187097".parse::<TaxId>().is_err());
        assert!("58118709731".parse::<TaxId>().is_err());
        assert!("58118A0973".parse::<TaxId>().is_err());
    }

    #[test]
    fn tax_id_checksum() {
        let valid: TaxId = "5811870973".parse().unwrap();
        assert!(valid.has_valid_checksum());
        let invalid: TaxId = "5811870974".parse().unwrap();
        assert!(!invalid.has_valid_checksum());
    }

    #[test]
    fn interval_outside_allowed_set_is_rejected() {
        let mut cfg = TenantConfig::new(
            "acme",
            Environment::Test,
            "5811870973".parse().unwrap(),
            "ciphertext".to_string(),
        );
        assert!(cfg.validate().is_ok());
        cfg.fetch_interval_minutes = 45;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn operation_finalizes_once() {
        let mut op = Operation::begin("acme", "cfg-1");
        assert_eq!(op.status, OperationStatus::Pending);

        op.advance(OperationType::QueryStart);
        assert_eq!(op.status, OperationStatus::Processing);

        assert!(op.succeed(12));
        assert!(!op.fail(OperationStatus::Error, "PROTOCOL", "late".to_string(), 20));
        assert_eq!(op.status, OperationStatus::Success);
        assert_eq!(op.processing_time_ms, 12);
        assert!(op.error_message.is_none());
    }

    #[test]
    fn subject_type_round_trips_wire_name() {
        for s in ["subject1", "subject2", "subject3"] {
            assert_eq!(s.parse::<SubjectType>().unwrap().as_str(), s);
        }
        assert!("subject4".parse::<SubjectType>().is_err());
    }

    #[test]
    fn query_status_deserializes_camel_case() {
        let status: QueryStatus = serde_json::from_str(
            r#"{"items":[{"partNumber":1,"size":2048}],"hasMore":false,"totalItems":2}"#,
        )
        .unwrap();
        assert!(status.is_ready());
        assert_eq!(status.items[0].part_number, 1);
        assert_eq!(status.total_items, 2);
    }
}
