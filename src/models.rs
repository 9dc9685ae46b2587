// 👥 Account Models - client and business profiles plus dedup/merge payloads
//
// Accounts are owned by the account-management subsystem; this engine only
// reads them, reassigns what they own, and soft-disables retired duplicates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ACCOUNT KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Individual user profile
    Client,

    /// Business profile
    Business,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Client => "client",
            AccountKind::Business => "business",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "client" => Some(AccountKind::Client),
            "business" => Some(AccountKind::Business),
            _ => None,
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ACCOUNT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub kind: AccountKind,

    pub first_name: Option<String>,
    pub last_name: Option<String>,

    /// Business profiles only
    pub business_name: Option<String>,

    pub phone: Option<String>,
    pub city: Option<String>,

    /// Client profiles only
    pub birthday: Option<NaiveDate>,

    pub is_verified: bool,
    pub is_suspended: bool,

    /// Free-form profile notes; merge annotations are appended here
    pub notes: Option<String>,

    /// ISO 3166 alpha-2 code
    pub country_code: Option<String>,

    /// Owning client of a business profile
    pub owner_id: Option<String>,

    /// Primary this account was folded into, if any
    pub merged_into: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Account {
    /// New client profile with a fresh UUID
    pub fn client(first_name: &str, last_name: &str, birthday: NaiveDate) -> Self {
        Account {
            id: uuid::Uuid::new_v4().to_string(),
            kind: AccountKind::Client,
            first_name: Some(first_name.to_string()),
            last_name: Some(last_name.to_string()),
            business_name: None,
            phone: None,
            city: None,
            birthday: Some(birthday),
            is_verified: false,
            is_suspended: false,
            notes: None,
            country_code: None,
            owner_id: None,
            merged_into: None,
            created_at: Utc::now(),
        }
    }

    /// New business profile with a fresh UUID
    pub fn business(business_name: &str, phone: Option<&str>) -> Self {
        Account {
            id: uuid::Uuid::new_v4().to_string(),
            kind: AccountKind::Business,
            first_name: None,
            last_name: None,
            business_name: Some(business_name.to_string()),
            phone: phone.map(str::to_string),
            city: None,
            birthday: None,
            is_verified: false,
            is_suspended: false,
            notes: None,
            country_code: None,
            owner_id: None,
            merged_into: None,
            created_at: Utc::now(),
        }
    }

    /// Human-readable name used in ledgers and audit descriptions
    pub fn display_name(&self) -> String {
        match self.kind {
            AccountKind::Business => self
                .business_name
                .clone()
                .unwrap_or_else(|| self.id.clone()),
            AccountKind::Client => {
                let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
                    .into_iter()
                    .flatten()
                    .filter(|p| !p.trim().is_empty())
                    .collect();
                if parts.is_empty() {
                    self.id.clone()
                } else {
                    parts.join(" ")
                }
            }
        }
    }
}

// ============================================================================
// ENRICHMENT SIGNALS
// ============================================================================

/// How a candidate can sign in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    Phone,
    Email,
    Oauth { provider: String },
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Phone => f.write_str("phone"),
            AuthMethod::Email => f.write_str("email"),
            AuthMethod::Oauth { provider } => f.write_str(provider),
        }
    }
}

/// Per-account owned-record counts, recomputed on demand for ranking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSignature {
    pub contacts: i64,
    pub funds_created: i64,
    pub contributions: i64,
    pub posts: i64,
    pub orders: i64,
    pub products: i64,
}

/// One member of a duplicate group with everything the selector ranks on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAccount {
    pub account: Account,
    pub auth_methods: Vec<AuthMethod>,
    pub signature: DataSignature,

    /// Most recent authored post (clients only)
    pub last_active: Option<DateTime<Utc>>,

    /// Ranking score, filled in by the primary selector
    pub score: i64,
}

impl CandidateAccount {
    pub fn id(&self) -> &str {
        &self.account.id
    }
}

// ============================================================================
// DUPLICATE GROUP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub kind: AccountKind,
    pub confidence: Confidence,

    /// Fields that produced the group, e.g. ["first_name", "birthday"]
    pub match_criteria: Vec<String>,

    /// Ranked, best candidate first
    pub accounts: Vec<CandidateAccount>,

    /// Advisory only; a merge still needs an explicit MergeRequest
    pub recommended_primary: String,
}

// ============================================================================
// REQUESTS / RESPONSES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindDuplicatesRequest {
    #[serde(rename = "type")]
    pub kind: Option<AccountKind>,

    #[serde(default)]
    pub first_name: Option<String>,

    /// YYYY-MM-DD
    #[serde(default)]
    pub birthday: Option<String>,

    #[serde(default)]
    pub business_name: Option<String>,

    #[serde(default)]
    pub business_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindDuplicatesResponse {
    pub duplicates: Vec<DuplicateGroup>,
    pub message: String,
}

/// Caller-confirmed instruction to fold `secondary_user_id` into `primary_user_id`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeRequest {
    #[serde(default)]
    pub primary_user_id: String,

    #[serde(default)]
    pub secondary_user_id: String,
}

impl MergeRequest {
    pub fn new(primary: &str, secondary: &str) -> Self {
        MergeRequest {
            primary_user_id: primary.to_string(),
            secondary_user_id: secondary.to_string(),
        }
    }
}

// ============================================================================
// TRANSFER LEDGER
// ============================================================================

/// Outcome of one relation reassignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferLedgerEntry {
    pub relation: String,
    pub count: i64,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferLedgerEntry {
    pub fn moved(relation: &str, count: i64) -> Self {
        TransferLedgerEntry {
            relation: relation.to_string(),
            count,
            success: true,
            error: None,
        }
    }

    pub fn failed(relation: &str, error: String) -> Self {
        TransferLedgerEntry {
            relation: relation.to_string(),
            count: 0,
            success: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub merge_id: String,
    pub primary_user_id: String,
    pub secondary_user_id: String,

    /// True only if every transfer succeeded and the secondary was soft-disabled
    pub success: bool,
    pub secondary_suspended: bool,

    pub transfer_details: Vec<TransferLedgerEntry>,
    pub total_items_transferred: i64,
}

impl MergeResult {
    pub fn failed_relations(&self) -> Vec<&str> {
        self.transfer_details
            .iter()
            .filter(|e| !e.success)
            .map(|e| e.relation.as_str())
            .collect()
    }
}
