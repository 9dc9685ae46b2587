// Account Merge Engine - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod normalize;      // Match-key canonicalization
pub mod models;
pub mod db;
pub mod relations;      // Fixed ownership relation registry
pub mod finder;         // Duplicate Finder
pub mod enrichment;     // Enrichment Collector
pub mod ranking;        // Primary Selector
pub mod auth;           // Authorization Gate + credentials
pub mod merge;          // Merge Executor
pub mod audit;          // Ledger/Audit Writer
pub mod engine;

// Re-export commonly used types
pub use error::{MergeError, Result};
pub use config::{EngineConfig, RankingWeights};
pub use models::{
    Account, AccountKind, AuthMethod, CandidateAccount, Confidence, DataSignature,
    DuplicateGroup, FindDuplicatesRequest, FindDuplicatesResponse, MergeRequest,
    MergeResult, TransferLedgerEntry,
};
pub use db::{setup_database, insert_account, get_account};
pub use relations::{RelationDescriptor, RelationRegistry};
pub use finder::{DuplicateFinder, SearchSpec};
pub use enrichment::EnrichmentCollector;
pub use ranking::PrimarySelector;
pub use auth::{CallerContext, Role, issue_token, resolve_caller};
pub use merge::MergeExecutor;
pub use audit::{
    AuditAction, AuditEntry, MergeLedger,
    audit_entries_for_target, audit_entries_by_action, get_merge_ledger,
};
pub use engine::AccountMergeEngine;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
