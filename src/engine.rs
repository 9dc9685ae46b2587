// ⚙️ Account Merge Engine - the two operations exposed to the admin layer
//
// find_duplicates: Finder → Enrichment → Primary Selector → groups for review
// merge_accounts:  Gate → Merge Executor → Ledger/Audit Writer
//
// A DuplicateGroup never triggers a merge; the caller must send an explicit
// MergeRequest.

use rusqlite::Connection;
use tracing::{info, warn};

use crate::audit::{record_merge, MergeSummary};
use crate::auth::{authorize_merge_role, authorize_merge_scope, authorize_role, CallerContext, FIND_ROLE};
use crate::config::EngineConfig;
use crate::db;
use crate::enrichment::EnrichmentCollector;
use crate::error::{MergeError, Result};
use crate::finder::{DuplicateFinder, SearchSpec};
use crate::merge::MergeExecutor;
use crate::models::{
    DuplicateGroup, FindDuplicatesRequest, FindDuplicatesResponse, MergeRequest, MergeResult,
};
use crate::ranking::PrimarySelector;
use crate::relations::RelationRegistry;

pub const NO_DUPLICATES_MESSAGE: &str = "No matching accounts found";
pub const SINGLE_MATCH_MESSAGE: &str = "Only one matching account found, no duplicates";

/// Audit target recorded for a rejected search (no account is involved yet)
pub const SEARCH_AUDIT_TARGET: &str = "duplicate_search";

pub struct AccountMergeEngine {
    finder: DuplicateFinder,
    collector: EnrichmentCollector,
    selector: PrimarySelector,
    executor: MergeExecutor,
}

impl AccountMergeEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_relations(config, RelationRegistry::standard())
    }

    /// Engine with a custom relation registry
    pub fn with_relations(config: &EngineConfig, relations: RelationRegistry) -> Self {
        AccountMergeEngine {
            finder: DuplicateFinder::new(),
            collector: EnrichmentCollector::new(relations.clone()),
            selector: PrimarySelector::new(config.ranking.clone()),
            executor: MergeExecutor::new(relations),
        }
    }

    // ========================================================================
    // findDuplicates
    // ========================================================================

    pub fn find_duplicates(
        &self,
        conn: &Connection,
        caller: &CallerContext,
        request: &FindDuplicatesRequest,
    ) -> Result<FindDuplicatesResponse> {
        authorize_role(conn, caller, FIND_ROLE, "find_duplicates", SEARCH_AUDIT_TARGET)?;
        let spec = SearchSpec::from_request(request)?;

        let candidates: Vec<_> = self
            .finder
            .find_candidates(conn, &spec)?
            .into_iter()
            .filter(|account| caller.can_access(account))
            .collect();

        info!(
            actor = %caller.actor_id,
            kind = %spec.kind(),
            candidates = candidates.len(),
            "duplicate search"
        );

        match candidates.len() {
            0 => {
                return Ok(FindDuplicatesResponse {
                    duplicates: Vec::new(),
                    message: NO_DUPLICATES_MESSAGE.to_string(),
                })
            }
            1 => {
                return Ok(FindDuplicatesResponse {
                    duplicates: Vec::new(),
                    message: SINGLE_MATCH_MESSAGE.to_string(),
                })
            }
            _ => {}
        }

        let mut accounts = self.collector.enrich(conn, candidates);
        let recommended_primary = self
            .selector
            .rank(&mut accounts)
            .ok_or_else(|| MergeError::Internal("ranked an empty group".to_string()))?;

        let count = accounts.len();
        let group = DuplicateGroup {
            kind: spec.kind(),
            confidence: spec.confidence(),
            match_criteria: spec.match_criteria(),
            accounts,
            recommended_primary,
        };

        Ok(FindDuplicatesResponse {
            duplicates: vec![group],
            message: format!("Found {} potential duplicate accounts", count),
        })
    }

    // ========================================================================
    // mergeAccounts
    // ========================================================================

    pub fn merge_accounts(
        &self,
        conn: &Connection,
        caller: &CallerContext,
        request: &MergeRequest,
    ) -> Result<MergeResult> {
        let primary_id = request.primary_user_id.trim();
        let secondary_id = request.secondary_user_id.trim();

        if primary_id.is_empty() || secondary_id.is_empty() {
            return Err(MergeError::InvalidRequest(
                "primary_user_id and secondary_user_id are required".to_string(),
            ));
        }
        if primary_id == secondary_id {
            return Err(MergeError::InvalidRequest(
                "cannot merge an account into itself".to_string(),
            ));
        }

        authorize_merge_role(conn, caller, primary_id, secondary_id)?;

        let primary = db::get_account(conn, primary_id)?
            .ok_or_else(|| MergeError::NotFound(format!("primary account {} not found", primary_id)))?;
        let secondary = db::get_account(conn, secondary_id)?
            .ok_or_else(|| MergeError::NotFound(format!("secondary account {} not found", secondary_id)))?;

        if primary.kind != secondary.kind {
            return Err(MergeError::InvalidRequest(format!(
                "cannot merge a {} account into a {} account",
                secondary.kind, primary.kind
            )));
        }

        authorize_merge_scope(conn, caller, &primary, &secondary)?;

        self.executor.claim_secondary(conn, &primary, &secondary)?;
        let result = self.executor.execute(conn, &primary, &secondary, &caller.actor_id);

        if !result.success {
            warn!(
                merge_id = %result.merge_id,
                failed = ?result.failed_relations(),
                suspended = result.secondary_suspended,
                "merge completed with failures"
            );
        }

        let summary = MergeSummary {
            actor: caller.actor_id.clone(),
            primary_name: primary.display_name(),
            secondary_name: secondary.display_name(),
        };
        record_merge(conn, &summary, &result)?;

        Ok(result)
    }
}

impl Default for AccountMergeEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}
