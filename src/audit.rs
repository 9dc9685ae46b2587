// 📜 Ledger & Audit Writer
//
// Every merge attempt (successful or partially failed) writes one ledger
// summary, its per-relation entries, and exactly one audit entry. Rejected
// attempts write one audit entry. Audit rows are append-only; storage
// triggers abort any UPDATE or DELETE on them.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::{MergeError, Result};
use crate::models::{MergeResult, TransferLedgerEntry};

// ============================================================================
// AUDIT ENTRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AccountMerge,
    UnauthorizedCountryAccess,
    UnauthorizedMergeAttempt,
    UnauthorizedAccessAttempt,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AccountMerge => "account_merge",
            AuditAction::UnauthorizedCountryAccess => "unauthorized_country_access",
            AuditAction::UnauthorizedMergeAttempt => "unauthorized_merge_attempt",
            AuditAction::UnauthorizedAccessAttempt => "unauthorized_access_attempt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "account_merge" => Some(AuditAction::AccountMerge),
            "unauthorized_country_access" => Some(AuditAction::UnauthorizedCountryAccess),
            "unauthorized_merge_attempt" => Some(AuditAction::UnauthorizedMergeAttempt),
            "unauthorized_access_attempt" => Some(AuditAction::UnauthorizedAccessAttempt),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of who did what to which account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub target_id: String,
    pub description: String,
    pub metadata: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        actor: &str,
        action: AuditAction,
        target_id: &str,
        description: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action,
            target_id: target_id.to_string(),
            description,
            metadata,
        }
    }
}

pub fn insert_audit_entry(conn: &Connection, entry: &AuditEntry) -> Result<()> {
    let metadata_json = serde_json::to_string(&entry.metadata)?;

    conn.execute(
        "INSERT INTO audit_log (
            event_id, timestamp, actor, action, target_id, description, metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.event_id,
            format_timestamp(&entry.timestamp),
            entry.actor,
            entry.action.as_str(),
            entry.target_id,
            entry.description,
            metadata_json,
        ],
    )?;

    Ok(())
}

/// Audit entries targeting one account, newest first
pub fn audit_entries_for_target(conn: &Connection, target_id: &str) -> Result<Vec<AuditEntry>> {
    query_audit(
        conn,
        "SELECT event_id, timestamp, actor, action, target_id, description, metadata
         FROM audit_log WHERE target_id = ?1 ORDER BY id DESC",
        target_id,
    )
}

pub fn audit_entries_by_action(conn: &Connection, action: AuditAction) -> Result<Vec<AuditEntry>> {
    query_audit(
        conn,
        "SELECT event_id, timestamp, actor, action, target_id, description, metadata
         FROM audit_log WHERE action = ?1 ORDER BY id DESC",
        action.as_str(),
    )
}

fn query_audit(conn: &Connection, sql: &str, param: &str) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(sql)?;

    let raw = stmt
        .query_map([param], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(event_id, ts, actor, action, target_id, description, metadata)| {
            Ok(AuditEntry {
                event_id,
                timestamp: parse_timestamp(&ts)
                    .map_err(|e| MergeError::Internal(format!("bad audit timestamp {}: {}", ts, e)))?,
                actor,
                action: AuditAction::parse(&action)
                    .ok_or_else(|| MergeError::Internal(format!("unknown audit action {}", action)))?,
                target_id,
                description,
                metadata: serde_json::from_str(&metadata)?,
            })
        })
        .collect()
}

// ============================================================================
// MERGE LEDGER
// ============================================================================

/// Who and what a merge was about, for the ledger summary row
#[derive(Debug, Clone)]
pub struct MergeSummary {
    pub actor: String,
    pub primary_name: String,
    pub secondary_name: String,
}

/// Stored ledger: summary row plus every per-relation entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeLedger {
    pub merge_id: String,
    pub primary_id: String,
    pub secondary_id: String,
    pub primary_name: String,
    pub secondary_name: String,
    pub actor: String,
    pub success: bool,
    pub total_items_transferred: i64,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<TransferLedgerEntry>,
}

/// Persist the ledger and the single audit entry for a merge attempt
pub fn record_merge(conn: &Connection, summary: &MergeSummary, result: &MergeResult) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now();

    tx.execute(
        "INSERT INTO merge_ledger (
            merge_id, primary_id, secondary_id, primary_name, secondary_name,
            actor, success, total_items_transferred, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            result.merge_id,
            result.primary_user_id,
            result.secondary_user_id,
            summary.primary_name,
            summary.secondary_name,
            summary.actor,
            result.success,
            result.total_items_transferred,
            format_timestamp(&now),
        ],
    )?;

    for entry in &result.transfer_details {
        tx.execute(
            "INSERT INTO merge_ledger_entries (merge_id, relation, count, success, error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![result.merge_id, entry.relation, entry.count, entry.success, entry.error],
        )?;
    }

    let description = if result.success {
        format!(
            "Merged {} ({}) into {} ({}): {} items transferred",
            summary.secondary_name,
            result.secondary_user_id,
            summary.primary_name,
            result.primary_user_id,
            result.total_items_transferred
        )
    } else {
        format!(
            "Partially merged {} ({}) into {} ({}): {} items transferred, failed relations: {}",
            summary.secondary_name,
            result.secondary_user_id,
            summary.primary_name,
            result.primary_user_id,
            result.total_items_transferred,
            result.failed_relations().join(", ")
        )
    };

    let entry = AuditEntry::new(
        &summary.actor,
        AuditAction::AccountMerge,
        &result.secondary_user_id,
        description,
        serde_json::json!({
            "merge_id": result.merge_id,
            "primary_user_id": result.primary_user_id,
            "secondary_user_id": result.secondary_user_id,
            "primary_name": summary.primary_name,
            "secondary_name": summary.secondary_name,
            "success": result.success,
            "secondary_suspended": result.secondary_suspended,
            "total_items_transferred": result.total_items_transferred,
            "transfer_details": result.transfer_details,
        }),
    );
    insert_audit_entry(&tx, &entry)?;

    tx.commit()?;
    Ok(())
}

pub fn get_merge_ledger(conn: &Connection, merge_id: &str) -> Result<Option<MergeLedger>> {
    let summary = conn
        .query_row(
            "SELECT merge_id, primary_id, secondary_id, primary_name, secondary_name,
                    actor, success, total_items_transferred, created_at
             FROM merge_ledger WHERE merge_id = ?1",
            [merge_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, bool>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()?;

    let Some((merge_id, primary_id, secondary_id, primary_name, secondary_name, actor, success, total, created_at)) =
        summary
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT relation, count, success, error FROM merge_ledger_entries
         WHERE merge_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map([&merge_id], |row| {
            Ok(TransferLedgerEntry {
                relation: row.get(0)?,
                count: row.get(1)?,
                success: row.get(2)?,
                error: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(MergeLedger {
        created_at: parse_timestamp(&created_at)
            .map_err(|e| MergeError::Internal(format!("bad ledger timestamp {}: {}", created_at, e)))?,
        merge_id,
        primary_id,
        secondary_id,
        primary_name,
        secondary_name,
        actor,
        success,
        total_items_transferred: total,
        entries,
    }))
}
