// 🔀 Merge Executor - best-effort reassignment across the relation registry
//
// Each relation is attempted independently: a failure is written into that
// relation's ledger entry and the loop moves on. Nothing is rolled back; the
// ledger is the record of what actually moved. The secondary is soft-disabled
// afterwards, never deleted.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, error, info, warn};

use crate::db::format_timestamp;
use crate::error::{MergeError, Result};
use crate::models::{Account, MergeResult, TransferLedgerEntry};
use crate::relations::RelationRegistry;

/// Prefix of the machine-readable note appended to a retired account
pub const MERGE_NOTE_PREFIX: &str = "[merged]";

pub struct MergeExecutor {
    relations: RelationRegistry,
}

impl MergeExecutor {
    pub fn new(relations: RelationRegistry) -> Self {
        MergeExecutor { relations }
    }

    /// Claim the secondary for this primary (compare-and-swap on merged_into)
    ///
    /// Succeeds when the secondary is unclaimed or already claimed by the same
    /// primary, so retries stay idempotent. A claim by another primary is a
    /// Conflict and no transfer runs.
    pub fn claim_secondary(&self, conn: &Connection, primary: &Account, secondary: &Account) -> Result<()> {
        if let Some(other) = primary.merged_into.as_deref() {
            return Err(MergeError::Conflict(format!(
                "primary {} was itself merged into {}",
                primary.id, other
            )));
        }

        let claimed = conn.execute(
            "UPDATE accounts SET merged_into = ?1
             WHERE id = ?2 AND (merged_into IS NULL OR merged_into = ?1)",
            params![primary.id, secondary.id],
        )?;

        if claimed == 0 {
            warn!(secondary = %secondary.id, primary = %primary.id, "secondary already claimed by another merge");
            return Err(MergeError::Conflict(format!(
                "account {} is already being merged into a different primary",
                secondary.id
            )));
        }

        Ok(())
    }

    /// Move everything the registry lists from secondary to primary, then soft-disable
    pub fn execute(&self, conn: &Connection, primary: &Account, secondary: &Account, actor: &str) -> MergeResult {
        let merge_id = uuid::Uuid::new_v4().to_string();
        let mut transfer_details = Vec::new();

        for relation in self.relations.for_kind(secondary.kind) {
            let entry = match conn.execute(&relation.reassign_sql(), params![primary.id, secondary.id]) {
                Ok(moved) => {
                    debug!(merge_id = %merge_id, relation = %relation.name, moved, "relation transferred");
                    TransferLedgerEntry::moved(&relation.name, moved as i64)
                }
                Err(e) => {
                    warn!(merge_id = %merge_id, relation = %relation.name, error = %e, "relation transfer failed");
                    TransferLedgerEntry::failed(&relation.name, e.to_string())
                }
            };
            transfer_details.push(entry);
        }

        let secondary_suspended = match self.suspend_secondary(conn, primary, secondary, actor) {
            Ok(()) => true,
            Err(e) => {
                error!(merge_id = %merge_id, secondary = %secondary.id, error = %e, "failed to suspend secondary");
                false
            }
        };

        let total_items_transferred: i64 = transfer_details.iter().map(|e| e.count).sum();
        let success = secondary_suspended && transfer_details.iter().all(|e| e.success);

        info!(
            merge_id = %merge_id,
            primary = %primary.id,
            secondary = %secondary.id,
            success,
            total_items_transferred,
            "merge executed"
        );

        MergeResult {
            merge_id,
            primary_user_id: primary.id.clone(),
            secondary_user_id: secondary.id.clone(),
            success,
            secondary_suspended,
            transfer_details,
            total_items_transferred,
        }
    }

    /// Mark suspended and append a note pointing at the primary
    fn suspend_secondary(&self, conn: &Connection, primary: &Account, secondary: &Account, actor: &str) -> Result<()> {
        let note = merge_note(&primary.id, actor);

        let updated = conn.execute(
            "UPDATE accounts
             SET is_suspended = 1,
                 notes = CASE WHEN notes IS NULL OR notes = '' THEN ?1 ELSE notes || char(10) || ?1 END
             WHERE id = ?2",
            params![note, secondary.id],
        )?;

        if updated == 0 {
            return Err(MergeError::NotFound(format!("account {} vanished during merge", secondary.id)));
        }
        Ok(())
    }
}

impl Default for MergeExecutor {
    fn default() -> Self {
        Self::new(RelationRegistry::standard())
    }
}

fn merge_note(primary_id: &str, actor: &str) -> String {
    let payload = serde_json::json!({
        "merged_into": primary_id,
        "merged_by": actor,
        "merged_at": format_timestamp(&Utc::now()),
    });
    format!("{} {}", MERGE_NOTE_PREFIX, payload)
}

/// Parse the latest merge note on an account, if any
pub fn latest_merge_note(account: &Account) -> Option<serde_json::Value> {
    account
        .notes
        .as_deref()?
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(MERGE_NOTE_PREFIX))
        .and_then(|json| serde_json::from_str(json.trim()).ok())
}
