// 🔐 Authorization Gate - caller privilege and country scoping
//
// The caller is always an explicit CallerContext resolved from a bearer
// credential; nothing here reads session or global state. Every Forbidden
// outcome writes an audit entry before returning.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;

use crate::audit::{insert_audit_entry, AuditAction, AuditEntry};
use crate::db::format_timestamp;
use crate::error::{MergeError, Result};
use crate::models::Account;

// ============================================================================
// ROLE
// ============================================================================

/// Ascending privilege levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Moderator,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Role::Member),
            "moderator" => Some(Role::Moderator),
            "admin" => Some(Role::Admin),
            "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum role for duplicate searches
pub const FIND_ROLE: Role = Role::Admin;

/// Minimum role for reading audit trails and merge ledgers
pub const READ_ROLE: Role = Role::Admin;

/// Merges need the highest administrative level
pub const MERGE_ROLE: Role = Role::SuperAdmin;

// ============================================================================
// CALLER CONTEXT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerContext {
    pub actor_id: String,
    pub actor_name: String,
    pub role: Role,

    /// Permitted country codes; empty means unrestricted
    #[serde(default)]
    pub countries: Vec<String>,
}

impl CallerContext {
    pub fn new(actor_id: &str, role: Role) -> Self {
        CallerContext {
            actor_id: actor_id.to_string(),
            actor_name: actor_id.to_string(),
            role,
            countries: Vec::new(),
        }
    }

    pub fn with_countries(mut self, countries: &[&str]) -> Self {
        self.countries = countries.iter().map(|c| c.to_uppercase()).collect();
        self
    }

    pub fn is_country_scoped(&self) -> bool {
        !self.countries.is_empty()
    }

    /// Whether the account's country is inside this caller's scope
    ///
    /// A scoped caller never covers an account with no country code.
    pub fn can_access(&self, account: &Account) -> bool {
        if !self.is_country_scoped() {
            return true;
        }
        match account.country_code.as_deref() {
            Some(code) => self.countries.iter().any(|c| c.eq_ignore_ascii_case(code)),
            None => false,
        }
    }
}

// ============================================================================
// CREDENTIALS
// ============================================================================

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Store a bearer token for a caller and return the plaintext token
pub fn issue_token(conn: &Connection, caller: &CallerContext) -> Result<String> {
    let token = format!("am_{}", uuid::Uuid::new_v4().simple());

    conn.execute(
        "INSERT INTO api_tokens (token_hash, actor_id, actor_name, role, countries, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            hash_token(&token),
            caller.actor_id,
            caller.actor_name,
            caller.role.as_str(),
            caller.countries.join(","),
            format_timestamp(&Utc::now()),
        ],
    )?;

    Ok(token)
}

/// Resolve an opaque bearer credential to a caller
pub fn resolve_caller(conn: &Connection, token: Option<&str>) -> Result<CallerContext> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| MergeError::Unauthenticated("missing bearer credential".to_string()))?;

    let row = conn
        .query_row(
            "SELECT actor_id, actor_name, role, countries FROM api_tokens WHERE token_hash = ?1",
            [hash_token(token)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;

    let (actor_id, actor_name, role, countries) =
        row.ok_or_else(|| MergeError::Unauthenticated("unknown bearer credential".to_string()))?;

    let role = Role::parse(&role)
        .ok_or_else(|| MergeError::Internal(format!("token for {} has unknown role {}", actor_id, role)))?;

    let countries = countries
        .unwrap_or_default()
        .split(',')
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();

    Ok(CallerContext {
        actor_id,
        actor_name,
        role,
        countries,
    })
}

// ============================================================================
// GATE
// ============================================================================

fn require_role(caller: &CallerContext, minimum: Role) -> Result<()> {
    if caller.role < minimum {
        return Err(MergeError::Forbidden(format!(
            "role {} is below required {}",
            caller.role, minimum
        )));
    }
    Ok(())
}

/// Role check for non-merge operations; a rejection is audited against `target_id`
///
/// `operation` names what was attempted (`find_duplicates`, `read_audit`, ...).
pub fn authorize_role(
    conn: &Connection,
    caller: &CallerContext,
    minimum: Role,
    operation: &str,
    target_id: &str,
) -> Result<()> {
    let Err(err) = require_role(caller, minimum) else {
        return Ok(());
    };

    warn!(actor = %caller.actor_id, role = %caller.role, operation, "request rejected: insufficient role");

    let entry = AuditEntry::new(
        &caller.actor_id,
        AuditAction::UnauthorizedAccessAttempt,
        target_id,
        format!(
            "{} ({}) attempted {} on {} without {} privilege",
            caller.actor_name, caller.role, operation, target_id, minimum
        ),
        serde_json::json!({
            "operation": operation,
            "role": caller.role,
            "required_role": minimum,
        }),
    );
    insert_audit_entry(conn, &entry)?;
    Err(err)
}

/// Role check for the merge path; a rejection is audited against the secondary
pub fn authorize_merge_role(
    conn: &Connection,
    caller: &CallerContext,
    primary_id: &str,
    secondary_id: &str,
) -> Result<()> {
    if let Err(err) = require_role(caller, MERGE_ROLE) {
        warn!(actor = %caller.actor_id, role = %caller.role, "merge rejected: insufficient role");

        let entry = AuditEntry::new(
            &caller.actor_id,
            AuditAction::UnauthorizedMergeAttempt,
            secondary_id,
            format!(
                "{} ({}) attempted to merge {} into {} without {} privilege",
                caller.actor_name, caller.role, secondary_id, primary_id, MERGE_ROLE
            ),
            serde_json::json!({
                "primary_user_id": primary_id,
                "secondary_user_id": secondary_id,
                "role": caller.role,
                "required_role": MERGE_ROLE,
            }),
        );
        insert_audit_entry(conn, &entry)?;
        return Err(err);
    }
    Ok(())
}

/// Country-scope check on both accounts; the first blocked account is audited
pub fn authorize_merge_scope(
    conn: &Connection,
    caller: &CallerContext,
    primary: &Account,
    secondary: &Account,
) -> Result<()> {
    let blocked = [("primary", primary), ("secondary", secondary)]
        .into_iter()
        .find(|(_, account)| !caller.can_access(account));

    let Some((position, account)) = blocked else {
        return Ok(());
    };

    let country = account.country_code.clone().unwrap_or_else(|| "unknown".to_string());
    warn!(
        actor = %caller.actor_id,
        account_id = %account.id,
        country = %country,
        "merge rejected: account outside caller country scope"
    );

    let entry = AuditEntry::new(
        &caller.actor_id,
        AuditAction::UnauthorizedCountryAccess,
        &account.id,
        format!(
            "{} attempted to merge {} account {} ({}) outside permitted countries [{}]",
            caller.actor_name,
            position,
            account.display_name(),
            country,
            caller.countries.join(", ")
        ),
        serde_json::json!({
            "primary_user_id": primary.id,
            "secondary_user_id": secondary.id,
            "blocked_account_id": account.id,
            "blocked_position": position,
            "account_country": account.country_code,
            "permitted_countries": caller.countries,
        }),
    );
    insert_audit_entry(conn, &entry)?;

    Err(MergeError::Forbidden(format!(
        "{} account {} is outside the permitted countries",
        position, account.id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::audit_entries_by_action;
    use crate::db::setup_database;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn account_in(country: Option<&str>) -> Account {
        let mut account = Account::business("Awa Couture", None);
        account.country_code = country.map(str::to_string);
        account
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::SuperAdmin > Role::Admin);
        assert!(Role::Admin > Role::Moderator);
        assert!(require_role(&CallerContext::new("a", Role::Admin), FIND_ROLE).is_ok());
        assert!(require_role(&CallerContext::new("a", Role::Admin), MERGE_ROLE).is_err());
    }

    #[test]
    fn test_token_roundtrip() {
        let conn = setup();
        let caller = CallerContext::new("ops-1", Role::SuperAdmin).with_countries(&["sn", "CI"]);
        let token = issue_token(&conn, &caller).unwrap();

        let resolved = resolve_caller(&conn, Some(&token)).unwrap();
        assert_eq!(resolved, caller);
        assert_eq!(resolved.countries, vec!["SN", "CI"]);
    }

    #[test]
    fn test_unknown_or_missing_token() {
        let conn = setup();
        assert!(matches!(resolve_caller(&conn, None), Err(MergeError::Unauthenticated(_))));
        assert!(matches!(resolve_caller(&conn, Some("  ")), Err(MergeError::Unauthenticated(_))));
        assert!(matches!(
            resolve_caller(&conn, Some("am_bogus")),
            Err(MergeError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_can_access() {
        let unrestricted = CallerContext::new("root", Role::SuperAdmin);
        let scoped = CallerContext::new("sn", Role::SuperAdmin).with_countries(&["SN"]);

        assert!(unrestricted.can_access(&account_in(None)));
        assert!(scoped.can_access(&account_in(Some("sn"))));
        assert!(!scoped.can_access(&account_in(Some("CI"))));
        assert!(!scoped.can_access(&account_in(None)));
    }

    #[test]
    fn test_scope_block_audits_blocked_account() {
        let conn = setup();
        let caller = CallerContext::new("sn-admin", Role::SuperAdmin).with_countries(&["SN"]);
        let primary = account_in(Some("SN"));
        let secondary = account_in(Some("CI"));

        let err = authorize_merge_scope(&conn, &caller, &primary, &secondary).unwrap_err();
        assert!(matches!(err, MergeError::Forbidden(_)));

        let audits = audit_entries_by_action(&conn, AuditAction::UnauthorizedCountryAccess).unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].target_id, secondary.id);
        assert_eq!(audits[0].metadata["blocked_position"], "secondary");
    }

    #[test]
    fn test_role_rejection_is_audited() {
        let conn = setup();
        let caller = CallerContext::new("mod-1", Role::Admin);

        let err = authorize_merge_role(&conn, &caller, "p", "s").unwrap_err();
        assert!(matches!(err, MergeError::Forbidden(_)));

        let audits = audit_entries_by_action(&conn, AuditAction::UnauthorizedMergeAttempt).unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].target_id, "s");
    }

    #[test]
    fn test_read_rejection_is_audited() {
        let conn = setup();
        let moderator = CallerContext::new("mod-1", Role::Moderator);

        let err = authorize_role(&conn, &moderator, READ_ROLE, "read_audit", "acct-1").unwrap_err();
        assert!(matches!(err, MergeError::Forbidden(_)));

        let audits = audit_entries_by_action(&conn, AuditAction::UnauthorizedAccessAttempt).unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].target_id, "acct-1");
        assert_eq!(audits[0].metadata["operation"], "read_audit");

        authorize_role(&conn, &CallerContext::new("admin-1", Role::Admin), READ_ROLE, "read_audit", "acct-1").unwrap();
        assert_eq!(audit_entries_by_action(&conn, AuditAction::UnauthorizedAccessAttempt).unwrap().len(), 1);
    }
}
