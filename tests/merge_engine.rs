// End-to-end scenarios: search → rank → explicit merge → ledger/audit

use account_merge::db::{count_owned, insert_owned, insert_post};
use account_merge::merge::latest_merge_note;
use account_merge::{
    audit_entries_by_action, get_account, get_merge_ledger, insert_account, setup_database, Account,
    AccountKind, AccountMergeEngine, AuditAction, CallerContext, Confidence, EngineConfig,
    FindDuplicatesRequest, MergeError, MergeRequest, RelationDescriptor, RelationRegistry, Role,
};
use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::Connection;

fn setup() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    conn
}

fn super_admin() -> CallerContext {
    CallerContext::new("ops-root", Role::SuperAdmin)
}

/// Client A: 10 contacts, 2 funds, 5 posts, created 2023-01-01
/// Client B: 1 contact, nothing else, created 2023-06-01
fn seed_awa_pair(conn: &Connection) -> (Account, Account) {
    let birthday = NaiveDate::from_ymd_opt(1990, 5, 2).unwrap();

    let mut a = Account::client("Awa", "Diop", birthday);
    a.created_at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    a.country_code = Some("SN".to_string());
    let mut b = Account::client("Awa", "Diop", birthday);
    b.created_at = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
    b.country_code = Some("SN".to_string());

    insert_account(conn, &a).unwrap();
    insert_account(conn, &b).unwrap();

    for _ in 0..10 {
        insert_owned(conn, "contacts", "owner_id", &a.id).unwrap();
    }
    for _ in 0..2 {
        insert_owned(conn, "funds", "creator_id", &a.id).unwrap();
    }
    for day in 1..=5 {
        insert_post(conn, &a.id, Utc.with_ymd_and_hms(2024, 1, day, 8, 0, 0).unwrap()).unwrap();
    }
    insert_owned(conn, "contacts", "owner_id", &b.id).unwrap();

    (a, b)
}

fn awa_search() -> FindDuplicatesRequest {
    FindDuplicatesRequest {
        kind: Some(AccountKind::Client),
        first_name: Some("Awa".to_string()),
        birthday: Some("1990-05-02".to_string()),
        ..Default::default()
    }
}

#[test]
fn test_awa_scenario_find_then_merge() {
    let conn = setup();
    let (a, b) = seed_awa_pair(&conn);
    let engine = AccountMergeEngine::default();

    let response = engine.find_duplicates(&conn, &super_admin(), &awa_search()).unwrap();
    assert_eq!(response.duplicates.len(), 1);

    let group = &response.duplicates[0];
    assert_eq!(group.confidence, Confidence::High);
    assert_eq!(group.match_criteria, vec!["first_name", "birthday"]);
    assert_eq!(group.recommended_primary, a.id);
    assert_eq!(group.accounts[0].score, 19);
    assert_eq!(group.accounts[1].score, 1);
    assert_eq!(
        group.accounts[0].last_active,
        Some(Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap())
    );

    // finding alone never merges anything
    assert!(!get_account(&conn, &b.id).unwrap().unwrap().is_suspended);

    let result = engine
        .merge_accounts(&conn, &super_admin(), &MergeRequest::new(&a.id, &b.id))
        .unwrap();

    assert!(result.success);
    assert_eq!(result.total_items_transferred, 1);
    assert_eq!(count_owned(&conn, "contacts", "owner_id", &a.id).unwrap(), 11);
    assert_eq!(count_owned(&conn, "contacts", "owner_id", &b.id).unwrap(), 0);

    let retired = get_account(&conn, &b.id).unwrap().unwrap();
    assert!(retired.is_suspended);
    let note = latest_merge_note(&retired).unwrap();
    assert_eq!(note["merged_into"], a.id.as_str());
    assert_eq!(note["merged_by"], "ops-root");

    let ledger = get_merge_ledger(&conn, &result.merge_id).unwrap().unwrap();
    assert!(ledger.success);
    assert_eq!(ledger.primary_name, "Awa Diop");
    assert_eq!(ledger.actor, "ops-root");
    assert_eq!(ledger.entries.len(), result.transfer_details.len());

    assert_eq!(audit_entries_by_action(&conn, AuditAction::AccountMerge).unwrap().len(), 1);

    // the retired account no longer shows up as a duplicate
    let after = engine.find_duplicates(&conn, &super_admin(), &awa_search()).unwrap();
    assert!(after.duplicates.is_empty());
}

#[test]
fn test_selection_is_deterministic() {
    let conn = setup();
    let (a, _) = seed_awa_pair(&conn);
    let engine = AccountMergeEngine::default();

    let first = engine.find_duplicates(&conn, &super_admin(), &awa_search()).unwrap();
    let second = engine.find_duplicates(&conn, &super_admin(), &awa_search()).unwrap();
    assert_eq!(first.duplicates[0].recommended_primary, second.duplicates[0].recommended_primary);
    assert_eq!(first.duplicates[0].recommended_primary, a.id);
}

#[test]
fn test_verified_business_outranks_busier_unverified() {
    let conn = setup();

    let mut verified = Account::business("Awa Couture", Some("+221 77 123 45 67"));
    verified.is_verified = true;
    let busy = Account::business("Awa Couture Dakar", Some("77 123 45 67"));
    insert_account(&conn, &verified).unwrap();
    insert_account(&conn, &busy).unwrap();
    for _ in 0..50 {
        insert_owned(&conn, "products", "seller_id", &busy.id).unwrap();
    }

    let request = FindDuplicatesRequest {
        kind: Some(AccountKind::Business),
        business_name: Some("awa couture".to_string()),
        business_phone: Some("+221771234567".to_string()),
        ..Default::default()
    };
    let response = AccountMergeEngine::default()
        .find_duplicates(&conn, &super_admin(), &request)
        .unwrap();

    let group = &response.duplicates[0];
    assert_eq!(group.recommended_primary, verified.id);
    assert_eq!(group.accounts[1].score, 100);
    assert_eq!(group.match_criteria, vec!["business_name", "business_phone"]);
}

#[test]
fn test_partial_failure_keeps_completed_transfers() {
    let conn = setup();
    let (a, b) = seed_awa_pair(&conn);
    insert_owned(&conn, "badges", "holder_id", &b.id).unwrap();
    insert_owned(&conn, "notifications", "recipient_id", &b.id).unwrap();

    let mut relations = RelationRegistry::new();
    relations.register(RelationDescriptor::new("contacts", "contacts", "owner_id", &[AccountKind::Client]));
    relations.register(RelationDescriptor::new("badges", "badges", "holder_id", &[AccountKind::Client]));
    // points at a table that does not exist
    relations.register(RelationDescriptor::new("loyalty_points", "loyalty_points", "account_id", &[AccountKind::Client]));
    relations.register(RelationDescriptor::new("notifications", "notifications", "recipient_id", &[AccountKind::Client]));

    let engine = AccountMergeEngine::with_relations(&EngineConfig::default(), relations);
    let result = engine
        .merge_accounts(&conn, &super_admin(), &MergeRequest::new(&a.id, &b.id))
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.failed_relations(), vec!["loyalty_points"]);
    for entry in result.transfer_details.iter().filter(|e| e.relation != "loyalty_points") {
        assert!(entry.success);
        assert_eq!(entry.count, 1, "{} should have moved one row", entry.relation);
    }
    assert_eq!(result.total_items_transferred, 3);
    assert_eq!(count_owned(&conn, "badges", "holder_id", &a.id).unwrap(), 1);
    assert!(get_account(&conn, &b.id).unwrap().unwrap().is_suspended);

    let ledger = get_merge_ledger(&conn, &result.merge_id).unwrap().unwrap();
    assert!(!ledger.success);
    let failed = ledger.entries.iter().find(|e| e.relation == "loyalty_points").unwrap();
    assert!(failed.error.as_deref().unwrap().contains("loyalty_points"));
}

#[test]
fn test_country_scoped_admin_is_blocked_and_audited() {
    let conn = setup();
    let (a, mut b) = seed_awa_pair(&conn);
    b.country_code = Some("CI".to_string());
    conn.execute("UPDATE accounts SET country_code = 'CI' WHERE id = ?1", [&b.id]).unwrap();

    let scoped = CallerContext::new("ops-dakar", Role::SuperAdmin).with_countries(&["SN"]);
    let err = AccountMergeEngine::default()
        .merge_accounts(&conn, &scoped, &MergeRequest::new(&a.id, &b.id))
        .unwrap_err();
    assert!(matches!(err, MergeError::Forbidden(_)));

    let audits = audit_entries_by_action(&conn, AuditAction::UnauthorizedCountryAccess).unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].target_id, b.id);
    assert_eq!(audits[0].actor, "ops-dakar");

    // rejected before any mutation
    assert_eq!(count_owned(&conn, "contacts", "owner_id", &b.id).unwrap(), 1);
    let untouched = get_account(&conn, &b.id).unwrap().unwrap();
    assert!(!untouched.is_suspended);
    assert!(untouched.merged_into.is_none());
    assert!(audit_entries_by_action(&conn, AuditAction::AccountMerge).unwrap().is_empty());
}

#[test]
fn test_competing_merge_into_other_primary_conflicts() {
    let conn = setup();
    let (a, b) = seed_awa_pair(&conn);
    let c = Account::client("Awa", "Diop", NaiveDate::from_ymd_opt(1990, 5, 2).unwrap());
    insert_account(&conn, &c).unwrap();

    let engine = AccountMergeEngine::default();
    engine
        .merge_accounts(&conn, &super_admin(), &MergeRequest::new(&a.id, &b.id))
        .unwrap();

    let err = engine
        .merge_accounts(&conn, &super_admin(), &MergeRequest::new(&c.id, &b.id))
        .unwrap_err();
    assert!(matches!(err, MergeError::Conflict(_)));

    // same pair again is a harmless retry
    let retry = engine
        .merge_accounts(&conn, &super_admin(), &MergeRequest::new(&a.id, &b.id))
        .unwrap();
    assert!(retry.success);
    assert_eq!(retry.total_items_transferred, 0);
}

#[test]
fn test_business_search_validation() {
    let conn = setup();
    let request = FindDuplicatesRequest {
        kind: Some(AccountKind::Business),
        ..Default::default()
    };
    let err = AccountMergeEngine::default()
        .find_duplicates(&conn, &super_admin(), &request)
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}
