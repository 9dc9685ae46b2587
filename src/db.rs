use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{Account, AccountKind, AuthMethod};
use crate::normalize::{normalize_name, phone_digits};

const ACCOUNT_COLUMNS: &str = "id, kind, first_name, last_name, business_name, phone, city,
     birthday, is_verified, is_suspended, notes, country_code, owner_id, merged_into, created_at";

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Accounts (clients and businesses share one table, split by kind)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('client', 'business')),
            first_name TEXT,
            last_name TEXT,
            business_name TEXT,
            phone TEXT,
            city TEXT,
            birthday TEXT,
            is_verified INTEGER NOT NULL DEFAULT 0,
            is_suspended INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            country_code TEXT,
            owner_id TEXT,
            merged_into TEXT,
            created_at TEXT NOT NULL,
            name_key TEXT,
            phone_key TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_identities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL,
            method TEXT NOT NULL CHECK (method IN ('phone', 'email')),
            provider TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Owned-record relations (reassigned during a merge)
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS contacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            name TEXT
        );
        CREATE TABLE IF NOT EXISTS funds (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id TEXT NOT NULL,
            title TEXT
        );
        CREATE TABLE IF NOT EXISTS contributions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contributor_id TEXT NOT NULL,
            fund_id INTEGER,
            amount REAL NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id TEXT NOT NULL,
            body TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id TEXT NOT NULL,
            post_id INTEGER,
            body TEXT
        );
        CREATE TABLE IF NOT EXISTS reactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL,
            post_id INTEGER,
            reaction TEXT
        );
        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_id TEXT NOT NULL,
            body TEXT
        );
        CREATE TABLE IF NOT EXISTS favorites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL,
            target_id TEXT
        );
        CREATE TABLE IF NOT EXISTS badges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            holder_id TEXT NOT NULL,
            badge TEXT
        );
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            seller_id TEXT NOT NULL,
            name TEXT
        );
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            buyer_id TEXT,
            business_id TEXT
        );
        CREATE TABLE IF NOT EXISTS reciprocity_scores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL,
            score REAL NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS community_scores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL,
            score REAL NOT NULL DEFAULT 0
        );",
    )?;

    // ==========================================================================
    // Caller credentials (bearer tokens stored as SHA-256 digests)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS api_tokens (
            token_hash TEXT PRIMARY KEY,
            actor_id TEXT NOT NULL,
            actor_name TEXT NOT NULL,
            role TEXT NOT NULL,
            countries TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Audit log (append-only) and merge ledger
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            target_id TEXT NOT NULL,
            description TEXT NOT NULL,
            metadata TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS audit_log_no_update
         BEFORE UPDATE ON audit_log
         BEGIN SELECT RAISE(ABORT, 'audit_log is append-only'); END;
         CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
         BEFORE DELETE ON audit_log
         BEGIN SELECT RAISE(ABORT, 'audit_log is append-only'); END;",
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS merge_ledger (
            merge_id TEXT PRIMARY KEY,
            primary_id TEXT NOT NULL,
            secondary_id TEXT NOT NULL,
            primary_name TEXT NOT NULL,
            secondary_name TEXT NOT NULL,
            actor TEXT NOT NULL,
            success INTEGER NOT NULL,
            total_items_transferred INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS merge_ledger_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            merge_id TEXT NOT NULL,
            relation TEXT NOT NULL,
            count INTEGER NOT NULL,
            success INTEGER NOT NULL,
            error TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_accounts_kind ON accounts(kind);
         CREATE INDEX IF NOT EXISTS idx_accounts_birthday ON accounts(birthday);
         CREATE INDEX IF NOT EXISTS idx_auth_account ON auth_identities(account_id);
         CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id);
         CREATE INDEX IF NOT EXISTS idx_audit_target ON audit_log(target_id);
         CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action);
         CREATE INDEX IF NOT EXISTS idx_ledger_entries_merge ON merge_ledger_entries(merge_id);",
    )?;

    Ok(())
}

// ============================================================================
// ACCOUNTS
// ============================================================================

pub fn insert_account(conn: &Connection, account: &Account) -> Result<()> {
    conn.execute(
        "INSERT INTO accounts (
            id, kind, first_name, last_name, business_name, phone, city,
            birthday, is_verified, is_suspended, notes, country_code, owner_id,
            merged_into, created_at, name_key, phone_key
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            account.id,
            account.kind.as_str(),
            account.first_name,
            account.last_name,
            account.business_name,
            account.phone,
            account.city,
            account.birthday.map(|d| d.format("%Y-%m-%d").to_string()),
            account.is_verified,
            account.is_suspended,
            account.notes,
            account.country_code,
            account.owner_id,
            account.merged_into,
            format_timestamp(&account.created_at),
            name_key(account),
            account.phone.as_deref().map(phone_digits).filter(|p| !p.is_empty()),
        ],
    )?;

    Ok(())
}

pub fn get_account(conn: &Connection, id: &str) -> Result<Option<Account>> {
    let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
    let account = conn.query_row(&sql, [id], account_from_row).optional()?;
    Ok(account)
}

/// Folded name stored alongside the account for candidate lookups
fn name_key(account: &Account) -> Option<String> {
    let name = match account.kind {
        AccountKind::Client => account.first_name.as_deref(),
        AccountKind::Business => account.business_name.as_deref(),
    };
    name.map(normalize_name).filter(|n| !n.is_empty())
}

/// Live clients born on `birthday`, oldest first
///
/// Name comparison happens in Rust: SQLite's `lower()` only folds ASCII.
pub fn find_clients_by_birthday(conn: &Connection, birthday: NaiveDate) -> Result<Vec<Account>> {
    let sql = format!(
        "SELECT {} FROM accounts
         WHERE kind = 'client'
           AND merged_into IS NULL
           AND birthday = ?1
         ORDER BY created_at ASC",
        ACCOUNT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let accounts = stmt
        .query_map([birthday.format("%Y-%m-%d").to_string()], account_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(accounts)
}

/// Live businesses whose stored keys contain either search key, oldest first
///
/// Keys must already be folded (`normalize_name`, `phone_digits`); a `None`
/// key never matches.
pub fn find_businesses_by_keys(
    conn: &Connection,
    name_key: Option<&str>,
    phone_key: Option<&str>,
) -> Result<Vec<Account>> {
    let sql = format!(
        "SELECT {} FROM accounts
         WHERE kind = 'business'
           AND merged_into IS NULL
           AND (instr(name_key, ?1) > 0 OR instr(phone_key, ?2) > 0)
         ORDER BY created_at ASC",
        ACCOUNT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let accounts = stmt
        .query_map(params![name_key, phone_key], account_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(accounts)
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let kind_str: String = row.get(1)?;
    let kind = AccountKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("unknown account kind: {}", kind_str).into(),
        )
    })?;

    let birthday_str: Option<String> = row.get(7)?;
    let birthday = birthday_str
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    let created_at_str: String = row.get(14)?;
    let created_at = parse_timestamp(&created_at_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e)))?;

    Ok(Account {
        id: row.get(0)?,
        kind,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        business_name: row.get(4)?,
        phone: row.get(5)?,
        city: row.get(6)?,
        birthday,
        is_verified: row.get(8)?,
        is_suspended: row.get(9)?,
        notes: row.get(10)?,
        country_code: row.get(11)?,
        owner_id: row.get(12)?,
        merged_into: row.get(13)?,
        created_at,
    })
}

/// Canonical stored timestamp: UTC, milliseconds, `Z` suffix
///
/// Matches the `strftime('%Y-%m-%dT%H:%M:%fZ')` column defaults so text
/// comparison and `MAX()` order correctly.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// AUTH IDENTITIES
// ============================================================================

pub fn add_auth_identity(conn: &Connection, account_id: &str, method: &AuthMethod) -> Result<()> {
    let (method_str, provider) = match method {
        AuthMethod::Phone => ("phone", None),
        AuthMethod::Email => ("email", None),
        AuthMethod::Oauth { provider } => ("email", Some(provider.as_str())),
    };

    conn.execute(
        "INSERT INTO auth_identities (account_id, method, provider) VALUES (?1, ?2, ?3)",
        params![account_id, method_str, provider],
    )?;

    Ok(())
}

/// Raw (method, provider) rows for one account
pub fn get_auth_identities(
    conn: &Connection,
    account_id: &str,
) -> Result<Vec<(String, Option<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT method, provider FROM auth_identities WHERE account_id = ?1 ORDER BY id",
    )?;

    let rows = stmt
        .query_map([account_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

// ============================================================================
// OWNED RECORDS
// ============================================================================

/// Count rows in `table` whose `column` points at `owner_id`
///
/// `table` and `column` come from static registries, never from callers.
pub fn count_owned(conn: &Connection, table: &str, column: &str, owner_id: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", table, column);
    let count: i64 = conn.query_row(&sql, [owner_id], |row| row.get(0))?;
    Ok(count)
}

/// Insert a bare owned row (fixtures, imports from the account subsystem)
pub fn insert_owned(conn: &Connection, table: &str, column: &str, owner_id: &str) -> Result<i64> {
    let sql = format!("INSERT INTO {} ({}) VALUES (?1)", table, column);
    conn.execute(&sql, [owner_id])?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_post(conn: &Connection, author_id: &str, created_at: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO posts (author_id, created_at) VALUES (?1, ?2)",
        params![author_id, format_timestamp(&created_at)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn latest_post_at(conn: &Connection, author_id: &str) -> Result<Option<DateTime<Utc>>> {
    let latest: Option<String> = conn.query_row(
        "SELECT MAX(created_at) FROM posts WHERE author_id = ?1",
        [author_id],
        |row| row.get(0),
    )?;

    latest
        .map(|s| parse_timestamp(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)).into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn birthday() -> NaiveDate {
        NaiveDate::from_ymd_opt(1990, 5, 2).unwrap()
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_account_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut awa = Account::client("Awa", "Diop", birthday());
        awa.country_code = Some("SN".to_string());
        awa.created_at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        insert_account(&conn, &awa).unwrap();

        let loaded = get_account(&conn, &awa.id).unwrap().unwrap();
        assert_eq!(loaded, awa);
        assert!(get_account(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_find_clients_by_birthday() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        insert_account(&conn, &Account::client("Awa", "Diop", birthday())).unwrap();
        insert_account(&conn, &Account::client("Fatou", "Ndiaye", birthday())).unwrap();
        insert_account(&conn, &Account::client("Awa", "Fall", NaiveDate::from_ymd_opt(1991, 5, 2).unwrap())).unwrap();

        let found = find_clients_by_birthday(&conn, birthday()).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_find_businesses_by_keys_narrows_in_sql() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let elegance = Account::business("ÉLÉGANCE Abidjan", Some("+225 07 11 22 33"));
        let by_phone = Account::business("AC Tailoring", Some("+221 77 123 45 67"));
        let unrelated = Account::business("Baobab Foods", Some("+221 70 999 99 99"));
        for account in [&elegance, &by_phone, &unrelated] {
            insert_account(&conn, account).unwrap();
        }

        let found = find_businesses_by_keys(&conn, Some("élégance"), None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, elegance.id);

        let found = find_businesses_by_keys(&conn, Some("élégance"), Some("771234")).unwrap();
        let ids: Vec<_> = found.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![elegance.id.as_str(), by_phone.id.as_str()]);

        assert!(find_businesses_by_keys(&conn, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_count_and_latest_post() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        insert_owned(&conn, "contacts", "owner_id", "a").unwrap();
        insert_owned(&conn, "contacts", "owner_id", "a").unwrap();
        assert_eq!(count_owned(&conn, "contacts", "owner_id", "a").unwrap(), 2);
        assert_eq!(count_owned(&conn, "contacts", "owner_id", "b").unwrap(), 0);

        assert!(latest_post_at(&conn, "a").unwrap().is_none());
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        insert_post(&conn, "a", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()).unwrap();
        insert_post(&conn, "a", later).unwrap();
        assert_eq!(latest_post_at(&conn, "a").unwrap(), Some(later));
    }

    #[test]
    fn test_timestamps_share_one_stored_format() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        // default-stamped row (now) must sort after an explicit 2020 row
        insert_post(&conn, "a", Utc.with_ymd_and_hms(2020, 1, 1, 23, 59, 59).unwrap()).unwrap();
        conn.execute("INSERT INTO posts (author_id) VALUES ('a')", []).unwrap();

        let stored: Vec<String> = conn
            .prepare("SELECT created_at FROM posts ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(stored[0], "2020-01-01T23:59:59.000Z");
        assert_eq!(stored[0].len(), stored[1].len());
        assert!(stored[1].ends_with('Z'));

        let latest = latest_post_at(&conn, "a").unwrap().unwrap();
        assert!(latest > Utc.with_ymd_and_hms(2020, 1, 1, 23, 59, 59).unwrap());
    }

    #[test]
    fn test_audit_log_is_append_only() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        conn.execute(
            "INSERT INTO audit_log (event_id, timestamp, actor, action, target_id, description, metadata)
             VALUES ('e1', '2024-01-01T00:00:00Z', 'root', 'account_merge', 't', 'd', '{}')",
            [],
        )
        .unwrap();

        assert!(conn.execute("UPDATE audit_log SET actor = 'x'", []).is_err());
        assert!(conn.execute("DELETE FROM audit_log", []).is_err());
    }
}
