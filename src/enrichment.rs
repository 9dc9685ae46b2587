// 📊 Enrichment Collector - per-candidate signals for ranking and display
//
// Read-only. Every signal is fetched independently; a failing query degrades
// that one field (zero counts, no auth methods, null last_active) and is
// logged, it never fails the whole group.

use rusqlite::Connection;
use tracing::warn;

use crate::db;
use crate::models::{Account, AccountKind, AuthMethod, CandidateAccount, DataSignature};
use crate::relations::RelationRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureField {
    Contacts,
    FundsCreated,
    Contributions,
    Posts,
    Orders,
    Products,
}

impl SignatureField {
    /// Signature slot fed by a registry relation, if any
    fn for_relation(name: &str) -> Option<Self> {
        match name {
            "contacts" => Some(SignatureField::Contacts),
            "funds_created" => Some(SignatureField::FundsCreated),
            "contributions" => Some(SignatureField::Contributions),
            "posts" => Some(SignatureField::Posts),
            "orders_placed" | "orders_received" => Some(SignatureField::Orders),
            "products" => Some(SignatureField::Products),
            _ => None,
        }
    }
}

impl DataSignature {
    fn add(&mut self, field: SignatureField, value: i64) {
        let slot = match field {
            SignatureField::Contacts => &mut self.contacts,
            SignatureField::FundsCreated => &mut self.funds_created,
            SignatureField::Contributions => &mut self.contributions,
            SignatureField::Posts => &mut self.posts,
            SignatureField::Orders => &mut self.orders,
            SignatureField::Products => &mut self.products,
        };
        *slot += value;
    }
}

/// Reads signals for candidates; counts come from the same relation
/// registry the merge executor moves
pub struct EnrichmentCollector {
    relations: RelationRegistry,
}

impl EnrichmentCollector {
    pub fn new(relations: RelationRegistry) -> Self {
        EnrichmentCollector { relations }
    }

    /// Enrich every candidate; score is left at zero for the selector
    pub fn enrich(&self, conn: &Connection, accounts: Vec<Account>) -> Vec<CandidateAccount> {
        accounts
            .into_iter()
            .map(|account| self.enrich_one(conn, account))
            .collect()
    }

    pub fn enrich_one(&self, conn: &Connection, account: Account) -> CandidateAccount {
        let auth_methods = self.auth_methods(conn, &account.id);
        let signature = self.signature(conn, &account);

        let last_active = match account.kind {
            AccountKind::Client => match db::latest_post_at(conn, &account.id) {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(account_id = %account.id, signal = "last_active", error = %e,
                        "enrichment signal unavailable, using null");
                    None
                }
            },
            AccountKind::Business => None,
        };

        CandidateAccount {
            account,
            auth_methods,
            signature,
            last_active,
            score: 0,
        }
    }

    /// Phone credential, then email credentials tagged by provider
    pub fn auth_methods(&self, conn: &Connection, account_id: &str) -> Vec<AuthMethod> {
        let rows = match db::get_auth_identities(conn, account_id) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(account_id = %account_id, signal = "auth_methods", error = %e,
                    "enrichment signal unavailable, using empty set");
                return Vec::new();
            }
        };

        let mut methods: Vec<AuthMethod> = Vec::new();
        for (method, provider) in rows {
            let resolved = match (method.as_str(), provider) {
                ("phone", _) => AuthMethod::Phone,
                (_, None) => AuthMethod::Email,
                (_, Some(p)) if p.is_empty() || p.eq_ignore_ascii_case("email") => AuthMethod::Email,
                (_, Some(p)) => AuthMethod::Oauth { provider: p },
            };
            if !methods.contains(&resolved) {
                methods.push(resolved);
            }
        }

        // phone first, matching how credentials are presented to operators
        methods.sort_by_key(|m| !matches!(m, AuthMethod::Phone));
        methods
    }

    /// One count query per relation category for the account's kind
    pub fn signature(&self, conn: &Connection, account: &Account) -> DataSignature {
        let mut signature = DataSignature::default();

        for relation in self.relations.for_kind(account.kind) {
            let Some(field) = SignatureField::for_relation(&relation.name) else {
                continue;
            };
            let count = match db::count_owned(conn, &relation.table, &relation.owner_column, &account.id) {
                Ok(count) => count,
                Err(e) => {
                    warn!(account_id = %account.id, signal = %relation.name, error = %e,
                        "count query failed, using zero");
                    0
                }
            };
            signature.add(field, count);
        }

        signature
    }
}

impl Default for EnrichmentCollector {
    fn default() -> Self {
        Self::new(RelationRegistry::standard())
    }
}
