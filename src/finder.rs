// 🔍 Duplicate Finder - candidate lookup for one validated search
//
// Clients:    exact birthday in SQL, case-insensitive first name in Rust
// Businesses: substring business name OR normalized-phone substring,
//             either match is sufficient; stored match keys narrow the
//             rows in SQL, the normalizer has the final say
// Accounts already folded into another primary are never candidates.

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db;
use crate::error::{MergeError, Result};
use crate::models::{AccountKind, Account, Confidence, FindDuplicatesRequest};
use crate::normalize::{name_contains, names_match, normalize_name, phone_contains, phone_digits};

/// A validated search
#[derive(Debug, Clone, PartialEq)]
pub enum SearchSpec {
    Client {
        first_name: String,
        birthday: NaiveDate,
    },
    Business {
        name: Option<String>,
        phone: Option<String>,
    },
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl SearchSpec {
    pub fn from_request(request: &FindDuplicatesRequest) -> Result<Self> {
        let kind = request
            .kind
            .ok_or_else(|| MergeError::InvalidRequest("type is required (client or business)".to_string()))?;

        match kind {
            AccountKind::Client => {
                let first_name = non_empty(&request.first_name);
                let birthday = non_empty(&request.birthday);

                let (Some(first_name), Some(birthday)) = (first_name, birthday) else {
                    return Err(MergeError::InvalidRequest(
                        "first_name and birthday are required for client searches".to_string(),
                    ));
                };

                let birthday = NaiveDate::parse_from_str(&birthday, "%Y-%m-%d").map_err(|_| {
                    MergeError::InvalidRequest(format!("birthday must be YYYY-MM-DD, got {}", birthday))
                })?;

                Ok(SearchSpec::Client { first_name, birthday })
            }
            AccountKind::Business => {
                let name = non_empty(&request.business_name);
                // a phone with no digits cannot match anything meaningfully
                let phone = non_empty(&request.business_phone).filter(|p| !phone_digits(p).is_empty());

                if name.is_none() && phone.is_none() {
                    return Err(MergeError::InvalidRequest(
                        "business_name or business_phone is required for business searches".to_string(),
                    ));
                }

                Ok(SearchSpec::Business { name, phone })
            }
        }
    }

    pub fn kind(&self) -> AccountKind {
        match self {
            SearchSpec::Client { .. } => AccountKind::Client,
            SearchSpec::Business { .. } => AccountKind::Business,
        }
    }

    /// Fields that were supplied and therefore produced the group
    pub fn match_criteria(&self) -> Vec<String> {
        match self {
            SearchSpec::Client { .. } => vec!["first_name".to_string(), "birthday".to_string()],
            SearchSpec::Business { name, phone } => {
                let mut criteria = Vec::new();
                if name.is_some() {
                    criteria.push("business_name".to_string());
                }
                if phone.is_some() {
                    criteria.push("business_phone".to_string());
                }
                criteria
            }
        }
    }

    /// Client name+birthday and business name+phone searches are high confidence
    pub fn confidence(&self) -> Confidence {
        match self {
            SearchSpec::Client { .. } => Confidence::High,
            SearchSpec::Business { name: Some(_), phone: Some(_) } => Confidence::High,
            SearchSpec::Business { .. } => Confidence::Medium,
        }
    }
}

pub struct DuplicateFinder;

impl DuplicateFinder {
    pub fn new() -> Self {
        DuplicateFinder
    }

    pub fn find_candidates(&self, conn: &Connection, spec: &SearchSpec) -> Result<Vec<Account>> {
        match spec {
            SearchSpec::Client { first_name, birthday } => {
                let candidates = db::find_clients_by_birthday(conn, *birthday)?
                    .into_iter()
                    .filter(|account| {
                        account
                            .first_name
                            .as_deref()
                            .is_some_and(|candidate| names_match(candidate, first_name))
                    })
                    .collect();
                Ok(candidates)
            }
            SearchSpec::Business { name, phone } => {
                let name_key = name.as_deref().map(normalize_name);
                let phone_key = phone.as_deref().map(phone_digits);

                let candidates = db::find_businesses_by_keys(conn, name_key.as_deref(), phone_key.as_deref())?
                    .into_iter()
                    .filter(|account| business_matches(account, name.as_deref(), phone.as_deref()))
                    .collect();
                Ok(candidates)
            }
        }
    }
}

impl Default for DuplicateFinder {
    fn default() -> Self {
        Self::new()
    }
}

fn business_matches(account: &Account, name: Option<&str>, phone: Option<&str>) -> bool {
    let name_hit = match (name, account.business_name.as_deref()) {
        (Some(needle), Some(haystack)) => name_contains(haystack, needle),
        _ => false,
    };
    let phone_hit = match (phone, account.phone.as_deref()) {
        (Some(needle), Some(haystack)) => phone_contains(haystack, needle),
        _ => false,
    };
    name_hit || phone_hit
}
