// 🏆 Primary Selector - deterministic ranking of duplicate candidates
//
// Clients:    contacts + 2×funds + posts, higher first, oldest wins ties
// Businesses: verified before unverified, then 2×products + orders,
//             oldest wins ties
// Weights come from RankingWeights. Final tie-break is the account id so the
// order never depends on input order.

use std::cmp::Ordering;

use crate::config::RankingWeights;
use crate::models::{AccountKind, CandidateAccount};

pub struct PrimarySelector {
    pub weights: RankingWeights,
}

impl PrimarySelector {
    pub fn new(weights: RankingWeights) -> Self {
        PrimarySelector { weights }
    }

    pub fn score(&self, candidate: &CandidateAccount) -> i64 {
        let s = &candidate.signature;
        let w = &self.weights;
        match candidate.account.kind {
            AccountKind::Client => {
                w.client_contacts * s.contacts + w.client_funds * s.funds_created + w.client_posts * s.posts
            }
            AccountKind::Business => w.business_products * s.products + w.business_orders * s.orders,
        }
    }

    /// Score and sort candidates, best first; returns the recommended primary id
    ///
    /// Advisory only: nothing here triggers a merge.
    pub fn rank(&self, candidates: &mut [CandidateAccount]) -> Option<String> {
        for candidate in candidates.iter_mut() {
            candidate.score = self.score(candidate);
        }

        candidates.sort_by(compare_candidates);
        candidates.first().map(|c| c.account.id.clone())
    }
}

impl Default for PrimarySelector {
    fn default() -> Self {
        Self::new(RankingWeights::default())
    }
}

fn compare_candidates(a: &CandidateAccount, b: &CandidateAccount) -> Ordering {
    let verification = match (a.account.kind, b.account.kind) {
        (AccountKind::Business, AccountKind::Business) => {
            // verified sorts first
            b.account.is_verified.cmp(&a.account.is_verified)
        }
        _ => Ordering::Equal,
    };

    verification
        .then_with(|| b.score.cmp(&a.score))
        .then_with(|| a.account.created_at.cmp(&b.account.created_at))
        .then_with(|| a.account.id.cmp(&b.account.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, DataSignature};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn client(id: &str, contacts: i64, funds: i64, posts: i64, created: (i32, u32, u32)) -> CandidateAccount {
        let mut account = Account::client("Awa", "Diop", NaiveDate::from_ymd_opt(1990, 5, 2).unwrap());
        account.id = id.to_string();
        account.created_at = Utc.with_ymd_and_hms(created.0, created.1, created.2, 0, 0, 0).unwrap();
        CandidateAccount {
            account,
            auth_methods: vec![],
            signature: DataSignature { contacts, funds_created: funds, posts, ..Default::default() },
            last_active: None,
            score: 0,
        }
    }

    fn business(id: &str, verified: bool, products: i64, orders: i64) -> CandidateAccount {
        let mut account = Account::business("Awa Couture", None);
        account.id = id.to_string();
        account.is_verified = verified;
        account.created_at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        CandidateAccount {
            account,
            auth_methods: vec![],
            signature: DataSignature { products, orders, ..Default::default() },
            last_active: None,
            score: 0,
        }
    }

    #[test]
    fn test_client_score_weights_funds_double() {
        let selector = PrimarySelector::default();
        let mut candidates = vec![
            client("b", 1, 0, 0, (2023, 6, 1)),
            client("a", 10, 2, 5, (2023, 1, 1)),
        ];

        let primary = selector.rank(&mut candidates);
        assert_eq!(primary.as_deref(), Some("a"));
        assert_eq!(candidates[0].score, 19);
        assert_eq!(candidates[1].score, 1);
    }

    #[test]
    fn test_client_tie_oldest_wins() {
        let selector = PrimarySelector::default();
        let mut candidates = vec![
            client("newer", 2, 0, 0, (2024, 1, 1)),
            client("older", 0, 1, 0, (2022, 1, 1)),
        ];

        assert_eq!(selector.rank(&mut candidates).as_deref(), Some("older"));
    }

    #[test]
    fn test_verified_business_beats_higher_score() {
        let selector = PrimarySelector::default();
        let mut candidates = vec![
            business("busy", false, 50, 0),
            business("verified", true, 0, 0),
        ];

        assert_eq!(selector.rank(&mut candidates).as_deref(), Some("verified"));
        assert_eq!(candidates[1].score, 100);
    }

    #[test]
    fn test_business_score_among_same_verification() {
        let selector = PrimarySelector::default();
        let mut candidates = vec![
            business("orders", true, 0, 3),
            business("products", true, 2, 0),
        ];

        assert_eq!(selector.rank(&mut candidates).as_deref(), Some("products"));
    }

    #[test]
    fn test_rank_is_deterministic() {
        let selector = PrimarySelector::default();
        let build = || vec![
            client("x", 1, 0, 0, (2023, 1, 1)),
            client("y", 1, 0, 0, (2023, 1, 1)),
            client("z", 0, 0, 1, (2023, 1, 1)),
        ];

        let mut first = build();
        let mut second = build();
        second.reverse();

        assert_eq!(selector.rank(&mut first), selector.rank(&mut second));
        assert_eq!(selector.rank(&mut first).as_deref(), Some("x"));
    }

    #[test]
    fn test_custom_weights() {
        let selector = PrimarySelector::new(RankingWeights { client_posts: 10, ..Default::default() });
        let mut candidates = vec![
            client("contacts", 5, 0, 0, (2023, 1, 1)),
            client("poster", 0, 0, 1, (2023, 6, 1)),
        ];

        assert_eq!(selector.rank(&mut candidates).as_deref(), Some("poster"));
    }

    #[test]
    fn test_empty_group() {
        let selector = PrimarySelector::default();
        assert!(selector.rank(&mut []).is_none());
    }
}
