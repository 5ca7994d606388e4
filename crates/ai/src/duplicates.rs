//! Duplicate transaction detection.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use ezbooks_core::AggregateId;

use crate::snapshot::TransactionSnapshot;

const WINDOW_DAYS: i64 = 7;
const AMOUNT_TOLERANCE_MINOR: i64 = 50;
const MATCH_THRESHOLD: u8 = 70;

/// What to look for: a transaction that may already exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateQuery {
    pub merchant: String,
    /// Signed minor units; only the magnitude is compared.
    pub amount: i64,
    pub date: NaiveDate,
    /// The transaction being checked, so it never matches itself.
    pub exclude: Option<AggregateId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub transaction_id: AggregateId,
    pub amount: i64,
    pub merchant: Option<String>,
    pub date: NaiveDate,
    pub days_apart: i64,
    /// 0..=100.
    pub score: u8,
}

/// Best candidate scoring at least 70, if any.
///
/// Candidates must fall within seven days and fifty cents of the query and
/// have a similar merchant. Amounts are compared without sign, so a refund
/// lines up with its charge. The score starts at 100, loses 20 per dollar and
/// 5 per day of difference, and gains 10 for an exact merchant match.
pub fn find_duplicate(
    query: &DuplicateQuery,
    candidates: &[TransactionSnapshot],
) -> Option<DuplicateMatch> {
    let wanted_merchant = query.merchant.trim().to_lowercase();

    candidates
        .iter()
        .filter(|c| Some(c.id) != query.exclude)
        .filter_map(|c| {
            let days_apart = (c.date - query.date).num_days().abs();
            let amount_diff = (c.amount.abs() - query.amount.abs()).abs();
            if days_apart > WINDOW_DAYS || amount_diff > AMOUNT_TOLERANCE_MINOR {
                return None;
            }

            let merchant = c.merchant.as_deref().unwrap_or(&c.description).trim().to_lowercase();
            if !merchants_similar(&wanted_merchant, &merchant) {
                return None;
            }

            let score = score(amount_diff, days_apart, merchant == wanted_merchant);
            (score >= MATCH_THRESHOLD).then(|| DuplicateMatch {
                transaction_id: c.id,
                amount: c.amount,
                merchant: c.merchant.clone(),
                date: c.date,
                days_apart,
                score,
            })
        })
        .max_by_key(|m| m.score)
}

fn score(amount_diff_minor: i64, days_apart: i64, merchant_exact: bool) -> u8 {
    let mut score = 100.0 - (amount_diff_minor as f64 / 100.0) * 20.0 - days_apart as f64 * 5.0;
    if merchant_exact {
        score += 10.0;
    }
    score.clamp(0.0, 100.0).round() as u8
}

/// Whole-name containment, or enough long words of `search` that appear
/// inside (or contain) a word of `candidate`: two, or half the search words
/// when there are fewer than four.
fn merchants_similar(search: &str, candidate: &str) -> bool {
    if search.is_empty() || candidate.is_empty() {
        return false;
    }
    if search == candidate || search.contains(candidate) || candidate.contains(search) {
        return true;
    }

    let search_words: Vec<&str> = search.split_whitespace().collect();
    let candidate_words: Vec<&str> = candidate.split_whitespace().collect();
    let common = search_words
        .iter()
        .filter(|w| {
            w.len() > 3
                && candidate_words
                    .iter()
                    .any(|c| c.contains(**w) || w.contains(*c))
        })
        .count();

    common * 2 >= search_words.len().min(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn existing(amount: i64, merchant: &str, date: NaiveDate) -> TransactionSnapshot {
        TransactionSnapshot {
            id: AggregateId::new(),
            amount,
            date,
            description: merchant.to_string(),
            merchant: Some(merchant.to_string()),
            category: Vec::new(),
            is_business: true,
        }
    }

    fn query(amount: i64, merchant: &str, date: NaiveDate) -> DuplicateQuery {
        DuplicateQuery {
            merchant: merchant.to_string(),
            amount,
            date,
            exclude: None,
        }
    }

    #[test]
    fn exact_same_day_match_scores_full() {
        let candidates = vec![existing(-4250, "Staples", day(10))];
        let m = find_duplicate(&query(-4250, "STAPLES", day(10)), &candidates).unwrap();
        assert_eq!(m.score, 100);
        assert_eq!(m.days_apart, 0);
    }

    #[test]
    fn score_drops_with_distance() {
        let candidates = vec![existing(-4250, "Staples Store", day(13))];
        // 3 days apart, 30 cents off: 100 - 6 - 15 = 79
        let m = find_duplicate(&query(-4280, "staples", day(10)), &candidates).unwrap();
        assert_eq!(m.score, 79);
    }

    #[test]
    fn outside_window_or_tolerance_is_ignored() {
        let candidates = vec![
            existing(-4250, "Staples", day(18)),
            existing(-4400, "Staples", day(10)),
        ];
        assert!(find_duplicate(&query(-4250, "Staples", day(10)), &candidates).is_none());
    }

    #[test]
    fn different_merchant_is_not_a_duplicate() {
        let candidates = vec![existing(-4250, "Office Depot", day(10))];
        assert!(find_duplicate(&query(-4250, "Staples", day(10)), &candidates).is_none());
    }

    #[test]
    fn shared_long_words_count_as_same_merchant() {
        assert!(merchants_similar("blue bottle coffee oakland", "blue bottle coffee sf"));
        assert!(!merchants_similar("the shop", "the store"));
    }

    #[test]
    fn merchant_words_match_inside_longer_words() {
        assert!(merchants_similar("walmart supercenter", "walmart.com supercenter#42"));
        // One of two search words is enough.
        assert!(merchants_similar("chevron station", "chevron 12345 houston"));
        assert!(!merchants_similar("delta faucets plumbing supply", "delta airlines"));
    }

    #[test]
    fn exact_merchant_bonus_lifts_a_borderline_match() {
        // 50 cents and 5 days apart: 100 - 10 - 25 + 10
        let candidates = vec![existing(-4300, "Staples", day(5))];
        let m = find_duplicate(&query(-4250, "Staples", day(10)), &candidates).unwrap();
        assert_eq!(m.score, 75);

        // Same distance without the exact name falls short.
        let candidates = vec![existing(-4300, "Staples Store", day(5))];
        assert!(find_duplicate(&query(-4250, "Staples", day(10)), &candidates).is_none());
    }

    #[test]
    fn refund_matches_its_charge() {
        let candidates = vec![existing(4250, "Staples", day(10))];
        let m = find_duplicate(&query(-4250, "Staples", day(10)), &candidates).unwrap();
        assert_eq!(m.amount, 4250);
        assert_eq!(m.score, 100);
    }

    #[test]
    fn best_candidate_wins_and_self_is_excluded() {
        let me = existing(-1000, "Uber", day(5));
        let near = existing(-1000, "Uber", day(6));
        let far = existing(-1000, "Uber", day(9));
        let candidates = vec![me.clone(), far, near.clone()];

        let mut p = query(-1000, "Uber", day(5));
        p.exclude = Some(me.id);

        let m = find_duplicate(&p, &candidates).unwrap();
        assert_eq!(m.transaction_id, near.id);
        assert_eq!(m.score, 100);
    }
}
