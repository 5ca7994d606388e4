//! Keyword-based category inference.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGuess {
    pub category: String,
    pub confidence: f64,
}

struct Pattern {
    keywords: &'static [&'static str],
    category: &'static str,
    confidence: f64,
}

// Checked in order; the first pattern with a hit wins.
const PATTERNS: &[Pattern] = &[
    Pattern {
        keywords: &[
            "dinner", "lunch", "breakfast", "meal", "food", "restaurant", "coffee", "starbucks",
            "dining", "cafe", "bar", "pizza", "eat", "drink", "beverage", "catering",
        ],
        category: "Meals & Entertainment",
        confidence: 0.90,
    },
    Pattern {
        keywords: &[
            "office", "supplies", "stationery", "paper", "pens", "staples", "stapler", "folder",
            "binder",
        ],
        category: "Office Supplies",
        confidence: 0.85,
    },
    Pattern {
        keywords: &[
            "travel", "hotel", "flight", "uber", "lyft", "taxi", "airline", "airport", "lodging",
            "accommodation", "car rental", "rental car",
        ],
        category: "Travel",
        confidence: 0.90,
    },
    Pattern {
        keywords: &[
            "software", "saas", "subscription", "app", "platform", "service", "cloud", "hosting",
            "domain", "ssl",
        ],
        category: "Software & Subscriptions",
        confidence: 0.85,
    },
    Pattern {
        keywords: &[
            "marketing", "advertising", "promotion", "ad", "campaign", "social media", "seo",
            "ppc", "google ads", "facebook ads",
        ],
        category: "Marketing & Advertising",
        confidence: 0.85,
    },
    Pattern {
        keywords: &[
            "legal", "attorney", "lawyer", "accounting", "bookkeeping", "cpa", "consulting",
            "consultant", "professional service",
        ],
        category: "Professional Services",
        confidence: 0.90,
    },
    Pattern {
        keywords: &[
            "utilities", "electric", "water", "gas", "internet", "phone", "telephone", "utility",
            "power", "electricity",
        ],
        category: "Utilities",
        confidence: 0.85,
    },
    Pattern {
        keywords: &["rent", "lease", "rental", "landlord"],
        category: "Rent",
        confidence: 0.90,
    },
    Pattern {
        keywords: &["insurance", "premium", "coverage", "policy"],
        category: "Insurance",
        confidence: 0.85,
    },
    Pattern {
        keywords: &[
            "vehicle", "car", "truck", "gas", "fuel", "gasoline", "maintenance", "repair", "auto",
            "automotive",
        ],
        category: "Vehicle Expenses",
        confidence: 0.80,
    },
];

/// Whether `text` (already lower-cased) mentions `keyword`.
///
/// Multi-word keywords match as substrings. Single words must match a whole
/// token, optionally pluralized, so "bar" matches "bar & grill" and "bars"
/// but not "barber".
pub(crate) fn mentions(text: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        return text.contains(keyword);
    }
    text.split(|c: char| !c.is_alphanumeric()).any(|token| {
        token
            .strip_prefix(keyword)
            .is_some_and(|rest| matches!(rest, "" | "s" | "es"))
    })
}

pub(crate) fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| mentions(text, k))
}

/// Guess a bookkeeping category from the description and merchant.
///
/// Falls back to "Other Business Expense" / "Other Personal Expense" at 0.5.
pub fn infer_category(description: &str, merchant: Option<&str>, is_business: bool) -> CategoryGuess {
    let combined = format!(
        "{} {}",
        description.to_lowercase(),
        merchant.unwrap_or_default().to_lowercase()
    );

    for pattern in PATTERNS {
        if mentions_any(&combined, pattern.keywords) {
            return CategoryGuess {
                category: pattern.category.to_string(),
                confidence: pattern.confidence,
            };
        }
    }

    CategoryGuess {
        category: if is_business {
            "Other Business Expense".to_string()
        } else {
            "Other Personal Expense".to_string()
        },
        confidence: 0.50,
    }
}
