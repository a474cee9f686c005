use std::{fmt::Display, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Date;

pub mod report;
pub mod write;

/// Expense classification. The declaration order is the order categories
/// appear in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Food,
    Health,
    Housing,
    Sports,
    Education,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Food,
        Category::Health,
        Category::Housing,
        Category::Sports,
        Category::Education,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "food",
            Category::Health => "health",
            Category::Housing => "housing",
            Category::Sports => "sports",
            Category::Education => "education",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid category: {0}")]
pub struct InvalidCategory(pub String);

impl FromStr for Category {
    type Err = InvalidCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| InvalidCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid report parameters: {0}")]
pub struct InvalidKey(pub String);

/// Identity of a monthly report: one user, one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReportKey {
    pub user_id: i64,
    pub year: i32,
    pub month: u8,
}

impl ReportKey {
    pub fn new(user_id: i64, year: i32, month: u8) -> Result<Self, InvalidKey> {
        if !(1..=12).contains(&month) {
            return Err(InvalidKey(format!("month must be between 1 and 12, got {}", month)));
        }
        Ok(Self { user_id, year, month })
    }

    /// Builds a key from raw request values. Each component must resolve to a
    /// finite integer; `"7"`, `" 7 "` and `"7.0"` are accepted, `"7.5"`,
    /// `"abc"` and `""` are not.
    pub fn parse(user_id: &str, year: &str, month: &str) -> Result<Self, InvalidKey> {
        let not_integer = |field: &str, raw: &str| InvalidKey(format!("{} is not an integer: {:?}", field, raw.trim()));
        let user_id = parse_integral(user_id).ok_or_else(|| not_integer("user id", user_id))?;
        let year = parse_integral(year).ok_or_else(|| not_integer("year", year))?;
        let month = parse_integral(month).ok_or_else(|| not_integer("month", month))?;

        let year = i32::try_from(year).map_err(|_| InvalidKey(format!("year out of range: {}", year)))?;
        let month = u8::try_from(month).map_err(|_| InvalidKey(format!("month must be between 1 and 12, got {}", month)))?;
        Self::new(user_id, year, month)
    }

    /// `(year, month)` pair, ordered chronologically.
    pub fn period(&self) -> (i32, u8) {
        (self.year, self.month)
    }
}

impl Display for ReportKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user {} {:04}-{:02}", self.user_id, self.year, self.month)
    }
}

/// Resolves textual input to an integer. Integral floats (`"7.0"`) count;
/// fractions, non-finite values and non-numbers do not.
pub fn parse_integral(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Some(v as i64),
        _ => None,
    }
}

/// A single dated expense. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostRecord {
    /// Sequence-allocated numeric id, distinct from the store's own key.
    pub id: u64,
    pub user_id: i64,
    pub category: Category,
    pub amount: Decimal,
    pub description: String,
    pub date: Date,
}

impl CostRecord {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u8 {
        self.date.month() as u8
    }

    pub fn day(&self) -> u8 {
        self.date.day()
    }

    pub fn belongs_to(&self, user_id: i64, year: i32, month: u8) -> bool {
        self.user_id == user_id && self.year() == year && self.month() == month
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub birthday: Date,
}
