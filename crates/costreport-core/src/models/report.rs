use std::fmt::Display;

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::{
    ser::{SerializeMap, SerializeStruct},
    Deserialize, Serialize, Serializer,
};

use super::{Category, CostRecord, ReportKey};

/// One expense line inside a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostItem {
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub description: String,
    pub day: u8,
}

impl From<&CostRecord> for CostItem {
    fn from(record: &CostRecord) -> Self {
        Self {
            sum: record.amount,
            description: record.description.clone(),
            day: record.day(),
        }
    }
}

/// All items of one category. Serializes as a single-entry object,
/// `{"food": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCosts {
    pub category: Category,
    pub items: Vec<CostItem>,
}

impl Serialize for CategoryCosts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.category.as_str(), &self.items)?;
        map.end()
    }
}

/// A user's costs for one calendar month, grouped by category.
///
/// `costs` always holds exactly one entry per [`Category`], in
/// [`Category::ALL`] order, even when a category has no items. Within a
/// category the items keep the order the cost source returned them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub key: ReportKey,
    pub costs: Vec<CategoryCosts>,
}

impl Report {
    pub fn build(key: ReportKey, records: &[CostRecord]) -> Self {
        let costs = Category::ALL
            .into_iter()
            .map(|category| CategoryCosts {
                category,
                items: records
                    .iter()
                    .filter(|r| r.category == category)
                    .map(CostItem::from)
                    .collect(),
            })
            .collect();

        Self { key, costs }
    }

    /// Rebuilds a report from stored `(category, item)` rows, e.g. when a
    /// backend reads a materialized report back.
    pub fn from_items(key: ReportKey, items: impl IntoIterator<Item = (Category, CostItem)>) -> Self {
        let mut report = Self::build(key, &[]);
        for (category, item) in items {
            if let Some(entry) = report.costs.iter_mut().find(|e| e.category == category) {
                entry.items.push(item);
            }
        }
        report
    }

    pub fn items(&self, category: Category) -> &[CostItem] {
        self.costs
            .iter()
            .find(|e| e.category == category)
            .map(|e| e.items.as_slice())
            .unwrap_or(&[])
    }

    /// Flattened `(category, item)` view in report order.
    pub fn entries(&self) -> impl Iterator<Item = (Category, &CostItem)> {
        self.costs
            .iter()
            .flat_map(|e| e.items.iter().map(move |item| (e.category, item)))
    }

    pub fn total(&self) -> Decimal {
        self.entries().map(|(_, item)| item.sum).sum()
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Report", 4)?;
        state.serialize_field("userid", &self.key.user_id)?;
        state.serialize_field("year", &self.key.year)?;
        state.serialize_field("month", &self.key.month)?;
        state.serialize_field("costs", &self.costs)?;
        state.end()
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Category", "Day", "Description", "Sum"]);
        table.add_empty_row();

        for entry in &self.costs {
            if entry.items.is_empty() {
                table.add_row(row![entry.category, "", "", ""]);
            }
            for item in &entry.items {
                table.add_row(row![entry.category, item.day, item.description, item.sum]);
            }
        }

        write!(f, "\n{}\n{}Total: {}\n", self.key, table, self.total())
    }
}
