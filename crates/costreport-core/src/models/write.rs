use rust_decimal::Decimal;
use time::Date;

use super::Category;

#[derive(Debug, Clone, PartialEq)]
pub struct CreateCostCommand {
    pub user_id: i64,
    pub description: String,
    pub category: Category,
    pub amount: Decimal,
    /// Defaults to the current day when absent.
    pub date: Option<Date>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateUserCommand {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub birthday: Date,
}
