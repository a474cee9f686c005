use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};

use costreport_core::{CostSource, CreateUserCommand, User, UserStore};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct UserSummary {
    pub user: User,
    /// Sum of all the user's costs, rounded to 2 decimal places.
    pub total: Decimal,
}

pub struct UserService {
    users: Arc<dyn UserStore>,
    costs: Arc<dyn CostSource>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>, costs: Arc<dyn CostSource>) -> Self {
        Self { users, costs }
    }

    pub fn add_user(&self, command: CreateUserCommand) -> Result<User, Error> {
        if command.first_name.trim().is_empty() || command.last_name.trim().is_empty() {
            return Err(Error::Validation("Missing required fields".to_string()));
        }
        let user = User {
            id: command.id,
            first_name: command.first_name,
            last_name: command.last_name,
            birthday: command.birthday,
        };
        self.users.create_user(&user)?;
        tracing::info!(user_id = user.id, "User added");
        Ok(user)
    }

    pub fn get_user_summary(&self, id: i64) -> Result<UserSummary, Error> {
        let user = self
            .users
            .find_user(id)?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
        let total = self.costs.total_for_user(id)?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Ok(UserSummary { user, total })
    }

    pub fn list_users(&self) -> Result<Vec<User>, Error> {
        Ok(self.users.list_users()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costreport_core::{Category, CostRecord, CostStore};
    use costreport_memory::InMemoryStorage;
    use rust_decimal_macros::dec;
    use time::{Date, Month};

    fn command(id: i64) -> CreateUserCommand {
        CreateUserCommand {
            id,
            first_name: "bot".to_string(),
            last_name: "bot".to_string(),
            birthday: Date::from_calendar_date(1999, Month::March, 12).unwrap(),
        }
    }

    #[test]
    fn test_duplicate_user_is_already_exists() {
        let storage = Arc::new(InMemoryStorage::new());
        let service = UserService::new(storage.clone(), storage);
        service.add_user(command(111111)).unwrap();
        assert!(matches!(service.add_user(command(111111)), Err(Error::AlreadyExists(_))));
        assert_eq!(service.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_summary_totals_all_costs() {
        let storage = Arc::new(InMemoryStorage::new());
        let service = UserService::new(storage.clone(), storage.clone());
        service.add_user(command(5)).unwrap();
        for (id, amount, month) in [(1, dec!(10.005), Month::January), (2, dec!(2.5), Month::June)] {
            storage
                .insert_cost(&CostRecord {
                    id,
                    user_id: 5,
                    category: Category::Education,
                    amount,
                    description: "books".to_string(),
                    date: Date::from_calendar_date(2024, month, 1).unwrap(),
                })
                .unwrap();
        }

        let summary = service.get_user_summary(5).unwrap();
        assert_eq!(summary.total, dec!(12.51));
        assert_eq!(summary.user.id, 5);
        assert!(matches!(service.get_user_summary(6), Err(Error::NotFound(_))));
    }
}
