use std::sync::Arc;

use rust_decimal::Decimal;

use costreport_core::{CostRecord, CostStore, CreateCostCommand, UserStore};

use crate::{
    clock::Clock,
    error::Error,
    sequence::{self, SequenceAllocator},
};

/// Records new costs. A cost can only be dated today or later, which is what
/// keeps materialized reports for closed months accurate.
pub struct CostService {
    costs: Arc<dyn CostStore>,
    users: Arc<dyn UserStore>,
    sequences: SequenceAllocator,
    clock: Arc<dyn Clock>,
    id_scope: String,
}

impl CostService {
    pub fn new(
        costs: Arc<dyn CostStore>,
        users: Arc<dyn UserStore>,
        sequences: SequenceAllocator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            costs,
            users,
            sequences,
            clock,
            id_scope: sequence::scope("cost", "id"),
        }
    }

    pub fn add_cost(&self, command: CreateCostCommand) -> Result<CostRecord, Error> {
        if command.description.trim().is_empty() {
            return Err(Error::Validation("Missing required fields".to_string()));
        }
        if command.amount < Decimal::ZERO {
            return Err(Error::Validation("Cost sum must not be negative".to_string()));
        }

        let today = self.clock.today();
        let date = match command.date {
            Some(date) if date < today => {
                return Err(Error::Validation("Cannot add cost in the past".to_string()));
            }
            Some(date) => date,
            None => today,
        };

        if self.users.find_user(command.user_id)?.is_none() {
            return Err(Error::Validation("User not found".to_string()));
        }

        let cost = CostRecord {
            id: self.sequences.next(&self.id_scope)?,
            user_id: command.user_id,
            category: command.category,
            amount: command.amount,
            description: command.description,
            date,
        };
        self.costs.insert_cost(&cost)?;

        tracing::info!(cost_id = cost.id, user_id = cost.user_id, category = %cost.category, sum = %cost.amount, "Cost added");
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use costreport_core::{Category, CostSource, User};
    use costreport_memory::InMemoryStorage;
    use rust_decimal_macros::dec;
    use time::{Date, Month};

    fn today() -> Date {
        Date::from_calendar_date(2024, Month::May, 10).unwrap()
    }

    fn setup() -> (Arc<InMemoryStorage>, CostService) {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .create_user(&User {
                id: 1,
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                birthday: Date::from_calendar_date(1815, Month::December, 10).unwrap(),
            })
            .unwrap();
        let service = CostService::new(
            storage.clone(),
            storage.clone(),
            SequenceAllocator::new(storage.clone()),
            Arc::new(FixedClock::new(today())),
        );
        (storage, service)
    }

    fn command(date: Option<Date>) -> CreateCostCommand {
        CreateCostCommand {
            user_id: 1,
            description: "groceries".to_string(),
            category: Category::Food,
            amount: dec!(25.40),
            date,
        }
    }

    #[test]
    fn test_add_cost_stamps_sequence_ids() {
        let (storage, service) = setup();
        let first = service.add_cost(command(None)).unwrap();
        let second = service.add_cost(command(Some(today().next_day().unwrap()))).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.date, today());
        assert_eq!(storage.find_costs(1, 2024, 5).unwrap().len(), 2);
    }

    #[test]
    fn test_add_cost_rejects_past_dates() {
        let (storage, service) = setup();
        let result = service.add_cost(command(Some(today().previous_day().unwrap())));
        assert!(matches!(result, Err(Error::Validation(msg)) if msg == "Cannot add cost in the past"));
        assert!(storage.find_costs(1, 2024, 5).unwrap().is_empty());
    }

    #[test]
    fn test_add_cost_requires_known_user() {
        let (_, service) = setup();
        let mut cmd = command(None);
        cmd.user_id = 99;
        assert!(matches!(service.add_cost(cmd), Err(Error::Validation(msg)) if msg == "User not found"));
    }

    #[test]
    fn test_add_cost_rejects_negative_sum_and_blank_description() {
        let (_, service) = setup();
        let mut negative = command(None);
        negative.amount = dec!(-1);
        assert!(matches!(service.add_cost(negative), Err(Error::Validation(_))));

        let mut blank = command(None);
        blank.description = "  ".to_string();
        assert!(matches!(service.add_cost(blank), Err(Error::Validation(_))));
    }
}
