//! In-memory storage backend for costreport.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, PoisonError, RwLock},
};

use rust_decimal::Decimal;
use uuid::Uuid;

use costreport_core::{
    CostRecord, CostSource, CostStore, Report, ReportKey, ReportStore, SequenceStore,
    StorageError, User, UserStore,
};

struct StoredReport {
    doc_id: u128,
    report: Report,
}

pub struct InMemoryStorage {
    users: RwLock<BTreeMap<i64, User>>,
    costs: RwLock<Vec<CostRecord>>,
    reports: RwLock<BTreeMap<ReportKey, StoredReport>>,
    counters: Mutex<HashMap<String, u64>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StorageError {
    StorageError::Unavailable("in-memory store lock poisoned".to_string())
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(BTreeMap::new()),
            costs: RwLock::new(Vec::new()),
            reports: RwLock::new(BTreeMap::new()),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn report_count(&self) -> usize {
        self.reports.read().map(|r| r.len()).unwrap_or(0)
    }
}

impl CostSource for InMemoryStorage {
    fn find_costs(&self, user_id: i64, year: i32, month: u8) -> Result<Vec<CostRecord>, StorageError> {
        let costs = self.costs.read().map_err(poisoned)?;
        Ok(costs
            .iter()
            .filter(|c| c.belongs_to(user_id, year, month))
            .cloned()
            .collect())
    }

    fn total_for_user(&self, user_id: i64) -> Result<Decimal, StorageError> {
        let costs = self.costs.read().map_err(poisoned)?;
        Ok(costs
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.amount)
            .sum())
    }
}

impl CostStore for InMemoryStorage {
    fn insert_cost(&self, cost: &CostRecord) -> Result<(), StorageError> {
        self.costs.write().map_err(poisoned)?.push(cost.clone());
        tracing::debug!(cost_id = cost.id, user_id = cost.user_id, "Cost stored");
        Ok(())
    }
}

impl ReportStore for InMemoryStorage {
    fn find_report(&self, key: &ReportKey) -> Result<Option<Report>, StorageError> {
        let reports = self.reports.read().map_err(poisoned)?;
        Ok(reports.get(key).map(|r| r.report.clone()))
    }

    fn insert_report(&self, report: &Report) -> Result<(), StorageError> {
        let mut reports = self.reports.write().map_err(poisoned)?;
        if reports.contains_key(&report.key) {
            return Err(StorageError::KeyConflict(report.key));
        }
        let doc_id = Uuid::new_v4().as_u128();
        reports.insert(report.key, StoredReport {
            doc_id,
            report: report.clone(),
        });
        tracing::debug!(key = %report.key, doc_id, "Report stored");
        Ok(())
    }

    fn delete_report(&self, key: &ReportKey) -> Result<bool, StorageError> {
        let removed = self.reports.write().map_err(poisoned)?.remove(key);
        if let Some(stored) = &removed {
            tracing::debug!(%key, doc_id = stored.doc_id, "Report deleted");
        }
        Ok(removed.is_some())
    }
}

impl SequenceStore for InMemoryStorage {
    fn next_value(&self, scope: &str) -> Result<u64, StorageError> {
        let mut counters = self.counters.lock().map_err(poisoned)?;
        let counter = counters.entry(scope.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

impl UserStore for InMemoryStorage {
    fn create_user(&self, user: &User) -> Result<(), StorageError> {
        let mut users = self.users.write().map_err(poisoned)?;
        if users.contains_key(&user.id) {
            return Err(StorageError::UserAlreadyExists(user.id));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    fn find_user(&self, id: i64) -> Result<Option<User>, StorageError> {
        Ok(self.users.read().map_err(poisoned)?.get(&id).cloned())
    }

    fn list_users(&self) -> Result<Vec<User>, StorageError> {
        Ok(self.users.read().map_err(poisoned)?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costreport_core::Category;
    use rust_decimal_macros::dec;
    use std::{collections::HashSet, sync::Arc, thread};
    use time::{Date, Month};

    fn cost(id: u64, user_id: i64, month: Month, amount: Decimal) -> CostRecord {
        CostRecord {
            id,
            user_id,
            category: Category::Food,
            amount,
            description: format!("item {}", id),
            date: Date::from_calendar_date(2023, month, 1).unwrap(),
        }
    }

    #[test]
    fn test_find_costs_filters_by_period() {
        let storage = InMemoryStorage::new();
        storage.insert_cost(&cost(1, 1, Month::January, dec!(10))).unwrap();
        storage.insert_cost(&cost(2, 1, Month::February, dec!(20))).unwrap();
        storage.insert_cost(&cost(3, 2, Month::January, dec!(30))).unwrap();
        storage.insert_cost(&cost(4, 1, Month::January, dec!(5))).unwrap();

        let ids: Vec<u64> = storage.find_costs(1, 2023, 1).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(storage.total_for_user(1).unwrap(), dec!(35));
        assert_eq!(storage.total_for_user(9).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_insert_report_conflict() {
        let storage = InMemoryStorage::new();
        let key = ReportKey::new(1, 2023, 1).unwrap();
        let first = Report::build(key, &[cost(1, 1, Month::January, dec!(10))]);
        let second = Report::build(key, &[]);

        storage.insert_report(&first).unwrap();
        match storage.insert_report(&second) {
            Err(StorageError::KeyConflict(k)) => assert_eq!(k, key),
            other => panic!("Expected KeyConflict, got {:?}", other),
        }
        assert_eq!(storage.find_report(&key).unwrap(), Some(first));
        assert_eq!(storage.report_count(), 1);

        assert!(storage.delete_report(&key).unwrap());
        assert!(!storage.delete_report(&key).unwrap());
        assert_eq!(storage.find_report(&key).unwrap(), None);
    }

    #[test]
    fn test_sequence_starts_at_one_per_scope() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.next_value("cost.id").unwrap(), 1);
        assert_eq!(storage.next_value("cost.id").unwrap(), 2);
        assert_eq!(storage.next_value("user.id").unwrap(), 1);
    }

    #[test]
    fn test_sequence_concurrent_values_are_distinct() {
        let storage = Arc::new(InMemoryStorage::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                thread::spawn(move || {
                    (0..100).map(|_| storage.next_value("cost.id").unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for v in h.join().unwrap() {
                assert!(seen.insert(v), "duplicate sequence value {}", v);
            }
        }
        assert_eq!(seen.len(), 800);
        assert_eq!(seen.iter().max(), Some(&800));
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let storage = InMemoryStorage::new();
        let user = User {
            id: 1,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            birthday: Date::from_calendar_date(1815, Month::December, 10).unwrap(),
        };
        storage.create_user(&user).unwrap();
        assert!(matches!(storage.create_user(&user), Err(StorageError::UserAlreadyExists(1))));
        assert_eq!(storage.list_users().unwrap(), vec![user]);
    }
}
