use std::sync::Arc;

use costreport_core::{CostSource, Report, ReportKey, ReportStore, StorageError};

use crate::{clock::Clock, error::Error};

/// Serves monthly reports, materializing them once their month has closed.
///
/// Reports for past months are computed at most once per key and frozen:
/// later changes to the underlying costs do not show up in them. Reports for
/// the current or a future month are recomputed on every call and never
/// stored.
pub struct ReportCache {
    costs: Arc<dyn CostSource>,
    reports: Arc<dyn ReportStore>,
    clock: Arc<dyn Clock>,
}

impl ReportCache {
    pub fn new(costs: Arc<dyn CostSource>, reports: Arc<dyn ReportStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            costs,
            reports,
            clock,
        }
    }

    /// Validates raw request values, then behaves as [`ReportCache::get_or_create`].
    pub fn get_or_create_raw(&self, user_id: &str, year: &str, month: &str) -> Result<Report, Error> {
        let key = ReportKey::parse(user_id, year, month)?;
        self.get_or_create(&key)
    }

    pub fn get_or_create(&self, key: &ReportKey) -> Result<Report, Error> {
        if let Some(report) = self.reports.find_report(key)? {
            metrics::increment_counter!("report_cache_hits_total");
            tracing::debug!(%key, "Serving stored report");
            return Ok(report);
        }
        metrics::increment_counter!("report_cache_misses_total");

        let records = self.costs.find_costs(key.user_id, key.year, key.month)?;
        let report = Report::build(*key, &records);

        if !self.is_past(key) {
            tracing::debug!(%key, costs = records.len(), "Computed report for open period");
            return Ok(report);
        }

        self.materialize(report)
    }

    /// True iff the key's month ended before the clock's current month.
    pub fn is_past(&self, key: &ReportKey) -> bool {
        key.period() < self.clock.current_period()
    }

    /// Removes a stored report. Only cleanup and administration call this.
    pub fn evict(&self, key: &ReportKey) -> Result<bool, Error> {
        let removed = self.reports.delete_report(key)?;
        if removed {
            tracing::info!(%key, "Stored report evicted");
        }
        Ok(removed)
    }

    fn materialize(&self, report: Report) -> Result<Report, Error> {
        let key = report.key;
        match self.reports.insert_report(&report) {
            Ok(()) => {
                metrics::increment_counter!("report_materialized_total");
                tracing::info!(%key, total = %report.total(), "Report materialized");
                tracing::debug!("{}", report);
                Ok(report)
            }
            Err(StorageError::KeyConflict(_)) => {
                metrics::increment_counter!("report_conflicts_total");
                match self.reports.find_report(&key)? {
                    Some(winner) => {
                        tracing::debug!(%key, "Lost materialization race, serving stored report");
                        Ok(winner)
                    }
                    None => {
                        // Winner was evicted between our insert and re-read.
                        tracing::warn!(%key, "Conflicting report vanished, serving computed copy");
                        Ok(report)
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use costreport_core::{Category, CostRecord, CostStore};
    use costreport_memory::InMemoryStorage;
    use rust_decimal_macros::dec;
    use time::{Date, Month};

    fn setup(today: Date) -> (Arc<InMemoryStorage>, Arc<FixedClock>, ReportCache) {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(FixedClock::new(today));
        let cache = ReportCache::new(storage.clone(), storage.clone(), clock.clone());
        (storage, clock, cache)
    }

    fn date(year: i32, month: Month, day: u8) -> Date {
        Date::from_calendar_date(year, month, day).unwrap()
    }

    fn add(storage: &InMemoryStorage, id: u64, category: Category, amount: rust_decimal::Decimal, date: Date, description: &str) {
        storage
            .insert_cost(&CostRecord {
                id,
                user_id: 7,
                category,
                amount,
                description: description.to_string(),
                date,
            })
            .unwrap();
    }

    #[test]
    fn test_is_past_boundaries() {
        let (_, _, cache) = setup(date(2023, Month::March, 15));
        assert!(cache.is_past(&ReportKey::new(7, 2023, 2).unwrap()));
        assert!(cache.is_past(&ReportKey::new(7, 2022, 12).unwrap()));
        assert!(!cache.is_past(&ReportKey::new(7, 2023, 3).unwrap()));
        assert!(!cache.is_past(&ReportKey::new(7, 2023, 4).unwrap()));
        assert!(!cache.is_past(&ReportKey::new(7, 2024, 1).unwrap()));
    }

    #[test]
    fn test_past_period_is_frozen() {
        let (storage, _, cache) = setup(date(2023, Month::March, 1));
        add(&storage, 1, Category::Food, dec!(12.5), date(2023, Month::January, 3), "lunch");
        let key = ReportKey::new(7, 2023, 1).unwrap();

        let first = cache.get_or_create(&key).unwrap();
        add(&storage, 2, Category::Food, dec!(99), date(2023, Month::January, 4), "late entry");
        let second = cache.get_or_create(&key).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.items(Category::Food).len(), 1);
        assert_eq!(storage.report_count(), 1);
    }

    #[test]
    fn test_current_period_is_recomputed_and_not_stored() {
        let (storage, _, cache) = setup(date(2023, Month::January, 20));
        add(&storage, 1, Category::Food, dec!(12.5), date(2023, Month::January, 3), "lunch");
        let key = ReportKey::new(7, 2023, 1).unwrap();

        assert_eq!(cache.get_or_create(&key).unwrap().items(Category::Food).len(), 1);
        add(&storage, 2, Category::Food, dec!(4), date(2023, Month::January, 20), "snack");
        assert_eq!(cache.get_or_create(&key).unwrap().items(Category::Food).len(), 2);
        assert_eq!(storage.report_count(), 0);
    }

    #[test]
    fn test_materializes_once_month_closes() {
        let (storage, clock, cache) = setup(date(2023, Month::January, 31));
        add(&storage, 1, Category::Health, dec!(20), date(2023, Month::January, 31), "pharmacy");
        let key = ReportKey::new(7, 2023, 1).unwrap();

        cache.get_or_create(&key).unwrap();
        assert_eq!(storage.report_count(), 0);

        clock.set(date(2023, Month::February, 1));
        cache.get_or_create(&key).unwrap();
        assert_eq!(storage.report_count(), 1);
    }

    #[test]
    fn test_raw_validation_happens_before_store_access() {
        let (storage, _, cache) = setup(date(2023, Month::March, 1));
        assert!(matches!(cache.get_or_create_raw("seven", "2023", "1"), Err(Error::Validation(_))));
        assert!(matches!(cache.get_or_create_raw("7", "2023", "13"), Err(Error::Validation(_))));
        assert_eq!(storage.report_count(), 0);
    }

    /// Every insert conflicts, yet the conflicting report is never found.
    struct VanishingWinner;

    impl ReportStore for VanishingWinner {
        fn find_report(&self, _: &ReportKey) -> Result<Option<Report>, StorageError> {
            Ok(None)
        }

        fn insert_report(&self, report: &Report) -> Result<(), StorageError> {
            Err(StorageError::KeyConflict(report.key))
        }

        fn delete_report(&self, _: &ReportKey) -> Result<bool, StorageError> {
            Ok(false)
        }
    }

    #[test]
    fn test_vanished_winner_serves_computed_copy() {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(FixedClock::new(date(2023, Month::March, 15)));
        let cache = ReportCache::new(storage.clone(), Arc::new(VanishingWinner), clock);
        add(&storage, 1, Category::Food, dec!(4.5), date(2023, Month::January, 9), "bagel");

        let report = cache.get_or_create(&ReportKey::new(7, 2023, 1).unwrap()).unwrap();
        assert_eq!(report.items(Category::Food)[0].description, "bagel");
        assert_eq!(report.total(), dec!(4.5));
    }

    #[test]
    fn test_evict_allows_recompute() {
        let (storage, _, cache) = setup(date(2023, Month::March, 1));
        let key = ReportKey::new(7, 2023, 1).unwrap();
        let empty = cache.get_or_create(&key).unwrap();
        assert_eq!(empty.total(), dec!(0));

        add(&storage, 1, Category::Sports, dec!(30), date(2023, Month::January, 9), "tennis");
        assert!(cache.evict(&key).unwrap());
        assert_eq!(cache.get_or_create(&key).unwrap().total(), dec!(30));
    }
}
