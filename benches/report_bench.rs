use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use costreport::clock::FixedClock;
use costreport::report_cache::ReportCache;
use costreport::sequence::SequenceAllocator;
use costreport_core::{Category, CostRecord, CostStore, ReportKey};
use costreport_memory::InMemoryStorage;
use rust_decimal::Decimal;
use time::{Date, Month};

fn setup() -> (Arc<InMemoryStorage>, ReportCache) {
    let storage = Arc::new(InMemoryStorage::new());
    let today = Date::from_calendar_date(2024, Month::May, 10).unwrap();
    let cache = ReportCache::new(storage.clone(), storage.clone(), Arc::new(FixedClock::new(today)));
    (storage, cache)
}

fn seed_data(storage: &InMemoryStorage) {
    // 10 users, 1000 costs spread over April and May 2024
    for i in 0..1000u64 {
        let month = if i % 2 == 0 { Month::April } else { Month::May };
        storage
            .insert_cost(&CostRecord {
                id: i + 1,
                user_id: (i % 10) as i64,
                category: Category::ALL[(i % 5) as usize],
                amount: Decimal::new(1000 + i as i64, 2),
                description: format!("cost {}", i),
                date: Date::from_calendar_date(2024, month, (i % 28 + 1) as u8).unwrap(),
            })
            .unwrap();
    }
}

fn bench_cached_report(c: &mut Criterion) {
    let (storage, cache) = setup();
    seed_data(&storage);
    let key = ReportKey::new(3, 2024, 4).unwrap();
    cache.get_or_create(&key).unwrap();

    c.bench_function("cached_past_report", |b| {
        b.iter(|| cache.get_or_create(black_box(&key)).unwrap())
    });
}

fn bench_open_period_report(c: &mut Criterion) {
    let (storage, cache) = setup();
    seed_data(&storage);
    let key = ReportKey::new(3, 2024, 5).unwrap();

    c.bench_function("open_period_report", |b| {
        b.iter(|| cache.get_or_create(black_box(&key)).unwrap())
    });
}

fn bench_sequence_allocation(c: &mut Criterion) {
    let allocator = SequenceAllocator::new(Arc::new(InMemoryStorage::new()));

    c.bench_function("sequence_allocation", |b| {
        b.iter(|| allocator.next(black_box("cost.id")).unwrap())
    });
}

criterion_group!(
    benches,
    bench_cached_report,
    bench_open_period_report,
    bench_sequence_allocation
);
criterion_main!(benches);
