//! PostgreSQL storage backend for costreport.
//!
//! Uses the blocking `postgres` client. Call it from a blocking context
//! (a plain thread or `tokio::task::spawn_blocking`), never directly from an
//! async task.

use std::{str::FromStr, sync::Mutex};

use postgres::{error::SqlState, Client, IsolationLevel, NoTls};
use rust_decimal::Decimal;
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

use costreport_core::{
    Category, CostItem, CostRecord, CostSource, CostStore, Report, ReportKey, ReportStore,
    SequenceStore, StorageError, User, UserStore,
};

pub struct PostgresStorage {
    client: Mutex<Client>,
}

impl PostgresStorage {
    pub fn new(connection_string: &str) -> Result<Self, StorageError> {
        let client = Client::connect(connection_string, NoTls)
            .map_err(|e| StorageError::Unavailable(format!("PostgreSQL connection failed: {}", e)))?;

        let storage = Self {
            client: Mutex::new(client),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let mut client = self.lock()?;
        client
            .batch_execute(
                "
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                birthday TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS costs (
                seq BIGSERIAL,
                doc_id TEXT PRIMARY KEY,
                id BIGINT NOT NULL UNIQUE,
                user_id BIGINT NOT NULL,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                day INTEGER NOT NULL,
                category TEXT NOT NULL,
                description TEXT NOT NULL,
                amount TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pg_costs_period
                ON costs(user_id, year, month);

            CREATE TABLE IF NOT EXISTS reports (
                doc_id TEXT PRIMARY KEY,
                user_id BIGINT NOT NULL,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, year, month)
            );

            CREATE TABLE IF NOT EXISTS report_items (
                report_id TEXT NOT NULL REFERENCES reports(doc_id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                category TEXT NOT NULL,
                amount TEXT NOT NULL,
                description TEXT NOT NULL,
                day INTEGER NOT NULL,
                PRIMARY KEY (report_id, position)
            );

            CREATE TABLE IF NOT EXISTS sequence_counters (
                scope TEXT PRIMARY KEY,
                value BIGINT NOT NULL
            );
            ",
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Client>, StorageError> {
        self.client
            .lock()
            .map_err(|_| StorageError::Unavailable("postgres client lock poisoned".to_string()))
    }
}

fn unavailable(e: postgres::Error) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

fn is_unique_violation(e: &postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

fn date_to_str(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month() as u8, d.day())
}

fn str_to_date(s: &str) -> Result<Date, StorageError> {
    let corrupt = || StorageError::Corrupt(format!("invalid date: {}", s));
    let mut parts = s.splitn(3, '-');
    let year = parts.next().and_then(|p| p.parse::<i32>().ok()).ok_or_else(corrupt)?;
    let month = parts.next().and_then(|p| p.parse::<u8>().ok()).ok_or_else(corrupt)?;
    let day = parts.next().and_then(|p| p.parse::<u8>().ok()).ok_or_else(corrupt)?;
    let month = Month::try_from(month).map_err(|_| corrupt())?;
    Date::from_calendar_date(year, month, day).map_err(|_| corrupt())
}

fn parse_category(s: &str) -> Result<Category, StorageError> {
    Category::from_str(s).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn parse_amount(s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::Corrupt(format!("invalid decimal: {}", e)))
}

fn small(v: i32, field: &str) -> Result<u8, StorageError> {
    u8::try_from(v).map_err(|_| StorageError::Corrupt(format!("invalid {}: {}", field, v)))
}

impl CostSource for PostgresStorage {
    fn find_costs(&self, user_id: i64, year: i32, month: u8) -> Result<Vec<CostRecord>, StorageError> {
        let mut client = self.lock()?;
        let rows = client
            .query(
                "SELECT id, user_id, year, month, day, category, description, amount
                 FROM costs
                 WHERE user_id = $1 AND year = $2 AND month = $3
                 ORDER BY seq",
                &[&user_id, &year, &(month as i32)],
            )
            .map_err(unavailable)?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get(0);
            let month = small(row.get(3), "month")?;
            let month = Month::try_from(month)
                .map_err(|_| StorageError::Corrupt(format!("invalid month: {}", month)))?;
            let date = Date::from_calendar_date(row.get(2), month, small(row.get(4), "day")?)
                .map_err(|e| StorageError::Corrupt(format!("invalid cost date: {}", e)))?;
            let category: String = row.get(5);
            let amount: String = row.get(7);
            result.push(CostRecord {
                id: id as u64,
                user_id: row.get(1),
                category: parse_category(&category)?,
                amount: parse_amount(&amount)?,
                description: row.get(6),
                date,
            });
        }
        Ok(result)
    }

    fn total_for_user(&self, user_id: i64) -> Result<Decimal, StorageError> {
        let mut client = self.lock()?;
        let rows = client
            .query("SELECT amount FROM costs WHERE user_id = $1", &[&user_id])
            .map_err(unavailable)?;

        let mut total = Decimal::ZERO;
        for row in rows {
            let amount: String = row.get(0);
            total += parse_amount(&amount)?;
        }
        Ok(total)
    }
}

impl CostStore for PostgresStorage {
    fn insert_cost(&self, cost: &CostRecord) -> Result<(), StorageError> {
        let mut client = self.lock()?;
        let doc_id = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc().to_string();
        client
            .execute(
                "INSERT INTO costs (doc_id, id, user_id, year, month, day, category, description, amount, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &doc_id,
                    &(cost.id as i64),
                    &cost.user_id,
                    &cost.year(),
                    &(cost.month() as i32),
                    &(cost.day() as i32),
                    &cost.category.as_str(),
                    &cost.description,
                    &cost.amount.to_string(),
                    &now,
                ],
            )
            .map_err(unavailable)?;
        tracing::debug!(cost_id = cost.id, user_id = cost.user_id, %doc_id, "Cost stored");
        Ok(())
    }
}

impl ReportStore for PostgresStorage {
    fn find_report(&self, key: &ReportKey) -> Result<Option<Report>, StorageError> {
        let mut client = self.lock()?;
        // Header and items must come from one snapshot, or a concurrent delete
        // can leave an empty report under the key.
        let mut tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .map_err(unavailable)?;
        let row = tx
            .query_opt(
                "SELECT doc_id FROM reports WHERE user_id = $1 AND year = $2 AND month = $3",
                &[&key.user_id, &key.year, &(key.month as i32)],
            )
            .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let doc_id: String = row.get(0);

        let rows = tx
            .query(
                "SELECT category, amount, description, day
                 FROM report_items
                 WHERE report_id = $1
                 ORDER BY position",
                &[&doc_id],
            )
            .map_err(unavailable)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let category: String = row.get(0);
            let amount: String = row.get(1);
            items.push((
                parse_category(&category)?,
                CostItem {
                    sum: parse_amount(&amount)?,
                    description: row.get(2),
                    day: small(row.get(3), "day")?,
                },
            ));
        }
        tx.commit().map_err(unavailable)?;
        Ok(Some(Report::from_items(*key, items)))
    }

    fn insert_report(&self, report: &Report) -> Result<(), StorageError> {
        let mut client = self.lock()?;
        let mut tx = client.transaction().map_err(unavailable)?;
        let doc_id = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc().to_string();
        let key = report.key;

        match tx.execute(
            "INSERT INTO reports (doc_id, user_id, year, month, created_at) VALUES ($1, $2, $3, $4, $5)",
            &[&doc_id, &key.user_id, &key.year, &(key.month as i32), &now],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StorageError::KeyConflict(key)),
            Err(e) => return Err(unavailable(e)),
        }

        for (position, (category, item)) in report.entries().enumerate() {
            tx.execute(
                "INSERT INTO report_items (report_id, position, category, amount, description, day)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &doc_id,
                    &(position as i32),
                    &category.as_str(),
                    &item.sum.to_string(),
                    &item.description,
                    &(item.day as i32),
                ],
            )
            .map_err(unavailable)?;
        }

        tx.commit().map_err(unavailable)?;
        tracing::debug!(%key, %doc_id, "Report stored");
        Ok(())
    }

    fn delete_report(&self, key: &ReportKey) -> Result<bool, StorageError> {
        let mut client = self.lock()?;
        let deleted = client
            .execute(
                "DELETE FROM reports WHERE user_id = $1 AND year = $2 AND month = $3",
                &[&key.user_id, &key.year, &(key.month as i32)],
            )
            .map_err(unavailable)?;
        Ok(deleted > 0)
    }
}

impl SequenceStore for PostgresStorage {
    fn next_value(&self, scope: &str) -> Result<u64, StorageError> {
        let mut client = self.lock()?;
        let row = client
            .query_one(
                "INSERT INTO sequence_counters (scope, value) VALUES ($1, 1)
                 ON CONFLICT (scope) DO UPDATE SET value = sequence_counters.value + 1
                 RETURNING value",
                &[&scope],
            )
            .map_err(unavailable)?;
        let value: i64 = row.get(0);
        Ok(value as u64)
    }
}

impl UserStore for PostgresStorage {
    fn create_user(&self, user: &User) -> Result<(), StorageError> {
        let mut client = self.lock()?;
        match client.execute(
            "INSERT INTO users (id, first_name, last_name, birthday) VALUES ($1, $2, $3, $4)",
            &[&user.id, &user.first_name, &user.last_name, &date_to_str(user.birthday)],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::UserAlreadyExists(user.id)),
            Err(e) => Err(unavailable(e)),
        }
    }

    fn find_user(&self, id: i64) -> Result<Option<User>, StorageError> {
        let mut client = self.lock()?;
        let row = client
            .query_opt(
                "SELECT id, first_name, last_name, birthday FROM users WHERE id = $1",
                &[&id],
            )
            .map_err(unavailable)?;

        row.map(|row| {
            let birthday: String = row.get(3);
            Ok(User {
                id: row.get(0),
                first_name: row.get(1),
                last_name: row.get(2),
                birthday: str_to_date(&birthday)?,
            })
        })
        .transpose()
    }

    fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let mut client = self.lock()?;
        let rows = client
            .query("SELECT id, first_name, last_name, birthday FROM users ORDER BY id", &[])
            .map_err(unavailable)?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let birthday: String = row.get(3);
            result.push(User {
                id: row.get(0),
                first_name: row.get(1),
                last_name: row.get(2),
                birthday: str_to_date(&birthday)?,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_round_trip() {
        let d = Date::from_calendar_date(1999, Month::March, 12).unwrap();
        assert_eq!(date_to_str(d), "1999-03-12");
        assert_eq!(str_to_date("1999-03-12").unwrap(), d);
        assert!(str_to_date("1999-13-01").is_err());
        assert!(str_to_date("garbage").is_err());
    }

    #[test]
    fn test_parse_helpers_reject_bad_rows() {
        assert!(parse_category("travel").is_err());
        assert!(parse_amount("twelve").is_err());
        assert!(small(300, "day").is_err());
        assert_eq!(small(31, "day").unwrap(), 31);
    }
}
