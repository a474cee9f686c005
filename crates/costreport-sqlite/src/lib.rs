//! SQLite storage backend for costreport.

use std::{str::FromStr, sync::Mutex};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use rust_decimal::Decimal;
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

use costreport_core::{
    Category, CostItem, CostRecord, CostSource, CostStore, Report, ReportKey, ReportStore,
    SequenceStore, StorageError, User, UserStore,
};

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(unavailable)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
            .map_err(unavailable)?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                birthday TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS costs (
                doc_id TEXT PRIMARY KEY,
                id INTEGER NOT NULL UNIQUE,
                user_id INTEGER NOT NULL,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                day INTEGER NOT NULL,
                category TEXT NOT NULL,
                description TEXT NOT NULL,
                amount TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_costs_period
                ON costs(user_id, year, month);

            CREATE TABLE IF NOT EXISTS reports (
                doc_id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, year, month)
            );

            CREATE TABLE IF NOT EXISTS report_items (
                report_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                category TEXT NOT NULL,
                amount TEXT NOT NULL,
                description TEXT NOT NULL,
                day INTEGER NOT NULL,
                PRIMARY KEY (report_id, position),
                FOREIGN KEY (report_id) REFERENCES reports(doc_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS sequence_counters (
                scope TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            ",
        )
        .map_err(unavailable)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

fn unavailable(e: rusqlite::Error) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
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

type CostRow = (i64, i64, i32, u8, u8, String, String, String);

fn cost_from_row(row: CostRow) -> Result<CostRecord, StorageError> {
    let (id, user_id, year, month, day, category, description, amount) = row;
    let month = Month::try_from(month).map_err(|_| StorageError::Corrupt(format!("invalid month: {}", month)))?;
    let date = Date::from_calendar_date(year, month, day)
        .map_err(|e| StorageError::Corrupt(format!("invalid cost date: {}", e)))?;
    Ok(CostRecord {
        id: id as u64,
        user_id,
        category: parse_category(&category)?,
        amount: parse_amount(&amount)?,
        description,
        date,
    })
}

impl CostSource for SqliteStorage {
    fn find_costs(&self, user_id: i64, year: i32, month: u8) -> Result<Vec<CostRecord>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, year, month, day, category, description, amount
                 FROM costs
                 WHERE user_id = ?1 AND year = ?2 AND month = ?3
                 ORDER BY rowid",
            )
            .map_err(unavailable)?;

        let rows = stmt
            .query_map(params![user_id, year, month], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })
            .map_err(unavailable)?
            .collect::<Result<Vec<CostRow>, _>>()
            .map_err(unavailable)?;

        rows.into_iter().map(cost_from_row).collect()
    }

    fn total_for_user(&self, user_id: i64) -> Result<Decimal, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT amount FROM costs WHERE user_id = ?1")
            .map_err(unavailable)?;
        let amounts = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))
            .map_err(unavailable)?;

        let mut total = Decimal::ZERO;
        for amount in amounts {
            total += parse_amount(&amount.map_err(unavailable)?)?;
        }
        Ok(total)
    }
}

impl CostStore for SqliteStorage {
    fn insert_cost(&self, cost: &CostRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let doc_id = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc().to_string();
        conn.execute(
            "INSERT INTO costs (doc_id, id, user_id, year, month, day, category, description, amount, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                doc_id,
                cost.id as i64,
                cost.user_id,
                cost.year(),
                cost.month(),
                cost.day(),
                cost.category.as_str(),
                cost.description,
                cost.amount.to_string(),
                now
            ],
        )
        .map_err(unavailable)?;
        tracing::debug!(cost_id = cost.id, user_id = cost.user_id, %doc_id, "Cost stored");
        Ok(())
    }
}

impl ReportStore for SqliteStorage {
    fn find_report(&self, key: &ReportKey) -> Result<Option<Report>, StorageError> {
        let conn = self.lock()?;
        let doc_id: Option<String> = conn
            .query_row(
                "SELECT doc_id FROM reports WHERE user_id = ?1 AND year = ?2 AND month = ?3",
                params![key.user_id, key.year, key.month],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;

        let Some(doc_id) = doc_id else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT category, amount, description, day
                 FROM report_items
                 WHERE report_id = ?1
                 ORDER BY position",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![doc_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u8>(3)?,
                ))
            })
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;

        let mut items = Vec::with_capacity(rows.len());
        for (category, amount, description, day) in rows {
            items.push((
                parse_category(&category)?,
                CostItem {
                    sum: parse_amount(&amount)?,
                    description,
                    day,
                },
            ));
        }
        Ok(Some(Report::from_items(*key, items)))
    }

    fn insert_report(&self, report: &Report) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(unavailable)?;
        let doc_id = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc().to_string();
        let key = report.key;

        match tx.execute(
            "INSERT INTO reports (doc_id, user_id, year, month, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![doc_id, key.user_id, key.year, key.month, now],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StorageError::KeyConflict(key)),
            Err(e) => return Err(unavailable(e)),
        }

        for (position, (category, item)) in report.entries().enumerate() {
            tx.execute(
                "INSERT INTO report_items (report_id, position, category, amount, description, day)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    doc_id,
                    position as i64,
                    category.as_str(),
                    item.sum.to_string(),
                    item.description,
                    item.day
                ],
            )
            .map_err(unavailable)?;
        }

        tx.commit().map_err(unavailable)?;
        tracing::debug!(%key, %doc_id, "Report stored");
        Ok(())
    }

    fn delete_report(&self, key: &ReportKey) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM reports WHERE user_id = ?1 AND year = ?2 AND month = ?3",
                params![key.user_id, key.year, key.month],
            )
            .map_err(unavailable)?;
        Ok(deleted > 0)
    }
}

impl SequenceStore for SqliteStorage {
    fn next_value(&self, scope: &str) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let value: i64 = conn
            .query_row(
                "INSERT INTO sequence_counters (scope, value) VALUES (?1, 1)
                 ON CONFLICT (scope) DO UPDATE SET value = value + 1
                 RETURNING value",
                params![scope],
                |row| row.get(0),
            )
            .map_err(unavailable)?;
        Ok(value as u64)
    }
}

impl UserStore for SqliteStorage {
    fn create_user(&self, user: &User) -> Result<(), StorageError> {
        let conn = self.lock()?;
        match conn.execute(
            "INSERT INTO users (id, first_name, last_name, birthday) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.first_name, user.last_name, date_to_str(user.birthday)],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::UserAlreadyExists(user.id)),
            Err(e) => Err(unavailable(e)),
        }
    }

    fn find_user(&self, id: i64) -> Result<Option<User>, StorageError> {
        let conn = self.lock()?;
        let row: Option<(i64, String, String, String)> = conn
            .query_row(
                "SELECT id, first_name, last_name, birthday FROM users WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(unavailable)?;

        row.map(|(id, first_name, last_name, birthday)| {
            Ok(User {
                id,
                first_name,
                last_name,
                birthday: str_to_date(&birthday)?,
            })
        })
        .transpose()
    }

    fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, first_name, last_name, birthday FROM users ORDER BY id")
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(unavailable)?;

        let mut result = Vec::new();
        for row in rows {
            let (id, first_name, last_name, birthday) = row.map_err(unavailable)?;
            result.push(User {
                id,
                first_name,
                last_name,
                birthday: str_to_date(&birthday)?,
            });
        }
        Ok(result)
    }
}
