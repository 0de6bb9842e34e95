//! Database module for `FinNova`
//!
//! Owner-scoped storage for expenses, savings and user accounts.

mod schema;

pub use schema::*;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Email already registered: {0}")]
    EmailExists(String),
    #[error("Database lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Record Operations ====================

    /// List all records of a collection owned by `owner_id`, newest date first
    pub fn list_records(&self, collection: Collection, owner_id: &str) -> DbResult<Vec<Record>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT id, owner_id, description, amount, category, date
             FROM {} WHERE owner_id = ?1
             ORDER BY date DESC, created_at DESC",
            collection.table()
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt.query_map(params![owner_id], |row| {
            Ok(Record {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                description: row.get(2)?,
                amount: amount_from_sql(row.get_ref(3)?),
                category: row.get(4)?,
                date: row.get(5)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Insert a record; the store assigns the id
    pub fn insert_record(
        &self,
        collection: Collection,
        owner_id: &str,
        new: &NewRecord,
    ) -> DbResult<Record> {
        let conn = self.lock()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let sql = format!(
            "INSERT INTO {} (id, owner_id, description, amount, category, date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            collection.table()
        );
        conn.execute(
            &sql,
            params![
                id,
                owner_id,
                new.description,
                new.amount,
                new.category,
                new.date,
                now.to_rfc3339()
            ],
        )?;

        Ok(new.clone().into_record(id, owner_id))
    }

    /// Delete a record by id, scoped to its owner
    pub fn delete_record(&self, collection: Collection, owner_id: &str, id: &str) -> DbResult<()> {
        let conn = self.lock()?;
        let sql = format!(
            "DELETE FROM {} WHERE id = ?1 AND owner_id = ?2",
            collection.table()
        );
        let deleted = conn.execute(&sql, params![id, owner_id])?;

        if deleted == 0 {
            return Err(DbError::RecordNotFound(id.to_string()));
        }
        Ok(())
    }

    // ==================== User Operations ====================

    /// Create a user account
    pub fn create_user(&self, id: &str, email: &str, password_hash: &str) -> DbResult<UserRow> {
        let conn = self.lock()?;
        let now = Utc::now();

        let result = conn.execute(
            "INSERT INTO users (id, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, email, password_hash, now.to_rfc3339()],
        );

        match result {
            Ok(_) => Ok(UserRow {
                id: id.to_string(),
                email: email.to_string(),
                password_hash: password_hash.to_string(),
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DbError::EmailExists(email.to_string()))
            }
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    /// Look up a user by email
    pub fn find_user_by_email(&self, email: &str) -> DbResult<Option<UserRow>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, email, password_hash FROM users WHERE email = ?1",
            params![email],
            |row| {
                Ok(UserRow {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    password_hash: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(DbError::from)
    }

    /// Write a raw amount value, bypassing validation (for testing)
    #[cfg(test)]
    pub fn insert_raw_amount(
        &self,
        collection: Collection,
        owner_id: &str,
        amount: rusqlite::types::Value,
    ) -> DbResult<()> {
        let conn = self.lock()?;
        let sql = format!(
            "INSERT INTO {} (id, owner_id, description, amount, category, date, created_at)
             VALUES (?1, ?2, 'raw', ?3, 'Other', '2024-01-01', ?4)",
            collection.table()
        );
        conn.execute(
            &sql,
            params![
                uuid::Uuid::new_v4().to_string(),
                owner_id,
                amount,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}
