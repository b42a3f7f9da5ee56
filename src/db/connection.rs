use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use crate::errors::MalsiftError;

/// Shared SQLite handle. Cloning is cheap and shares the connection.
#[derive(Clone)]
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, MalsiftError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| MalsiftError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| MalsiftError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.initialize()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, MalsiftError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MalsiftError::Database(format!("Failed to open in-memory db: {}", e)))?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<(), MalsiftError> {
        let conn = self.lock()?;
        conn.execute_batch(super::schema::CREATE_TABLES)
            .map_err(|e| MalsiftError::Database(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, MalsiftError> {
        self.conn
            .lock()
            .map_err(|_| MalsiftError::Database("Database connection lock poisoned".into()))
    }
}

pub(crate) fn to_doc<T: Serialize>(value: &T) -> Result<String, MalsiftError> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_doc<T: DeserializeOwned>(doc: &str) -> Result<T, MalsiftError> {
    Ok(serde_json::from_str(doc)?)
}

/// Run a single-column `doc` query and decode every row.
pub(crate) fn query_docs<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<T>, MalsiftError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| MalsiftError::Database(format!("Query failed: {}", e)))?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(|e| MalsiftError::Database(format!("Query error: {}", e)))?;

    let mut out = Vec::new();
    for row in rows {
        let doc = row.map_err(|e| MalsiftError::Database(format!("Row error: {}", e)))?;
        out.push(from_doc(&doc)?);
    }
    Ok(out)
}

pub(crate) fn query_doc<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<T>, MalsiftError> {
    let result = conn.query_row(sql, params, |row| row.get::<_, String>(0));
    match result {
        Ok(doc) => Ok(Some(from_doc(&doc)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(MalsiftError::Database(format!("Query error: {}", e))),
    }
}
