use crate::errors::MalsiftError;
use crate::models::CanonicalDevice;
use super::connection::{query_doc, query_docs, to_doc};
use super::Database;

impl Database {
    pub fn upsert_device(&self, device: &CanonicalDevice) -> Result<(), MalsiftError> {
        let doc = to_doc(device)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO devices (address, device_type, last_seen, doc) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(address) DO UPDATE SET device_type = excluded.device_type,
                 last_seen = excluded.last_seen, doc = excluded.doc",
            rusqlite::params![device.address, device.device_type, device.last_seen.to_rfc3339(), doc],
        ).map_err(|e| MalsiftError::Database(format!("Failed to save device: {}", e)))?;
        Ok(())
    }

    pub fn get_device(&self, address: &str) -> Result<Option<CanonicalDevice>, MalsiftError> {
        let conn = self.lock()?;
        query_doc(&conn, "SELECT doc FROM devices WHERE address = ?1", &[&address])
    }

    /// Most recently seen first.
    pub fn list_devices(&self, limit: usize, offset: usize) -> Result<Vec<CanonicalDevice>, MalsiftError> {
        let conn = self.lock()?;
        query_docs(
            &conn,
            "SELECT doc FROM devices ORDER BY last_seen DESC, address ASC LIMIT ?1 OFFSET ?2",
            &[&(limit as i64), &(offset as i64)],
        )
    }

    pub fn count_devices(&self) -> Result<usize, MalsiftError> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))
            .map_err(|e| MalsiftError::Database(format!("Count failed: {}", e)))?;
        Ok(n as usize)
    }
}
