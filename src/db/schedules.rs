use crate::errors::MalsiftError;
use crate::models::Schedule;
use super::connection::{query_doc, query_docs, to_doc};
use super::Database;

impl Database {
    pub fn save_schedule(&self, schedule: &Schedule) -> Result<(), MalsiftError> {
        let doc = to_doc(schedule)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO schedules (id, name, enabled, next_run, doc) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, enabled = excluded.enabled,
                 next_run = excluded.next_run, doc = excluded.doc",
            rusqlite::params![
                schedule.id,
                schedule.name,
                schedule.enabled,
                schedule.next_run.map(|t| t.to_rfc3339()),
                doc,
            ],
        ).map_err(|e| MalsiftError::Database(format!("Failed to save schedule: {}", e)))?;
        Ok(())
    }

    pub fn get_schedule(&self, id: &str) -> Result<Option<Schedule>, MalsiftError> {
        let conn = self.lock()?;
        query_doc(&conn, "SELECT doc FROM schedules WHERE id = ?1", &[&id])
    }

    pub fn list_schedules(&self) -> Result<Vec<Schedule>, MalsiftError> {
        let conn = self.lock()?;
        query_docs(&conn, "SELECT doc FROM schedules ORDER BY name ASC", &[])
    }

    pub fn delete_schedule(&self, id: &str) -> Result<bool, MalsiftError> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM schedules WHERE id = ?1", rusqlite::params![id])
            .map_err(|e| MalsiftError::Database(format!("Delete failed: {}", e)))?;
        Ok(affected > 0)
    }
}
