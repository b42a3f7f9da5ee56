use chrono::{DateTime, Utc};
use crate::errors::MalsiftError;
use crate::models::{Alert, RankingSnapshot};
use super::connection::{query_doc, query_docs, to_doc};
use super::Database;

impl Database {
    /// Store a snapshot together with the alerts it raised.
    pub fn insert_snapshot(&self, snapshot: &RankingSnapshot, alerts: &[Alert]) -> Result<(), MalsiftError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| MalsiftError::Database(format!("Failed to begin transaction: {}", e)))?;
        tx.execute(
            "INSERT INTO ranking_snapshots (id, created_at, doc) VALUES (?1, ?2, ?3)",
            rusqlite::params![snapshot.id, snapshot.created_at.to_rfc3339(), to_doc(snapshot)?],
        ).map_err(|e| MalsiftError::Database(format!("Failed to insert snapshot: {}", e)))?;
        for alert in alerts {
            tx.execute(
                "INSERT INTO alerts (id, source_id, is_active, triggered_at, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    alert.id,
                    alert.source_id,
                    alert.is_active,
                    alert.triggered_at.to_rfc3339(),
                    to_doc(alert)?,
                ],
            ).map_err(|e| MalsiftError::Database(format!("Failed to insert alert: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| MalsiftError::Database(format!("Failed to commit snapshot: {}", e)))?;
        Ok(())
    }

    pub fn latest_snapshot(&self) -> Result<Option<RankingSnapshot>, MalsiftError> {
        let conn = self.lock()?;
        query_doc(&conn, "SELECT doc FROM ranking_snapshots ORDER BY created_at DESC LIMIT 1", &[])
    }

    /// Snapshots taken at or after `since`, oldest first.
    pub fn list_snapshots_since(&self, since: DateTime<Utc>) -> Result<Vec<RankingSnapshot>, MalsiftError> {
        let conn = self.lock()?;
        query_docs(
            &conn,
            "SELECT doc FROM ranking_snapshots WHERE created_at >= ?1 ORDER BY created_at ASC",
            &[&since.to_rfc3339()],
        )
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<Alert>, MalsiftError> {
        let conn = self.lock()?;
        query_doc(&conn, "SELECT doc FROM alerts WHERE id = ?1", &[&id])
    }

    /// Newest first.
    pub fn list_alerts(&self, active_only: bool, limit: usize) -> Result<Vec<Alert>, MalsiftError> {
        let conn = self.lock()?;
        query_docs(
            &conn,
            "SELECT doc FROM alerts WHERE (?1 = 0 OR is_active = 1) ORDER BY triggered_at DESC LIMIT ?2",
            &[&active_only, &(limit as i64)],
        )
    }

    pub fn count_active_alerts(&self) -> Result<usize, MalsiftError> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM alerts WHERE is_active = 1", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| MalsiftError::Database(format!("Failed to count alerts: {}", e)))
    }

    /// Mark an alert acknowledged and inactive. Acknowledging twice is a no-op.
    pub fn acknowledge_alert(&self, id: &str, by: &str) -> Result<Alert, MalsiftError> {
        let mut alert = self
            .get_alert(id)?
            .ok_or_else(|| MalsiftError::NotFound(format!("alert {}", id)))?;
        if alert.acknowledged {
            return Ok(alert);
        }
        alert.acknowledged = true;
        alert.is_active = false;
        alert.acknowledged_by = Some(by.to_string());
        alert.acknowledged_at = Some(Utc::now());

        let conn = self.lock()?;
        conn.execute(
            "UPDATE alerts SET is_active = 0, doc = ?2 WHERE id = ?1",
            rusqlite::params![alert.id, to_doc(&alert)?],
        ).map_err(|e| MalsiftError::Database(format!("Failed to acknowledge alert: {}", e)))?;
        Ok(alert)
    }
}
