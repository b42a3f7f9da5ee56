use crate::errors::MalsiftError;
use crate::models::RawResult;
use crate::orchestrator::state::{ScanJob, ScanState};
use super::connection::{query_doc, query_docs, to_doc};
use super::Database;

impl Database {
    /// Insert or replace the stored copy of a job.
    pub fn save_job(&self, job: &ScanJob) -> Result<(), MalsiftError> {
        let doc = to_doc(job)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scan_jobs (id, state, engine, owner, schedule_id, created_at, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, doc = excluded.doc",
            rusqlite::params![
                job.id,
                job.state.as_str(),
                job.engine,
                job.owner,
                job.schedule_id,
                job.created_at.to_rfc3339(),
                doc,
            ],
        ).map_err(|e| MalsiftError::Database(format!("Failed to save job: {}", e)))?;
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<ScanJob>, MalsiftError> {
        let conn = self.lock()?;
        query_doc(&conn, "SELECT doc FROM scan_jobs WHERE id = ?1", &[&id])
    }

    /// Newest first, optionally filtered by state and owner.
    pub fn list_jobs(
        &self,
        state: Option<ScanState>,
        owner: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ScanJob>, MalsiftError> {
        let conn = self.lock()?;
        let state = state.map(|s| s.as_str());
        query_docs(
            &conn,
            "SELECT doc FROM scan_jobs
             WHERE (?1 IS NULL OR state = ?1) AND (?2 IS NULL OR owner = ?2)
             ORDER BY created_at DESC LIMIT ?3 OFFSET ?4",
            &[&state, &owner, &(limit as i64), &(offset as i64)],
        )
    }

    /// Persist a job's raw results as one batch.
    pub fn insert_raw_results(&self, job_id: &str, results: &[RawResult]) -> Result<(), MalsiftError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| MalsiftError::Database(format!("Failed to begin transaction: {}", e)))?;
        for result in results {
            tx.execute(
                "INSERT INTO raw_results (job_id, address, engine, success, completed_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    job_id,
                    result.address(),
                    result.engine,
                    result.success,
                    result.completed_at.to_rfc3339(),
                    to_doc(result)?,
                ],
            ).map_err(|e| MalsiftError::Database(format!("Failed to insert raw result: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| MalsiftError::Database(format!("Failed to commit raw results: {}", e)))?;
        Ok(())
    }

    /// Results in dispatch order.
    pub fn list_raw_results(&self, job_id: &str, limit: usize, offset: usize) -> Result<Vec<RawResult>, MalsiftError> {
        let conn = self.lock()?;
        query_docs(
            &conn,
            "SELECT doc FROM raw_results WHERE job_id = ?1 ORDER BY id ASC LIMIT ?2 OFFSET ?3",
            &[&job_id, &(limit as i64), &(offset as i64)],
        )
    }
}
