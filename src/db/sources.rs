use chrono::{DateTime, Utc};
use crate::errors::MalsiftError;
use crate::models::{DataSource, Evaluation};
use super::connection::{query_doc, query_docs, to_doc};
use super::Database;

impl Database {
    /// Insert a new source, assigning its creation sequence number.
    /// Returns false when a source with this id already exists.
    pub fn insert_source(&self, source: &DataSource) -> Result<bool, MalsiftError> {
        let conn = self.lock()?;
        let seq: i64 = conn
            .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM data_sources", [], |row| row.get(0))
            .map_err(|e| MalsiftError::Database(format!("Sequence query failed: {}", e)))?;
        let mut stored = source.clone();
        stored.seq = seq;
        let affected = conn.execute(
            "INSERT OR IGNORE INTO data_sources (id, seq, source_type, is_active, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![stored.id, seq, stored.source_type.as_str(), stored.is_active, to_doc(&stored)?],
        ).map_err(|e| MalsiftError::Database(format!("Failed to insert source: {}", e)))?;
        Ok(affected > 0)
    }

    /// Overwrite a source's metrics and ranks. The creation sequence is kept.
    pub fn update_source(&self, source: &DataSource) -> Result<(), MalsiftError> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE data_sources SET is_active = ?2, doc = ?3 WHERE id = ?1",
            rusqlite::params![source.id, source.is_active, to_doc(source)?],
        ).map_err(|e| MalsiftError::Database(format!("Failed to update source: {}", e)))?;
        if affected == 0 {
            return Err(MalsiftError::NotFound(format!("data source {}", source.id)));
        }
        Ok(())
    }

    pub fn get_source(&self, id: &str) -> Result<Option<DataSource>, MalsiftError> {
        let conn = self.lock()?;
        query_doc(&conn, "SELECT doc FROM data_sources WHERE id = ?1", &[&id])
    }

    /// All sources in creation order.
    pub fn list_sources(&self) -> Result<Vec<DataSource>, MalsiftError> {
        let conn = self.lock()?;
        query_docs(&conn, "SELECT doc FROM data_sources ORDER BY seq ASC", &[])
    }

    pub fn insert_evaluations(&self, evaluations: &[Evaluation]) -> Result<(), MalsiftError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| MalsiftError::Database(format!("Failed to begin transaction: {}", e)))?;
        for eval in evaluations {
            tx.execute(
                "INSERT INTO evaluations (id, source_id, evaluation_type, evaluated_at, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    eval.id,
                    eval.source_id,
                    eval.evaluation_type.as_str(),
                    eval.evaluated_at.to_rfc3339(),
                    to_doc(eval)?,
                ],
            ).map_err(|e| MalsiftError::Database(format!("Failed to insert evaluation: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| MalsiftError::Database(format!("Failed to commit evaluations: {}", e)))?;
        Ok(())
    }

    pub fn list_evaluations(&self, source_id: &str, limit: usize) -> Result<Vec<Evaluation>, MalsiftError> {
        let conn = self.lock()?;
        query_docs(
            &conn,
            "SELECT doc FROM evaluations WHERE source_id = ?1 ORDER BY evaluated_at DESC LIMIT ?2",
            &[&source_id, &(limit as i64)],
        )
    }

    pub fn count_evaluations_since(&self, since: DateTime<Utc>) -> Result<u64, MalsiftError> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM evaluations WHERE evaluated_at >= ?1",
                rusqlite::params![since.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(|e| MalsiftError::Database(format!("Count failed: {}", e)))?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvaluationMethod, EvaluationType, SourceType};

    #[test]
    fn test_insert_assigns_sequence() {
        let db = Database::in_memory().unwrap();
        let a = DataSource::new("nmap", "Nmap", SourceType::NetworkScanner, "nmap");
        let b = DataSource::new("edr", "EDR", SourceType::EdrPlatform, "edr");
        assert!(db.insert_source(&a).unwrap());
        assert!(db.insert_source(&b).unwrap());
        assert!(!db.insert_source(&a).unwrap());

        let sources = db.list_sources().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "nmap");
        assert_eq!(sources[0].seq, 1);
        assert_eq!(sources[1].seq, 2);
    }

    #[test]
    fn test_update_missing_source() {
        let db = Database::in_memory().unwrap();
        let s = DataSource::new("ghost", "Ghost", SourceType::AsmTool, "ghost");
        assert!(matches!(db.update_source(&s), Err(MalsiftError::NotFound(_))));
    }

    #[test]
    fn test_evaluations_roundtrip_and_count() {
        let db = Database::in_memory().unwrap();
        db.insert_source(&DataSource::new("nmap", "Nmap", SourceType::NetworkScanner, "nmap")).unwrap();
        let eval = Evaluation {
            id: "e1".into(),
            source_id: "nmap".into(),
            evaluation_type: EvaluationType::OsDetection,
            device_address: "10.0.0.5".into(),
            predicted: "Linux".into(),
            actual: "Linux".into(),
            accuracy: 1.0,
            confidence: 0.8,
            method: EvaluationMethod::StringSimilarity,
            response_time_ms: 1000.0,
            completeness: 1.0,
            evaluated_at: Utc::now(),
        };
        db.insert_evaluations(&[eval]).unwrap();
        assert_eq!(db.list_evaluations("nmap", 10).unwrap().len(), 1);
        assert_eq!(db.count_evaluations_since(Utc::now() - chrono::Duration::days(7)).unwrap(), 1);
    }
}
