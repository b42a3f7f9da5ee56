use std::cmp::Ordering;
use crate::config::RankingWeights;
use crate::models::{DataSource, RankEntry};

/// Weighted blend of a source's running metrics.
pub fn composite_score(source: &DataSource, weights: &RankingWeights, response_ceiling_ms: f64) -> f64 {
    let performance = 1.0 - (source.mean_response_ms / response_ceiling_ms).clamp(0.0, 1.0);
    weights.accuracy * source.accuracy
        + weights.confidence * source.confidence
        + weights.completeness * source.completeness
        + weights.performance * performance
        + weights.success_rate * source.success_rate
}

/// Order sources by score, highest first. The sort is stable, so sources
/// passed in creation order keep that order on ties.
pub fn order_by_score<'a>(
    sources: &'a [DataSource],
    weights: &RankingWeights,
    response_ceiling_ms: f64,
) -> Vec<(&'a DataSource, f64)> {
    let mut scored: Vec<(&DataSource, f64)> = sources
        .iter()
        .map(|s| (s, composite_score(s, weights, response_ceiling_ms)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored
}

pub fn rank_entry(source: &DataSource, rank: u32, previous_rank: Option<u32>, score: f64) -> RankEntry {
    RankEntry {
        source_id: source.id.clone(),
        source_name: source.name.clone(),
        rank,
        previous_rank,
        composite_score: score,
        accuracy: source.accuracy,
        confidence: source.confidence,
        completeness: source.completeness,
        mean_response_ms: source.mean_response_ms,
        success_rate: source.success_rate,
        total_evaluations: source.total_evaluations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn source(id: &str, seq: i64, acc: f64, conf: f64, comp: f64, resp: f64, sr: f64) -> DataSource {
        let mut s = DataSource::new(id, id, SourceType::NetworkScanner, id);
        s.seq = seq;
        s.accuracy = acc;
        s.confidence = conf;
        s.completeness = comp;
        s.mean_response_ms = resp;
        s.success_rate = sr;
        s.total_evaluations = 1;
        s
    }

    #[test]
    fn test_more_accurate_source_ranks_higher() {
        let w = RankingWeights::default();
        let a = source("a", 2, 0.9, 0.9, 0.9, 500.0, 1.0);
        let b = source("b", 1, 0.5, 0.9, 0.9, 500.0, 1.0);
        assert!(composite_score(&a, &w, 10_000.0) > composite_score(&b, &w, 10_000.0));

        let sources = vec![b, a];
        let ordered = order_by_score(&sources, &w, 10_000.0);
        assert_eq!(ordered[0].0.id, "a");
    }

    #[test]
    fn test_composite_formula() {
        let w = RankingWeights::default();
        let s = source("s", 1, 1.0, 1.0, 1.0, 0.0, 1.0);
        assert!((composite_score(&s, &w, 10_000.0) - 1.0).abs() < 1e-9);
        // Response time beyond the ceiling contributes nothing.
        let slow = source("slow", 1, 0.0, 0.0, 0.0, 50_000.0, 0.0);
        assert_eq!(composite_score(&slow, &w, 10_000.0), 0.0);
        let mid = source("mid", 1, 0.0, 0.0, 0.0, 5_000.0, 0.0);
        assert!((composite_score(&mid, &w, 10_000.0) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let w = RankingWeights::default();
        let sources = vec![
            source("first", 1, 0.5, 0.5, 0.5, 1000.0, 0.5),
            source("second", 2, 0.5, 0.5, 0.5, 1000.0, 0.5),
            source("third", 3, 0.5, 0.5, 0.5, 1000.0, 0.5),
        ];
        let ids: Vec<&str> = order_by_score(&sources, &w, 10_000.0).iter().map(|(s, _)| s.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }
}
