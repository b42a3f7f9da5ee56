use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use malsift::aggregator::{analyzer, DataAggregator};
use malsift::config::{self, MalsiftConfig};
use malsift::db::Database;
use malsift::errors::MalsiftError;
use malsift::orchestrator::{ScanEvent, ScanOrchestrator};
use malsift::ranking::comparison::{OpenAiJudge, SemanticJudge};
use malsift::ranking::AccuracyRankingEngine;
use malsift::scanner::EngineRegistry;
use malsift::scheduler::Scheduler;
use tracing::info;

/// Services shared by every command, wired from one configuration.
pub struct App {
    pub config: MalsiftConfig,
    pub db: Database,
    pub aggregator: Arc<DataAggregator>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub ranking: Arc<AccuracyRankingEngine>,
}

impl App {
    pub async fn load(
        config_path: Option<&Path>,
        db_override: Option<&str>,
        events: Option<mpsc::UnboundedSender<ScanEvent>>,
    ) -> Result<Self, MalsiftError> {
        let config = config::load_or_default(config_path).await?;
        let db_path = db_override.unwrap_or(&config.database.path).to_string();
        let db = Database::new(&db_path)?;
        info!(db = %db_path, "Database opened");

        let mut aggregator = DataAggregator::new(db.clone(), &config.aggregator);
        if let Some(analyzer) = analyzer::from_config(&config.analyzer, &config.judge)? {
            aggregator = aggregator.with_analyzer(analyzer);
        }
        let aggregator = Arc::new(aggregator);
        let registry = EngineRegistry::from_config(&config)?;
        let mut orchestrator = ScanOrchestrator::new(db.clone(), registry, aggregator.clone(), &config.orchestrator);
        if let Some(tx) = events {
            orchestrator = orchestrator.with_event_channel(tx);
        }

        let judge: Option<Arc<dyn SemanticJudge>> = match OpenAiJudge::from_config(&config.judge)? {
            Some(j) => {
                info!(model = %config.judge.model, "Semantic judge enabled");
                Some(Arc::new(j))
            }
            None => None,
        };
        let ranking = Arc::new(AccuracyRankingEngine::new(db.clone(), config.ranking.clone(), judge));
        if config.ranking.seed_default_sources {
            ranking.seed_default_sources()?;
        }

        Ok(Self { config, db, aggregator, orchestrator: Arc::new(orchestrator), ranking })
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(self.db.clone(), self.orchestrator.clone(), &self.config.scheduler))
    }
}
