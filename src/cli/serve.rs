use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use malsift::errors::MalsiftError;
use malsift::models::EvaluationType;
use malsift::ranking::AccuracyRankingEngine;
use crate::cli::app::App;
use crate::cli::commands::ServeArgs;
use tracing::{error, info, warn};

pub async fn handle_serve(args: ServeArgs, config: Option<&Path>, db: Option<&str>) -> Result<(), MalsiftError> {
    let app = App::load(config, db, None).await?;
    let token = CancellationToken::new();

    let recovered = app.orchestrator.recover_interrupted()?;
    if recovered > 0 {
        warn!(jobs = recovered, "Failed scan jobs left unfinished by a previous run");
    }

    let scheduler = app.scheduler();
    if app.config.scheduler.seed_default_schedules {
        let seeded = scheduler.seed_default_schedules(&app.config.scheduler.default_targets).await?;
        if seeded > 0 {
            info!(schedules = seeded, "Seeded default schedules");
        }
    }
    let stats = scheduler.stats()?;
    info!(
        schedules = stats.total_schedules,
        enabled = stats.enabled_schedules,
        engines = %app.orchestrator.engines().join(","),
        "Starting malsift service"
    );

    let scheduler_task = {
        let scheduler = scheduler.clone();
        let token = token.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    };

    let interval = Duration::from_secs(args.rank_interval.unwrap_or(app.config.ranking.rank_interval_secs).max(1));
    let ranking_task = {
        let ranking = app.ranking.clone();
        let token = token.clone();
        let sample = app.config.ranking.default_sample_size;
        let evaluate = !args.no_evaluate;
        tokio::spawn(async move { ranking_loop(ranking, interval, sample, evaluate, token).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    token.cancel();
    let _ = tokio::join!(scheduler_task, ranking_task);
    app.orchestrator.shutdown().await;
    Ok(())
}

/// Evaluate every active source on each evaluation type, then rank.
async fn ranking_loop(
    ranking: Arc<AccuracyRankingEngine>,
    every: Duration,
    sample: usize,
    evaluate: bool,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        if evaluate {
            let sources = match ranking.sources() {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to load data sources");
                    continue;
                }
            };
            for source in sources.iter().filter(|s| s.is_active && s.is_evaluated) {
                for kind in [
                    EvaluationType::DeviceIdentification,
                    EvaluationType::OsDetection,
                    EvaluationType::ServiceDetection,
                ] {
                    if let Err(e) = ranking.evaluate(&source.id, kind, sample).await {
                        warn!(source = %source.id, evaluation_type = %kind, error = %e, "Evaluation failed");
                    }
                }
            }
        }
        if let Err(e) = ranking.rank().await {
            error!(error = %e, "Ranking pass failed");
        }
    }
}
