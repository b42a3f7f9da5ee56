use std::path::Path;
use console::style;
use malsift::errors::MalsiftError;
use malsift::models::{Alert, AlertSeverity, EvaluationType, RankEntry};
use crate::cli::app::App;
use crate::cli::commands::RankCommand;

pub async fn handle_rank(action: RankCommand, config: Option<&Path>, db: Option<&str>) -> Result<(), MalsiftError> {
    let app = App::load(config, db, None).await?;
    let ranking = app.ranking.clone();

    match action {
        RankCommand::Evaluate { source, evaluation_type, sample } => {
            let kind: EvaluationType = evaluation_type.parse()?;
            let sample = sample.unwrap_or(app.config.ranking.default_sample_size);
            let report = ranking.evaluate(&source, kind, sample).await?;
            println!(
                "{} {}: {} evaluated, {} skipped of {} sampled",
                style(&report.source_id).bold(),
                report.evaluation_type,
                report.evaluated,
                report.skipped,
                report.sampled_devices
            );
            println!(
                "  batch accuracy {:.3}, confidence {:.3}",
                report.batch_accuracy, report.batch_confidence
            );
            println!(
                "  running accuracy {:.3}, confidence {:.3}, completeness {:.3}, response {:.0} ms, success {:.1}% over {} evaluations",
                report.accuracy,
                report.confidence,
                report.completeness,
                report.mean_response_ms,
                report.success_rate * 100.0,
                report.total_evaluations
            );
        }
        RankCommand::Run { json } => {
            let snapshot = ranking.rank().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_rankings(&snapshot.entries);
                if !snapshot.alerts.is_empty() {
                    println!("\n{} alert(s) raised", snapshot.alerts.len());
                }
            }
        }
        RankCommand::Alerts { all, limit } => {
            let alerts = ranking.alerts(!all, limit)?;
            print_alerts(&alerts);
        }
        RankCommand::Ack { id, by } => {
            let alert = ranking.acknowledge_alert(&id, &by)?;
            println!("Acknowledged alert {} ({})", alert.id, alert.title);
        }
        RankCommand::Dashboard { json } => {
            let dashboard = ranking.dashboard()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&dashboard)?);
            } else {
                println!("{}", style("Data source accuracy").bold());
                println!("  active sources      {}", dashboard.total_sources);
                println!("  average accuracy    {:.3}", dashboard.average_accuracy);
                println!("  average confidence  {:.3}", dashboard.average_confidence);
                println!("  evaluations (7d)    {}", dashboard.recent_evaluations);
                println!("  active alerts       {}", dashboard.active_alerts);
                let perf = &dashboard.performance;
                println!(
                    "  response time (ms)  avg {:.0}  min {:.0}  max {:.0}",
                    perf.response_time_ms.average, perf.response_time_ms.min, perf.response_time_ms.max
                );
                println!(
                    "  success rate        avg {:.3}  min {:.3}  max {:.3}",
                    perf.success_rate.average, perf.success_rate.min, perf.success_rate.max
                );
                println!(
                    "  completeness        avg {:.3}  min {:.3}  max {:.3}",
                    perf.completeness.average, perf.completeness.min, perf.completeness.max
                );
                if !dashboard.trends.is_empty() {
                    println!();
                    println!("{}", style("Accuracy trend").bold());
                    for point in &dashboard.trends {
                        println!("  {}  {:.3}  ({} sources)", point.date, point.average_accuracy, point.source_count);
                    }
                }
                println!();
                print_rankings(&dashboard.rankings);
            }
        }
        RankCommand::Sources => {
            let sources = ranking.sources()?;
            println!(
                "{:<18} {:<16} {:>6} {:>8} {:>6} {:>6} {:>9} {:>8} {:>6}",
                style("ID").bold(),
                style("TYPE").bold(),
                style("ACTIVE").bold(),
                style("ACCURACY").bold(),
                style("CONF").bold(),
                style("COMPL").bold(),
                style("RESP(ms)").bold(),
                style("EVALS").bold(),
                style("RANK").bold()
            );
            for s in sources {
                println!(
                    "{:<18} {:<16} {:>6} {:>8.3} {:>6.3} {:>6.3} {:>9.0} {:>8} {:>6}",
                    s.id,
                    s.source_type.as_str(),
                    s.is_active,
                    s.accuracy,
                    s.confidence,
                    s.completeness,
                    s.mean_response_ms,
                    s.total_evaluations,
                    s.current_rank.map(|r| r.to_string()).unwrap_or_else(|| "-".into())
                );
            }
        }
    }
    Ok(())
}

fn print_rankings(entries: &[RankEntry]) {
    if entries.is_empty() {
        println!("No ranked sources yet. Evaluate sources first.");
        return;
    }
    println!(
        "{:>4} {:<26} {:>7} {:>8} {:>6} {:>6} {:>8}",
        style("RANK").bold(),
        style("SOURCE").bold(),
        style("SCORE").bold(),
        style("ACCURACY").bold(),
        style("CONF").bold(),
        style("EVALS").bold(),
        style("CHANGE").bold()
    );
    for e in entries {
        let change = match e.previous_rank {
            Some(p) if p > e.rank => style(format!("+{}", p - e.rank)).green().to_string(),
            Some(p) if p < e.rank => style(format!("-{}", e.rank - p)).red().to_string(),
            Some(_) => "=".to_string(),
            None => "new".to_string(),
        };
        println!(
            "{:>4} {:<26} {:>7.3} {:>8.3} {:>6.3} {:>6} {:>8}",
            e.rank, e.source_name, e.composite_score, e.accuracy, e.confidence, e.total_evaluations, change
        );
    }
}

fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("No alerts.");
        return;
    }
    for a in alerts {
        let severity = match a.severity {
            AlertSeverity::High => style("HIGH").red().bold(),
            AlertSeverity::Medium => style("MEDIUM").yellow(),
        };
        let ack = if a.acknowledged {
            format!(" (acknowledged by {})", a.acknowledged_by.as_deref().unwrap_or("?"))
        } else {
            String::new()
        };
        println!(
            "{} [{}] {} {}{}",
            a.triggered_at.format("%Y-%m-%d %H:%M"),
            severity,
            a.id,
            a.description,
            ack
        );
    }
}
