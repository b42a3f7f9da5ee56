use std::path::Path;
use chrono::NaiveTime;
use console::style;
use malsift::errors::MalsiftError;
use malsift::models::{parse_port_list, Schedule, ScheduleRule, ScheduleUpdate, ScannerSettings, ScanKind};
use crate::cli::app::App;
use crate::cli::commands::{ScheduleCommand, ScheduleSpecArgs, ScheduleUpdateArgs};

pub async fn handle_schedule(action: ScheduleCommand, config: Option<&Path>, db: Option<&str>) -> Result<(), MalsiftError> {
    let app = App::load(config, db, None).await?;
    let scheduler = app.scheduler();

    match action {
        ScheduleCommand::Add(spec) => {
            let rule = parse_rule(&spec.rule_type, spec.hours, spec.at.as_deref(), spec.days.as_deref())?;
            let scanner = settings_from_spec(&spec)?;
            let schedule = scheduler.create(&spec.name, rule, spec.targets.clone(), scanner).await?;
            println!("Created schedule {} ({})", schedule.id, schedule.rule);
            print_next_run(&schedule);
        }
        ScheduleCommand::List { json } => {
            let schedules = scheduler.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&schedules)?);
                return Ok(());
            }
            print_schedules(&schedules);
            let stats = scheduler.stats()?;
            println!(
                "\n{} schedules ({} enabled), {} runs, {:.0}% accepted",
                stats.total_schedules,
                stats.enabled_schedules,
                stats.total_runs,
                stats.success_rate * 100.0
            );
        }
        ScheduleCommand::Update { id, spec } => {
            let current = scheduler.get(&id)?;
            let update = build_update(&current, spec)?;
            let schedule = scheduler.update(&id, update).await?;
            println!("Updated schedule {} ({})", schedule.id, schedule.rule);
            print_next_run(&schedule);
        }
        ScheduleCommand::Remove { id } => {
            scheduler.delete(&id).await?;
            println!("Removed schedule {}", id);
        }
        ScheduleCommand::Enable { id } => {
            let schedule = scheduler.enable(&id).await?;
            println!("Enabled schedule {}", schedule.name);
            print_next_run(&schedule);
        }
        ScheduleCommand::Disable { id } => {
            let schedule = scheduler.disable(&id).await?;
            println!("Disabled schedule {}", schedule.name);
        }
        ScheduleCommand::RunNow { id } => {
            let outcome = scheduler.run_now(&id).await?;
            match (&outcome.job_id, &outcome.error) {
                (Some(job_id), _) => {
                    println!("Triggered job {}", job_id);
                    let status = wait_for(&app, job_id).await?;
                    println!("Job {} {} with {} results", job_id, status.state, status.result_count);
                }
                (None, Some(err)) => println!("{} {}", style("Trigger rejected:").red(), err),
                (None, None) => {}
            }
        }
    }
    Ok(())
}

async fn wait_for(app: &App, job_id: &str) -> Result<malsift::orchestrator::JobStatus, MalsiftError> {
    loop {
        let status = app.orchestrator.status(job_id).await?;
        if status.state.is_terminal() {
            return Ok(status);
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }
}

fn print_next_run(schedule: &Schedule) {
    match schedule.next_run {
        Some(t) => println!("Next run: {}", t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M %Z")),
        None => println!("Next run: -"),
    }
}

fn print_schedules(schedules: &[Schedule]) {
    if schedules.is_empty() {
        println!("No schedules.");
        return;
    }
    println!(
        "{:<36}  {:<20} {:<28} {:<8} {:<17} {:>5} {:>5} {:>5}",
        style("ID").bold(),
        style("NAME").bold(),
        style("RULE").bold(),
        style("ENABLED").bold(),
        style("NEXT RUN").bold(),
        style("RUNS").bold(),
        style("OK").bold(),
        style("FAIL").bold()
    );
    for s in schedules {
        let next = s
            .next_run
            .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<36}  {:<20} {:<28} {:<8} {:<17} {:>5} {:>5} {:>5}",
            s.id, s.name, s.rule.to_string(), s.enabled, next, s.total_runs, s.successful_runs, s.failed_runs
        );
    }
}

fn settings_from_spec(spec: &ScheduleSpecArgs) -> Result<ScannerSettings, MalsiftError> {
    let ports = spec.ports.as_deref().map(parse_port_list).transpose()?;
    Ok(ScannerSettings {
        engine: spec.engine.clone(),
        kind: spec.kind.parse::<ScanKind>()?,
        timeout_secs: spec.timeout,
        rate_limit: spec.rate,
        ports,
    })
}

fn build_update(current: &Schedule, args: ScheduleUpdateArgs) -> Result<ScheduleUpdate, MalsiftError> {
    let rule_changed = args.rule_type.is_some() || args.hours.is_some() || args.at.is_some() || args.days.is_some();
    let rule = if rule_changed {
        let rule_type = args.rule_type.clone().unwrap_or_else(|| current.rule.kind().to_string());
        Some(parse_rule(&rule_type, args.hours, args.at.as_deref(), args.days.as_deref())?)
    } else {
        None
    };

    let scanner_changed = args.kind.is_some()
        || args.engine.is_some()
        || args.timeout.is_some()
        || args.rate.is_some()
        || args.ports.is_some();
    let scanner = if scanner_changed {
        let mut s = current.scanner.clone();
        if let Some(kind) = &args.kind {
            s.kind = kind.parse()?;
        }
        if let Some(engine) = args.engine {
            s.engine = engine;
        }
        if let Some(timeout) = args.timeout {
            s.timeout_secs = timeout;
        }
        if args.rate.is_some() {
            s.rate_limit = args.rate;
        }
        if let Some(ports) = &args.ports {
            s.ports = Some(parse_port_list(ports)?);
        }
        Some(s)
    } else {
        None
    };

    Ok(ScheduleUpdate {
        name: args.name,
        rule,
        targets: if args.targets.is_empty() { None } else { Some(args.targets) },
        scanner,
    })
}

/// Build a rule from CLI flags.
pub fn parse_rule(rule_type: &str, hours: Option<u32>, at: Option<&str>, days: Option<&str>) -> Result<ScheduleRule, MalsiftError> {
    let rule = match rule_type.trim().to_ascii_lowercase().as_str() {
        "interval" => ScheduleRule::Interval {
            hours: hours.ok_or_else(|| MalsiftError::Config("Interval schedules need --hours".into()))?,
        },
        "daily" => ScheduleRule::Daily { at: parse_time(at)? },
        "weekly" => ScheduleRule::Weekly {
            at: parse_time(at)?,
            days: parse_days(days.ok_or_else(|| MalsiftError::Config("Weekly schedules need --days".into()))?)?,
        },
        other => return Err(MalsiftError::Config(format!("Unknown schedule type '{}'", other))),
    };
    rule.validate()?;
    Ok(rule)
}

fn parse_time(at: Option<&str>) -> Result<NaiveTime, MalsiftError> {
    let at = at.ok_or_else(|| MalsiftError::Config("Daily and weekly schedules need --at HH:MM".into()))?;
    NaiveTime::parse_from_str(at.trim(), "%H:%M")
        .map_err(|_| MalsiftError::Config(format!("Invalid time '{}', expected HH:MM", at)))
}

fn parse_days(spec: &str) -> Result<Vec<u8>, MalsiftError> {
    const NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
    let mut days = Vec::new();
    for part in spec.split(',').map(|p| p.trim().to_ascii_lowercase()).filter(|p| !p.is_empty()) {
        let day = match part.parse::<u8>() {
            Ok(n) => n,
            Err(_) => NAMES
                .iter()
                .position(|n| part.starts_with(n))
                .ok_or_else(|| MalsiftError::Config(format!("Unknown weekday '{}'", part)))? as u8,
        };
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days.sort_unstable();
    Ok(days)
}
