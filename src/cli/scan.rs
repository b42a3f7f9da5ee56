use std::path::Path;
use std::time::Duration;
use console::style;
use tokio::sync::mpsc;
use malsift::errors::MalsiftError;
use malsift::models::{parse_port_list, CanonicalDevice, ScanKind, Target};
use malsift::orchestrator::{ScanEvent, ScanRequest, ScanState};
use crate::cli::app::App;
use crate::cli::commands::ScanArgs;
use crate::cli::progress::ScanProgress;
use tracing::{info, warn};

pub async fn handle_scan(args: ScanArgs, config: Option<&Path>, db: Option<&str>) -> Result<(), MalsiftError> {
    let kind: ScanKind = args.kind.parse()?;
    let ports = match &args.ports {
        Some(spec) => parse_port_list(spec)?,
        None => Vec::new(),
    };
    let targets = args
        .targets
        .iter()
        .map(|t| Target::parse(t, kind).map(|t| t.with_ports(ports.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let app = App::load(config, db, Some(tx)).await?;
    let timeout = Duration::from_secs(args.timeout.unwrap_or(app.config.orchestrator.default_timeout_secs));

    let orchestrator = app.orchestrator.clone();
    let request = ScanRequest::new(targets, kind, &args.engine, timeout)
        .with_rate_limit(args.rate)
        .with_owner("cli");
    let total = request.targets.len();
    let job_id = orchestrator.create(request)?;
    info!(
        job_id = %job_id,
        estimate_secs = orchestrator.estimate_duration(total, kind).as_secs(),
        "Starting scan"
    );

    let display = tokio::spawn(async move {
        let mut progress = ScanProgress::new(total);
        while let Some(event) = rx.recv().await {
            progress.handle_event(&event);
            if matches!(event, ScanEvent::JobFinished { .. }) {
                break;
            }
        }
    });

    let interrupt = {
        let orchestrator = orchestrator.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(job_id = %job_id, "Interrupted, cancelling scan");
                if let Err(e) = orchestrator.cancel(&job_id).await {
                    warn!(job_id = %job_id, error = %e, "Cancel failed");
                }
            }
        })
    };
    let status = orchestrator.execute(&job_id).await;
    interrupt.abort();
    let status = status?;
    let _ = display.await;

    if let Some(err) = &status.error {
        eprintln!("{} {}", style("Error:").red().bold(), err);
    }
    if status.state != ScanState::Completed {
        return Ok(());
    }

    let mut devices = Vec::new();
    for address in &args.targets {
        let key = address.trim().parse::<std::net::IpAddr>().map(|ip| ip.to_string()).unwrap_or_default();
        if let Some(device) = app.db.get_device(&key)? {
            devices.push(device);
        }
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        print_devices(&devices);
    }
    Ok(())
}

pub fn print_devices(devices: &[CanonicalDevice]) {
    if devices.is_empty() {
        println!("No devices.");
        return;
    }
    println!(
        "{:<40} {:<24} {:<24} {:>5}  {}",
        style("ADDRESS").bold(),
        style("TYPE").bold(),
        style("OS").bold(),
        style("CONF").bold(),
        style("SERVICES").bold()
    );
    for d in devices {
        println!(
            "{:<40} {:<24} {:<24} {:>5.2}  {}",
            d.address,
            d.device_type,
            d.operating_system,
            d.confidence,
            d.service_names().join(",")
        );
    }
}
