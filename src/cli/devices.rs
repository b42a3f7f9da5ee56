use std::path::Path;
use malsift::aggregator::CorrectionInput;
use malsift::errors::MalsiftError;
use malsift::models::SourceSignal;
use crate::cli::app::App;
use crate::cli::commands::DevicesCommand;
use crate::cli::scan::print_devices;

pub async fn handle_devices(action: DevicesCommand, config: Option<&Path>, db: Option<&str>) -> Result<(), MalsiftError> {
    let app = App::load(config, db, None).await?;
    match action {
        DevicesCommand::List { limit, offset, json } => {
            let devices = app.aggregator.list(limit, offset)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                print_devices(&devices);
                println!("\n{} of {} devices", devices.len(), app.db.count_devices()?);
            }
        }
        DevicesCommand::Show { address } => {
            let device = app
                .aggregator
                .get(&address)?
                .ok_or_else(|| MalsiftError::NotFound(format!("device {}", address)))?;
            println!("{}", serde_json::to_string_pretty(&device)?);
        }
        DevicesCommand::Signal { address, source, confidence, device_type, os, hostname, services, tags, response_ms } => {
            let mut signal = SourceSignal::new(&source, confidence);
            signal.device_type = device_type;
            signal.operating_system = os;
            signal.hostname = hostname;
            signal.services = split_list(services.as_deref());
            signal.tags = split_list(tags.as_deref());
            signal.response_time_ms = response_ms;
            let device = app.aggregator.apply_signal(&address, signal).await?;
            println!(
                "Recorded {} signal for {}: {} / {} (confidence {:.2})",
                source, device.address, device.device_type, device.operating_system, device.confidence
            );
        }
        DevicesCommand::Correct { address, device_type, os, hostname, notes, by } => {
            let input = CorrectionInput { device_type, operating_system: os, hostname, notes };
            let device = app.aggregator.apply_correction(&address, input, &by).await?;
            println!(
                "Corrected {}: {} / {} (confidence {:.2})",
                device.address, device.device_type, device.operating_system, device.confidence
            );
        }
    }
    Ok(())
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}
