use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser)]
#[command(name = "malsift", version = VERSION, about = "Scheduled network discovery and data-source accuracy ranking")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the configuration)
    #[arg(long, global = true)]
    pub db: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one scan job to completion
    Scan(ScanArgs),
    /// Run the scheduler and periodic ranking until interrupted
    Serve(ServeArgs),
    /// Manage scan schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommand,
    },
    /// Inspect and correct canonical devices
    Devices {
        #[command(subcommand)]
        action: DevicesCommand,
    },
    /// Evaluate and rank data sources
    Rank {
        #[command(subcommand)]
        action: RankCommand,
    },
    /// Validate a configuration file
    Validate(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct ScanArgs {
    /// Target IP address (repeatable)
    #[arg(short, long = "target", required = true)]
    pub targets: Vec<String>,

    /// Scan kind: sweep, port-scan, service-detect, os-detect, vuln-scan
    #[arg(short, long, default_value = "port-scan")]
    pub kind: String,

    /// Engine name: masscan, nmap
    #[arg(short, long, default_value = "nmap")]
    pub engine: String,

    /// Per-target timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Dispatch rate limit in targets per second
    #[arg(long)]
    pub rate: Option<f64>,

    /// Comma-separated port list
    #[arg(long)]
    pub ports: Option<String>,

    /// Print devices as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Seconds between ranking passes (overrides the configuration)
    #[arg(long)]
    pub rank_interval: Option<u64>,

    /// Do not evaluate sources before each ranking pass
    #[arg(long)]
    pub no_evaluate: bool,
}

#[derive(Subcommand, Clone)]
pub enum ScheduleCommand {
    /// Create a schedule
    Add(ScheduleSpecArgs),
    /// List schedules and scheduler statistics
    List {
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a schedule
    Update {
        id: String,
        #[command(flatten)]
        spec: ScheduleUpdateArgs,
    },
    /// Delete a schedule
    Remove { id: String },
    /// Enable a schedule and compute its next run
    Enable { id: String },
    /// Disable a schedule
    Disable { id: String },
    /// Trigger a schedule immediately and wait for the job
    RunNow { id: String },
}

#[derive(Args, Clone)]
pub struct ScheduleSpecArgs {
    #[arg(long)]
    pub name: String,

    /// interval, daily or weekly
    #[arg(long = "type", default_value = "interval")]
    pub rule_type: String,

    /// Hours between runs (interval)
    #[arg(long)]
    pub hours: Option<u32>,

    /// Time of day HH:MM (daily, weekly)
    #[arg(long)]
    pub at: Option<String>,

    /// Comma-separated weekdays, mon..sun or 0..6 (weekly)
    #[arg(long)]
    pub days: Option<String>,

    /// Target IP address (repeatable)
    #[arg(short, long = "target", required = true)]
    pub targets: Vec<String>,

    #[arg(short, long, default_value = "port-scan")]
    pub kind: String,

    #[arg(short, long, default_value = "nmap")]
    pub engine: String,

    #[arg(long, default_value = "300")]
    pub timeout: u64,

    #[arg(long)]
    pub rate: Option<f64>,

    #[arg(long)]
    pub ports: Option<String>,
}

#[derive(Args, Clone, Default)]
pub struct ScheduleUpdateArgs {
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long = "type")]
    pub rule_type: Option<String>,

    #[arg(long)]
    pub hours: Option<u32>,

    #[arg(long)]
    pub at: Option<String>,

    #[arg(long)]
    pub days: Option<String>,

    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    #[arg(short, long)]
    pub kind: Option<String>,

    #[arg(short, long)]
    pub engine: Option<String>,

    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long)]
    pub rate: Option<f64>,

    #[arg(long)]
    pub ports: Option<String>,
}

#[derive(Subcommand, Clone)]
pub enum DevicesCommand {
    /// List canonical devices, most recently seen first
    List {
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show one device with its per-engine results and signals
    Show { address: String },
    /// Record a signal from an external platform or analyzer
    Signal {
        address: String,
        /// Source key the signal is stored under, e.g. edr
        #[arg(long)]
        source: String,
        #[arg(long)]
        confidence: f64,
        #[arg(long)]
        device_type: Option<String>,
        #[arg(long)]
        os: Option<String>,
        #[arg(long)]
        hostname: Option<String>,
        /// Comma-separated service names
        #[arg(long)]
        services: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        response_ms: Option<f64>,
    },
    /// Record a human correction for a device
    Correct {
        address: String,
        #[arg(long)]
        device_type: Option<String>,
        #[arg(long)]
        os: Option<String>,
        #[arg(long)]
        hostname: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Who made the correction
        #[arg(long, default_value = "cli")]
        by: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum RankCommand {
    /// Evaluate one data source over a device sample
    Evaluate {
        #[arg(long)]
        source: String,
        /// device_identification, os_detection or service_detection
        #[arg(long = "type", default_value = "device_identification")]
        evaluation_type: String,
        #[arg(long)]
        sample: Option<usize>,
    },
    /// Run a ranking pass and print the ranking table
    Run {
        #[arg(long)]
        json: bool,
    },
    /// List alerts
    Alerts {
        /// Include acknowledged alerts
        #[arg(long)]
        all: bool,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Acknowledge an alert
    Ack {
        id: String,
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Print the dashboard summary
    Dashboard {
        #[arg(long)]
        json: bool,
    },
    /// List data sources and their metrics
    Sources,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Config file to validate
    pub file: PathBuf,
}
