use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use malsift::orchestrator::{ScanEvent, ScanState};

/// Progress bar for one scan job, driven by orchestrator events.
pub struct ScanProgress {
    bar: ProgressBar,
    failures: usize,
}

impl ScanProgress {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.cyan} {bar:30.cyan/dark_gray} {pos}/{len} targets | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar, failures: 0 }
    }

    pub fn handle_event(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::TargetStarted { target, .. } => {
                self.bar.set_message(format!("scanning {}", target));
            }
            ScanEvent::TargetFinished { success, .. } => {
                if !success {
                    self.failures += 1;
                }
                self.bar.inc(1);
            }
            ScanEvent::JobFinished { state, result_count, .. } => {
                let label = match state {
                    ScanState::Completed => style(state.as_str()).green(),
                    ScanState::Cancelled => style(state.as_str()).yellow(),
                    _ => style(state.as_str()).red(),
                };
                self.bar.finish_with_message(format!(
                    "{} ({} results, {} target failures)",
                    label, result_count, self.failures
                ));
            }
        }
    }
}
