use crate::orchestrator::state::ScanState;

/// Messages sent from a running job to a progress display.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A target was dispatched to the engine
    TargetStarted {
        job_id: String,
        target: String,
        index: usize,
        total: usize,
    },
    /// The engine returned a result for a target
    TargetFinished {
        job_id: String,
        target: String,
        success: bool,
        result_count: usize,
    },
    /// The job reached a terminal state
    JobFinished {
        job_id: String,
        state: ScanState,
        result_count: usize,
    },
}
