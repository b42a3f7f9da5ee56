use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use crate::container::ContainerManager;
use crate::errors::MalsiftError;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal or the status is unknown.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs an external scanning tool. `Timeout` means the tool exceeded `timeout`
/// and was stopped; `Process` means it could not be started.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<ProcessOutput, MalsiftError>;

    fn name(&self) -> &str;
}

/// Spawns tools on the local host. The child is killed when the timeout fires.
#[derive(Debug, Default, Clone)]
pub struct LocalRunner;

#[async_trait]
impl ProcessRunner for LocalRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<ProcessOutput, MalsiftError> {
        debug!(program = %program, args = %args.join(" "), "Spawning scanner process");
        let child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MalsiftError::Process(format!("Failed to start {}: {}", program, e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| MalsiftError::Timeout(format!("{} timed out after {}s", program, timeout.as_secs())))?
            .map_err(|e| MalsiftError::Process(format!("{} failed: {}", program, e)))?;

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Executes tools inside the scanning container, starting it on first use.
pub struct ContainerRunner {
    manager: Arc<ContainerManager>,
    ready: OnceCell<()>,
}

impl ContainerRunner {
    pub fn new(manager: Arc<ContainerManager>) -> Self {
        Self { manager, ready: OnceCell::new() }
    }
}

#[async_trait]
impl ProcessRunner for ContainerRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<ProcessOutput, MalsiftError> {
        self.ready
            .get_or_try_init(|| async { self.manager.ensure_running().await })
            .await?;
        self.manager.exec(program, args, timeout).await
    }

    fn name(&self) -> &str {
        "container"
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned output and records every invocation.
    pub struct FakeRunner {
        pub responses: Mutex<Vec<Result<ProcessOutput, MalsiftError>>>,
        pub calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeRunner {
        pub fn with_stdout(stdout: &str) -> Self {
            Self::with(vec![Ok(ProcessOutput { stdout: stdout.into(), stderr: String::new(), exit_code: Some(0) })])
        }

        pub fn with(responses: Vec<Result<ProcessOutput, MalsiftError>>) -> Self {
            Self { responses: Mutex::new(responses), calls: Mutex::new(Vec::new()) }
        }

        pub fn last_args(&self) -> Vec<String> {
            self.calls.lock().unwrap().last().map(|c| c.1.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(&self, program: &str, args: &[String], _timeout: Duration) -> Result<ProcessOutput, MalsiftError> {
            self.calls.lock().unwrap().push((program.to_string(), args.to_vec()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(ProcessOutput { exit_code: Some(0), ..Default::default() });
            }
            responses.remove(0)
        }

        fn name(&self) -> &str {
            "fake"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_runner_missing_binary() {
        let err = LocalRunner
            .run("malsift-no-such-binary", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MalsiftError::Process(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_runner_times_out() {
        let err = LocalRunner
            .run("sleep", &["5".to_string()], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, MalsiftError::Timeout(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_runner_captures_stdout() {
        let out = LocalRunner
            .run("echo", &["hello".to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.succeeded());
        assert_eq!(out.stdout.trim(), "hello");
    }
}
