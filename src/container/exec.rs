use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use futures::StreamExt;
use std::time::Duration;
use crate::errors::MalsiftError;
use crate::scanner::runner::ProcessOutput;
use super::manager::ContainerManager;
use tracing::debug;

impl ContainerManager {
    /// Run `program args..` inside the scanner container, without a shell.
    pub async fn exec(&self, program: &str, args: &[String], timeout: Duration) -> Result<ProcessOutput, MalsiftError> {
        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push(program.to_string());
        cmd.extend(args.iter().cloned());
        debug!(container = %self.container_name(), command = %cmd.join(" "), "Executing in container");

        let exec = self
            .docker()
            .create_exec(
                self.container_name(),
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MalsiftError::Container(format!("Failed to create exec: {}", e)))?;

        let (stdout, stderr) = tokio::time::timeout(timeout, self.collect_exec_output(&exec.id))
            .await
            .map_err(|_| MalsiftError::Timeout(format!("{} timed out after {}s", program, timeout.as_secs())))?
            .map_err(|e| MalsiftError::Container(format!("Exec failed: {}", e)))?;

        let exit_code = self
            .docker()
            .inspect_exec(&exec.id)
            .await
            .ok()
            .and_then(|info| info.exit_code)
            .map(|c| c as i32);

        Ok(ProcessOutput { stdout, stderr, exit_code })
    }

    async fn collect_exec_output(&self, exec_id: &str) -> Result<(String, String), bollard::errors::Error> {
        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = self.docker().start_exec(exec_id, None).await? {
            while let Some(msg) = output.next().await {
                match msg? {
                    LogOutput::StdErr { message } => stderr.push_str(&String::from_utf8_lossy(&message)),
                    other => stdout.push_str(&other.to_string()),
                }
            }
        }

        Ok((stdout, stderr))
    }
}
