//! Local connection module
//!
//! Runs commands on the control node itself, used for `localhost` targets.

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    build_escalated_command, CommandResult, Connection, ConnectionError, ConnectionResult,
    ExecuteOptions, TransferOptions,
};

/// Local connection for executing commands on the current host
#[derive(Debug, Clone)]
pub struct LocalConnection {
    /// Identifier for this connection
    identifier: String,
}

impl LocalConnection {
    /// Create a new local connection
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self { identifier }
    }

    fn build_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(build_escalated_command(command, options));

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    fn set_mode(&self, path: &Path, mode: u32) -> ConnectionResult<()> {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to set permissions on {}: {}",
                path.display(),
                e
            ))
        })
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(command = %command, escalate = %options.escalate_method, "Executing local command");

        let mut child = self.build_command(command, &options).spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;

        // Dropping stdin closes it, so commands reading stdin see EOF
        if let (Some(mut stdin), Some(payload)) = (child.stdin.take(), options.password_payload()) {
            stdin.write_all(payload.as_bytes()).await.map_err(|e| {
                ConnectionError::ExecutionFailed(format!("Failed to write password: {}", e))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e))
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        Ok(CommandResult::from_exit(exit_code, stdout, stderr))
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(dst = %remote_path.display(), size = %content.len(), "Writing content locally");

        fs::write(remote_path, content).map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to write to {}: {}",
                remote_path.display(),
                e
            ))
        })?;

        if let Some(mode) = options.mode {
            self.set_mode(remote_path, mode)?;
        }

        Ok(())
    }

    async fn close(&self) -> ConnectionResult<()> {
        // Children are killed when their execute future is dropped
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_execute() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo 'hello world'", None).await.unwrap();

        assert!(result.success);
        assert_eq!(result.combined_output(), "hello world\n");
    }

    #[tokio::test]
    async fn test_local_execute_failure() {
        let conn = LocalConnection::new();
        let result = conn.execute("exit 42", None).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    async fn test_local_combined_output() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo out; echo err >&2", None).await.unwrap();

        assert_eq!(result.combined_output(), "out\nerr\n");
    }

    #[tokio::test]
    async fn test_local_upload_content_with_mode() {
        use std::os::unix::fs::PermissionsExt;

        let conn = LocalConnection::new();
        let temp_dir = tempfile::tempdir().unwrap();
        let dst_path = temp_dir.path().join("script.sh");

        conn.upload_content(
            b"echo staged",
            &dst_path,
            Some(TransferOptions::new().with_mode(0o700)),
        )
        .await
        .unwrap();

        assert_eq!(fs::read_to_string(&dst_path).unwrap(), "echo staged");
        let mode = fs::metadata(&dst_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
