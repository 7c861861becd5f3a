use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};
use tracing::{debug, warn};

use crate::core::errors::{CaptureError, CommandFailure};

use super::traits::{CameraCli, CliOutput};

/// Runs gphoto2 (or a compatible binary) as a child process.
#[derive(Debug, Clone, Default)]
pub struct GphotoCli {
    log_output: bool,
}

impl GphotoCli {
    pub fn new(log_output: bool) -> Self {
        Self { log_output }
    }
}

fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0_u8; 8 * 1024];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

#[async_trait]
impl CameraCli for GphotoCli {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CliOutput, CaptureError> {
        let command = command_line(program, args);
        debug!(%command, "exec");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                CaptureError::DeviceUnavailable(CommandFailure {
                    command: command.clone(),
                    reason: format!("failed to spawn: {err}"),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            })?;

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let waited = {
            let stdout_pipe = child.stdout.take();
            let stderr_pipe = child.stderr.take();
            let wait = async {
                let (status, _, _) = tokio::join!(
                    child.wait(),
                    drain(stdout_pipe, &mut stdout_buf),
                    drain(stderr_pipe, &mut stderr_buf),
                );
                status
            };
            tokio::time::timeout(timeout, wait).await
        };

        let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();
        if self.log_output {
            if !stdout.is_empty() {
                debug!(%command, "stdout:\n{stdout}");
            }
            if !stderr.is_empty() {
                debug!(%command, "stderr:\n{stderr}");
            }
        }

        let status = match waited {
            Ok(status) => status.map_err(|err| {
                CaptureError::DeviceUnavailable(CommandFailure {
                    command: command.clone(),
                    reason: format!("failed to wait: {err}"),
                    stdout: stdout.clone(),
                    stderr: stderr.clone(),
                })
            })?,
            Err(_) => {
                if let Err(err) = child.kill().await {
                    warn!(%command, "failed to kill timed out camera command: {err}");
                }
                return Err(CaptureError::Timeout(CommandFailure {
                    command,
                    reason: format!("no exit after {}ms", timeout.as_millis()),
                    stdout,
                    stderr,
                }));
            }
        };

        if !status.success() {
            return Err(CaptureError::DeviceUnavailable(CommandFailure {
                command,
                reason: format!("exited with {status}"),
                stdout,
                stderr,
            }));
        }

        Ok(CliOutput { stdout, stderr })
    }
}
