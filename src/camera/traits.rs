use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::core::errors::CaptureError;

#[derive(Debug, Clone, Default)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one camera-control CLI invocation to completion.
///
/// Implementations must report a non-zero exit as
/// [`CaptureError::DeviceUnavailable`] and an expired deadline as
/// [`CaptureError::Timeout`], with the captured output attached.
#[async_trait]
pub trait CameraCli: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CliOutput, CaptureError>;
}

#[async_trait]
impl<T: CameraCli + ?Sized> CameraCli for Arc<T> {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CliOutput, CaptureError> {
        (**self).run(program, args, timeout).await
    }
}
