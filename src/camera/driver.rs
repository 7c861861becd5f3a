use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Serialize;
use tokio::{fs, time::sleep};
use tracing::{debug, info, warn};

use crate::core::errors::CaptureError;

use super::{
    download::{
        DOWNLOAD_TEMPLATE, DirSnapshot, assign_positions, covering_span, match_positions,
        span_argument,
    },
    parser::{self, FileIndex},
    traits::{CameraCli, CliOutput},
};

pub const DEFAULT_CLI: &str = "gphoto2";
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_INFO_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);
pub const MAX_SETTLE: Duration = Duration::from_secs(5);

const SCRATCH_DIR: &str = ".download";

/// Whether a resolved port is reused across the steps of one orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortPolicy {
    /// Resolve the port again on every driver call.
    #[default]
    Detect,
    /// Resolve once per orchestration and pass it to every step.
    Pin,
}

impl FromStr for PortPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "detect" => Ok(PortPolicy::Detect),
            "pin" => Ok(PortPolicy::Pin),
            other => Err(format!("unknown port policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub cli_path: String,
    pub configured_port: Option<String>,
    pub capture_timeout: Duration,
    pub info_timeout: Duration,
    pub settle: Duration,
    pub list_retries: u32,
    pub list_retry_backoff: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            cli_path: DEFAULT_CLI.to_string(),
            configured_port: None,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            info_timeout: DEFAULT_INFO_TIMEOUT,
            settle: DEFAULT_SETTLE,
            list_retries: 0,
            list_retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Per-call overrides; unset fields fall back to [`DriverSettings`].
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub cli_path: Option<String>,
    pub timeout_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub port: Option<String>,
}

impl CaptureOptions {
    pub fn with_port(mut self, port: Option<String>) -> Self {
        self.port = port;
        self
    }
}

/// Outcome of the best-effort `--summary` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SummaryReport {
    Available(String),
    Failed(String),
    NoPort,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraInfo {
    pub ports: Vec<String>,
    pub selected_port: Option<String>,
    pub auto_detect_raw: String,
    pub summary: SummaryReport,
    pub parser_version: u32,
}

pub struct CameraDriver<C: CameraCli> {
    cli: C,
    settings: DriverSettings,
}

impl<C: CameraCli> CameraDriver<C> {
    pub fn new(cli: C, settings: DriverSettings) -> Self {
        Self { cli, settings }
    }

    fn program<'a>(&'a self, options: &'a CaptureOptions) -> &'a str {
        options
            .cli_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or(&self.settings.cli_path)
    }

    fn timeout(&self, options: &CaptureOptions) -> Duration {
        options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.capture_timeout)
    }

    fn settle(&self, options: &CaptureOptions) -> Duration {
        options
            .settle_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.settle)
            .min(MAX_SETTLE)
    }

    async fn exec(
        &self,
        options: &CaptureOptions,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CliOutput, CaptureError> {
        let mut full: Vec<String> = Vec::with_capacity(args.len() + 2);
        if let Some(port) = options.port.as_deref() {
            full.push("--port".to_string());
            full.push(port.to_string());
        }
        full.extend(args.iter().map(|arg| arg.to_string()));
        self.cli.run(self.program(options), &full, timeout).await
    }

    /// First `usb:<bus>,<device>` reported by auto-detect. Never fails: `None`
    /// lets the CLI pick the camera itself.
    pub async fn detect_port(&self, options: &CaptureOptions) -> Option<String> {
        let probe = CaptureOptions {
            port: None,
            ..options.clone()
        };
        match self
            .exec(&probe, &["--auto-detect"], self.timeout(options))
            .await
        {
            Ok(out) => parser::first_port(&out.stdout),
            Err(err) => {
                debug!("port auto-detect failed: {err}");
                None
            }
        }
    }

    /// Explicit port, then configured port, then auto-detected port.
    pub async fn resolve_port(&self, options: &CaptureOptions) -> Option<String> {
        if let Some(port) = options.port.clone().filter(|p| !p.trim().is_empty()) {
            return Some(port);
        }
        if let Some(port) = self.settings.configured_port.clone() {
            return Some(port);
        }
        self.detect_port(options).await
    }

    async fn pinned(&self, options: &CaptureOptions) -> CaptureOptions {
        let port = self.resolve_port(options).await;
        options.clone().with_port(port)
    }

    pub async fn camera_info(&self, port: Option<&str>) -> Result<CameraInfo, CaptureError> {
        let timeout = self.settings.info_timeout;
        let probe = CaptureOptions::default();
        let auto = self.exec(&probe, &["--auto-detect"], timeout).await?;
        let ports = parser::parse_ports(&auto.stdout);

        let selected_port = port
            .map(str::to_string)
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.settings.configured_port.clone())
            .or_else(|| ports.first().cloned());

        let summary = match selected_port.as_deref() {
            None => SummaryReport::NoPort,
            Some(selected) => {
                let options = probe.with_port(Some(selected.to_string()));
                match self.exec(&options, &["--summary"], timeout).await {
                    Ok(out) if !out.stdout.trim().is_empty() => SummaryReport::Available(out.stdout),
                    Ok(out) => SummaryReport::Available(out.stderr),
                    Err(err) => {
                        warn!(port = %selected, "camera summary failed: {err}");
                        SummaryReport::Failed(err.to_string())
                    }
                }
            }
        };

        Ok(CameraInfo {
            ports,
            selected_port,
            auto_detect_raw: auto.stdout,
            summary,
            parser_version: parser::PARSER_VERSION,
        })
    }

    async fn trigger_on(&self, options: &CaptureOptions) -> Result<(), CaptureError> {
        self.exec(
            options,
            &["--trigger-capture", "--quiet"],
            self.timeout(options),
        )
        .await?;
        // The camera gives no write-complete signal; wait before listing.
        sleep(self.settle(options)).await;
        Ok(())
    }

    /// Fires the shutter without waiting for the shot to be stored, then
    /// sleeps for the settle delay.
    pub async fn trigger_capture(&self, options: &CaptureOptions) -> Result<(), CaptureError> {
        let options = self.pinned(options).await;
        info!(port = ?options.port, "trigger capture");
        self.trigger_on(&options).await
    }

    async fn list_on(&self, options: &CaptureOptions) -> Result<Vec<FileIndex>, CaptureError> {
        let out = self
            .exec(options, &["--list-files"], self.timeout(options))
            .await?;
        Ok(parser::parse_file_indices(&out.stdout))
    }

    pub async fn list_file_indices(
        &self,
        options: &CaptureOptions,
    ) -> Result<Vec<FileIndex>, CaptureError> {
        let options = self.pinned(options).await;
        self.list_on(&options).await
    }

    /// Highest listed index strictly above `baseline`, re-listing with a
    /// linear backoff while none has appeared yet.
    pub async fn await_new_index(
        &self,
        baseline: Option<FileIndex>,
        options: &CaptureOptions,
    ) -> Result<Option<FileIndex>, CaptureError> {
        let options = self.pinned(options).await;
        let mut attempt = 0;
        loop {
            let indices = self.list_on(&options).await?;
            let newest = indices
                .into_iter()
                .filter(|index| baseline.is_none_or(|base| *index > base))
                .max();
            if newest.is_some() || attempt >= self.settings.list_retries {
                return Ok(newest);
            }
            attempt += 1;
            debug!(?baseline, attempt, "no new file index yet, listing again");
            sleep(self.settings.list_retry_backoff * attempt).await;
        }
    }

    /// Triggers one shot and returns the index the camera assigned to it.
    ///
    /// The pre-trigger maximum is the baseline; only an index above it counts.
    pub async fn trigger_capture_and_get_index(
        &self,
        options: &CaptureOptions,
    ) -> Result<FileIndex, CaptureError> {
        let options = self.pinned(options).await;
        let baseline = self.list_on(&options).await?.into_iter().max();
        self.trigger_on(&options).await?;
        match self.await_new_index(baseline, &options).await? {
            Some(index) => {
                info!(index, ?baseline, "new file index after trigger");
                Ok(index)
            }
            None => Err(CaptureError::ProtocolMismatch(format!(
                "no file index above {} after trigger",
                baseline.map_or_else(|| "<none>".to_string(), |b| b.to_string())
            ))),
        }
    }

    /// The `count` highest indices, ascending.
    pub async fn latest_indices(
        &self,
        count: usize,
        options: &CaptureOptions,
    ) -> Result<Vec<FileIndex>, CaptureError> {
        let mut indices = self.list_file_indices(options).await?;
        indices.sort_unstable();
        indices.dedup();
        let skip = indices.len().saturating_sub(count);
        Ok(indices.split_off(skip))
    }

    /// Downloads `indices` with one ranged `--get-file` and returns
    /// `dest_dir/frame-<position>.<ext>` paths in the order given.
    pub async fn download_frames_range(
        &self,
        indices: &[FileIndex],
        dest_dir: &Path,
        options: &CaptureOptions,
    ) -> Result<Vec<PathBuf>, CaptureError> {
        let Some((first, last)) = covering_span(indices) else {
            return Ok(Vec::new());
        };
        let options = self.pinned(options).await;

        let scratch = dest_dir.join(SCRATCH_DIR);
        if fs::try_exists(&scratch).await? {
            fs::remove_dir_all(&scratch).await?;
        }
        fs::create_dir_all(&scratch).await?;

        let placed = self
            .fetch_span(indices, span_argument(first, last), &scratch, dest_dir, &options)
            .await;
        if let Err(err) = fs::remove_dir_all(&scratch).await {
            warn!("failed to remove download scratch dir {}: {err}", scratch.display());
        }
        placed
    }

    async fn fetch_span(
        &self,
        indices: &[FileIndex],
        span: String,
        scratch: &Path,
        dest_dir: &Path,
        options: &CaptureOptions,
    ) -> Result<Vec<PathBuf>, CaptureError> {
        let before = DirSnapshot::capture(scratch).await?;
        let template = scratch.join(DOWNLOAD_TEMPLATE);
        let template = template.to_string_lossy();
        self.exec(
            options,
            &[
                "--get-file",
                span.as_str(),
                "--filename",
                template.as_ref(),
                "--force-overwrite",
                "--quiet",
            ],
            self.timeout(options),
        )
        .await?;
        let after = DirSnapshot::capture(scratch).await?;

        let fresh = before.new_entries(&after, scratch);
        debug!(span = %span, new_files = fresh.len(), "range download finished");
        let matched = match_positions(indices, &fresh)?;
        assign_positions(&matched, dest_dir).await
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use crate::{
        camera::testing::SimulatedCamera,
        core::errors::CaptureError,
    };

    use super::{CameraDriver, CaptureOptions, DriverSettings, PortPolicy, SummaryReport};

    fn fast_settings() -> DriverSettings {
        DriverSettings {
            settle: Duration::from_millis(1),
            list_retry_backoff: Duration::from_millis(1),
            ..DriverSettings::default()
        }
    }

    fn driver(sim: &Arc<SimulatedCamera>) -> CameraDriver<Arc<SimulatedCamera>> {
        CameraDriver::new(sim.clone(), fast_settings())
    }

    #[tokio::test]
    async fn returns_index_above_pre_trigger_baseline() {
        let sim = Arc::new(SimulatedCamera::new(Some("usb:001,004"), vec![1, 2, 3]));
        let index = driver(&sim)
            .trigger_capture_and_get_index(&CaptureOptions::default())
            .await
            .expect("new index");
        assert_eq!(index, 4);
    }

    #[tokio::test]
    async fn never_returns_stale_index_when_nothing_new_appears() {
        let sim = Arc::new(
            SimulatedCamera::new(Some("usb:001,004"), vec![1, 2, 3])
                .with(|state| state.trigger_writes = false),
        );
        let err = driver(&sim)
            .trigger_capture_and_get_index(&CaptureOptions::default())
            .await
            .expect_err("no new index");
        assert!(matches!(err, CaptureError::ProtocolMismatch(_)));
    }

    #[tokio::test]
    async fn retries_listing_until_delayed_write_shows_up() {
        let sim = Arc::new(
            SimulatedCamera::new(Some("usb:001,004"), vec![1, 2, 3])
                .with(|state| state.write_delay_lists = 2),
        );
        let driver = CameraDriver::new(
            sim.clone(),
            DriverSettings {
                list_retries: 3,
                ..fast_settings()
            },
        );
        let index = driver
            .trigger_capture_and_get_index(&CaptureOptions::default())
            .await
            .expect("index after retries");
        assert_eq!(index, 4);
    }

    #[tokio::test]
    async fn detected_port_is_passed_to_every_command_of_a_call() {
        let sim = Arc::new(SimulatedCamera::new(Some("usb:001,004"), vec![1]));
        driver(&sim)
            .trigger_capture_and_get_index(&CaptureOptions::default())
            .await
            .expect("new index");

        let calls = sim.calls();
        assert_eq!(calls[0], vec!["--auto-detect"]);
        for call in &calls[1..] {
            assert_eq!(&call[..2], ["--port", "usb:001,004"]);
        }
        assert_eq!(
            calls.iter().filter(|c| c.contains(&"--auto-detect".to_string())).count(),
            1
        );
    }

    #[tokio::test]
    async fn explicit_port_skips_detection() {
        let sim = Arc::new(SimulatedCamera::new(Some("usb:001,004"), vec![]));
        let options = CaptureOptions {
            port: Some("usb:009,009".to_string()),
            ..CaptureOptions::default()
        };
        driver(&sim)
            .trigger_capture(&options)
            .await
            .expect("trigger");
        let calls = sim.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(&calls[0][..2], ["--port", "usb:009,009"]);
    }

    #[tokio::test]
    async fn no_detected_port_lets_cli_choose() {
        let sim = Arc::new(SimulatedCamera::new(None, vec![]));
        let driver = driver(&sim);
        assert_eq!(driver.detect_port(&CaptureOptions::default()).await, None);
        driver
            .trigger_capture(&CaptureOptions::default())
            .await
            .expect("trigger");
        let last = sim.calls().pop().expect("trigger call");
        assert_eq!(last, vec!["--trigger-capture", "--quiet"]);
    }

    #[tokio::test]
    async fn failed_trigger_surfaces_command_output() {
        let sim = Arc::new(
            SimulatedCamera::new(Some("usb:001,004"), vec![1])
                .with(|state| state.fail_trigger = true),
        );
        let err = driver(&sim)
            .trigger_capture(&CaptureOptions::default())
            .await
            .expect_err("trigger fails");
        let CaptureError::DeviceUnavailable(failure) = err else {
            panic!("expected DeviceUnavailable, got {err:?}");
        };
        assert!(failure.command.contains("--trigger-capture"));
        assert!(failure.stderr.contains("PTP"));
    }

    #[tokio::test]
    async fn latest_indices_are_the_highest_ascending() {
        let sim = Arc::new(SimulatedCamera::new(Some("usb:001,004"), vec![9, 2, 14, 5, 11]));
        let latest = driver(&sim)
            .latest_indices(3, &CaptureOptions::default())
            .await
            .expect("listing");
        assert_eq!(latest, vec![9, 11, 14]);
    }

    #[tokio::test]
    async fn range_download_maps_sparse_indices_to_positions() {
        let sim = Arc::new(SimulatedCamera::new(
            Some("usb:001,004"),
            vec![7, 8, 9, 10, 11, 12],
        ));
        let dest = tempfile::tempdir().expect("tempdir");
        let paths = driver(&sim)
            .download_frames_range(&[7, 9, 12], dest.path(), &CaptureOptions::default())
            .await
            .expect("download");

        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame-1.jpg", "frame-2.jpg", "frame-3.jpg"]);
        for path in &paths {
            assert!(path.exists());
        }
        assert!(!dest.path().join(".download").exists());

        let get = sim
            .calls()
            .into_iter()
            .find(|c| c.contains(&"--get-file".to_string()))
            .expect("get-file call");
        assert!(get.contains(&"7-12".to_string()));
    }

    #[tokio::test]
    async fn range_download_fails_loudly_on_missing_position() {
        let sim = Arc::new(
            SimulatedCamera::new(Some("usb:001,004"), vec![7, 8, 9])
                .with(|state| state.skip_download = vec![9]),
        );
        let dest = tempfile::tempdir().expect("tempdir");
        let err = driver(&sim)
            .download_frames_range(&[7, 9], dest.path(), &CaptureOptions::default())
            .await
            .expect_err("position 2 has no file");
        assert!(matches!(err, CaptureError::ProtocolMismatch(_)));
        assert!(!dest.path().join(".download").exists());
        assert!(!dest.path().join("frame-1.jpg").exists());
    }

    #[tokio::test]
    async fn empty_range_download_leaves_destination_clean() {
        let sim = Arc::new(
            SimulatedCamera::new(Some("usb:001,004"), vec![7])
                .with(|state| state.skip_download = vec![7]),
        );
        let dest = tempfile::tempdir().expect("tempdir");
        driver(&sim)
            .download_frames_range(&[7], dest.path(), &CaptureOptions::default())
            .await
            .expect_err("nothing downloaded");
        let leftovers = std::fs::read_dir(dest.path()).expect("read dest").count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn camera_info_degrades_summary_failure_to_text() {
        let sim = Arc::new(
            SimulatedCamera::new(Some("usb:001,004"), vec![])
                .with(|state| state.fail_summary = true),
        );
        let info = driver(&sim).camera_info(None).await.expect("info");
        assert_eq!(info.ports, vec!["usb:001,004"]);
        assert_eq!(info.selected_port.as_deref(), Some("usb:001,004"));
        let SummaryReport::Failed(reason) = info.summary else {
            panic!("summary should be degraded");
        };
        assert!(reason.contains("--summary"));
    }

    #[tokio::test]
    async fn camera_info_prefers_explicit_port() {
        let sim = Arc::new(SimulatedCamera::new(Some("usb:001,004"), vec![]));
        let info = driver(&sim)
            .camera_info(Some("usb:002,002"))
            .await
            .expect("info");
        assert_eq!(info.selected_port.as_deref(), Some("usb:002,002"));
        assert!(matches!(info.summary, SummaryReport::Available(_)));
    }

    #[tokio::test]
    async fn camera_info_without_camera_reports_no_port() {
        let sim = Arc::new(SimulatedCamera::new(None, vec![]));
        let info = driver(&sim).camera_info(None).await.expect("info");
        assert!(info.ports.is_empty());
        assert_eq!(info.summary, SummaryReport::NoPort);
    }

    #[test]
    fn settle_override_is_clamped() {
        let sim = Arc::new(SimulatedCamera::new(None, vec![]));
        let driver = driver(&sim);
        let options = CaptureOptions {
            settle_ms: Some(60_000),
            ..CaptureOptions::default()
        };
        assert_eq!(driver.settle(&options), super::MAX_SETTLE);
    }

    #[test]
    fn port_policy_parses_case_insensitively() {
        assert_eq!("PIN".parse::<PortPolicy>().ok(), Some(PortPolicy::Pin));
        assert_eq!("detect".parse::<PortPolicy>().ok(), Some(PortPolicy::Detect));
        assert!("sometimes".parse::<PortPolicy>().is_err());
    }
}
