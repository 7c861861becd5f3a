use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::anyhow;

use crate::{
    camera::driver::{DEFAULT_CLI, DriverSettings, PortPolicy},
    capture::orchestrator::{CaptureSettings, DEFAULT_BURST_COUNT},
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub gphoto2_bin: String,
    pub gphoto2_port: Option<String>,
    pub public_dir: PathBuf,
    pub photo_dir: PathBuf,
    pub frame_dir: PathBuf,
    pub frame_meta_dir: PathBuf,
    pub capture_timeout_ms: u64,
    pub info_timeout_ms: u64,
    pub settle_ms: u64,
    pub list_retries: u32,
    pub list_retry_backoff_ms: u64,
    pub port_policy: PortPolicy,
    pub burst_frame_count: usize,
    pub base_url: Option<String>,
    pub debug_gphoto2: bool,
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn number_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_owned())
            .parse()?;
        let gphoto2_bin = non_empty("GPHOTO2_BIN").unwrap_or_else(|| DEFAULT_CLI.to_owned());
        let gphoto2_port = non_empty("GPHOTO2_PORT");

        let public_dir = PathBuf::from(non_empty("PUBLIC_DIR").unwrap_or_else(|| "public".to_owned()));
        let photo_dir =
            PathBuf::from(non_empty("PHOTO_DIR").unwrap_or_else(|| "public/photos".to_owned()));
        let frame_dir =
            PathBuf::from(non_empty("FRAME_DIR").unwrap_or_else(|| "public/frames".to_owned()));
        let frame_meta_dir =
            PathBuf::from(non_empty("FRAME_META_DIR").unwrap_or_else(|| "frame-data".to_owned()));

        let port_policy = match non_empty("PORT_POLICY") {
            Some(value) => value.parse::<PortPolicy>().map_err(|err| anyhow!(err))?,
            None => PortPolicy::default(),
        };
        let burst_frame_count = number_or("BURST_FRAME_COUNT", DEFAULT_BURST_COUNT).max(1);

        Ok(Self {
            bind_addr,
            gphoto2_bin,
            gphoto2_port,
            public_dir,
            photo_dir,
            frame_dir,
            frame_meta_dir,
            capture_timeout_ms: number_or("CAPTURE_TIMEOUT_MS", 20_000),
            info_timeout_ms: number_or("INFO_TIMEOUT_MS", 15_000),
            settle_ms: number_or("SETTLE_MS", 500),
            list_retries: number_or("LIST_RETRIES", 0),
            list_retry_backoff_ms: number_or("LIST_RETRY_BACKOFF_MS", 250),
            port_policy,
            burst_frame_count,
            base_url: non_empty("BASE_URL"),
            debug_gphoto2: env::var("DEBUG_GPHOTO2").is_ok_and(|v| v.trim() == "1"),
        })
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            cli_path: self.gphoto2_bin.clone(),
            configured_port: self.gphoto2_port.clone(),
            capture_timeout: Duration::from_millis(self.capture_timeout_ms),
            info_timeout: Duration::from_millis(self.info_timeout_ms),
            settle: Duration::from_millis(self.settle_ms),
            list_retries: self.list_retries,
            list_retry_backoff: Duration::from_millis(self.list_retry_backoff_ms),
        }
    }

    /// Fast-timing configuration with every directory under `root`.
    #[cfg(test)]
    pub fn for_root(root: &std::path::Path) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            gphoto2_bin: DEFAULT_CLI.to_owned(),
            gphoto2_port: None,
            public_dir: root.join("public"),
            photo_dir: root.join("public/photos"),
            frame_dir: root.join("public/frames"),
            frame_meta_dir: root.join("frame-data"),
            capture_timeout_ms: 2_000,
            info_timeout_ms: 2_000,
            settle_ms: 1,
            list_retries: 0,
            list_retry_backoff_ms: 1,
            port_policy: PortPolicy::Detect,
            burst_frame_count: DEFAULT_BURST_COUNT,
            base_url: None,
            debug_gphoto2: false,
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            photo_dir: self.photo_dir.clone(),
            port_policy: self.port_policy,
            burst_count: self.burst_frame_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::PathBuf,
        sync::{Mutex, OnceLock},
        time::{Duration, SystemTime, UNIX_EPOCH},
    };

    use crate::camera::driver::{MAX_SETTLE, PortPolicy};

    use super::AppConfig;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const KEYS: &[&str] = &[
        "BIND_ADDR",
        "GPHOTO2_BIN",
        "GPHOTO2_PORT",
        "PHOTO_DIR",
        "SETTLE_MS",
        "LIST_RETRIES",
        "PORT_POLICY",
        "BURST_FRAME_COUNT",
        "BASE_URL",
        "DEBUG_GPHOTO2",
    ];

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        let guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for key in KEYS {
            remove_env(key);
        }
        guard
    }

    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    #[test]
    fn from_env_applies_defaults() {
        let _guard = lock_env();

        let config = AppConfig::from_env().expect("config should parse");
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.gphoto2_bin, "gphoto2");
        assert_eq!(config.gphoto2_port, None);
        assert_eq!(config.photo_dir, PathBuf::from("public/photos"));
        assert_eq!(config.port_policy, PortPolicy::Detect);
        assert_eq!(config.burst_frame_count, 4);
        assert!(!config.debug_gphoto2);

        let driver = config.driver_settings();
        assert_eq!(driver.capture_timeout, Duration::from_secs(20));
        assert_eq!(driver.info_timeout, Duration::from_secs(15));
        assert_eq!(driver.settle, Duration::from_millis(500));
        assert!(driver.settle <= MAX_SETTLE);
    }

    #[test]
    fn from_env_reads_camera_settings() {
        let _guard = lock_env();
        set_env("GPHOTO2_BIN", "/opt/gphoto2/bin/gphoto2");
        set_env("GPHOTO2_PORT", "usb:001,004");
        set_env("SETTLE_MS", "1200");
        set_env("LIST_RETRIES", "3");
        set_env("PORT_POLICY", "Pin");
        set_env("DEBUG_GPHOTO2", "1");

        let config = AppConfig::from_env().expect("config should parse");
        let driver = config.driver_settings();
        assert_eq!(driver.cli_path, "/opt/gphoto2/bin/gphoto2");
        assert_eq!(driver.configured_port.as_deref(), Some("usb:001,004"));
        assert_eq!(driver.settle, Duration::from_millis(1200));
        assert_eq!(driver.list_retries, 3);
        assert_eq!(config.capture_settings().port_policy, PortPolicy::Pin);
        assert!(config.debug_gphoto2);
    }

    #[test]
    fn blank_values_fall_back_and_bad_numbers_use_defaults() {
        let _guard = lock_env();
        set_env("GPHOTO2_PORT", "   ");
        set_env("BURST_FRAME_COUNT", "many");
        set_env("BASE_URL", "");

        let config = AppConfig::from_env().expect("config should parse");
        assert_eq!(config.gphoto2_port, None);
        assert_eq!(config.burst_frame_count, 4);
        assert_eq!(config.base_url, None);
    }

    #[test]
    fn unknown_port_policy_is_rejected() {
        let _guard = lock_env();
        set_env("PORT_POLICY", "sometimes");
        assert!(AppConfig::from_env().is_err());
    }

    #[test]
    fn from_env_reads_values_from_dotenv_file() {
        let _guard = lock_env();

        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let path: PathBuf = std::env::temp_dir().join(format!("boothcam-dotenv-{suffix}.env"));
        fs::write(&path, "BASE_URL=https://booth.example\nBURST_FRAME_COUNT=6\n")
            .expect("should write temporary dotenv file");

        dotenvy::from_path_override(&path).expect("dotenv file should load");
        let config = AppConfig::from_env().expect("config should parse");
        assert_eq!(config.base_url.as_deref(), Some("https://booth.example"));
        assert_eq!(config.burst_frame_count, 6);

        let _ = fs::remove_file(path);
    }
}
