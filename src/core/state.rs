use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::errors::FrameStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    Single,
    Burst,
}

impl FrameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameMode::Single => "single",
            FrameMode::Burst => "burst",
        }
    }
}

impl fmt::Display for FrameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameMode {
    type Err = FrameStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "single" => Ok(FrameMode::Single),
            "burst" => Ok(FrameMode::Burst),
            other => Err(FrameStoreError::InvalidMode(other.to_string())),
        }
    }
}

/// Progress of one capture orchestration, used for structured logging.
/// `Triggering` includes the settle delay that follows the shutter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStage {
    Idle,
    Triggering { shot: usize, of: usize },
    Listed { shot: usize },
    Downloading,
    Assembling,
    Composed,
    MosaicFallback,
    Done,
}

impl fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStage::Idle => f.write_str("idle"),
            CaptureStage::Triggering { shot, of } => write!(f, "triggering({shot}/{of})"),
            CaptureStage::Listed { shot } => write!(f, "listed({shot})"),
            CaptureStage::Downloading => f.write_str("downloading"),
            CaptureStage::Assembling => f.write_str("assembling"),
            CaptureStage::Composed => f.write_str("composed"),
            CaptureStage::MosaicFallback => f.write_str("mosaic_fallback"),
            CaptureStage::Done => f.write_str("done"),
        }
    }
}

/// How the final artifact of a capture was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    Framed,
    Mosaic,
    Raw,
}
