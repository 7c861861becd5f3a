//! In-memory stand-in for gphoto2, shared by driver and orchestrator tests.

use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use crate::core::errors::{CaptureError, CommandFailure};

use super::{
    parser::FileIndex,
    traits::{CameraCli, CliOutput},
};

#[derive(Debug, Default)]
pub struct SimState {
    pub port: Option<String>,
    pub files: Vec<FileIndex>,
    pub next_index: FileIndex,
    /// Gap between consecutive indices assigned by triggers.
    pub index_step: FileIndex,
    pub trigger_writes: bool,
    /// Number of `--list-files` calls after a trigger that still miss the
    /// new file.
    pub write_delay_lists: u32,
    pub fail_trigger: bool,
    pub fail_summary: bool,
    pub skip_download: Vec<FileIndex>,
    pub calls: Vec<Vec<String>>,
    pending: Vec<(FileIndex, u32)>,
}

pub struct SimulatedCamera {
    state: Mutex<SimState>,
}

/// Pixel size of the JPEG written for a file index; varies so composition
/// code sees differently sized inputs.
pub fn frame_size(index: FileIndex) -> (u32, u32) {
    (40 + (index % 4) * 8, 30 + (index % 3) * 6)
}

fn failure(args: &[String], stderr: &str) -> CaptureError {
    CaptureError::DeviceUnavailable(CommandFailure {
        command: format!("gphoto2 {}", args.join(" ")),
        reason: "exited with exit status: 1".to_string(),
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}

fn write_frame(path: &Path, index: FileIndex) -> Result<(), CaptureError> {
    let (width, height) = frame_size(index);
    let shade = (index * 37 % 255) as u8;
    RgbImage::from_pixel(width, height, Rgb([shade, 255 - shade, 128]))
        .save(path)
        .map_err(CaptureError::from)
}

fn parse_span(value: &str) -> Option<(FileIndex, FileIndex)> {
    match value.split_once('-') {
        Some((first, last)) => Some((first.parse().ok()?, last.parse().ok()?)),
        None => {
            let single = value.parse().ok()?;
            Some((single, single))
        }
    }
}

impl SimulatedCamera {
    pub fn new(port: Option<&str>, files: Vec<FileIndex>) -> Self {
        let next_index = files.iter().max().map_or(1, |max| max + 1);
        Self {
            state: Mutex::new(SimState {
                port: port.map(str::to_string),
                files,
                next_index,
                index_step: 1,
                trigger_writes: true,
                ..SimState::default()
            }),
        }
    }

    pub fn with(self, update: impl FnOnce(&mut SimState)) -> Self {
        update(&mut self.state());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("simulated camera state poisoned")
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state().calls.clone()
    }

    fn respond(&self, args: &[String]) -> Result<CliOutput, CaptureError> {
        let mut state = self.state();
        state.calls.push(args.to_vec());

        let has = |flag: &str| args.iter().any(|arg| arg == flag);
        let value_of = |flag: &str| {
            args.iter()
                .position(|arg| arg == flag)
                .and_then(|pos| args.get(pos + 1))
                .cloned()
        };

        if has("--auto-detect") {
            let mut stdout = String::from(
                "Model                          Port\n----------------------------------------------------------\n",
            );
            if let Some(port) = &state.port {
                stdout.push_str(&format!("Canon EOS 2000D                {port}\n"));
            }
            return Ok(CliOutput {
                stdout,
                stderr: String::new(),
            });
        }

        if has("--summary") {
            if state.fail_summary {
                return Err(failure(args, "*** Error: Could not get device summary"));
            }
            return Ok(CliOutput {
                stdout: "Camera summary:\nManufacturer: Canon Inc.\nModel: Canon EOS 2000D\n"
                    .to_string(),
                stderr: String::new(),
            });
        }

        if has("--trigger-capture") {
            if state.fail_trigger {
                return Err(failure(args, "*** Error (-7: 'I/O problem') PTP device busy"));
            }
            if state.trigger_writes {
                let index = state.next_index;
                let step = state.index_step;
                state.next_index += step;
                let delay = state.write_delay_lists;
                if delay == 0 {
                    state.files.push(index);
                } else {
                    state.pending.push((index, delay));
                }
            }
            return Ok(CliOutput::default());
        }

        if has("--list-files") {
            let mut landed = Vec::new();
            for (index, remaining) in state.pending.iter_mut() {
                if *remaining == 0 {
                    landed.push(*index);
                } else {
                    *remaining -= 1;
                }
            }
            state.pending.retain(|(index, _)| !landed.contains(index));
            state.files.extend(landed);

            let mut stdout = format!(
                "There are {} files in folder '/store_00020001/DCIM/100CANON':\n",
                state.files.len()
            );
            for index in &state.files {
                stdout.push_str(&format!(
                    "#{index:<5} IMG_{index:04}.JPG  rd  5210 KB 6000x4000 image/jpeg\n"
                ));
            }
            return Ok(CliOutput {
                stdout,
                stderr: String::new(),
            });
        }

        if has("--get-file") {
            let span = value_of("--get-file").and_then(|v| parse_span(&v));
            let template = value_of("--filename");
            let (Some((first, last)), Some(template)) = (span, template) else {
                return Err(failure(args, "*** Error: bad --get-file arguments"));
            };
            let wanted: Vec<FileIndex> = state
                .files
                .iter()
                .copied()
                .filter(|index| (first..=last).contains(index))
                .filter(|index| !state.skip_download.contains(index))
                .collect();
            for index in wanted {
                let path = template
                    .replace("%n", &index.to_string())
                    .replace("%C", "jpg");
                write_frame(Path::new(&path), index)?;
            }
            return Ok(CliOutput::default());
        }

        Err(failure(args, "*** Error: unsupported command"))
    }
}

#[async_trait]
impl CameraCli for SimulatedCamera {
    async fn run(
        &self,
        _program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CliOutput, CaptureError> {
        self.respond(args)
    }
}
