//! Snapshot/diff discovery of files written by a ranged download.

use std::{
    collections::BTreeSet,
    ffi::OsString,
    path::{Path, PathBuf},
};

use tokio::fs;

use crate::core::errors::CaptureError;

use super::parser::{FileIndex, trailing_number};

/// Template handed to `--filename`: `%n` is the device file number and `%C`
/// the extension the camera chose.
pub const DOWNLOAD_TEMPLATE: &str = "frame-%n.%C";

/// File names present in a directory at one point in time.
#[derive(Debug, Clone, Default)]
pub struct DirSnapshot {
    names: BTreeSet<OsString>,
}

impl DirSnapshot {
    pub async fn capture(dir: &Path) -> std::io::Result<Self> {
        let mut names = BTreeSet::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(err),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.insert(entry.file_name());
            }
        }
        Ok(Self { names })
    }

    /// Files present in `after` but not in `self`, sorted by their numeric
    /// stem suffix.
    pub fn new_entries(&self, after: &DirSnapshot, dir: &Path) -> Vec<PathBuf> {
        let mut fresh: Vec<PathBuf> = after
            .names
            .difference(&self.names)
            .map(|name| dir.join(name))
            .collect();
        fresh.sort_by_key(|path| (stem_number(path), path.clone()));
        fresh
    }
}

fn stem_number(path: &Path) -> Option<FileIndex> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(trailing_number)
}

/// Smallest contiguous `(first, last)` span covering every index.
pub fn covering_span(indices: &[FileIndex]) -> Option<(FileIndex, FileIndex)> {
    let first = *indices.iter().min()?;
    let last = *indices.iter().max()?;
    Some((first, last))
}

pub fn span_argument(first: FileIndex, last: FileIndex) -> String {
    if first == last {
        first.to_string()
    } else {
        format!("{first}-{last}")
    }
}

/// Picks the downloaded file for each requested index, in caller order.
///
/// A file whose stem ends in the index wins. When the camera numbered the
/// files some other way but wrote exactly one file per index of the span,
/// the file at the same offset within the span is used.
pub fn match_positions(
    indices: &[FileIndex],
    fresh: &[PathBuf],
) -> Result<Vec<PathBuf>, CaptureError> {
    let Some((first, last)) = covering_span(indices) else {
        return Ok(Vec::new());
    };
    let span_len = (last - first) as usize + 1;
    let mut seen = BTreeSet::new();
    if let Some(index) = indices.iter().find(|index| !seen.insert(**index)) {
        return Err(CaptureError::ProtocolMismatch(format!(
            "index {index} requested more than once in {indices:?}"
        )));
    }

    let mut matched = Vec::with_capacity(indices.len());
    for (position, index) in indices.iter().enumerate() {
        let by_number = fresh
            .iter()
            .find(|path| stem_number(path) == Some(*index));
        let by_offset = || {
            (fresh.len() == span_len)
                .then(|| fresh.get((index - first) as usize))
                .flatten()
        };
        match by_number.or_else(by_offset) {
            Some(path) => matched.push(path.clone()),
            None => {
                return Err(CaptureError::ProtocolMismatch(format!(
                    "no downloaded file for index {index} (position {}); new files: {:?}",
                    position + 1,
                    fresh
                )));
            }
        }
    }
    Ok(matched)
}

/// Moves matched downloads to `frame-<position>.<ext>` inside `dest_dir`.
pub async fn assign_positions(
    matched: &[PathBuf],
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, CaptureError> {
    let mut placed = Vec::with_capacity(matched.len());
    for (position, source) in matched.iter().enumerate() {
        let ext = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "jpg".to_string());
        let target = dest_dir.join(format!("frame-{}.{ext}", position + 1));
        fs::rename(source, &target).await?;
        placed.push(target);
    }
    Ok(placed)
}
