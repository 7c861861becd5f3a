//! Parsers for gphoto2 text output.
//!
//! Pinned against gphoto2 2.5.x. Everything above the driver works on the
//! structured values returned here and never on raw CLI text.

use std::sync::LazyLock;

use regex::Regex;

/// Bumped whenever the recognised output shapes change.
pub const PARSER_VERSION: u32 = 1;

pub type FileIndex = u32;

static PORT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"usb:\d+,\d+").expect("port pattern is valid"));

static INDEX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s*(\d+)").expect("index pattern is valid"));

/// All `usb:<bus>,<device>` tokens of `--auto-detect` output, in order.
pub fn parse_ports(output: &str) -> Vec<String> {
    PORT_PATTERN
        .find_iter(output)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn first_port(output: &str) -> Option<String> {
    PORT_PATTERN.find(output).map(|m| m.as_str().to_string())
}

/// File indices from `--list-files` output, in appearance order. Tokens that
/// do not fit a [`FileIndex`] are dropped.
pub fn parse_file_indices(output: &str) -> Vec<FileIndex> {
    INDEX_PATTERN
        .captures_iter(output)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<FileIndex>().ok())
        .collect()
}

/// Numeric part of a downloaded file stem, e.g. `frame-12` -> 12.
pub fn trailing_number(stem: &str) -> Option<FileIndex> {
    let start = stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    stem[start..].parse().ok()
}
