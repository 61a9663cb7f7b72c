//! Built-in collector plugins
//!
//! Each collector is a thin format adapter: it locates the files of one
//! export layout, hands candidate records to the normalization helpers in
//! `waymark_common::normalize`, and emits canonical `LocationPoint`
//! batches. None of them touch the network; every source is an offline
//! export on local disk.
//!
//! # Collectors
//! - **location_history** - Takeout-style location history dumps
//! - **social_archive** - generic social-media archive exports
//! - **photo_sidecar** - photo library metadata sidecar files
//! - **ip_trace** - access-log IPs joined against a local lookup table
//!
//! All of them tolerate malformed records by skipping them; a file that
//! cannot be read at all is logged and skipped as well. Only a missing or
//! unreadable data directory fails the whole invocation.

pub mod ip_trace;
pub mod location_history;
pub mod photo_sidecar;
pub mod social_archive;

use crate::types::{CollectError, Collector};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Instantiate every built-in collector, unconfigured
pub fn builtin_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(location_history::LocationHistoryCollector::new()),
        Box::new(social_archive::SocialArchiveCollector::new()),
        Box::new(photo_sidecar::PhotoSidecarCollector::new()),
        Box::new(ip_trace::IpTraceCollector::new()),
    ]
}

/// All `.json` files under `root`, recursively
///
/// Traversal errors are logged and skipped, never fatal. The result is
/// sorted so collectors emit records in a stable order.
pub(crate) fn json_files_under(root: &Path, skip_hidden: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if skip_hidden && name.starts_with('.') {
            continue;
        }
        if entry.path().extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    files
}

/// Read and parse one JSON document
pub(crate) fn read_json_file(path: &Path) -> Result<serde_json::Value, CollectError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

// ============================================================================
// Mock collector for testing
// ============================================================================
