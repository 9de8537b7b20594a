//! Leftover files that should be deleted: entries of `*deletefiles*` lists
//! shipped with patches, and stale diff/temp artifacts anywhere in the
//! install tree.

use crate::control::CancelToken;
use crate::error::Error;
use crate::model::{safe_relative, AssetCategory, AssetDescriptor, AssetEntry, RepairKind};
use crate::progress::{ProgressCounters, RepairReporter};
use glob::{MatchOptions, Pattern};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const DELETE_LIST_GLOB: &str = "*deletefiles*";
const STALE_SUFFIXES: [&str; 3] = [".diff", "_tmp", ".hdiff"];

#[derive(Debug, Default)]
pub struct RedundantScan {
    /// Files to delete, sorted by path.
    pub removal: Vec<AssetDescriptor>,
    pub entries: Vec<AssetEntry>,
    /// Deletion lists that were read and removed.
    pub consumed_lists: Vec<PathBuf>,
}

struct Collector<'a> {
    game_root: &'a Path,
    seen: HashSet<PathBuf>,
    scan: RedundantScan,
    counters: &'a ProgressCounters,
    reporter: &'a dyn RepairReporter,
}

impl Collector<'_> {
    fn add(&mut self, path: PathBuf, size: u64) {
        if !self.seen.insert(path.clone()) {
            return;
        }

        let relative = path
            .strip_prefix(self.game_root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        warn!("File [T: Unused]: {} is redundant", relative);

        let entry = AssetEntry::from_relative(&relative, RepairKind::Unused, size);
        self.counters.found_redundant();
        self.reporter.on_asset_entry(&entry);
        self.scan.entries.push(entry);

        let mut asset = AssetDescriptor::new(relative, size, Vec::new());
        asset.category = AssetCategory::Unused;
        asset.local_path = Some(path);
        self.scan.removal.push(asset);
    }
}

/// Whether a file name marks a leftover patch artifact.
pub fn is_stale_artifact(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    STALE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

fn delete_lists(game_root: &Path) -> Result<Vec<PathBuf>, Error> {
    let pattern = Pattern::new(DELETE_LIST_GLOB)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let mut lists = Vec::new();
    for entry in fs::read_dir(game_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if pattern.matches_with(&name.to_string_lossy(), options) {
            lists.push(entry.path());
        }
    }
    lists.sort();
    Ok(lists)
}

fn consume_list(list: &Path, collector: &mut Collector<'_>) -> Result<(), Error> {
    let content = fs::read_to_string(list)?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let relative = match safe_relative(line) {
            Some(relative) => relative,
            None => {
                warn!("Ignoring {} listed in {}: outside the game directory", line, list.display());
                continue;
            }
        };
        let path = collector.game_root.join(relative);
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => collector.add(path, metadata.len()),
            _ => debug!("{} listed in {} does not exist", line, list.display()),
        }
    }
    fs::remove_file(list)?;
    info!("Consumed deletion list {}", list.display());
    Ok(())
}

fn walk_stale(collector: &mut Collector<'_>, cancel: &CancelToken) -> Result<(), Error> {
    for entry in WalkDir::new(collector.game_root).follow_links(false) {
        cancel.check()?;
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.io_error().map(|e| e.kind()) == Some(io::ErrorKind::PermissionDenied) {
                    warn!("Access denied while scanning: {}", err);
                    continue;
                }
                return Err(Error::Io(err.into()));
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if is_stale_artifact(&entry.file_name().to_string_lossy()) {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            collector.add(entry.into_path(), size);
        }
    }
    Ok(())
}

/// Scan `game_root` for redundant files. Deletion lists are deleted once
/// read; the files they name are only reported.
pub fn scan_redundant(
    game_root: &Path,
    counters: &ProgressCounters,
    reporter: &dyn RepairReporter,
    cancel: &CancelToken,
) -> Result<RedundantScan, Error> {
    let mut collector = Collector {
        game_root,
        seen: HashSet::new(),
        scan: RedundantScan::default(),
        counters,
        reporter,
    };

    for list in delete_lists(game_root)? {
        cancel.check()?;
        consume_list(&list, &mut collector)?;
        collector.scan.consumed_lists.push(list);
    }
    walk_stale(&mut collector, cancel)?;

    let mut scan = collector.scan;
    scan.removal.sort_by(|a, b| a.local_path.cmp(&b.local_path));
    scan.entries
        .sort_by(|a, b| (&a.dir, &a.name).cmp(&(&b.dir, &b.name)));
    info!("{} redundant files found", scan.removal.len());
    Ok(scan)
}
