use asset_repair_core::{AssetEntry, ProgressSnapshot, RepairKind, RepairReporter};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif.
///
/// - Manifest and scan phases: spinner with the current status
/// - Verification: bar over assets, with the number of findings
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.lock().take() {
            pb.finish_and_clear();
        }
    }

    /// Clear whatever bar is still showing.
    pub fn on_done(&self) {
        self.finish_bar();
    }

    fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICK_CHARS),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl RepairReporter for CliReporter {
    fn on_status(&self, message: &str) {
        self.set_bar(Self::spinner(message));
    }

    fn on_fetch_complete(&self, total_assets: usize, total_bytes: u64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Manifests loaded: {} assets, {}",
            total_assets,
            indicatif::HumanBytes(total_bytes)
        );
    }

    fn on_verify_start(&self, total_assets: u64, _total_bytes: u64) {
        let pb = ProgressBar::new(total_assets);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Verifying [{bar:30.cyan/dim}] {pos}/{len} files, {msg} ({eta} remaining)",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS),
        );
        pb.set_message("0 found");
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_verify_progress(&self, snapshot: &ProgressSnapshot) {
        if let Some(pb) = self.lock().as_ref() {
            pb.set_position(snapshot.count_current);
            pb.set_message(format!("{} found", snapshot.found_count));
        }
    }

    fn on_asset_entry(&self, entry: &AssetEntry) {
        let label = match entry.kind {
            RepairKind::Unused => "redundant",
            _ => "broken",
        };
        let line = format!("    {} {}/{}", label, entry.dir, entry.name);
        match self.lock().as_ref() {
            Some(pb) => pb.println(line),
            None => eprintln!("{}", line),
        }
    }

    fn on_verify_complete(&self, snapshot: &ProgressSnapshot, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Verification complete: {} files, {} findings in {:.2}s",
            snapshot.count_current, snapshot.found_count, duration_secs
        );
    }
}
