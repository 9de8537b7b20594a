//! Parallel verification of an asset list.
//!
//! Every asset is classified exactly once on a bounded rayon pool. The pool
//! drops to a single worker on rotational disks, where parallel reads only
//! add seeks. The first worker failure aborts the whole pass and nothing
//! collected so far is returned.

use crate::classify::{classify_asset, ClassifyContext};
use crate::control::CancelToken;
use crate::error::{Error, FaultCategory, FaultSink};
use crate::hasher::BufferPool;
use crate::model::{AssetDescriptor, AssetEntry, VerificationState};
use crate::platform::MediumProbe;
use crate::progress::{ProgressCounters, RepairReporter};
use dashmap::DashSet;
use rayon::prelude::*;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything a worker needs, passed explicitly instead of via globals.
pub struct RepairContext<'a> {
    pub game_root: &'a Path,
    pub fast_mode: bool,
    pub cancel: &'a CancelToken,
    pub counters: &'a ProgressCounters,
    pub reporter: &'a dyn RepairReporter,
    pub faults: &'a dyn FaultSink,
    /// Paths already reported for removal by an earlier phase; redundant
    /// copies found here are not reported again.
    pub known_removals: Option<&'a HashSet<PathBuf>>,
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Assets to (re)download, sorted by key.
    pub broken: Vec<AssetDescriptor>,
    /// Files to delete, sorted by path.
    pub removal: Vec<AssetDescriptor>,
    pub entries: Vec<AssetEntry>,
    pub workers: usize,
    pub skipped_duplicates: usize,
}

pub struct Scheduler<'a> {
    thread_count: usize,
    probe: &'a dyn MediumProbe,
}

#[derive(Default)]
struct Collected {
    broken: Mutex<Vec<AssetDescriptor>>,
    removal: Mutex<Vec<AssetDescriptor>>,
    entries: Mutex<Vec<AssetEntry>>,
}

fn push<T>(list: &Mutex<Vec<T>>, item: T) {
    list.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(item);
}

fn take<T>(list: Mutex<Vec<T>>) -> Vec<T> {
    list.into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Count and size of the assets that will actually be classified, with
/// duplicate keys counted once.
fn unique_totals(assets: &[AssetDescriptor]) -> (u64, u64) {
    let mut keys = HashSet::with_capacity(assets.len());
    assets
        .iter()
        .filter(|asset| keys.insert(asset.key()))
        .fold((0, 0), |(count, size), asset| (count + 1, size + asset.size))
}

impl<'a> Scheduler<'a> {
    pub fn new(thread_count: usize, probe: &'a dyn MediumProbe) -> Self {
        Self {
            thread_count: thread_count.max(1),
            probe,
        }
    }

    /// Worker count for a pass over `root`.
    pub fn effective_workers(&self, root: &Path) -> usize {
        if self.probe.is_solid_state(root) {
            self.thread_count
        } else {
            warn!(
                "{} is not on a solid-state drive, verification limited to 1 thread",
                root.display()
            );
            1
        }
    }

    pub fn run(
        &self,
        assets: &[AssetDescriptor],
        ctx: &RepairContext<'_>,
    ) -> Result<VerifyReport, Error> {
        let workers = self.effective_workers(ctx.game_root);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("verify-{}", i))
            .build()
            .map_err(|e| Error::Worker(e.to_string()))?;

        let (total_count, total_size) = unique_totals(assets);
        ctx.counters.set_totals(total_count, total_size);
        ctx.reporter.on_verify_start(total_count, total_size);
        info!("Verifying {} assets with {} workers", total_count, workers);

        let start = Instant::now();
        let in_flight: DashSet<String> = DashSet::new();
        let collected = Collected::default();
        let buffers = BufferPool::default();
        let skipped = std::sync::atomic::AtomicUsize::new(0);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.install(|| {
                assets.par_iter().try_for_each(|asset| {
                    ctx.cancel.check()?;

                    if !in_flight.insert(asset.key()) {
                        warn!("Found duplicated task for {}! Skipping...", asset.remote_name);
                        skipped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        return Ok(());
                    }

                    self.verify_one(asset, ctx, &buffers, &collected)
                })
            })
        }))
        .unwrap_or_else(|payload| Err(Error::Worker(panic_message(payload.as_ref()))));

        if let Err(e) = result {
            if !e.is_cancelled() {
                ctx.faults.report_fault(&e, FaultCategory::UnhandledWorker);
            }
            return Err(e);
        }

        let mut broken = take(collected.broken);
        let mut removal = take(collected.removal);
        let mut entries = take(collected.entries);
        broken.sort_by_key(|a| a.key());
        removal.sort_by(|a, b| a.local_path.cmp(&b.local_path));
        entries.sort_by(|a, b| (&a.dir, &a.name).cmp(&(&b.dir, &b.name)));

        let snapshot = ctx.counters.snapshot();
        let duration = start.elapsed();
        debug!(
            "Verification completed in {:.2}s, {} broken, {} redundant",
            duration.as_secs_f64(),
            broken.len(),
            removal.len()
        );
        ctx.reporter
            .on_verify_complete(&snapshot, duration.as_secs_f64());

        Ok(VerifyReport {
            broken,
            removal,
            entries,
            workers,
            skipped_duplicates: skipped.into_inner(),
        })
    }

    fn verify_one(
        &self,
        asset: &AssetDescriptor,
        ctx: &RepairContext<'_>,
        buffers: &BufferPool,
        collected: &Collected,
    ) -> Result<(), Error> {
        ctx.counters.asset_started(asset.size);

        let classify_ctx = ClassifyContext {
            game_root: ctx.game_root,
            fast_mode: ctx.fast_mode,
            pool: buffers,
            cancel: ctx.cancel,
            counters: ctx.counters,
        };
        let classification = classify_asset(asset, &classify_ctx)?;

        let redundant = classification.redundant.filter(|outcome| {
            ctx.known_removals
                .map_or(true, |known| !known.contains(&outcome.target))
        });
        if let Some(redundant) = redundant {
            warn!(
                "File [T: Unused]: {} is redundant (exist both in persistent and streaming)",
                redundant.target.display()
            );
            ctx.counters.found_redundant();
            let entry = redundant.to_entry();
            ctx.reporter.on_asset_entry(&entry);
            push(&collected.entries, entry);
            push(&collected.removal, redundant.asset);
        }

        let primary = classification.primary;
        if primary.state != VerificationState::Verified {
            warn!(
                "File [T: {:?}]: {} is {:?}",
                primary.asset.category,
                primary.target.display(),
                primary.state
            );
            ctx.counters.found_broken(asset.size);
            let entry = primary.to_entry();
            ctx.reporter.on_asset_entry(&entry);
            push(&collected.entries, entry);
            push(&collected.broken, primary.asset);
        }

        ctx.reporter.on_verify_progress(&ctx.counters.snapshot());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogFaultSink;
    use crate::hasher::{hash_data, DigestKind};
    use crate::platform::FixedMedium;
    use crate::progress::SilentReporter;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct CountingFaults(AtomicUsize);

    impl FaultSink for CountingFaults {
        fn report_fault(&self, _error: &Error, _category: FaultCategory) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn asset(name: &str, content: &[u8]) -> AssetDescriptor {
        AssetDescriptor::new(name, content.len() as u64, hash_data(DigestKind::Md5, content))
    }

    fn ctx<'a>(
        root: &'a Path,
        cancel: &'a CancelToken,
        counters: &'a ProgressCounters,
        faults: &'a dyn FaultSink,
    ) -> RepairContext<'a> {
        RepairContext {
            game_root: root,
            fast_mode: false,
            cancel,
            counters,
            reporter: &SilentReporter,
            faults,
            known_removals: None,
        }
    }

    #[test]
    fn test_rotational_medium_forces_single_worker() {
        let tmp = tempdir().unwrap();
        let hdd = FixedMedium(false);
        let ssd = FixedMedium(true);
        assert_eq!(Scheduler::new(8, &hdd).effective_workers(tmp.path()), 1);
        assert_eq!(Scheduler::new(8, &ssd).effective_workers(tmp.path()), 8);

        let cancel = CancelToken::new();
        let counters = ProgressCounters::new();
        let report = Scheduler::new(8, &hdd)
            .run(&[], &ctx(tmp.path(), &cancel, &counters, &LogFaultSink))
            .unwrap();
        assert_eq!(report.workers, 1);
    }

    #[test]
    fn test_duplicate_entry_classified_once() {
        let tmp = tempdir().unwrap();
        let dup = asset("Data/missing.blk", b"1234");
        let assets = vec![dup.clone(), asset("Data/other.blk", b"xy"), dup];

        let cancel = CancelToken::new();
        let counters = ProgressCounters::new();
        let probe = FixedMedium(true);
        let report = Scheduler::new(4, &probe)
            .run(&assets, &ctx(tmp.path(), &cancel, &counters, &LogFaultSink))
            .unwrap();

        assert_eq!(report.skipped_duplicates, 1);
        assert_eq!(report.broken.len(), 2);
        let snap = counters.snapshot();
        assert_eq!(snap.count_total, 2);
        assert_eq!(snap.size_total, 6);
        assert_eq!(snap.count_current, 2);
        assert_eq!(snap.found_count, 2);
        assert_eq!(snap.found_size, 6);
    }

    #[test]
    fn test_known_removal_not_reported_twice() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("Data")).unwrap();
        fs::create_dir_all(root.join("Persistent")).unwrap();
        fs::write(root.join("Data/good.blk"), b"good").unwrap();
        fs::write(root.join("Persistent/good.blk"), b"good").unwrap();

        let mut good = asset("Data/good.blk", b"good");
        good.remote_name_persistent = "Persistent/good.blk".into();
        let known: HashSet<PathBuf> = [good.persistent_path(root)].into_iter().collect();

        let cancel = CancelToken::new();
        let counters = ProgressCounters::new();
        let probe = FixedMedium(true);
        let mut context = ctx(root, &cancel, &counters, &LogFaultSink);
        context.known_removals = Some(&known);
        let report = Scheduler::new(2, &probe).run(&[good], &context).unwrap();

        assert!(report.broken.is_empty());
        assert!(report.removal.is_empty());
        assert!(report.entries.is_empty());
        assert_eq!(counters.snapshot().found_count, 0);
    }

    #[test]
    fn test_collects_broken_and_redundant() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("Data")).unwrap();
        fs::create_dir_all(root.join("Persistent")).unwrap();
        fs::write(root.join("Data/good.blk"), b"good").unwrap();
        fs::write(root.join("Data/bad.blk"), b"corrupt").unwrap();
        fs::write(root.join("Persistent/good.blk"), b"good").unwrap();

        let mut good = asset("Data/good.blk", b"good");
        good.remote_name_persistent = "Persistent/good.blk".into();
        let bad = asset("Data/bad.blk", b"bad!");

        let cancel = CancelToken::new();
        let counters = ProgressCounters::new();
        let probe = FixedMedium(true);
        let report = Scheduler::new(2, &probe)
            .run(&[good, bad], &ctx(root, &cancel, &counters, &LogFaultSink))
            .unwrap();

        assert_eq!(report.broken.len(), 1);
        assert_eq!(report.broken[0].remote_name, "Data/bad.blk");
        assert_eq!(report.removal.len(), 1);
        assert_eq!(
            report.removal[0].local_path,
            Some(root.join("Persistent").join("good.blk"))
        );
        assert_eq!(report.entries.len(), 2);

        let snap = counters.snapshot();
        assert_eq!(snap.count_total, 2);
        assert_eq!(snap.size_total, 8);
        assert_eq!(snap.found_size, 4);
    }

    #[test]
    fn test_worker_error_fails_fast_and_reports_once() {
        let tmp = tempdir().unwrap();
        let mut bad = asset("Data/a.blk", b"a");
        bad.md5 = vec![0u8; 3];
        let assets = vec![bad, asset("Data/b.blk", b"b")];

        let cancel = CancelToken::new();
        let counters = ProgressCounters::new();
        let faults = CountingFaults::default();
        let probe = FixedMedium(true);
        let result = Scheduler::new(1, &probe).run(&assets, &ctx(tmp.path(), &cancel, &counters, &faults));

        assert!(matches!(result, Err(Error::Format { .. })));
        assert_eq!(faults.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_pass_is_not_reported_as_fault() {
        let tmp = tempdir().unwrap();
        let assets = vec![asset("Data/a.blk", b"a")];
        let cancel = CancelToken::new();
        cancel.cancel();
        let counters = ProgressCounters::new();
        let faults = CountingFaults::default();
        let probe = FixedMedium(true);

        let result = Scheduler::new(2, &probe).run(&assets, &ctx(tmp.path(), &cancel, &counters, &faults));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(faults.0.load(Ordering::SeqCst), 0);
        assert_eq!(counters.snapshot().count_current, 0);
    }

    #[test]
    fn test_consecutive_passes_are_identical() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("Data")).unwrap();
        fs::write(root.join("Data/0.blk"), b"zero").unwrap();
        let assets: Vec<_> = (0..16)
            .map(|i| asset(&format!("Data/{}.blk", i), b"zero"))
            .collect();

        let probe = FixedMedium(true);
        let cancel = CancelToken::new();
        let run = || {
            let counters = ProgressCounters::new();
            Scheduler::new(4, &probe)
                .run(&assets, &ctx(root, &cancel, &counters, &LogFaultSink))
                .unwrap()
                .broken
        };
        let first = run();
        let second = run();
        assert_eq!(first.len(), 15);
        assert_eq!(first, second);
    }
}
