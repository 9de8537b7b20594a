use crate::config::AppConfig;
use crate::control::CancelToken;
use crate::error::{Error, FaultCategory, FaultSink, LogFaultSink};
use crate::index::{is_installed_audio, merge_by_arrival, AssetIndex};
use crate::manifest::dispatch::{resolve_repo_url, with_fallback};
use crate::manifest::{
    fetch_with, load_pkg_version, pkg_version, FileInfoKind, Fetcher, GatewayInfo, HttpFetcher,
    RetryWrapper, SingleAttempt,
};
use crate::migrate::{migrate_storage, MigrationPaths, MigrationReport};
use crate::model::{AssetDescriptor, AssetEntry, SourceCategory};
use crate::platform::{MediumProbe, SystemMediumProbe};
use crate::progress::{ProgressCounters, ProgressSnapshot, RepairReporter};
use crate::redundant::{scan_redundant, RedundantScan};
use crate::scheduler::{RepairContext, Scheduler};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const REVISION_STAMP_FILE: &str = "base_revision";

pub struct RepairEngine {
    config: AppConfig,
    fetcher: Arc<dyn Fetcher>,
    retry: Arc<dyn RetryWrapper>,
    probe: Arc<dyn MediumProbe>,
    faults: Arc<dyn FaultSink>,
    cancel: CancelToken,
}

/// Worklist handed to the downloader and deleter.
#[derive(Debug)]
pub struct RepairReport {
    pub broken: Vec<AssetDescriptor>,
    pub removal: Vec<AssetDescriptor>,
    pub entries: Vec<AssetEntry>,
    pub progress: ProgressSnapshot,
    pub migration: MigrationReport,
    pub revision: Option<String>,
    pub workers: usize,
    pub duration: Duration,
}

/// Live manifest entries plus the revision the gateway pinned them to.
#[derive(Debug)]
pub struct ResolvedManifest {
    pub assets: Vec<AssetDescriptor>,
    pub revision: Option<String>,
}

type CategorySource = std::iter::FlatMap<
    std::iter::Once<()>,
    Vec<Result<AssetDescriptor, Error>>,
    Box<dyn FnMut(()) -> Vec<Result<AssetDescriptor, Error>> + Send>,
>;

impl RepairEngine {
    /// Engine with the HTTP fetcher, a single-attempt retry wrapper, the
    /// system medium probe and a logging fault sink.
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        let fetcher = HttpFetcher::new(
            &config.manifest.user_agent,
            Duration::from_secs(config.manifest.timeout_secs),
        )?;
        Ok(Self {
            config,
            fetcher: Arc::new(fetcher),
            retry: Arc::new(SingleAttempt),
            probe: Arc::new(SystemMediumProbe),
            faults: Arc::new(LogFaultSink),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_retry_wrapper(mut self, retry: Arc<dyn RetryWrapper>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_medium_probe(mut self, probe: Arc<dyn MediumProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_fault_sink(mut self, faults: Arc<dyn FaultSink>) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run one full pass:
    /// 1. Fetch and merge manifests into the asset index
    /// 2. Migrate misplaced persistent audio/video
    /// 3. Scan for redundant files
    /// 4. Verify every asset in parallel
    /// 5. Stamp the persistent directory with the gateway's base revision
    pub fn run(&self, reporter: &dyn RepairReporter) -> Result<RepairReport, Error> {
        let start = Instant::now();
        self.check_game_root()?;

        let manifest = self.resolve_manifest(reporter)?;

        reporter.on_status("Migrating storage...");
        let migration = self.migrate_assets(&manifest.assets)?;

        let counters = ProgressCounters::new();
        reporter.on_status("Scanning for redundant files...");
        info!("Scanning for redundant files...");
        let redundant = scan_redundant(&self.config.game_path, &counters, reporter, &self.cancel)?;
        let known_removals: HashSet<PathBuf> = redundant
            .removal
            .iter()
            .filter_map(|a| a.local_path.clone())
            .collect();

        reporter.on_status("Verifying files...");
        info!("Verifying files...");
        let scheduler = Scheduler::new(self.config.worker_count(), self.probe.as_ref());
        let ctx = RepairContext {
            game_root: &self.config.game_path,
            fast_mode: self.config.fast_mode,
            cancel: &self.cancel,
            counters: &counters,
            reporter,
            faults: self.faults.as_ref(),
            known_removals: Some(&known_removals),
        };
        let verified = scheduler.run(&manifest.assets, &ctx)?;
        self.write_revision_stamp(manifest.revision.as_deref())?;

        let (removal, entries) = combine_removals(redundant, verified.removal, verified.entries);
        let duration = start.elapsed();
        debug!(
            "Repair pass completed in {:.2}s: {} broken, {} to remove",
            duration.as_secs_f64(),
            verified.broken.len(),
            removal.len()
        );

        Ok(RepairReport {
            broken: verified.broken,
            removal,
            entries,
            progress: counters.snapshot(),
            migration,
            revision: manifest.revision,
            workers: verified.workers,
            duration,
        })
    }

    /// Only the redundant file scan.
    pub fn scan_redundant(&self, reporter: &dyn RepairReporter) -> Result<RedundantScan, Error> {
        self.check_game_root()?;
        let counters = ProgressCounters::new();
        scan_redundant(&self.config.game_path, &counters, reporter, &self.cancel)
    }

    /// Fetch manifests, then only migrate storage.
    pub fn migrate(&self, reporter: &dyn RepairReporter) -> Result<MigrationReport, Error> {
        self.check_game_root()?;
        let manifest = self.resolve_manifest(reporter)?;
        self.migrate_assets(&manifest.assets)
    }

    /// Fetch every configured manifest and build the merged index. Failures
    /// are reported to the fault sink before being returned.
    pub fn resolve_manifest(&self, reporter: &dyn RepairReporter) -> Result<ResolvedManifest, Error> {
        reporter.on_status("Fetching manifests...");
        info!("Fetching manifests...");
        let resolved = self.build_index().map_err(|e| {
            if !e.is_cancelled() {
                self.faults.report_fault(&e, FaultCategory::Manifest);
            }
            e
        })?;

        let total: u64 = resolved.assets.iter().map(|a| a.size).sum();
        info!("{} assets to verify ({} bytes)", resolved.assets.len(), total);
        reporter.on_fetch_complete(resolved.assets.len(), total);
        Ok(resolved)
    }

    fn check_game_root(&self) -> Result<(), Error> {
        if self.config.game_path.is_dir() {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "game directory {}",
                self.config.game_path.display()
            )))
        }
    }

    fn migrate_assets(&self, assets: &[AssetDescriptor]) -> Result<MigrationReport, Error> {
        let persistent = self.config.persistent_path();
        let streaming = self.config.streaming_path();
        let paths = MigrationPaths {
            game_root: &self.config.game_path,
            persistent: &persistent,
            streaming: &streaming,
        };
        migrate_storage(
            &paths,
            &self.config.purge_dirs,
            &self.config.audio_languages,
            assets,
        )
    }

    fn build_index(&self) -> Result<ResolvedManifest, Error> {
        let mut index = AssetIndex::new(&self.config.game_path, self.config.category_order());
        let mut any_source = false;

        if !self.config.cache_mode {
            if let Some(url) = self.main_manifest_url()? {
                any_source = true;
                let entries = load_pkg_version(self.retry.as_ref(), self.fetcher.as_ref(), &url, &self.cancel)?;
                let repo = url.rsplit_once('/').map(|(repo, _)| repo);
                let recorded = index
                    .register(SourceCategory::Main, entries, "", repo)
                    .count();
                debug!("{} main entries from {}", recorded, url);
            }
        }

        let mut revision = None;
        if let Some(gateway_url) = self.config.manifest.gateway_url.as_deref() {
            any_source = true;
            let gateway = with_fallback(
                gateway_url,
                self.config.manifest.fallback_gateway_url.as_deref(),
                |url| {
                    let data = fetch_with(self.retry.as_ref(), self.fetcher.as_ref(), url, &self.cancel)?;
                    GatewayInfo::decode(url, &data)
                },
            )?;
            self.register_gateway_categories(&mut index, &gateway)?;
            revision = gateway
                .category(FileInfoKind::Base)
                .ok()
                .map(|base| base.revision_stamp.clone());
        }

        if !any_source {
            return Err(Error::NotFound(
                "no manifest source configured (manifest.pkg_version_url, manifest.metadata_url or manifest.gateway_url)"
                    .to_string(),
            ));
        }

        Ok(ResolvedManifest {
            assets: index.into_vec(),
            revision,
        })
    }

    fn main_manifest_url(&self) -> Result<Option<String>, Error> {
        let manifest = &self.config.manifest;
        if let Some(url) = &manifest.pkg_version_url {
            return Ok(Some(url.clone()));
        }
        let metadata_url = match &manifest.metadata_url {
            Some(url) => url,
            None => return Ok(None),
        };
        let version = manifest
            .version
            .as_deref()
            .ok_or_else(|| Error::NotFound("manifest.version is not set".to_string()))?;

        let repo = with_fallback(
            metadata_url,
            manifest.fallback_metadata_url.as_deref(),
            |url| {
                let data = fetch_with(self.retry.as_ref(), self.fetcher.as_ref(), url, &self.cancel)?;
                resolve_repo_url(url, &data, version)
            },
        )?;
        Ok(Some(format!("{}/pkg_version", repo.trim_end_matches('/'))))
    }

    /// Written only once a pass has completed.
    fn write_revision_stamp(&self, revision: Option<&str>) -> Result<(), Error> {
        let revision = match revision {
            Some(revision) => revision,
            None => {
                debug!("No base revision, no revision stamp written");
                return Ok(());
            }
        };
        let persistent = self.config.persistent_path();
        fs::create_dir_all(&persistent)?;
        fs::write(persistent.join(REVISION_STAMP_FILE), revision)?;
        info!("Base revision {}", revision);
        Ok(())
    }

    fn register_gateway_categories(
        &self,
        index: &mut AssetIndex,
        gateway: &GatewayInfo,
    ) -> Result<(), Error> {
        let kinds = if self.config.cache_mode {
            [
                (SourceCategory::Data, FileInfoKind::Data),
                (SourceCategory::Silence, FileInfoKind::Silence),
            ]
        } else {
            [
                (SourceCategory::Res, FileInfoKind::Res),
                (SourceCategory::Audio, FileInfoKind::Audio),
            ]
        };

        let mut sources = Vec::with_capacity(kinds.len());
        let mut patch_bases = Vec::with_capacity(kinds.len());
        for (category, kind) in kinds {
            let info = gateway.category(kind)?;
            patch_bases.push((category, info.base_url.clone()));
            sources.push((category, self.category_source(info.file_list_url())));
        }
        let res_base = match gateway.base_res_url() {
            Ok(url) => Some(url),
            Err(e) => {
                debug!("No pinned resource URL: {}", e);
                None
            }
        };

        let prefix = self.config.data_prefix();
        let languages = &self.config.audio_languages;
        let mut recorded = 0usize;
        for item in merge_by_arrival(sources) {
            let (category, entry) = item?;
            if !is_installed_audio(&entry, languages) {
                continue;
            }
            let base_url = if entry.is_patch {
                patch_bases
                    .iter()
                    .find(|(c, _)| *c == category)
                    .map(|(_, url)| url.as_str())
            } else {
                res_base.as_deref()
            };
            if index.register_one(category, entry, &prefix, base_url).is_some() {
                recorded += 1;
            }
        }
        debug!("{} resource entries registered", recorded);
        Ok(())
    }

    /// A lazily fetched category list, run on its merge producer thread.
    fn category_source(&self, url: String) -> CategorySource {
        let fetcher = Arc::clone(&self.fetcher);
        let retry = Arc::clone(&self.retry);
        let cancel = self.cancel.clone();
        let fetch: Box<dyn FnMut(()) -> Vec<Result<AssetDescriptor, Error>> + Send> =
            Box::new(move |()| {
                let decoded = fetch_with(retry.as_ref(), fetcher.as_ref(), &url, &cancel)
                    .and_then(|data| pkg_version::decode(&url, &data));
                match decoded {
                    Ok(entries) => entries.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                }
            });
        std::iter::once(()).flat_map(fetch)
    }
}

fn combine_removals(
    redundant: RedundantScan,
    verified_removal: Vec<AssetDescriptor>,
    verified_entries: Vec<AssetEntry>,
) -> (Vec<AssetDescriptor>, Vec<AssetEntry>) {
    let mut seen = HashSet::new();
    let mut removal: Vec<AssetDescriptor> = redundant
        .removal
        .into_iter()
        .chain(verified_removal)
        .filter(|a| seen.insert(a.local_path.clone()))
        .collect();
    removal.sort_by(|a, b| a.local_path.cmp(&b.local_path));

    let mut reported = HashSet::new();
    let mut entries: Vec<AssetEntry> = redundant
        .entries
        .into_iter()
        .chain(verified_entries)
        .filter(|e| reported.insert((e.kind, e.dir.clone(), e.name.clone())))
        .collect();
    entries.sort_by(|a, b| (&a.dir, &a.name).cmp(&(&b.dir, &b.name)));
    (removal, entries)
}
