//! Path-keyed asset index built from several categorized manifest streams.
//!
//! Keys are case-insensitive relative paths. When two streams describe the
//! same path the one whose category comes later in the [`CategoryOrder`]
//! wins; within one category the later arrival wins. The loser is
//! tombstoned, so the live index never holds two entries for a key.

use crate::error::Error;
use crate::model::{AssetCategory, AssetDescriptor, SourceCategory};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use tracing::{trace, warn};

const MERGE_CHANNEL_BOUND: usize = 256;
const LANGUAGE_AUDIO_DIR: &str = "audio/windows/full";

/// Precedence of manifest categories, lowest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryOrder(Vec<SourceCategory>);

impl Default for CategoryOrder {
    /// main package → cache data → resource package → audio package.
    fn default() -> Self {
        Self(vec![
            SourceCategory::Main,
            SourceCategory::Data,
            SourceCategory::Silence,
            SourceCategory::Res,
            SourceCategory::Audio,
        ])
    }
}

impl CategoryOrder {
    pub fn new(order: Vec<SourceCategory>) -> Self {
        Self(order)
    }

    /// Categories missing from the order rank after every listed one.
    pub fn rank(&self, category: SourceCategory) -> usize {
        self.0
            .iter()
            .position(|c| *c == category)
            .unwrap_or(self.0.len())
    }

    pub fn categories(&self) -> &[SourceCategory] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    rank: usize,
    position: usize,
}

pub struct AssetIndex {
    game_root: PathBuf,
    order: CategoryOrder,
    entries: Vec<Option<AssetDescriptor>>,
    keys: HashMap<String, Slot>,
}

impl AssetIndex {
    pub fn new(game_root: impl Into<PathBuf>, order: CategoryOrder) -> Self {
        Self {
            game_root: game_root.into(),
            order,
            entries: Vec::new(),
            keys: HashMap::new(),
        }
    }

    pub fn game_root(&self) -> &Path {
        &self.game_root
    }

    /// Record one entry. Returns the entry as stored when it changed the
    /// index, `None` when a higher-precedence category already owns the key.
    ///
    /// `base_url` is the download root the entry's remote name is relative
    /// to; `prefix` is the local directory that name is installed under.
    pub fn register_one(
        &mut self,
        category: SourceCategory,
        mut entry: AssetDescriptor,
        prefix: &str,
        base_url: Option<&str>,
    ) -> Option<AssetDescriptor> {
        if let Some(base) = base_url {
            entry.remote_url = Some(remote_url(base, &entry.remote_name));
        }
        if !prefix.is_empty() {
            let prefix = prefix.trim_end_matches(['/', '\\']);
            entry.remote_name = format!("{}/{}", prefix, entry.remote_name);
            entry.remote_name_persistent = format!("{}/{}", prefix, entry.remote_name_persistent);
        }
        entry.local_path = Some(if entry.force_persistent {
            entry.persistent_path(&self.game_root)
        } else {
            entry.streaming_path(&self.game_root)
        });

        let key = entry.key();
        let rank = self.order.rank(category);

        if let Some(slot) = self.keys.get(&key).copied() {
            if slot.rank > rank {
                trace!(
                    "Ignoring {:?} entry for {}: owned by a later category",
                    category,
                    entry.remote_name
                );
                return None;
            }
            trace!("Overriding entry for {} from {:?}", entry.remote_name, category);
            self.entries[slot.position] = None;
        }

        self.entries.push(Some(entry.clone()));
        self.keys.insert(
            key,
            Slot {
                rank,
                position: self.entries.len() - 1,
            },
        );
        Some(entry)
    }

    /// Lazily register a stream of entries, yielding only the ones that
    /// changed the index.
    pub fn register<'a, I>(
        &'a mut self,
        category: SourceCategory,
        entries: I,
        prefix: &'a str,
        base_url: Option<&'a str>,
    ) -> Register<'a, I::IntoIter>
    where
        I: IntoIterator<Item = AssetDescriptor>,
    {
        Register {
            index: self,
            category,
            entries: entries.into_iter(),
            prefix,
            base_url,
        }
    }

    pub fn get(&self, key: &str) -> Option<&AssetDescriptor> {
        let slot = self.keys.get(&crate::model::asset_key(key))?;
        self.entries[slot.position].as_ref()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &AssetDescriptor> {
        self.entries.iter().flatten()
    }

    pub fn total_size(&self) -> u64 {
        self.iter().map(|a| a.size).sum()
    }

    pub fn into_vec(self) -> Vec<AssetDescriptor> {
        self.entries.into_iter().flatten().collect()
    }
}

/// `<base>/<name>` with the name's separators normalized to `/`.
pub fn remote_url(base: &str, remote_name: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        remote_name.replace('\\', "/").trim_start_matches('/')
    )
}

pub struct Register<'a, I> {
    index: &'a mut AssetIndex,
    category: SourceCategory,
    entries: I,
    prefix: &'a str,
    base_url: Option<&'a str>,
}

impl<I> Iterator for Register<'_, I>
where
    I: Iterator<Item = AssetDescriptor>,
{
    type Item = AssetDescriptor;

    fn next(&mut self) -> Option<AssetDescriptor> {
        for entry in self.entries.by_ref() {
            let changed = self
                .index
                .register_one(self.category, entry, self.prefix, self.base_url);
            if changed.is_some() {
                return changed;
            }
        }
        None
    }
}

/// Consume several categorized sources concurrently and yield their items in
/// arrival order. Each source runs on its own thread, so items from one
/// source keep their relative order; nothing is promised across sources.
pub fn merge_by_arrival<I>(sources: Vec<(SourceCategory, I)>) -> MergeByArrival
where
    I: IntoIterator<Item = Result<AssetDescriptor, Error>> + Send + 'static,
    I::IntoIter: Send,
{
    let (tx, rx) = mpsc::sync_channel(MERGE_CHANNEL_BOUND);
    let handles = sources
        .into_iter()
        .map(|(category, source)| {
            let tx = tx.clone();
            thread::spawn(move || {
                for item in source {
                    let failed = item.is_err();
                    if tx.send(item.map(|entry| (category, entry))).is_err() || failed {
                        break;
                    }
                }
            })
        })
        .collect();

    MergeByArrival { rx, handles }
}

pub struct MergeByArrival {
    rx: mpsc::Receiver<Result<(SourceCategory, AssetDescriptor), Error>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Iterator for MergeByArrival {
    type Item = Result<(SourceCategory, AssetDescriptor), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv() {
            Ok(item) => Some(item),
            Err(_) => {
                // every sender is gone, reap the producers
                for handle in self.handles.drain(..) {
                    if handle.join().is_err() {
                        warn!("Manifest source thread panicked");
                    }
                }
                None
            }
        }
    }
}

/// Whether an asset should be verified given the installed voice languages.
///
/// Only language packs (`.../Audio/Windows/Full/<Language>/...`) are
/// filtered; shared audio and non-audio assets always pass.
pub fn is_installed_audio(asset: &AssetDescriptor, languages: &[String]) -> bool {
    if asset.category != AssetCategory::Audio {
        return true;
    }

    let normalized = asset.remote_name.replace('\\', "/").to_lowercase();
    let dir = match normalized.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => return true,
    };
    if dir.ends_with(LANGUAGE_AUDIO_DIR) || !dir.contains(LANGUAGE_AUDIO_DIR) {
        return true;
    }

    let last = dir.rsplit('/').next().unwrap_or(dir);
    languages
        .iter()
        .any(|lang| !lang.is_empty() && last.starts_with(&lang.to_lowercase()))
}
