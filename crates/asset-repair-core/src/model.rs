use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What kind of content an asset is, used for UI grouping and for the
/// storage migration rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AssetCategory {
    #[default]
    Generic,
    Audio,
    Video,
    Unused,
}

impl AssetCategory {
    /// Guess the category from a remote relative path.
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase().replace('\\', "/");
        if lower.contains("audioassets/") || lower.contains("/audio/") || lower.ends_with(".pck")
        {
            AssetCategory::Audio
        } else if lower.contains("videoassets/")
            || lower.ends_with(".usm")
            || lower.ends_with(".cuepoint")
        {
            AssetCategory::Video
        } else {
            AssetCategory::Generic
        }
    }
}

/// The manifest stream an asset came from. The order in which these are
/// registered decides which one wins on a path collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    Main,
    Res,
    Audio,
    Data,
    Silence,
}

/// One file the remote manifest says should exist locally.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetDescriptor {
    pub remote_name: String,
    pub remote_name_persistent: String,
    pub size: u64,
    pub md5: Vec<u8>,
    pub xxh64: Option<Vec<u8>>,
    pub is_patch: bool,
    pub force_persistent: bool,
    pub force_streaming: bool,
    pub category: AssetCategory,
    /// Where the downloader fetches this asset from, set when the index
    /// builder knows the source's base URL.
    pub remote_url: Option<String>,
    /// Absolute location chosen for this asset, filled in by the index
    /// builder and refined by the classifier.
    pub local_path: Option<PathBuf>,
}

impl AssetDescriptor {
    pub fn new(remote_name: impl Into<String>, size: u64, md5: Vec<u8>) -> Self {
        let remote_name = remote_name.into();
        Self {
            category: AssetCategory::from_path(&remote_name),
            remote_name_persistent: remote_name.clone(),
            remote_name,
            size,
            md5,
            ..Default::default()
        }
    }

    /// Case-insensitive identity used for dedup and overrides.
    pub fn key(&self) -> String {
        asset_key(&self.remote_name)
    }

    /// The digest verification compares against: XXH64 when the manifest
    /// carries one, MD5 otherwise.
    pub fn expected_digest(&self) -> &[u8] {
        match &self.xxh64 {
            Some(xxh) if !xxh.is_empty() => xxh,
            _ => &self.md5,
        }
    }

    pub fn streaming_path(&self, game_root: &Path) -> PathBuf {
        game_root.join(normalize_relative(&self.remote_name))
    }

    pub fn persistent_path(&self, game_root: &Path) -> PathBuf {
        game_root.join(normalize_relative(&self.remote_name_persistent))
    }
}

/// Lowercased, forward-slash relative path.
pub fn asset_key(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches('/')
        .to_lowercase()
}

/// Turn a manifest path (either separator) into a platform relative path.
/// `..` segments are dropped, so the result never leaves its base.
pub fn normalize_relative(path: &str) -> PathBuf {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect()
}

/// Like [`normalize_relative`], but `None` for paths that try to climb out
/// of their base or name a drive.
pub fn safe_relative(path: &str) -> Option<PathBuf> {
    let escapes = path
        .split(['/', '\\'])
        .any(|segment| segment == ".." || segment.contains(':'));
    if escapes {
        None
    } else {
        Some(normalize_relative(path))
    }
}

/// Result of classifying one location of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    NotChecked,
    Verified,
    Missing,
    Mismatched,
    Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub state: VerificationState,
    pub asset: AssetDescriptor,
    /// Path the outcome refers to: the copy to re-download or delete.
    pub target: PathBuf,
    pub computed_digest: Option<Vec<u8>>,
}

/// Kind shown next to an asset in the repair list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairKind {
    Generic,
    Audio,
    Video,
    Unused,
}

impl From<AssetCategory> for RepairKind {
    fn from(category: AssetCategory) -> Self {
        match category {
            AssetCategory::Generic => RepairKind::Generic,
            AssetCategory::Audio => RepairKind::Audio,
            AssetCategory::Video => RepairKind::Video,
            AssetCategory::Unused => RepairKind::Unused,
        }
    }
}

/// UI-facing record for every broken or redundant finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetEntry {
    pub name: String,
    pub kind: RepairKind,
    pub dir: String,
    pub size: u64,
    pub computed_digest: Option<Vec<u8>>,
    pub expected_digest: Option<Vec<u8>>,
}

impl AssetEntry {
    pub fn from_relative(relative: &str, kind: RepairKind, size: u64) -> Self {
        let normalized = relative.replace('\\', "/");
        let (dir, name) = match normalized.rsplit_once('/') {
            Some((dir, name)) => (dir.to_string(), name.to_string()),
            None => (String::new(), normalized.clone()),
        };
        Self {
            name,
            kind,
            dir,
            size,
            computed_digest: None,
            expected_digest: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_key_is_case_and_separator_insensitive() {
        assert_eq!(asset_key("GenshinImpact_Data\\StreamingAssets\\A.blk"), asset_key("/genshinimpact_data/streamingassets/a.BLK"));
    }

    #[test]
    fn test_normalize_relative_mixed_separators() {
        let path = normalize_relative("a\\b/c.txt");
        assert_eq!(path, PathBuf::from("a").join("b").join("c.txt"));
    }

    #[test]
    fn test_parent_segments_never_escape() {
        assert_eq!(normalize_relative("../../etc/passwd"), PathBuf::from("etc").join("passwd"));
        assert_eq!(safe_relative("Data/../../outside.txt"), None);
        assert_eq!(safe_relative("C:\\Windows\\x.dll"), None);
        assert_eq!(safe_relative("/Data/a..b.blk"), Some(PathBuf::from("Data").join("a..b.blk")));
    }

    #[test]
    fn test_expected_digest_prefers_xxh64() {
        let mut asset = AssetDescriptor::new("a.bin", 1, vec![0u8; 16]);
        assert_eq!(asset.expected_digest().len(), 16);
        asset.xxh64 = Some(vec![1u8; 8]);
        assert_eq!(asset.expected_digest(), &[1u8; 8]);
    }

    #[test]
    fn test_category_from_path() {
        assert_eq!(AssetCategory::from_path("Data/StreamingAssets/AudioAssets/English(US)/x.pck"), AssetCategory::Audio);
        assert_eq!(AssetCategory::from_path("Data/StreamingAssets/VideoAssets/intro.usm"), AssetCategory::Video);
        assert_eq!(AssetCategory::from_path("Data/level0"), AssetCategory::Generic);
    }

    #[test]
    fn test_entry_from_relative_splits_dir() {
        let entry = AssetEntry::from_relative("a\\b\\c.hdiff", RepairKind::Unused, 3);
        assert_eq!(entry.name, "c.hdiff");
        assert_eq!(entry.dir, "a/b");
    }
}
