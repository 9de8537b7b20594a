//! Moves audio and video files that older clients left in the persistent
//! directory back under streaming assets, before verification looks at
//! them.

use crate::error::Error;
use crate::model::{asset_key, AssetDescriptor};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const AUDIO_DIR: &str = "AudioAssets";
const VIDEO_DIR: &str = "VideoAssets";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub purged: Vec<PathBuf>,
    pub audio_moved: usize,
    pub video_moved: usize,
}

/// Where migration reads from and writes to.
pub struct MigrationPaths<'a> {
    pub game_root: &'a Path,
    pub persistent: &'a Path,
    pub streaming: &'a Path,
}

/// Audio files that must stay persistent: forced-persistent `.pck` banks,
/// as lowercased persistent names.
pub fn audio_exclusions<'a>(assets: impl IntoIterator<Item = &'a AssetDescriptor>) -> Vec<String> {
    assets
        .into_iter()
        .filter(|a| a.force_persistent && a.remote_name.to_lowercase().ends_with(".pck"))
        .map(|a| asset_key(&a.remote_name_persistent))
        .collect()
}

/// Delete `dirs` under `game_root`; missing ones are skipped.
pub fn purge_directories(game_root: &Path, dirs: &[String]) -> Result<Vec<PathBuf>, Error> {
    let mut purged = Vec::new();
    for dir in dirs.iter().filter(|d| !d.trim().is_empty()) {
        let path = game_root.join(dir);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
            info!("Removed {}", path.display());
            purged.push(path);
        }
    }
    Ok(purged)
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if to.exists() {
        fs::remove_file(to)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            // cross-device moves
            debug!("rename {} failed ({}), copying", from.display(), e);
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

fn files_under(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_excluded(path: &Path, exclusions: &[String]) -> bool {
    let key = asset_key(&path.to_string_lossy());
    exclusions.iter().any(|excluded| key.ends_with(excluded.as_str()))
}

/// Move installed-language audio out of the persistent directory.
pub fn migrate_audio(
    paths: &MigrationPaths<'_>,
    languages: &[String],
    exclusions: &[String],
) -> Result<usize, Error> {
    let source_root = paths.persistent.join(AUDIO_DIR);
    if !source_root.is_dir() {
        return Ok(0);
    }

    let mut moved = 0;
    for entry in fs::read_dir(&source_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let lang = entry.file_name().to_string_lossy().into_owned();
        if !languages.iter().any(|l| l.eq_ignore_ascii_case(&lang)) {
            continue;
        }

        let lang_dir = entry.path();
        let target_dir = paths.streaming.join(AUDIO_DIR).join(&lang);
        for file in files_under(&lang_dir)? {
            if is_excluded(&file, exclusions) {
                debug!("Keeping persistent audio {}", file.display());
                continue;
            }
            let relative = file.strip_prefix(&lang_dir).unwrap_or(&file);
            move_file(&file, &target_dir.join(relative))?;
            moved += 1;
        }
    }

    if moved > 0 {
        info!("Moved {} audio files to streaming assets", moved);
    }
    Ok(moved)
}

/// Move every persistent video file to streaming assets.
pub fn migrate_video(paths: &MigrationPaths<'_>) -> Result<usize, Error> {
    let source_root = paths.persistent.join(VIDEO_DIR);
    if !source_root.is_dir() {
        return Ok(0);
    }

    let target_root = paths.streaming.join(VIDEO_DIR);
    let files = files_under(&source_root)?;
    for file in &files {
        let relative = file.strip_prefix(&source_root).unwrap_or(file);
        move_file(file, &target_root.join(relative))?;
    }
    if let Err(e) = fs::remove_dir_all(&source_root) {
        warn!("Cannot remove {}: {}", source_root.display(), e);
    }

    if !files.is_empty() {
        info!("Moved {} video files to streaming assets", files.len());
    }
    Ok(files.len())
}

/// Purge configured directories, then migrate audio and video when the
/// persistent directory exists.
pub fn migrate_storage(
    paths: &MigrationPaths<'_>,
    purge_dirs: &[String],
    languages: &[String],
    assets: &[AssetDescriptor],
) -> Result<MigrationReport, Error> {
    let mut report = MigrationReport {
        purged: purge_directories(paths.game_root, purge_dirs)?,
        ..Default::default()
    };

    if !paths.persistent.is_dir() {
        debug!("{} does not exist, nothing to migrate", paths.persistent.display());
        return Ok(report);
    }

    let exclusions = audio_exclusions(assets);
    report.audio_moved = migrate_audio(paths, languages, &exclusions)?;
    report.video_moved = migrate_video(paths)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct Layout {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        persistent: PathBuf,
        streaming: PathBuf,
    }

    impl Layout {
        fn new() -> Self {
            let tmp = tempdir().unwrap();
            let root = tmp.path().to_path_buf();
            let persistent = root.join("Game_Data/Persistent");
            let streaming = root.join("Game_Data/StreamingAssets");
            fs::create_dir_all(&persistent).unwrap();
            fs::create_dir_all(&streaming).unwrap();
            Self {
                _tmp: tmp,
                root,
                persistent,
                streaming,
            }
        }

        fn paths(&self) -> MigrationPaths<'_> {
            MigrationPaths {
                game_root: &self.root,
                persistent: &self.persistent,
                streaming: &self.streaming,
            }
        }
    }

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_exclusions_only_forced_pck() {
        let mut bank = AssetDescriptor::new("Game_Data/StreamingAssets/AudioAssets/English(US)/Banks0.pck", 1, vec![]);
        bank.remote_name_persistent = "Game_Data/Persistent/AudioAssets/English(US)/Banks0.pck".into();
        bank.force_persistent = true;
        let plain = AssetDescriptor::new("Game_Data/StreamingAssets/AudioAssets/English(US)/Vo.pck", 1, vec![]);
        let mut blk = AssetDescriptor::new("Game_Data/x.blk", 1, vec![]);
        blk.force_persistent = true;

        let exclusions = audio_exclusions(&[bank, plain, blk]);
        assert_eq!(
            exclusions,
            vec!["game_data/persistent/audioassets/english(us)/banks0.pck".to_string()]
        );
    }

    #[test]
    fn test_audio_moves_installed_languages_except_exclusions() {
        let layout = Layout::new();
        let audio = layout.persistent.join("AudioAssets");
        write(&audio.join("English(US)/Vo0.pck"), b"new");
        write(&audio.join("English(US)/sub/Vo1.pck"), b"one");
        write(&audio.join("English(US)/Banks0.pck"), b"keep");
        write(&audio.join("Japanese/Vo0.pck"), b"jp");
        write(&layout.streaming.join("AudioAssets/English(US)/Vo0.pck"), b"old");

        let exclusions = vec!["persistent/audioassets/english(us)/banks0.pck".to_string()];
        let moved = migrate_audio(&layout.paths(), &["english(us)".to_string()], &exclusions).unwrap();

        assert_eq!(moved, 2);
        let target = layout.streaming.join("AudioAssets/English(US)");
        assert_eq!(fs::read(target.join("Vo0.pck")).unwrap(), b"new");
        assert_eq!(fs::read(target.join("sub/Vo1.pck")).unwrap(), b"one");
        assert!(!target.join("Banks0.pck").exists());
        assert!(audio.join("English(US)/Banks0.pck").exists());
        assert!(audio.join("Japanese/Vo0.pck").exists());
    }

    #[test]
    fn test_video_moves_wholesale() {
        let layout = Layout::new();
        write(&layout.persistent.join("VideoAssets/a.usm"), b"a");
        write(&layout.persistent.join("VideoAssets/sub/b.cuepoint"), b"b");

        let moved = migrate_video(&layout.paths()).unwrap();
        assert_eq!(moved, 2);
        assert!(layout.streaming.join("VideoAssets/a.usm").is_file());
        assert!(layout.streaming.join("VideoAssets/sub/b.cuepoint").is_file());
        assert!(!layout.persistent.join("VideoAssets").exists());
    }

    #[test]
    fn test_purge_and_missing_persistent() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        write(&root.join("DXSETUP/dxsetup.exe"), b"x");
        let persistent = root.join("Persistent");
        let streaming = root.join("StreamingAssets");
        let paths = MigrationPaths {
            game_root: root,
            persistent: &persistent,
            streaming: &streaming,
        };

        let report = migrate_storage(&paths, &["DXSETUP".to_string(), "Nope".to_string()], &[], &[]).unwrap();
        assert_eq!(report.purged, vec![root.join("DXSETUP")]);
        assert_eq!(report.audio_moved, 0);
        assert!(!root.join("DXSETUP").exists());
    }
}
