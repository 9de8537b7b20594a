use crate::index::CategoryOrder;
use crate::model::SourceCategory;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Install root of the game.
    pub game_path: PathBuf,
    /// Executable stem; resource manifests live under `<name>_Data`.
    #[serde(default)]
    pub executable_name: String,
    /// Persistent data directory, relative to `game_path` unless absolute.
    #[serde(default = "default_persistent_dir")]
    pub persistent_dir: PathBuf,
    /// Streaming assets directory, relative to `game_path` unless absolute.
    #[serde(default = "default_streaming_dir")]
    pub streaming_assets_dir: PathBuf,
    /// Worker count; 0 means one per core.
    #[serde(default)]
    pub thread_count: usize,
    /// Check existence and size only.
    #[serde(default)]
    pub fast_mode: bool,
    /// Refresh the cache data/silence manifests instead of the game files.
    #[serde(default)]
    pub cache_mode: bool,
    /// Installed voice-over languages, as named by the audio folders.
    #[serde(default)]
    pub audio_languages: Vec<String>,
    /// Directories under the game root removed before verification.
    #[serde(default = "default_purge_dirs")]
    pub purge_dirs: Vec<String>,
    #[serde(default = "default_category_order")]
    pub category_order: Vec<SourceCategory>,
    #[serde(default)]
    pub manifest: ManifestConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManifestConfig {
    /// Package-version manifest. When unset it is `<repo url>/pkg_version`.
    #[serde(default)]
    pub pkg_version_url: Option<String>,
    /// Version → repository URL document.
    #[serde(default)]
    pub metadata_url: Option<String>,
    #[serde(default)]
    pub fallback_metadata_url: Option<String>,
    /// Installed game version used for the metadata lookup.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub fallback_gateway_url: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            pkg_version_url: None,
            metadata_url: None,
            fallback_metadata_url: None,
            version: None,
            gateway_url: None,
            fallback_gateway_url: None,
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_persistent_dir() -> PathBuf {
    PathBuf::from("Persistent")
}

fn default_streaming_dir() -> PathBuf {
    PathBuf::from("StreamingAssets")
}

fn default_purge_dirs() -> Vec<String> {
    vec!["DXSETUP".to_string()]
}

fn default_category_order() -> Vec<SourceCategory> {
    CategoryOrder::default().categories().to_vec()
}

fn default_user_agent() -> String {
    format!("asset-repair/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Config with every optional field defaulted.
    pub fn for_game(game_path: impl Into<PathBuf>) -> Self {
        Self {
            game_path: game_path.into(),
            executable_name: String::new(),
            persistent_dir: default_persistent_dir(),
            streaming_assets_dir: default_streaming_dir(),
            thread_count: 0,
            fast_mode: false,
            cache_mode: false,
            audio_languages: Vec::new(),
            purge_dirs: default_purge_dirs(),
            category_order: default_category_order(),
            manifest: ManifestConfig::default(),
        }
    }

    pub fn persistent_path(&self) -> PathBuf {
        self.game_path.join(&self.persistent_dir)
    }

    pub fn streaming_path(&self) -> PathBuf {
        self.game_path.join(&self.streaming_assets_dir)
    }

    pub fn category_order(&self) -> CategoryOrder {
        CategoryOrder::new(self.category_order.clone())
    }

    /// Prefix of resource manifest entries relative to the game root.
    pub fn data_prefix(&self) -> String {
        if self.executable_name.is_empty() {
            String::new()
        } else {
            format!("{}_Data", self.executable_name)
        }
    }

    pub fn worker_count(&self) -> usize {
        if self.thread_count > 0 {
            self.thread_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// Load `Config.toml` (optional) overlaid with `REPAIR_*` environment
/// variables, e.g. `REPAIR_GAME_PATH`, `REPAIR_MANIFEST__GATEWAY_URL`.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("REPAIR")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("audio_languages")
                .with_list_parse_key("purge_dirs")
                .try_parsing(true),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
