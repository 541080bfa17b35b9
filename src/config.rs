use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub mapping: MappingConfig,

    /// Local paths for digiKam album roots that cannot be resolved automatically.
    #[serde(default)]
    pub roots: Vec<RootOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to digiKam's `digikam4.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Where backups go. Defaults to the database's own directory.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// How long to wait for a competing writer before giving up.
    #[serde(default)]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Metadata file names, in order of preference within one folder.
    #[serde(default = "default_ini_file_names")]
    pub ini_file_names: Vec<String>,

    /// Directory names that are never migrated.
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,

    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,

    /// Optional Picasa `contacts.xml`.
    #[serde(default)]
    pub contacts: Option<PathBuf>,
}

fn default_ini_file_names() -> Vec<String> {
    vec![".picasa.ini".to_string(), "Picasa.ini".to_string()]
}

fn default_skip_dirs() -> Vec<String> {
    vec![".picasaoriginals".to_string()]
}

fn default_media_extensions() -> Vec<String> {
    [
        "jpg", "jpeg", "raw", "psd", "webp", "mkv", "mp4", "mov", "avi", "wmv", "flv", "webm",
        "mpeg", "mpg", "m4v", "3gp", "3g2", "ogv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            ini_file_names: default_ini_file_names(),
            skip_dirs: default_skip_dirs(),
            media_extensions: default_media_extensions(),
            contacts: None,
        }
    }
}

/// What to do when digiKam already has an identical face rectangle on an image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SameRectPolicy {
    #[default]
    Skip,
    Add,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Root tag that album tags are created under.
    #[serde(default = "default_album_root_tag")]
    pub album_root_tag: String,

    /// Names digiKam uses for the people root tag, tried in order.
    #[serde(default = "default_person_root_names")]
    pub person_root_names: Vec<String>,

    /// Extensions for which digiKam stores no pixel size.
    #[serde(default = "default_skip_faces_on_extensions")]
    pub skip_faces_on_extensions: Vec<String>,

    #[serde(default)]
    pub same_rect: SameRectPolicy,
}

fn default_album_root_tag() -> String {
    "Picasa".to_string()
}

fn default_person_root_names() -> Vec<String> {
    vec!["Persons".to_string(), "Personen".to_string()]
}

fn default_skip_faces_on_extensions() -> Vec<String> {
    vec!["psd".to_string()]
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            album_root_tag: default_album_root_tag(),
            person_root_names: default_person_root_names(),
            skip_faces_on_extensions: default_skip_faces_on_extensions(),
            same_rect: SameRectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootOverride {
    pub album_root_id: i64,
    pub path: PathBuf,
}

impl Config {
    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("picasa-import")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}
