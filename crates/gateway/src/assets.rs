//! Catalog of background images and avatar configuration files, plus the
//! currently selected avatar profile announced to clients after
//! authorization.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use dm_domain::config::AssetsConfig;
use dm_domain::error::{Error, Result};
use dm_protocol::AvatarConfigInfo;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "gif"];

/// The parts of an avatar YAML the client cares about.
#[derive(Debug, Clone)]
pub struct AvatarProfile {
    pub file: String,
    pub conf_name: String,
    pub conf_uid: String,
    pub model: serde_json::Value,
}

pub struct AssetCatalog {
    backgrounds_dir: PathBuf,
    avatar_configs_dir: PathBuf,
    current: RwLock<Option<AvatarProfile>>,
}

impl AssetCatalog {
    pub fn new(config: &AssetsConfig) -> Self {
        let catalog = Self {
            backgrounds_dir: PathBuf::from(&config.backgrounds_dir),
            avatar_configs_dir: PathBuf::from(&config.avatar_configs_dir),
            current: RwLock::new(None),
        };

        // Select the configured default, or the first config found.
        let initial = if config.default_avatar_config.is_empty() {
            catalog.list_avatar_configs().first().map(|c| c.file.clone())
        } else {
            Some(config.default_avatar_config.clone())
        };
        if let Some(file) = initial {
            if let Err(e) = catalog.switch(&file) {
                tracing::warn!(file = %file, error = %e, "default avatar config not loadable");
            }
        }

        catalog
    }

    /// File names of available background images, sorted.
    pub fn list_backgrounds(&self) -> Vec<String> {
        let mut files = list_files(&self.backgrounds_dir, |ext| {
            IMAGE_EXTENSIONS.contains(&ext)
        });
        files.sort();
        files
    }

    /// Available avatar configs with their display names, sorted by file.
    pub fn list_avatar_configs(&self) -> Vec<AvatarConfigInfo> {
        let mut files = list_files(&self.avatar_configs_dir, |ext| {
            ext == "yaml" || ext == "yml"
        });
        files.sort();

        files
            .into_iter()
            .map(|file| {
                let name = load_profile(&self.avatar_configs_dir, &file)
                    .map(|p| p.conf_name)
                    .unwrap_or_else(|_| stem(&file));
                AvatarConfigInfo { file, name }
            })
            .collect()
    }

    /// The active avatar profile, if one is selected.
    pub fn current(&self) -> Option<AvatarProfile> {
        self.current.read().clone()
    }

    /// Select a different avatar config by file name.
    pub fn switch(&self, file: &str) -> Result<()> {
        // File names only; reject anything that could escape the dir.
        if file.contains('/') || file.contains('\\') || file.contains("..") {
            return Err(Error::Protocol(format!("invalid avatar config name: {file}")));
        }
        let profile = load_profile(&self.avatar_configs_dir, file)?;
        tracing::info!(file = %file, name = %profile.conf_name, "avatar config selected");
        *self.current.write() = Some(profile);
        Ok(())
    }
}

fn stem(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_owned())
}

fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            if !entry.file_type().ok()?.is_file() {
                return None;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let ext = Path::new(&name)
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())?;
            keep(&ext).then_some(name)
        })
        .collect()
}

fn load_profile(dir: &Path, file: &str) -> Result<AvatarProfile> {
    let path = dir.join(file);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("avatar config {file}: {e}")))?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&raw)?;

    let conf_name = doc
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| stem(file));
    let conf_uid = doc
        .get("uid")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| stem(file));
    let model = doc
        .get("model")
        .cloned()
        .map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null))
        .unwrap_or(serde_json::Value::Null);

    Ok(AvatarProfile {
        file: file.to_owned(),
        conf_name,
        conf_uid,
        model,
    })
}
