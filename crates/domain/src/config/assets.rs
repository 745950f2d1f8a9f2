use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assets (backgrounds + avatar configs)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Directory scanned for background image files.
    #[serde(default = "d_backgrounds")]
    pub backgrounds_dir: String,
    /// Directory scanned for avatar configuration YAML files.
    #[serde(default = "d_avatars")]
    pub avatar_configs_dir: String,
    /// Avatar config selected at startup (file name inside
    /// `avatar_configs_dir`). Empty = first file found.
    #[serde(default)]
    pub default_avatar_config: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            backgrounds_dir: d_backgrounds(),
            avatar_configs_dir: d_avatars(),
            default_avatar_config: String::new(),
        }
    }
}

fn d_backgrounds() -> String {
    "./assets/backgrounds".into()
}
fn d_avatars() -> String {
    "./assets/avatars".into()
}
