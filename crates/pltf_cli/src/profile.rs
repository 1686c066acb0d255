//! User profile defaults (`~/.pltf/profile.yaml`).

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Environment variable overriding the profile location.
pub const PROFILE_ENV: &str = "PLTF_PROFILE";

/// Optional per-user defaults. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub modules_root: Option<String>,
    #[serde(default)]
    pub default_env: Option<String>,
    #[serde(default)]
    pub default_out: Option<String>,
}

impl Profile {
    /// Read a profile. A missing file is `Ok(None)`.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read profile {:?}", path)),
        };
        let profile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse profile {:?}", path))?;
        Ok(Some(profile))
    }

    pub fn modules_root(&self) -> Option<&str> {
        non_blank(self.modules_root.as_deref())
    }

    pub fn default_env(&self) -> Option<&str> {
        non_blank(self.default_env.as_deref())
    }

    pub fn default_out(&self) -> Option<&str> {
        non_blank(self.default_out.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `$PLTF_PROFILE`, else `~/.pltf/profile.yaml`.
pub fn profile_path() -> Option<PathBuf> {
    match std::env::var(PROFILE_ENV) {
        Ok(path) if !path.trim().is_empty() => Some(PathBuf::from(path.trim())),
        _ => dirs::home_dir().map(|home| home.join(".pltf").join("profile.yaml")),
    }
}

/// The user profile, loaded once per process. Unreadable profiles are
/// reported and ignored.
pub fn profile() -> Option<&'static Profile> {
    static PROFILE: OnceLock<Option<Profile>> = OnceLock::new();
    PROFILE
        .get_or_init(|| {
            let path = profile_path()?;
            match Profile::load_from(&path) {
                Ok(profile) => {
                    if profile.is_some() {
                        debug!("Loaded profile from {:?}", path);
                    }
                    profile
                }
                Err(e) => {
                    warn!("Unable to load profile: {:#}", e);
                    None
                }
            }
        })
        .as_ref()
}
