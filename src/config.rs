//! Runtime configuration: the template root directory and the defaults new
//! templates are loaded with, per §5/§6.2.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::node::StripMode;

/// Settings loaded once at startup (typically from a JSON file) and then
/// installed process-wide via [`set_template_root_directory`] and friends.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Directory include/load filenames are resolved against.
    pub template_root: PathBuf,
    /// Strip mode used when a caller doesn't specify one explicitly.
    #[serde(default)]
    pub default_strip: StripMode,
    /// Whether newly-created dictionaries should annotate output by default.
    #[serde(default)]
    pub annotate_output: bool,
    /// Prefix stripped from filenames in annotation output (§6.5).
    #[serde(default)]
    pub template_path_start: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            template_root: PathBuf::from("."),
            default_strip: StripMode::DoNotStrip,
            annotate_output: false,
            template_path_start: String::new(),
        }
    }
}

impl Config {
    /// Reads and parses a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&text).map_err(|source| Error::InvalidConfig { path: path.to_path_buf(), source })
    }
}

/// The process-wide template root directory, guarded by its own lock per
/// §5 ("process-wide mutex around the process-global dictionary and
/// template-root-directory").
static ROOT_DIR: LazyLock<RwLock<PathBuf>> = LazyLock::new(|| RwLock::new(PathBuf::from(".")));

/// Installs `path` as the template root directory. Visible to every
/// subsequent cache `get` call (§5's ordering guarantee), not to ones
/// already in flight.
pub fn set_template_root_directory(path: impl Into<PathBuf>) {
    *ROOT_DIR.write() = path.into();
}

/// Returns the current template root directory.
pub fn template_root_directory() -> PathBuf {
    ROOT_DIR.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_current_directory_do_not_strip() {
        let config = Config::default();
        assert_eq!(config.template_root, Path::new("."));
        assert_eq!(config.default_strip, StripMode::DoNotStrip);
    }

    #[test]
    fn parses_minimal_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"template_root": "templates"}"#).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.template_root, Path::new("templates"));
        assert_eq!(config.default_strip, StripMode::DoNotStrip);
    }
}
