use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Server configuration, loaded from a TOML file at startup.
///
/// ```toml
/// bind = "0.0.0.0:8192"
/// title = "Media"
///
/// [roots]
/// music = "/srv/music"
/// books = "/srv/books"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to listen on.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Page title for the top-level index.
    #[serde(default = "default_title")]
    pub title: String,
    /// Registry of exposed directories: URL segment -> absolute path.
    /// Immutable after startup.
    #[serde(default)]
    pub roots: BTreeMap<String, PathBuf>,
}

fn default_bind() -> SocketAddr {
    "0.0.0.0:8192".parse().unwrap()
}

fn default_title() -> String {
    "Media".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            title: default_title(),
            roots: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Check that every registered root is usable before binding the socket.
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            bail!("no roots configured; add a [roots] section or pass --root NAME=PATH");
        }
        for (name, dir) in &self.roots {
            if name.is_empty() || name.contains('/') || name.starts_with('.') {
                bail!("invalid root name {name:?}: names are single URL segments");
            }
            if !dir.is_absolute() {
                bail!("root {name:?} must be an absolute path, got {}", dir.display());
            }
            if !dir.is_dir() {
                bail!("root {name:?} is not a directory: {}", dir.display());
            }
        }
        Ok(())
    }

    /// Look up a root directory by its registered name.
    pub fn root(&self, name: &str) -> Option<&Path> {
        self.roots.get(name).map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            bind = "127.0.0.1:9000"
            title = "Library"

            [roots]
            music = "/srv/music"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.title, "Library");
        assert_eq!(config.root("music"), Some(Path::new("/srv/music")));
        assert_eq!(config.root("video"), None);
    }

    #[test]
    fn defaults_apply() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.bind, default_bind());
        assert_eq!(config.title, "Media");
        assert!(config.roots.is_empty());
    }

    #[test]
    fn validate_rejects_bad_root_names() {
        let mut config = Config::default();
        config
            .roots
            .insert("a/b".to_string(), std::env::temp_dir());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config
            .roots
            .insert(".hidden".to_string(), std::env::temp_dir());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_and_missing_dirs() {
        let mut config = Config::default();
        config
            .roots
            .insert("music".to_string(), PathBuf::from("relative/path"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.roots.insert(
            "music".to_string(),
            PathBuf::from("/definitely/not/a/real/dir"),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_registry() {
        assert!(Config::default().validate().is_err());
    }
}
