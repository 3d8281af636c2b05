use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::PeriodId;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub layout: ArchiveLayout,
    #[serde(default = "default_watch")]
    pub watch: bool,
}

fn default_watch() -> bool {
    true
}

/// How a period's archive is stored under the archive root.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveLayout {
    /// `<root>/<id>.tar.gz`
    #[default]
    Tarball,
    /// `<root>/<id>/`, one file per entry.
    Directory,
}

const TARBALL_SUFFIX: &str = ".tar.gz";

impl ArchiveLayout {
    pub fn archive_path(&self, root: &Path, period: PeriodId) -> PathBuf {
        match self {
            ArchiveLayout::Tarball => root.join(format!("{}{}", period, TARBALL_SUFFIX)),
            ArchiveLayout::Directory => root.join(period.to_string()),
        }
    }

    /// Maps an archive file/directory name back to its period id.
    pub fn period_of(&self, name: &str) -> Option<PeriodId> {
        let stem = match self {
            ArchiveLayout::Tarball => name.strip_suffix(TARBALL_SUFFIX)?,
            ArchiveLayout::Directory => name,
        };
        stem.parse().ok()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_user_header")]
    pub user_header: String,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_user_header() -> String {
    "X-AuthUser".to_string()
}
fn default_max_request_bytes() -> usize {
    10240
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub admins: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }
    if config.server.max_request_bytes == 0 {
        anyhow::bail!("server.max_request_bytes must be > 0");
    }
    if axum::http::HeaderName::from_bytes(config.server.user_header.as_bytes()).is_err() {
        anyhow::bail!(
            "server.user_header is not a valid header name: '{}'",
            config.server.user_header
        );
    }

    for admin in &config.auth.admins {
        if admin.is_empty() || admin.contains('@') {
            anyhow::bail!(
                "auth.admins entries must be bare usernames without '@', got '{}'",
                admin
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let cfg = parse(
            r#"
[archive]
root = "/srv/reports"

[server]

[auth]
admins = ["root"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.archive.layout, ArchiveLayout::Tarball);
        assert!(cfg.archive.watch);
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.server.user_header, "X-AuthUser");
        assert_eq!(cfg.server.max_request_bytes, 10240);
    }

    #[test]
    fn test_directory_layout() {
        let cfg = parse(
            r#"
[archive]
root = "/srv/reports"
layout = "directory"
watch = false

[server]
bind = "127.0.0.1:9000"

[auth]
admins = []
"#,
        )
        .unwrap();
        assert_eq!(cfg.archive.layout, ArchiveLayout::Directory);
        assert!(!cfg.archive.watch);
    }

    #[test]
    fn test_missing_admin_list_is_an_error() {
        let result = parse(
            r#"
[archive]
root = "/srv/reports"

[server]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_qualified_admin_rejected() {
        let result = parse(
            r#"
[archive]
root = "/srv/reports"

[server]

[auth]
admins = ["root@example.org"]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let cfg = parse(include_str!("../config/reportd.example.toml")).unwrap();
        assert_eq!(cfg.auth.admins, vec!["root".to_string()]);
    }

    #[test]
    fn test_archive_naming() {
        let root = Path::new("/srv/reports");
        assert_eq!(
            ArchiveLayout::Tarball.archive_path(root, 43),
            PathBuf::from("/srv/reports/43.tar.gz")
        );
        assert_eq!(
            ArchiveLayout::Directory.archive_path(root, 43),
            PathBuf::from("/srv/reports/43")
        );
        assert_eq!(ArchiveLayout::Tarball.period_of("43.tar.gz"), Some(43));
        assert_eq!(ArchiveLayout::Tarball.period_of("43.tar.gz.tmp"), None);
        assert_eq!(ArchiveLayout::Tarball.period_of("latest.tar.gz"), None);
        assert_eq!(ArchiveLayout::Directory.period_of("43"), Some(43));
    }
}
