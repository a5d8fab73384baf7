//! On-disk configuration (`~/.config/rmfs/config.toml`).

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::render::RenderConfig;
use crate::vfs::mode::FsMode;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub mount: MountConfig,
    pub render: RenderConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MountConfig {
    /// Used when no mountpoint is given on the command line.
    pub mountpoint: Option<PathBuf>,
    /// Mode the filesystem starts in.
    pub mode: FsMode,
    /// Address dialed at startup to check that the network is up.
    pub probe_addr: String,
    pub probe_timeout_ms: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mountpoint: None,
            mode: FsMode::default(),
            probe_addr: "1.1.1.1:80".to_string(),
            probe_timeout_ms: 1000,
        }
    }
}

impl Config {
    const APP_NAME: &'static str = "rmfs";
    const CONFIG_NAME: &'static str = "config";

    pub fn default_path() -> anyhow::Result<PathBuf> {
        confy::get_configuration_file_path(Self::APP_NAME, Self::CONFIG_NAME).with_context(|| {
            format!(
                "failed to resolve config path for `{}.{}`",
                Self::APP_NAME,
                Self::CONFIG_NAME,
            )
        })
    }

    /// Load `path`, or the defaults when it does not exist. The file is
    /// never created here.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        confy::load_path(path)
            .with_context(|| format!("failed to load config file `{}`", path.display()))
    }

    pub fn store(&self, path: &Path) -> anyhow::Result<()> {
        confy::store_path(path, self)
            .with_context(|| format!("failed to store config file `{}`", path.display()))
    }

    /// Write the defaults to `path`. Returns `false`, leaving the file alone,
    /// when it already exists.
    pub fn write_default(path: &Path) -> anyhow::Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().store(path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.mount.mode, FsMode::Annot);
        assert_eq!(cfg.mount.probe_addr, "1.1.1.1:80");
        assert!(!path.exists());
    }

    #[test]
    fn write_default_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(Config::write_default(&path).unwrap());
        assert!(path.exists());
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        std::fs::write(&path, "[mount]\nmode = \"raw\"\n").unwrap();
        assert!(!Config::write_default(&path).unwrap());
        assert_eq!(Config::load(&path).unwrap().mount.mode, FsMode::Raw);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[mount]\nmountpoint = \"/mnt/tablet\"\n\n[render]\nonly_annotated = true\npages = [0, 2]\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.mount.mountpoint, Some(PathBuf::from("/mnt/tablet")));
        assert_eq!(cfg.mount.probe_timeout_ms, 1000);
        assert!(cfg.render.only_annotated);
        assert!(cfg.render.expand_pages);
        assert_eq!(cfg.render.pages, vec![0, 2]);
    }

    #[test]
    fn bad_mode_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[mount]\nmode = \"sideways\"\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
