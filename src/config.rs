//! Ambient configuration layer (SPEC_FULL.md §2). Resolved in increasing
//! priority: built-in defaults, then `<state-dir>/config.toml` if present,
//! then CLI flags (applied by the caller after `Config::load`).

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
    pub lock_timeout_ms: u64,
    pub egress_interface: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = PathBuf::from("/etc/vpcctl");
        Config {
            log_file: state_dir.join("vpcctl.log"),
            lock_file: state_dir.join(".lock"),
            state_dir,
            lock_timeout_ms: 5_000,
            egress_interface: None,
        }
    }
}

/// Mirrors `Config`, but every field is optional so `config.toml` may set
/// only the values an operator cares to override.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileConfig {
    log_file: Option<PathBuf>,
    lock_file: Option<PathBuf>,
    lock_timeout_ms: Option<u64>,
    egress_interface: Option<String>,
}

impl Config {
    /// Loads defaults, rooted at `state_dir` (or the built-in default if
    /// `None`), then overlays `<state_dir>/config.toml` when it exists.
    pub fn load(state_dir: Option<PathBuf>) -> anyhow::Result<Config> {
        let mut cfg = Config::default();
        if let Some(dir) = state_dir {
            cfg.log_file = dir.join("vpcctl.log");
            cfg.lock_file = dir.join(".lock");
            cfg.state_dir = dir;
        }

        let config_path = cfg.state_dir.join("config.toml");
        if config_path.exists() {
            cfg.overlay_file(&config_path)?;
        }
        Ok(cfg)
    }

    fn overlay_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file: FileConfig =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

        if let Some(v) = file.log_file {
            self.log_file = v;
        }
        if let Some(v) = file.lock_file {
            self.lock_file = v;
        }
        if let Some(v) = file.lock_timeout_ms {
            self.lock_timeout_ms = v;
        }
        if let Some(v) = file.egress_interface {
            self.egress_interface = Some(v);
        }
        Ok(())
    }
}
