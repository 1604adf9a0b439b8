//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use shoal_core::{EngineConfig, ResumeConfig, VerificationMode};

/// Host configuration. File: ~/.config/shoal/config.toml or /etc/shoal/config.toml.
/// Env overrides: SHOAL_RESUME_DIR, SHOAL_BLOCK_SIZE, SHOAL_INLINE_VERIFY,
/// SHOAL_SPOT_CHECK_SAMPLES.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding `<info hash>.resume` files.
    #[serde(default = "default_resume_dir")]
    pub resume_dir: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub resume: ResumeConfig,
}

fn default_resume_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/share/shoal/resume"),
        None => PathBuf::from("/var/lib/shoal/resume"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resume_dir: default_resume_dir(),
            engine: EngineConfig::default(),
            resume: ResumeConfig::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
/// A config file that exists but does not parse is logged and ignored.
pub fn load() -> Config {
    let mut c = match load_file() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            tracing::warn!(error = format!("{e:#}"), "ignoring config file");
            Config::default()
        }
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

/// Parse one config file.
pub fn load_from_path(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/shoal/config.toml"));
    }
    out.push(PathBuf::from("/etc/shoal/config.toml"));
    out
}

/// First existing config file wins; later paths are not consulted.
fn load_file() -> anyhow::Result<Option<Config>> {
    match config_paths().into_iter().find(|p| p.exists()) {
        Some(p) => load_from_path(&p).map(Some),
        None => Ok(None),
    }
}

/// Apply `SHOAL_*` overrides. Values that do not parse are ignored.
fn apply_env<F>(c: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(s) = var("SHOAL_RESUME_DIR") {
        if !s.is_empty() {
            c.resume_dir = PathBuf::from(s);
        }
    }
    if let Some(s) = var("SHOAL_BLOCK_SIZE") {
        if let Ok(n) = s.parse::<u32>() {
            c.engine.block_size = n;
        }
    }
    if let Some(s) = var("SHOAL_INLINE_VERIFY") {
        match s.as_str() {
            "1" | "true" | "yes" => c.engine.verification = VerificationMode::Inline,
            "0" | "false" | "no" => c.engine.verification = VerificationMode::Background,
            _ => {}
        }
    }
    if let Some(s) = var("SHOAL_SPOT_CHECK_SAMPLES") {
        if let Ok(n) = s.parse::<usize>() {
            c.resume.spot_check_samples = n;
        }
    }
}
