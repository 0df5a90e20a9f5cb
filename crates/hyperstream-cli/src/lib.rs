//! HyperStream CLI library.
//!
//! High-level `send`/`receive` commands wrapping the `hyperstream-sender`
//! and `hyperstream-receiver` orchestrators, plus a small persisted
//! configuration file for the default receive directory.
//!
//! Configuration storage location:
//! - Linux: $XDG_CONFIG_HOME/hyperstream/config.toml or
//!   $HOME/.config/hyperstream/config.toml
//! - macOS: $HOME/Library/Application Support/hyperstream/config.toml
//! - Windows: %APPDATA%\hyperstream\config.toml

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use hyperstream_core::key::TopicKey;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

/// Persisted CLI preferences. The core pipeline itself persists nothing
/// (spec: "Persisted state: None" for the pipeline); this is purely a CLI
/// convenience.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    default_receive_dir: Option<String>,
}

impl CliConfig {
    fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = env::var("APPDATA") {
                return Ok(PathBuf::from(appdata).join("hyperstream"));
            }
            if let Ok(userprofile) = env::var("USERPROFILE") {
                return Ok(PathBuf::from(userprofile).join(".config").join("hyperstream"));
            }
            return Err(anyhow!(
                "unable to determine config directory (missing APPDATA/USERPROFILE)"
            ));
        }

        #[cfg(target_os = "macos")]
        {
            if let Ok(home) = env::var("HOME") {
                return Ok(PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("hyperstream"));
            }
            return Err(anyhow!("unable to determine config directory (missing HOME)"));
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
                PathBuf::from(xdg_config_home)
            } else if let Ok(home) = env::var("HOME") {
                PathBuf::from(home).join(".config")
            } else {
                return Err(anyhow!(
                    "unable to determine config directory (missing XDG_CONFIG_HOME/HOME)"
                ));
            };
            Ok(config_dir.join("hyperstream"))
        }
    }

    fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;
        if !config_file.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&config_file)
            .with_context(|| format!("failed to read config file: {}", config_file.display()))?;
        toml::from_str(&content).with_context(|| "failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        let config_file = Self::config_file()?;
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("failed to create config directory: {}", config_dir.display()))?;
        }
        let content = toml::to_string_pretty(self).with_context(|| "failed to serialize config")?;
        fs::write(&config_file, content)
            .with_context(|| format!("failed to write config file: {}", config_file.display()))
    }

    pub fn default_receive_dir(&self) -> Option<PathBuf> {
        self.default_receive_dir.as_ref().map(PathBuf::from)
    }

    pub fn set_default_receive_dir(&mut self, dir: &Path) -> Result<()> {
        self.default_receive_dir = Some(dir.to_string_lossy().into_owned());
        self.save()
    }
}

struct IndicatifSendSubscriber {
    bar: ProgressBar,
}

impl hyperstream_sender::ProgressSubscriber for IndicatifSendSubscriber {
    fn on_progress(&self, bytes_transferred: u64, total_size: u64) {
        if total_size > 0 {
            self.bar.set_length(total_size);
        }
        self.bar.set_position(bytes_transferred);
    }

    fn on_complete(&self) {
        self.bar.finish_with_message("transfer complete");
    }
}

struct IndicatifReceiveSubscriber {
    bar: ProgressBar,
}

impl hyperstream_receiver::ProgressSubscriber for IndicatifReceiveSubscriber {
    fn on_progress(&self, bytes_transferred: u64, total_size: u64) {
        if total_size > 0 {
            self.bar.set_length(total_size);
        }
        self.bar.set_position(bytes_transferred);
    }

    fn on_complete(&self) {
        self.bar.finish_with_message("transfer complete");
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    bar
}

/// Spawns a task that watches for Ctrl+C and sets `cancel` once it fires,
/// mirroring the teacher's ctrl-c-to-`is_cancelled` wiring at the CLI layer.
fn watch_ctrl_c(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::SeqCst);
        }
    });
}

/// Runs `send <path>`. Prints the share key to stdout on success.
pub async fn run_send(path: &Path) -> Result<TopicKey> {
    let subscriber = Arc::new(IndicatifSendSubscriber {
        bar: progress_bar(),
    });
    let cancel = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(cancel.clone());
    let topic = hyperstream_sender::send(path, None, Some(subscriber), cancel)
        .await
        .with_context(|| format!("failed to send {}", path.display()))?;
    println!("share key: {}", topic.display());
    Ok(topic)
}

/// Runs `receive <key> [--output <dir>]`. Persists `output` as the new
/// default receive directory when it differs from the configured one.
pub async fn run_receive(key: &str, output: Option<PathBuf>) -> Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    let destination = output
        .or_else(|| config.default_receive_dir())
        .unwrap_or_else(|| PathBuf::from("."));

    if config.default_receive_dir().as_deref() != Some(destination.as_path()) {
        let _ = config.set_default_receive_dir(&destination);
    }

    let topic = TopicKey::parse(key).with_context(|| "invalid share key")?;
    let subscriber = Arc::new(IndicatifReceiveSubscriber {
        bar: progress_bar(),
    });
    let cancel = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(cancel.clone());
    let metadata = hyperstream_receiver::receive(topic, &destination, Some(subscriber), cancel)
        .await
        .with_context(|| "receive failed")?;
    println!(
        "received {} file(s), {} bytes",
        metadata.file_count, metadata.total_size
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrips_default_receive_dir() {
        let mut config = CliConfig::default();
        assert!(config.default_receive_dir().is_none());
        config.default_receive_dir = Some("/tmp/downloads".to_string());
        assert_eq!(config.default_receive_dir(), Some(PathBuf::from("/tmp/downloads")));
    }
}
