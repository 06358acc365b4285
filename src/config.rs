//! Configuration loading
//!
//! TOML file plus environment fallbacks. The pricing schedule is validated
//! at load so a misordered tier list fails fast instead of silently
//! changing the discount structure.

use crate::error::Result;
use crate::pricing::{PricingEngine, Tier};
use crate::types::UserId;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Admin allow-list: user ids permitted to run admin commands.
    #[serde(default)]
    pub admins: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. Falls back to the TELEGRAM_BOT_TOKEN environment
    /// variable when empty or absent.
    #[serde(default)]
    pub bot_token: String,
    /// Chat that receives "LOG: ..." forwards. Optional.
    #[serde(default)]
    pub log_chat_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub tiers: Vec<Tier>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                Tier { price: 20, tickets: 25 },
                Tier { price: 10, tickets: 11 },
                Tier { price: 1, tickets: 1 },
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("snapshots"),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {path}: {e}"))?;
        let mut config: Config = toml::from_str(&raw)?;

        if config.telegram.bot_token.is_empty() {
            config.telegram.bot_token = std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        }
        if config.telegram.bot_token.is_empty() {
            anyhow::bail!("no bot token in config or TELEGRAM_BOT_TOKEN");
        }

        // Fail fast on a bad tier schedule.
        config.pricing_engine()?;
        Ok(config)
    }

    pub fn pricing_engine(&self) -> Result<PricingEngine> {
        PricingEngine::new(self.pricing.tiers.clone())
    }

    pub fn admin_ids(&self) -> Vec<UserId> {
        self.admins.iter().copied().map(UserId).collect()
    }
}
