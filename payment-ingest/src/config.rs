//! Configuration for payment ingestion

use serde::{Deserialize, Serialize};

/// Default stablecoin token contract (Binance-Peg USDC on BSC)
pub const DEFAULT_TOKEN_ADDRESS: &str = "0x8ac76a51cc950d9822d68b83fe1ad97b32cd580d";

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// On-chain claim verification
    pub chain: ChainConfig,

    /// Shared secret for webhook signature verification (HMAC-SHA256)
    pub webhook_secret: String,

    /// Flag accounts for manual review when a refund claws credits back
    pub freeze_on_refund: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            webhook_secret: String::new(),
            freeze_on_refund: true,
        }
    }
}

/// On-chain claim verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Treasury address purchases must be sent to
    pub treasury_address: String,

    /// Expected stablecoin token contract
    pub token_address: String,

    /// How many confirmations a purchase tx must have before it can be
    /// credited. 0 disables the check (not recommended).
    pub min_confirmations: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            treasury_address: String::new(),
            token_address: DEFAULT_TOKEN_ADDRESS.to_string(),
            min_confirmations: 2,
        }
    }
}

impl IngestConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = IngestConfig::default();

        if let Ok(addr) = std::env::var("TREASURY_ADDRESS") {
            config.chain.treasury_address = addr;
        }
        if let Ok(addr) = std::env::var("STABLECOIN_TOKEN_ADDRESS") {
            config.chain.token_address = addr;
        }
        if let Ok(min_conf) = std::env::var("MIN_CONFIRMATIONS") {
            config.chain.min_confirmations = min_conf
                .parse()
                .map_err(|_| crate::Error::Config("MIN_CONFIRMATIONS must be a number".into()))?;
        }
        if let Ok(secret) = std::env::var("WEBHOOK_SECRET") {
            config.webhook_secret = secret;
        }

        Ok(config)
    }
}
