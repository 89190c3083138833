// src/config.rs
//! Runtime settings.
//!
//! Loaded from an optional `gatekey.toml` (any format the `config` crate
//! understands) and overlaid by `GATEKEY__`-prefixed environment variables,
//! e.g. `GATEKEY__LEDGER__INDEXER_URL`. A `.env` file is read first.

use crate::blockchain::indexer_client::LedgerEndpoints;
use crate::error::SettingsError;
use crate::models::credential::AppId;
use crate::services::actuation::{DEFAULT_AUDIT_CAPACITY, DEFAULT_LOCK_PIN};
use crate::services::record_reader::LedgerStrategy;
use crate::services::revocation::{ScanFailurePolicy, DEFAULT_SCAN_LIMIT};
use crate::services::verifier::EngineOptions;
use crate::utils::address::Address;
use crate::wallet::session::DEFAULT_CONFIRMATION_ROUNDS;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE: &str = "gatekey";
const ENV_PREFIX: &str = "GATEKEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ObjectStore,
    TransactionNote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySettings {
    pub kind: StrategyKind,
    #[serde(default)]
    pub application_id: Option<u64>,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            kind: StrategyKind::ObjectStore,
            application_id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub indexer_url: String,
    pub algod_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    pub confirmation_rounds: u64,
    pub poll_interval_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            indexer_url: "https://testnet-idx.algonode.cloud".into(),
            algod_url: "https://testnet-api.algonode.cloud".into(),
            api_token: None,
            request_timeout_secs: 10,
            confirmation_rounds: DEFAULT_CONFIRMATION_ROUNDS,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifierSettings {
    pub revocation_scan_limit: usize,
    pub scan_failure_policy: ScanFailurePolicy,
    pub clock_skew_tolerance_secs: u64,
    pub owner_address: Option<String>,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            revocation_scan_limit: DEFAULT_SCAN_LIMIT,
            scan_failure_policy: ScanFailurePolicy::FailClosed,
            clock_skew_tolerance_secs: 0,
            owner_address: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub lock_pin: u8,
    pub unlock_duration_secs: u64,
    pub audit_capacity: usize,
    pub publish_access_log: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            lock_pin: DEFAULT_LOCK_PIN,
            unlock_duration_secs: 10,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            publish_access_log: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".into(),
            request_timeout_secs: 30,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub app_id: String,
    #[serde(default)]
    pub strategy: StrategySettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub verifier: VerifierSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub owner_seed_path: Option<PathBuf>,
    /// Run against an in-process ledger instead of the network.
    #[serde(default)]
    pub sandbox: bool,
}

impl Settings {
    /// Loads `.env`, the optional config file and the environment.
    pub fn load() -> Result<Self, SettingsError> {
        dotenv::dotenv().ok();
        Self::from_config(
            Config::builder()
                .add_source(File::with_name(CONFIG_FILE).required(false))
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .prefix_separator("__")
                        .separator("__")
                        .try_parsing(true),
                )
                .build()?,
        )
    }

    /// Deserializes and validates an already assembled configuration.
    pub fn from_config(config: Config) -> Result<Self, SettingsError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.app_id.trim().is_empty() {
            return Err(SettingsError::Invalid {
                key: "app_id",
                reason: "must not be empty".into(),
            });
        }
        let strategy = self.ledger_strategy()?;
        if strategy == LedgerStrategy::TransactionNote && self.owner_address()?.is_none() {
            return Err(SettingsError::Invalid {
                key: "verifier.owner_address",
                reason: "required for the transaction_note strategy".into(),
            });
        }
        self.bind_address()?;
        Ok(())
    }

    pub fn app_id(&self) -> AppId {
        AppId::new(self.app_id.trim())
    }

    /// Resolves the record layout once for the whole process.
    pub fn ledger_strategy(&self) -> Result<LedgerStrategy, SettingsError> {
        match (self.strategy.kind, self.strategy.application_id) {
            (StrategyKind::TransactionNote, _) => Ok(LedgerStrategy::TransactionNote),
            (StrategyKind::ObjectStore, Some(application_id)) => {
                Ok(LedgerStrategy::ObjectStore { application_id })
            }
            (StrategyKind::ObjectStore, None) => Err(SettingsError::Invalid {
                key: "strategy.application_id",
                reason: "required for the object_store strategy".into(),
            }),
        }
    }

    pub fn owner_address(&self) -> Result<Option<Address>, SettingsError> {
        self.verifier
            .owner_address
            .as_deref()
            .map(|text| {
                text.parse().map_err(|e| SettingsError::Invalid {
                    key: "verifier.owner_address",
                    reason: format!("{}", e),
                })
            })
            .transpose()
    }

    pub fn bind_address(&self) -> Result<SocketAddr, SettingsError> {
        self.server.bind.parse().map_err(|e| SettingsError::Invalid {
            key: "server.bind",
            reason: format!("{}", e),
        })
    }

    pub fn ledger_endpoints(&self) -> LedgerEndpoints {
        LedgerEndpoints {
            indexer_url: self.ledger.indexer_url.clone(),
            algod_url: self.ledger.algod_url.clone(),
            api_token: self.ledger.api_token.clone(),
            request_timeout: Duration::from_secs(self.ledger.request_timeout_secs),
            poll_interval: Duration::from_millis(self.ledger.poll_interval_ms),
        }
    }

    pub fn engine_options(&self) -> Result<EngineOptions, SettingsError> {
        Ok(EngineOptions {
            scan_limit: self.verifier.revocation_scan_limit,
            scan_failure_policy: self.verifier.scan_failure_policy,
            clock_skew_tolerance: self.verifier.clock_skew_tolerance_secs,
            owner: self.owner_address()?,
        })
    }

    pub fn unlock_duration(&self) -> Duration {
        Duration::from_secs(self.device.unlock_duration_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}
