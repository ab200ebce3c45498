//! # Configuration
//!
//! Loads the settings every Crosstown component needs: the BLS and relay
//! listen ports, the storage directory, pricing, the SPSP probe kind, and
//! the owner pubkey that bypasses payment. Configuration is layered: a TOML
//! file supplies defaults (`config.toml` unless `--config` names another
//! path, and it's fine for the file to be absent entirely), and a fixed set
//! of environment variables override individual fields on top of it — the
//! same "file defaults, explicit env override" shape this codebase already
//! uses for its MQTT broker credentials.
//!
//! | Environment variable        | Overrides               |
//! |------------------------------|--------------------------|
//! | `BLS_PORT`                   | `bls_port`               |
//! | `WS_PORT`                    | `ws_port`                |
//! | `DATA_DIR`                   | `data_dir`               |
//! | `BLS_BASE_PRICE_PER_BYTE`    | `bls_base_price_per_byte`|
//! | `BLS_KIND_OVERRIDES`         | `bls_kind_overrides`     |
//! | `SPSP_MIN_PRICE`             | `spsp_min_price`         |
//! | `OWNER_PUBKEY`               | `owner_pubkey`           |
//!
//! `BLS_KIND_OVERRIDES` is a JSON object mapping kind (as a string) to
//! price-per-byte (as a string), e.g. `{"0":"50","3":"50"}`.

use anyhow::{Context, Result};
use config::{Config as ConfigLib, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level configuration for the Crosstown process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Port the Business Logic Server's `POST /handle-packet` HTTP
    /// endpoint binds to.
    pub bls_port: u16,

    /// Port the relay's `GET /ws` WebSocket endpoint binds to.
    pub ws_port: u16,

    /// Directory backing the SQLite event store. If absent or unwritable
    /// at startup, the process falls back to an in-memory store and logs a
    /// warning.
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Price per byte for kinds with no entry in `bls_kind_overrides`.
    #[serde(default = "default_base_price_per_byte")]
    pub bls_base_price_per_byte: u64,

    /// Per-kind price-per-byte overrides.
    #[serde(default)]
    pub bls_kind_overrides: HashMap<u32, u64>,

    /// The kind treated as an SPSP probe.
    #[serde(default = "default_spsp_kind")]
    pub spsp_kind: u32,

    /// Price cap for an SPSP-probe event: when set and the length-derived
    /// price would exceed this value, it is clamped down to it. Unset
    /// means SPSP-kind events are priced normally.
    #[serde(default)]
    pub spsp_min_price: Option<u64>,

    /// The pubkey whose writes bypass pricing entirely.
    #[serde(default)]
    pub owner_pubkey: Option<String>,
}

fn default_base_price_per_byte() -> u64 {
    10
}

fn default_spsp_kind() -> u32 {
    23194
}

impl Default for Config {
    /// Sensible defaults for development: both services on loopback-style
    /// ports, in-memory storage, a flat price of 10 units/byte, and no
    /// owner.
    fn default() -> Self {
        Self {
            bls_port: 3100,
            ws_port: 3101,
            data_dir: None,
            bls_base_price_per_byte: default_base_price_per_byte(),
            bls_kind_overrides: HashMap::new(),
            spsp_kind: default_spsp_kind(),
            spsp_min_price: None,
            owner_pubkey: None,
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists) layered under
    /// environment variable overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ConfigLib::builder()
            .add_source(File::from(path).required(false))
            .build()
            .context("failed to build configuration sources")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("failed to parse configuration file")?;

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("BLS_PORT") {
            self.bls_port = value.parse().context("BLS_PORT must be a valid port number")?;
        }
        if let Ok(value) = std::env::var("WS_PORT") {
            self.ws_port = value.parse().context("WS_PORT must be a valid port number")?;
        }
        if let Ok(value) = std::env::var("DATA_DIR") {
            self.data_dir = Some(value);
        }
        if let Ok(value) = std::env::var("BLS_BASE_PRICE_PER_BYTE") {
            self.bls_base_price_per_byte = value
                .parse()
                .context("BLS_BASE_PRICE_PER_BYTE must be a non-negative integer")?;
        }
        if let Ok(value) = std::env::var("BLS_KIND_OVERRIDES") {
            self.bls_kind_overrides = parse_kind_overrides(&value)?;
        }
        if let Ok(value) = std::env::var("SPSP_MIN_PRICE") {
            self.spsp_min_price = Some(
                value
                    .parse()
                    .context("SPSP_MIN_PRICE must be a non-negative integer")?,
            );
        }
        if let Ok(value) = std::env::var("OWNER_PUBKEY") {
            self.owner_pubkey = Some(value);
        }
        Ok(())
    }
}

/// Parse `BLS_KIND_OVERRIDES` per spec.md §6: a JSON object mapping a kind
/// (as a string key) to a price-per-byte (as a string value).
fn parse_kind_overrides(raw: &str) -> Result<HashMap<u32, u64>> {
    let parsed: HashMap<String, String> = serde_json::from_str(raw)
        .context("BLS_KIND_OVERRIDES must be a JSON object of {kind-string: price-string}")?;

    let mut overrides = HashMap::new();
    for (kind, price) in parsed {
        let kind: u32 = kind
            .parse()
            .with_context(|| format!("BLS_KIND_OVERRIDES key '{kind}' is not a valid kind"))?;
        let price: u64 = price
            .parse()
            .with_context(|| format!("BLS_KIND_OVERRIDES value '{price}' is not a valid price"))?;
        overrides.insert(kind, price);
    }
    Ok(overrides)
}
