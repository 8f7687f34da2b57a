//! Daemon configuration
//!
//! Three layers, later wins: built-in defaults, the TOML file given with
//! `--config`, command-line flags (or their `LATTICE_*` variables).

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lattice_core::CrdtKind;
use lattice_protocol::MAX_DATAGRAM_SIZE;
use lattice_transport::{ReplicaConfig, DEFAULT_RENDEZVOUS};
use serde::Deserialize;

/// One configuration layer; unset keys fall through to the layer below
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub kind: Option<CrdtKind>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub rendezvous: Option<String>,
    pub sync_interval_ms: Option<u64>,
    pub retransmit: Option<bool>,
    pub drop_rate: Option<f64>,
    pub drop_seed: Option<u64>,
    pub max_datagram: Option<usize>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Put `upper` on top of this layer
    pub fn overlay(self, upper: FileConfig) -> FileConfig {
        FileConfig {
            kind: upper.kind.or(self.kind),
            bind: upper.bind.or(self.bind),
            port: upper.port.or(self.port),
            rendezvous: upper.rendezvous.or(self.rendezvous),
            sync_interval_ms: upper.sync_interval_ms.or(self.sync_interval_ms),
            retransmit: upper.retransmit.or(self.retransmit),
            drop_rate: upper.drop_rate.or(self.drop_rate),
            drop_seed: upper.drop_seed.or(self.drop_seed),
            max_datagram: upper.max_datagram.or(self.max_datagram),
            log_level: upper.log_level.or(self.log_level),
        }
    }
}

/// Fully resolved daemon settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub kind: CrdtKind,
    pub bind: String,
    pub port: u16,
    pub rendezvous: String,
    pub sync_interval: Duration,
    pub retransmit: bool,
    pub drop_rate: f64,
    pub drop_seed: Option<u64>,
    pub max_datagram: usize,
    pub log_level: String,
}

impl Settings {
    /// Fill in defaults and validate
    pub fn resolve(layers: FileConfig) -> Result<Self> {
        let kind = layers.kind.unwrap_or_default();
        let sync_interval = match layers.sync_interval_ms {
            Some(0) => bail!("sync_interval_ms must be greater than zero"),
            Some(ms) => Duration::from_millis(ms),
            None => ReplicaConfig::default_interval(kind),
        };

        let drop_rate = layers.drop_rate.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&drop_rate) {
            bail!("drop_rate must be between 0.0 and 1.0, got {}", drop_rate);
        }

        let max_datagram = layers.max_datagram.unwrap_or(MAX_DATAGRAM_SIZE);
        if max_datagram == 0 || max_datagram > MAX_DATAGRAM_SIZE {
            bail!(
                "max_datagram must be between 1 and {}, got {}",
                MAX_DATAGRAM_SIZE,
                max_datagram
            );
        }

        let retransmit = layers.retransmit.unwrap_or(false);
        if retransmit && kind != CrdtKind::OpSet {
            tracing::warn!(kind = %kind, "retransmit only applies to op-set replicas");
        }

        Ok(Self {
            kind,
            bind: layers.bind.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: layers.port.unwrap_or(0),
            rendezvous: layers
                .rendezvous
                .unwrap_or_else(|| DEFAULT_RENDEZVOUS.to_string()),
            sync_interval,
            retransmit,
            drop_rate,
            drop_seed: layers.drop_seed,
            max_datagram,
            log_level: layers.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn replica_config(&self, rendezvous: std::net::SocketAddr) -> ReplicaConfig {
        ReplicaConfig::new(self.kind, rendezvous)
            .with_sync_interval(self.sync_interval)
            .with_retransmit(self.retransmit)
            .with_max_datagram(self.max_datagram)
    }
}
