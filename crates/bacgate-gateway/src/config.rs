//! Gateway configuration.
//!
//! One JSON document configures the device identity, the BACnet/IP
//! network, the snapshot store, the event log, COV limits, and the
//! event-log subscriptions. Missing optional fields take documented
//! defaults.

use bacgate_core::DeviceInfo;
use bacgate_engine::{StartFrom, SubscriptionSettings};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no enabled subscriptions configured")]
    NoSubscriptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub device: DeviceSection,
    #[serde(default)]
    pub network: NetworkSection,
    pub store: StoreSection,
    pub event_log: EventLogSection,
    #[serde(default)]
    pub cov: CovSection,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSection {
    pub instance: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub vendor_id: u16,
    #[serde(default)]
    pub vendor_name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub application_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default)]
    pub interface: Option<IpAddr>,
    #[serde(default)]
    pub broadcast_address: Option<IpAddr>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            udp_port: default_udp_port(),
            interface: None,
            broadcast_address: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub database: Option<i64>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventLogSection {
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CovSection {
    #[serde(default = "default_cov_lifetime")]
    pub default_lifetime: u32,
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,
}

impl Default for CovSection {
    fn default() -> Self {
        Self {
            default_lifetime: default_cov_lifetime(),
            max_subscriptions: default_max_subscriptions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSection {
    pub subscription_id: String,
    pub stream_name: String,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub start_from: StartFromConfig,
    #[serde(default)]
    pub start_position: u64,
    #[serde(default)]
    pub instance_offset: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartFromConfig {
    #[default]
    Begin,
    End,
    Position,
}

impl SubscriptionSection {
    pub fn to_settings(&self) -> SubscriptionSettings {
        SubscriptionSettings {
            subscription_id: self.subscription_id.clone(),
            stream_name: self.stream_name.clone(),
            group_name: self.group_name.clone(),
            start_from: match self.start_from {
                StartFromConfig::Begin => StartFrom::Begin,
                StartFromConfig::End => StartFrom::End,
                StartFromConfig::Position => StartFrom::Position(self.start_position),
            },
            instance_offset: self.instance_offset,
        }
    }
}

impl GatewayConfig {
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            instance: self.device.instance,
            name: self.device.name.clone(),
            description: self.device.description.clone(),
            location: self.device.location.clone(),
            vendor_id: self.device.vendor_id,
            vendor_name: self.device.vendor_name.clone(),
            model_name: self.device.model.clone(),
            application_version: self.device.application_version.clone(),
        }
    }

    /// The enabled subscriptions, ready for the engine.
    pub fn enabled_subscriptions(&self) -> Vec<SubscriptionSettings> {
        self.subscriptions
            .iter()
            .filter(|section| section.enabled)
            .map(SubscriptionSection::to_settings)
            .collect()
    }
}

/// Loads and validates the configuration file.
pub fn load(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let config: GatewayConfig = serde_json::from_str(&raw)?;
    if config.enabled_subscriptions().is_empty() {
        return Err(ConfigError::NoSubscriptions);
    }
    Ok(config)
}

fn default_udp_port() -> u16 {
    47_808
}

fn default_key_prefix() -> String {
    "bacgate:".to_owned()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_command_timeout_ms() -> u64 {
    1_000
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_cov_lifetime() -> u32 {
    300
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_enabled() -> bool {
    true
}
