//! Bridge configuration document
//!
//! A JSON document (`version: 3`) holding the Art-Net bind address and one
//! entry per hub. Legacy v1/v2 documents are migrated on load; a migrated
//! document is written back after a best-effort sibling backup.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::mapping::ChannelMapping;

/// Current configuration document version.
pub const CONFIG_VERSION: u32 = 3;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Standard IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/Deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema-level validation failure
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Document version newer than this build understands
    #[error("unsupported configuration version {0}")]
    UnsupportedVersion(u64),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Art-Net ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtNetSettings {
    /// Interface address for the UDP 6454 socket
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

impl Default for ArtNetSettings {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
        }
    }
}

/// Configuration for one hub, created by pairing and edited by the operator.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    /// Stable identifier, unique within the document
    pub id: String,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Host address of the hub on the LAN
    pub host: String,
    /// Hue application key, sent as `hue-application-key` on the REST plane
    pub username: String,
    /// DTLS pre-shared key, hex-encoded
    pub client_key: String,
    /// Chosen entertainment configuration (36-char UUID), required to stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entertainment_configuration_id: Option<String>,
    /// Art-Net universe this hub listens to
    pub art_net_universe: u16,
    /// One mapping per lamp in the entertainment configuration
    #[serde(default)]
    pub channels: Vec<ChannelMapping>,
}

impl std::fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("username", &"***REDACTED***")
            .field("client_key", &"***REDACTED***")
            .field(
                "entertainment_configuration_id",
                &self.entertainment_configuration_id,
            )
            .field("art_net_universe", &self.art_net_universe)
            .field("channels", &self.channels)
            .finish()
    }
}

impl HubConfig {
    /// Display label for log lines: name when set, id otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Decode the hex PSK secret. Must be a non-empty even-length hex string.
    pub fn psk_secret(&self) -> Result<Vec<u8>> {
        if self.client_key.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "hub {}: clientKey is empty",
                self.id
            )));
        }
        let bytes = hex::decode(&self.client_key).map_err(|e| {
            ConfigError::Invalid(format!("hub {}: clientKey is not valid hex: {}", self.id, e))
        })?;
        Ok(bytes)
    }

    /// Schema-level invariants for this hub.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ConfigError::Invalid("hub with empty id".to_string()));
        }
        if self.art_net_universe >= 0x8000 {
            return Err(ConfigError::Invalid(format!(
                "hub {}: artNetUniverse {} exceeds the 15-bit range",
                self.id, self.art_net_universe
            )));
        }
        if let Some(id) = &self.entertainment_configuration_id {
            if !is_uuid_shaped(id) {
                return Err(ConfigError::Invalid(format!(
                    "hub {}: entertainmentConfigurationId {:?} is not a 36-character UUID",
                    self.id, id
                )));
            }
        }
        if !self.client_key.is_empty() {
            self.psk_secret()?;
        }
        let mut seen = std::collections::HashSet::new();
        for mapping in &self.channels {
            if !mapping.fits_universe() {
                return Err(ConfigError::Invalid(format!(
                    "hub {}: channel {} at dmxStart {} overruns the 512-slot universe",
                    self.id, mapping.channel_id, mapping.dmx_start
                )));
            }
            if !seen.insert(mapping.channel_id) {
                return Err(ConfigError::Invalid(format!(
                    "hub {}: duplicate channelId {}",
                    self.id, mapping.channel_id
                )));
            }
        }
        Ok(())
    }

    /// The inputs a runner needs before it may start. Missing any is a fatal
    /// startup error for this hub; returns the configuration id on success.
    pub fn validate_for_start(&self) -> Result<&str> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid(format!("hub {}: host missing", self.id)));
        }
        if self.username.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "hub {}: username missing",
                self.id
            )));
        }
        if self.client_key.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "hub {}: clientKey missing",
                self.id
            )));
        }
        if self.channels.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "hub {}: no channel mappings configured",
                self.id
            )));
        }
        match self.entertainment_configuration_id.as_deref() {
            Some(id) => Ok(id),
            None => Err(ConfigError::Invalid(format!(
                "hub {}: no entertainment configuration selected",
                self.id
            ))),
        }
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Document schema version; legacy versions migrate on load
    pub version: u32,
    /// Art-Net ingestion settings
    #[serde(default)]
    pub artnet: ArtNetSettings,
    /// One entry per paired hub
    #[serde(default)]
    pub hubs: Vec<HubConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            artnet: ArtNetSettings::default(),
            hubs: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Load a configuration document, migrating legacy versions in place.
    ///
    /// A migrated document is written back to `path` after a best-effort
    /// `.bak` sibling backup of the original bytes.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        let version = value.get("version").and_then(Value::as_u64).unwrap_or(1);

        match version {
            3 => Ok(serde_json::from_value(value)?),
            2 => {
                tracing::info!("Migrating configuration v2 -> v3");
                let config: BridgeConfig = serde_json::from_value(migrate_v2(value))?;
                write_backup(path, &raw);
                config.save(path)?;
                Ok(config)
            }
            1 => {
                tracing::info!("Migrating configuration v1 -> v3");
                let config: BridgeConfig = serde_json::from_value(migrate_v2(migrate_v1(value)))?;
                write_backup(path, &raw);
                config.save(path)?;
                Ok(config)
            }
            other => Err(ConfigError::UnsupportedVersion(other)),
        }
    }

    /// Write the document atomically (temp sibling + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Validate the whole document: per-hub invariants plus unique hub ids.
    pub fn validate(&self) -> Result<()> {
        self.artnet
            .bind_ip
            .parse::<std::net::IpAddr>()
            .map_err(|_| {
                ConfigError::Invalid(format!(
                    "artnet.bindIp {:?} is not an IP address",
                    self.artnet.bind_ip
                ))
            })?;
        let mut ids = std::collections::HashSet::new();
        for hub in &self.hubs {
            hub.validate()?;
            if !ids.insert(hub.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate hub id {}", hub.id)));
            }
        }
        Ok(())
    }
}

/// 8-4-4-4-12 hex with hyphens, 36 ASCII characters.
pub fn is_uuid_shaped(s: &str) -> bool {
    s.len() == 36 && uuid::Uuid::try_parse(s).is_ok()
}

fn write_backup(path: &Path, raw: &str) {
    let backup = path.with_extension("json.bak");
    if let Err(e) = fs::write(&backup, raw) {
        tracing::warn!("Failed to write config backup {:?}: {}", backup, e);
    }
}

/// Wrap a flat v1 single-hub document into a v2-shaped one; the v2 pass then
/// handles the key renames.
fn migrate_v1(value: Value) -> Value {
    let mut top = match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    top.remove("version");
    let artnet = top.remove("artnet").unwrap_or_else(|| serde_json::json!({}));

    let mut hub = top;
    if !hub.contains_key("id") {
        hub.insert("id".to_string(), Value::String("hub-1".to_string()));
    }

    serde_json::json!({
        "version": 2,
        "artnet": artnet,
        "hubs": [Value::Object(hub)],
    })
}

/// v2 -> v3: `lightId` becomes `channelId` where numerically parseable
/// (entries that are not parseable are dropped), and a UUID-shaped
/// `entertainmentRoomId` is preserved as the configuration id.
fn migrate_v2(mut value: Value) -> Value {
    if let Some(hubs) = value.get_mut("hubs").and_then(Value::as_array_mut) {
        for hub in hubs {
            migrate_v2_hub(hub);
        }
    }
    if let Some(obj) = value.as_object_mut() {
        obj.insert("version".to_string(), Value::from(CONFIG_VERSION));
    }
    value
}

fn migrate_v2_hub(hub: &mut Value) {
    let obj = match hub.as_object_mut() {
        Some(o) => o,
        None => return,
    };

    if let Some(room) = obj.remove("entertainmentRoomId") {
        match room.as_str() {
            Some(s) if is_uuid_shaped(s) => {
                obj.insert(
                    "entertainmentConfigurationId".to_string(),
                    Value::String(s.to_string()),
                );
            }
            _ => {
                tracing::warn!(
                    "Dropping non-UUID entertainmentRoomId during migration: {:?}",
                    room
                );
            }
        }
    }

    if let Some(channels) = obj.get_mut("channels").and_then(Value::as_array_mut) {
        channels.retain_mut(|entry| {
            let channel = match entry.as_object_mut() {
                Some(c) => c,
                None => return false,
            };
            match channel.remove("lightId") {
                Some(light) => match parse_channel_id(&light) {
                    Some(id) => {
                        channel.insert("channelId".to_string(), Value::from(id));
                        true
                    }
                    None => {
                        tracing::warn!(
                            "Dropping channel with non-numeric lightId during migration: {:?}",
                            light
                        );
                        false
                    }
                },
                None => channel.contains_key("channelId"),
            }
        });
    }
}

fn parse_channel_id(v: &Value) -> Option<u8> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ChannelMode;
    use serde_json::json;

    fn sample_hub() -> HubConfig {
        HubConfig {
            id: "living-room".to_string(),
            name: None,
            host: "192.168.1.50".to_string(),
            username: "app-key-abc".to_string(),
            client_key: "00112233445566778899aabbccddeeff".to_string(),
            entertainment_configuration_id: Some(
                "1a8d99cc-967b-44f2-9202-43f976c0fa6b".to_string(),
            ),
            art_net_universe: 0,
            channels: vec![ChannelMapping {
                channel_id: 0,
                dmx_start: 1,
                mode: ChannelMode::EightBit,
            }],
        }
    }

    #[test]
    fn test_uuid_shape() {
        assert!(is_uuid_shaped("1a8d99cc-967b-44f2-9202-43f976c0fa6b"));
        assert!(!is_uuid_shaped("1a8d99cc967b44f2920243f976c0fa6b")); // no hyphens
        assert!(!is_uuid_shaped("not-a-uuid"));
        assert!(!is_uuid_shaped(""));
    }

    #[test]
    fn test_psk_secret_decoding() {
        let mut hub = sample_hub();
        assert_eq!(hub.psk_secret().unwrap().len(), 16);

        hub.client_key = "abc".to_string(); // odd length
        assert!(hub.psk_secret().is_err());

        hub.client_key = String::new();
        assert!(hub.psk_secret().is_err());
    }

    #[test]
    fn test_hub_validation_rejects_overrun_and_duplicates() {
        let mut hub = sample_hub();
        hub.channels.push(ChannelMapping {
            channel_id: 1,
            dmx_start: 511,
            mode: ChannelMode::EightBit,
        });
        assert!(hub.validate().is_err());

        hub.channels[1].dmx_start = 4;
        hub.channels[1].channel_id = 0; // duplicate
        assert!(hub.validate().is_err());

        hub.channels[1].channel_id = 1;
        assert!(hub.validate().is_ok());
    }

    #[test]
    fn test_validate_for_start_requires_all_inputs() {
        let hub = sample_hub();
        assert!(hub.validate_for_start().is_ok());

        let mut missing = sample_hub();
        missing.entertainment_configuration_id = None;
        assert!(missing.validate_for_start().is_err());

        let mut missing = sample_hub();
        missing.channels.clear();
        assert!(missing.validate_for_start().is_err());

        let mut missing = sample_hub();
        missing.client_key = String::new();
        assert!(missing.validate_for_start().is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let hub = sample_hub();
        let debug = format!("{:?}", hub);
        assert!(debug.contains("***REDACTED***"));
        assert!(!debug.contains("app-key-abc"));
        assert!(!debug.contains("00112233445566778899aabbccddeeff"));
        assert!(debug.contains("192.168.1.50"));
    }

    #[test]
    fn test_load_v3_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let doc = json!({
            "version": 3,
            "artnet": {"bindIp": "0.0.0.0"},
            "hubs": [{
                "id": "hub-a",
                "host": "192.168.1.50",
                "username": "u",
                "clientKey": "aabb",
                "entertainmentConfigurationId": "1a8d99cc-967b-44f2-9202-43f976c0fa6b",
                "artNetUniverse": 2,
                "channels": [{"channelId": 0, "dmxStart": 1, "channelMode": "16bit"}]
            }]
        });
        fs::write(&path, doc.to_string()).unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.hubs.len(), 1);
        assert_eq!(config.hubs[0].art_net_universe, 2);
        assert_eq!(config.hubs[0].channels[0].mode, ChannelMode::SixteenBit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_migrate_v2_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let doc = json!({
            "version": 2,
            "artnet": {"bindIp": "127.0.0.1"},
            "hubs": [{
                "id": "hub-a",
                "host": "192.168.1.50",
                "username": "u",
                "clientKey": "aabb",
                "entertainmentRoomId": "1a8d99cc-967b-44f2-9202-43f976c0fa6b",
                "artNetUniverse": 0,
                "channels": [
                    {"lightId": "3", "dmxStart": 1, "channelMode": "8bit"},
                    {"lightId": "bulb-one", "dmxStart": 4, "channelMode": "8bit"}
                ]
            }]
        });
        fs::write(&path, doc.to_string()).unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.version, 3);
        let hub = &config.hubs[0];
        assert_eq!(
            hub.entertainment_configuration_id.as_deref(),
            Some("1a8d99cc-967b-44f2-9202-43f976c0fa6b")
        );
        // Parseable lightId kept, the other entry dropped
        assert_eq!(hub.channels.len(), 1);
        assert_eq!(hub.channels[0].channel_id, 3);

        // Backup written, document rewritten as v3
        assert!(path.with_extension("json.bak").exists());
        let rewritten: Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten["version"], 3);
    }

    #[test]
    fn test_migrate_v2_drops_non_uuid_room_id() {
        let migrated = migrate_v2(json!({
            "version": 2,
            "hubs": [{"id": "h", "host": "x", "username": "u", "clientKey": "aa",
                       "entertainmentRoomId": "7", "artNetUniverse": 0, "channels": []}]
        }));
        let config: BridgeConfig = serde_json::from_value(migrated).unwrap();
        assert!(config.hubs[0].entertainment_configuration_id.is_none());
    }

    #[test]
    fn test_migrate_v1_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let doc = json!({
            "host": "192.168.1.50",
            "username": "u",
            "clientKey": "aabb",
            "entertainmentRoomId": "1a8d99cc-967b-44f2-9202-43f976c0fa6b",
            "artNetUniverse": 1,
            "channels": [{"lightId": 0, "dmxStart": 1, "channelMode": "8bit"}]
        });
        fs::write(&path, doc.to_string()).unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.hubs.len(), 1);
        assert_eq!(config.hubs[0].id, "hub-1");
        assert_eq!(config.hubs[0].art_net_universe, 1);
        assert_eq!(config.hubs[0].channels[0].channel_id, 0);
    }

    #[test]
    fn test_unsupported_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, json!({"version": 9}).to_string()).unwrap();
        assert!(matches!(
            BridgeConfig::load(&path),
            Err(ConfigError::UnsupportedVersion(9))
        ));
    }
}
