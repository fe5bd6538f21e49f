//! Typed views of the resources the device serves over HTTP
//!
//! The firmware writes these files with loose typing (booleans as strings,
//! numbers as strings, empty files after a wipe), so the parsers accept what
//! the device actually produces and fall back to the firmware defaults.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::commands::ReaderType;

pub const DEBUG_CONFIG_PATH: &str = "/debug_config.json";
pub const NETWORK_PATH: &str = "/network";
pub const NOTIFICATIONS_PATH: &str = "/notifications";
pub const FIRMWARE_PATH: &str = "/firmware";
pub const READER_CONFIG_PATH: &str = "reader_config.json";
pub const RESET_CARD_PATH: &str = "reset_card.json";
pub const GPIO_SETTINGS_PATH: &str = "gpio_settings.json";
pub const CARDS_CSV_PATH: &str = "cards.csv";

/// Paxton reset value shown when the device has none stored
pub const DEFAULT_PAXTON_RESET_HEX: &str = "0000001337";

const DEFAULT_PULSE_DURATION_MS: u32 = 1000;

/// IP shown (and sometimes served) when the device has no station link
pub const NOT_CONNECTED: &str = "Not Connected";
const NOT_AVAILABLE: &str = "N/A";
const UNKNOWN: &str = "Unknown";

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to parse {resource}: {source}")]
    Json {
        resource: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn parse<T: for<'de> Deserialize<'de>>(resource: &'static str, text: &str) -> Result<T, ResourceError> {
    serde_json::from_str(text).map_err(|source| {
        warn!(resource, error = %source, "Failed to parse resource");
        ResourceError::Json { resource, source }
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DebugConfig {
    #[serde(rename = "DEBUG", default, deserialize_with = "loose_bool")]
    pub debug: bool,
}

impl DebugConfig {
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        parse(DEBUG_CONFIG_PATH, text)
    }

    pub fn status_label(&self) -> &'static str {
        if self.debug {
            "Enabled"
        } else {
            "Disabled"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GpioSettings {
    #[serde(default, deserialize_with = "loose_bool")]
    pub pin35_enabled: bool,
    #[serde(default, deserialize_with = "loose_bool")]
    pub pin36_enabled: bool,
    #[serde(default, deserialize_with = "loose_bool")]
    pub pin35_default_high: bool,
    #[serde(default, deserialize_with = "loose_bool")]
    pub pin36_default_high: bool,
    #[serde(default = "default_pulse", deserialize_with = "loose_u32_or_pulse")]
    pub pin35_pulse_duration: u32,
    #[serde(default = "default_pulse", deserialize_with = "loose_u32_or_pulse")]
    pub pin36_pulse_duration: u32,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            pin35_enabled: false,
            pin36_enabled: false,
            pin35_default_high: false,
            pin36_default_high: false,
            pin35_pulse_duration: DEFAULT_PULSE_DURATION_MS,
            pin36_pulse_duration: DEFAULT_PULSE_DURATION_MS,
        }
    }
}

impl GpioSettings {
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        parse(GPIO_SETTINGS_PATH, text)
    }
}

fn default_pulse() -> u32 {
    DEFAULT_PULSE_DURATION_MS
}

/// Stored notification settings; the password is never served back
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationSettings {
    #[serde(default, deserialize_with = "loose_bool")]
    pub enable_email: bool,
    #[serde(default, deserialize_with = "loose_string")]
    pub smtp_host: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub smtp_port: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub smtp_user: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub smtp_recipient: String,
}

impl NotificationSettings {
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        parse(NOTIFICATIONS_PATH, text)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ReaderConfig {
    #[serde(rename = "READER_TYPE", default, deserialize_with = "reader_or_default")]
    pub reader_type: ReaderType,
}

impl ReaderConfig {
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        parse(READER_CONFIG_PATH, text)
    }
}

/// One reset card template as stored by the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ResetCardEntry {
    #[serde(rename = "RBL", alias = "bitLength", default, deserialize_with = "loose_u32")]
    pub bit_length: Option<u32>,
    #[serde(rename = "RFC", alias = "facilityCode", default, deserialize_with = "loose_u32")]
    pub facility_code: Option<u32>,
    #[serde(rename = "RCN", alias = "cardNumber", default, deserialize_with = "loose_u32")]
    pub card_number: Option<u32>,
}

impl ResetCardEntry {
    /// Entries with both facility code and card number at zero are placeholders
    pub fn is_placeholder(&self) -> bool {
        self.facility_code == Some(0) && self.card_number == Some(0)
    }
}

/// Contents of `reset_card.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetCardConfig {
    pub entries: Vec<ResetCardEntry>,
    pub paxton_reset_hex: String,
}

impl Default for ResetCardConfig {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            paxton_reset_hex: DEFAULT_PAXTON_RESET_HEX.to_string(),
        }
    }
}

impl ResetCardConfig {
    /// Accepts a single object or an array of entries; an empty file is the default config
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        if text.trim().is_empty() {
            debug!("Empty reset card file, using defaults");
            return Ok(Self::default());
        }

        let json: Value = parse(RESET_CARD_PATH, text)?;
        let to_entry = |value: &Value| {
            ResetCardEntry::deserialize(value).map_err(|source| ResourceError::Json {
                resource: RESET_CARD_PATH,
                source,
            })
        };

        let (entries, paxton) = match &json {
            Value::Array(items) => {
                let entries = items.iter().map(to_entry).collect::<Result<Vec<_>, _>>()?;
                (entries, None)
            }
            other => (vec![to_entry(other)?], other.get("PAXTON_RESET_HEX")),
        };

        let paxton_reset_hex = paxton
            .and_then(Value::as_str)
            .filter(|hex| !hex.is_empty())
            .unwrap_or(DEFAULT_PAXTON_RESET_HEX)
            .to_uppercase();

        Ok(Self {
            entries: entries
                .into_iter()
                .filter(|entry| !entry.is_placeholder())
                .collect(),
            paxton_reset_hex,
        })
    }
}

/// Station network state from `/network`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NetworkInfo {
    #[serde(default, deserialize_with = "loose_string")]
    pub ip: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub mdns: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub hostname: String,
}

impl NetworkInfo {
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        parse(NETWORK_PATH, text)
    }

    pub fn is_connected(&self) -> bool {
        !self.ip.is_empty() && self.ip != NOT_CONNECTED
    }

    pub fn ip_label(&self) -> &str {
        if self.is_connected() {
            &self.ip
        } else {
            NOT_CONNECTED
        }
    }

    /// mDNS name, then hostname; `N/A` while disconnected
    pub fn hostname_label(&self) -> &str {
        if !self.is_connected() {
            return NOT_AVAILABLE;
        }
        [self.mdns.as_str(), self.hostname.as_str()]
            .into_iter()
            .find(|name| !name.is_empty())
            .unwrap_or(NOT_AVAILABLE)
    }
}

/// Device and firmware identity from `/firmware`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FirmwareInfo {
    #[serde(default, deserialize_with = "loose_string")]
    pub device: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub version: String,
    #[serde(rename = "buildDate", default, deserialize_with = "loose_string")]
    pub build_date: String,
}

impl FirmwareInfo {
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        parse(FIRMWARE_PATH, text)
    }

    pub fn device_label(&self) -> &str {
        or_unknown(&self.device)
    }

    pub fn version_label(&self) -> &str {
        or_unknown(&self.version)
    }

    pub fn build_date_label(&self) -> &str {
        or_unknown(&self.build_date)
    }
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        UNKNOWN
    } else {
        value
    }
}

// ============================================================================
// Loose field decoding
// ============================================================================

fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(s == "true"),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        Value::Null => Ok(false),
        other => Err(de::Error::custom(format!("expected boolean, got {other}"))),
    }
}

fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

fn loose_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn loose_u32_or_pulse<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    Ok(loose_u32(deserializer)?.unwrap_or(DEFAULT_PULSE_DURATION_MS))
}

fn reader_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ReaderType, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_config() {
        assert!(DebugConfig::parse(r#"{"DEBUG": true}"#).unwrap().debug);
        assert!(!DebugConfig::parse("{}").unwrap().debug);
        assert_eq!(
            DebugConfig::parse(r#"{"DEBUG": "true"}"#).unwrap().status_label(),
            "Enabled"
        );
        assert!(DebugConfig::parse("not json").is_err());
    }

    #[test]
    fn test_gpio_defaults() {
        let settings = GpioSettings::parse(r#"{"pin35_enabled": true}"#).unwrap();
        assert!(settings.pin35_enabled);
        assert!(!settings.pin36_enabled);
        assert_eq!(settings.pin35_pulse_duration, 1000);
        assert_eq!(settings.pin36_pulse_duration, 1000);

        let settings =
            GpioSettings::parse(r#"{"pin35_pulse_duration": 250, "pin36_pulse_duration": "500"}"#)
                .unwrap();
        assert_eq!(settings.pin35_pulse_duration, 250);
        assert_eq!(settings.pin36_pulse_duration, 500);
    }

    #[test]
    fn test_notifications_accept_bool_or_string() {
        let from_string = NotificationSettings::parse(
            r#"{"enable_email": "true", "smtp_host": "smtp.example.com", "smtp_port": 465}"#,
        )
        .unwrap();
        assert!(from_string.enable_email);
        assert_eq!(from_string.smtp_port, "465");

        // Shape written by a notification wipe
        let wiped = NotificationSettings::parse(
            r#"{"enable_email": false, "smtp_host": "", "smtp_port": "", "smtp_user": "", "smtp_recipient": ""}"#,
        )
        .unwrap();
        assert_eq!(wiped, NotificationSettings::default());
    }

    #[test]
    fn test_reader_config_defaults_to_hid() {
        assert_eq!(ReaderConfig::parse("{}").unwrap().reader_type, ReaderType::Hid);
        assert_eq!(
            ReaderConfig::parse(r#"{"READER_TYPE": "PAXTON"}"#)
                .unwrap()
                .reader_type,
            ReaderType::Paxton
        );
        assert_eq!(
            ReaderConfig::parse(r#"{"READER_TYPE": "bogus"}"#)
                .unwrap()
                .reader_type,
            ReaderType::Hid
        );
    }

    #[test]
    fn test_reset_card_single_object() {
        let config =
            ResetCardConfig::parse(r#"{"RBL": 26, "RFC": "12", "RCN": 345, "PAXTON_RESET_HEX": "00000abcde"}"#)
                .unwrap();
        assert_eq!(
            config.entries,
            vec![ResetCardEntry {
                bit_length: Some(26),
                facility_code: Some(12),
                card_number: Some(345),
            }]
        );
        assert_eq!(config.paxton_reset_hex, "00000ABCDE");
    }

    #[test]
    fn test_reset_card_array_with_aliases_and_placeholders() {
        let config = ResetCardConfig::parse(
            r#"[{"bitLength": 35, "facilityCode": 1, "cardNumber": 2}, {"RBL": 26, "RFC": 0, "RCN": 0}]"#,
        )
        .unwrap();
        assert_eq!(config.entries.len(), 1);
        assert_eq!(config.entries[0].bit_length, Some(35));
        assert_eq!(config.paxton_reset_hex, DEFAULT_PAXTON_RESET_HEX);
    }

    #[test]
    fn test_network_info_labels() {
        let info = NetworkInfo::parse(
            r#"{"ip": "10.0.0.42", "mdns": "doppel.local", "hostname": "doppel"}"#,
        )
        .unwrap();
        assert_eq!(info.ip_label(), "10.0.0.42");
        assert_eq!(info.hostname_label(), "doppel.local");

        let info = NetworkInfo::parse(r#"{"ip": "10.0.0.42", "hostname": "doppel"}"#).unwrap();
        assert_eq!(info.hostname_label(), "doppel");

        let info = NetworkInfo::parse(r#"{"ip": "10.0.0.42"}"#).unwrap();
        assert_eq!(info.hostname_label(), "N/A");
    }

    #[test]
    fn test_network_info_disconnected() {
        for text in [r#"{"ip": "Not Connected", "mdns": "doppel.local"}"#, "{}"] {
            let info = NetworkInfo::parse(text).unwrap();
            assert!(!info.is_connected());
            assert_eq!(info.ip_label(), "Not Connected");
            assert_eq!(info.hostname_label(), "N/A");
        }
    }

    #[test]
    fn test_firmware_info_defaults_to_unknown() {
        let info = FirmwareInfo::parse(
            r#"{"device": "Doppelganger", "version": "1.2.0", "buildDate": "Jan 01 2025"}"#,
        )
        .unwrap();
        assert_eq!(info.device_label(), "Doppelganger");
        assert_eq!(info.version_label(), "1.2.0");
        assert_eq!(info.build_date_label(), "Jan 01 2025");

        let info = FirmwareInfo::parse(r#"{"version": ""}"#).unwrap();
        assert_eq!(info.device_label(), "Unknown");
        assert_eq!(info.version_label(), "Unknown");
        assert_eq!(info.build_date_label(), "Unknown");
        assert!(FirmwareInfo::parse("<html>").is_err());
    }

    #[test]
    fn test_reset_card_empty_file() {
        assert_eq!(ResetCardConfig::parse("").unwrap(), ResetCardConfig::default());
    }
}
