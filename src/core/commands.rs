//! Outbound commands understood by the device
//!
//! The device matches on top-level keys, so each variant serializes to the
//! exact flat object the firmware expects.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::protocol::Source;

/// Command sent to the device over the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Command {
    Debug {
        #[serde(rename = "DEBUG")]
        enabled: bool,
    },
    Gpio(GpioCommand),
    Notifications(NotificationsCommand),
    ResetCard(ResetCardCommand),
    PaxtonReset {
        #[serde(rename = "PAXTON_RESET_HEX")]
        hex: String,
    },
    ReaderType {
        #[serde(rename = "READER_TYPE")]
        reader: ReaderType,
    },
    Maintenance(MaintenanceAction),
}

impl Command {
    /// Source whose reply confirms this command, if the device answers at all
    pub fn reply_source(&self) -> Option<Source> {
        match self {
            Command::Gpio(_) => Some(Source::Gpio),
            Command::Notifications(_) => Some(Source::Notifications),
            Command::ResetCard(_) => Some(Source::ResetCard),
            Command::Maintenance(action) => Some(action.source()),
            Command::Debug { .. } | Command::PaxtonReset { .. } | Command::ReaderType { .. } => {
                None
            }
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Debug { .. } => "debug",
            Command::Gpio(_) => "gpio",
            Command::Notifications(_) => "notifications",
            Command::ResetCard(_) => "reset_card",
            Command::PaxtonReset { .. } => "paxton_reset",
            Command::ReaderType { .. } => "reader_type",
            Command::Maintenance(action) => action.flag(),
        }
    }
}

/// Pulse output settings for GPIO 35 and 36
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpioCommand {
    pub pin35_enabled: bool,
    pub pin35_pulse_duration: u32,
    pub pin36_enabled: bool,
    pub pin36_pulse_duration: u32,
}

/// Email notification settings; SMTP fields travel as strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationsCommand {
    source: Source,
    #[serde(serialize_with = "bool_as_string")]
    pub enable_email: bool,
    pub smtp_host: String,
    pub smtp_port: String,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub smtp_recipient: String,
}

impl NotificationsCommand {
    pub fn new(
        enable_email: bool,
        smtp_host: impl Into<String>,
        smtp_port: impl Into<String>,
        smtp_user: impl Into<String>,
        smtp_pass: impl Into<String>,
        smtp_recipient: impl Into<String>,
    ) -> Self {
        Self {
            source: Source::Notifications,
            enable_email,
            smtp_host: smtp_host.into(),
            smtp_port: smtp_port.into(),
            smtp_user: smtp_user.into(),
            smtp_pass: smtp_pass.into(),
            smtp_recipient: smtp_recipient.into(),
        }
    }
}

fn bool_as_string<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "true" } else { "false" })
}

/// Reset card template written by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResetCardCommand {
    source: Source,
    #[serde(rename = "RBL")]
    pub bit_length: u32,
    #[serde(rename = "RFC")]
    pub facility_code: u32,
    #[serde(rename = "RCN")]
    pub card_number: u32,
}

impl ResetCardCommand {
    pub fn new(bit_length: u32, facility_code: u32, card_number: u32) -> Self {
        Self {
            source: Source::ResetCard,
            bit_length,
            facility_code,
            card_number,
        }
    }
}

/// Card reader protocol the device decodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderType {
    #[default]
    #[serde(rename = "HID")]
    Hid,
    #[serde(rename = "PAXTON")]
    Paxton,
}

impl ReaderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReaderType::Hid => "HID",
            ReaderType::Paxton => "PAXTON",
        }
    }
}

impl fmt::Display for ReaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid reader type selected")]
pub struct InvalidReaderType;

impl FromStr for ReaderType {
    type Err = InvalidReaderType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HID" => Ok(ReaderType::Hid),
            "PAXTON" => Ok(ReaderType::Paxton),
            _ => Err(InvalidReaderType),
        }
    }
}

/// One-shot maintenance operations from the device page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceAction {
    WipeCards,
    RestoreResetCard,
    RestoreNotifications,
    ResetGpio,
    ResetWireless,
    ResetDevice,
}

impl MaintenanceAction {
    pub const ALL: &'static [MaintenanceAction] = &[
        MaintenanceAction::WipeCards,
        MaintenanceAction::RestoreResetCard,
        MaintenanceAction::RestoreNotifications,
        MaintenanceAction::ResetGpio,
        MaintenanceAction::ResetWireless,
        MaintenanceAction::ResetDevice,
    ];

    pub fn source(&self) -> Source {
        match self {
            MaintenanceAction::WipeCards => Source::Cards,
            MaintenanceAction::RestoreResetCard => Source::ResetCard,
            MaintenanceAction::RestoreNotifications => Source::Notifications,
            MaintenanceAction::ResetGpio => Source::Gpio,
            MaintenanceAction::ResetWireless => Source::Wireless,
            MaintenanceAction::ResetDevice => Source::System,
        }
    }

    /// Key the firmware checks for this action
    pub fn flag(&self) -> &'static str {
        match self {
            MaintenanceAction::WipeCards => "WIPE_CARDS",
            MaintenanceAction::RestoreResetCard => "RESET_CARD",
            MaintenanceAction::RestoreNotifications => "WIPE_CONFIG",
            MaintenanceAction::ResetGpio => "reset_gpio",
            MaintenanceAction::ResetWireless => "RESET_WIRELESS",
            MaintenanceAction::ResetDevice => "RESET_DEVICE",
        }
    }
}

impl Serialize for MaintenanceAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("source", &self.source())?;
        map.serialize_entry(self.flag(), &true)?;
        map.end()
    }
}
