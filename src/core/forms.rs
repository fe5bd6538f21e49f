//! Configuration forms: raw field values in, device command out
//!
//! Fields arrive as the text the user typed. A form either yields a
//! [`Submission`] (the command plus the confirmation to show) or the full list
//! of validation failures, leaving the form untouched.

use super::commands::{
    Command, GpioCommand, InvalidReaderType, MaintenanceAction, NotificationsCommand, ReaderType,
    ResetCardCommand,
};
use super::protocol::{InboundEvent, Source};
use super::validation::{
    validate_gpio_input, validate_paxton_reset_input, validate_reset_card_input, ValidationErrors,
};

/// A validated form, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub command: Command,
    /// Text shown to the user once the command is sent
    pub confirmation: String,
}

impl Submission {
    fn new(command: Command, confirmation: impl Into<String>) -> Self {
        Self {
            command,
            confirmation: confirmation.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugForm {
    pub enable: bool,
}

impl DebugForm {
    pub fn submit(&self) -> Submission {
        let confirmation = if self.enable {
            "Debug settings have been updated.\n\n\
             To connect to the device, use:\n\
             macOS:\n\
             screen /dev/cu.usbserial-XXXX 115200\n\n\
             Linux:\n\
             screen /dev/ttyUSBX 115200\n\
             or\n\
             screen /dev/ttyACMX 115200\n\n\
             Note: Debug mode will slightly impact battery life. \
             Remember to disable debugging prior to deployment.\n\n\
             Rebooting..."
        } else {
            "Debug mode has been disabled.\n\n\
             The device will no longer output debug messages over serial.\n\n\
             Rebooting..."
        };
        Submission::new(
            Command::Debug {
                enabled: self.enable,
            },
            confirmation,
        )
    }
}

/// GPIO pulse outputs; status fields hold `enabled` or `disabled`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpioForm {
    pub pin35_status: String,
    pub pin35_pulse_duration: String,
    pub pin36_status: String,
    pub pin36_pulse_duration: String,
}

impl GpioForm {
    pub fn submit(&self) -> Result<Submission, ValidationErrors> {
        let pin35_ms = parse_ms(&self.pin35_pulse_duration);
        let pin36_ms = parse_ms(&self.pin36_pulse_duration);
        ValidationErrors::check(validate_gpio_input(pin35_ms, pin36_ms))?;

        // Both durations were range-checked above
        let command = GpioCommand {
            pin35_enabled: self.pin35_status == "enabled",
            pin35_pulse_duration: pin35_ms.unwrap_or_default() as u32,
            pin36_enabled: self.pin36_status == "enabled",
            pin36_pulse_duration: pin36_ms.unwrap_or_default() as u32,
        };
        Ok(Submission::new(
            Command::Gpio(command),
            "GPIO settings have been updated.",
        ))
    }
}

fn parse_ms(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Email notification settings; `enable_email` holds `true` or `false`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationsForm {
    pub enable_email: String,
    pub smtp_host: String,
    pub smtp_port: String,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub smtp_recipient: String,
}

impl NotificationsForm {
    /// Disabling notifications replaces the SMTP fields with the device placeholders
    pub fn submit(&self) -> Submission {
        if self.enable_email == "true" {
            let command = NotificationsCommand::new(
                true,
                &self.smtp_host,
                &self.smtp_port,
                &self.smtp_user,
                &self.smtp_pass,
                &self.smtp_recipient,
            );
            Submission::new(
                Command::Notifications(command),
                format!("Notifications will be sent to: {}", self.smtp_recipient),
            )
        } else {
            let command = NotificationsCommand::new(
                false,
                "smtp.<domain>.com",
                "465",
                "<sender_email>@<domain>.com",
                "AppPassword",
                "<phonenumber>@<carrierdomain>.com",
            );
            Submission::new(
                Command::Notifications(command),
                "Notifications have been disabled.",
            )
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetCardForm {
    pub bit_length: String,
    pub facility_code: String,
    pub card_number: String,
}

impl ResetCardForm {
    pub fn submit(&self) -> Result<Submission, ValidationErrors> {
        ValidationErrors::check(validate_reset_card_input(
            &self.bit_length,
            &self.facility_code,
            &self.card_number,
        ))?;

        let parse = |raw: &str| raw.replace(',', "").parse::<u32>().unwrap_or_default();
        let command = ResetCardCommand::new(
            parse(&self.bit_length),
            parse(&self.facility_code),
            parse(&self.card_number),
        );
        Ok(Submission::new(
            Command::ResetCard(command),
            "Reset card settings have been updated.",
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaxtonResetForm {
    pub hex: String,
}

impl PaxtonResetForm {
    /// The value is upper-cased before it is checked and sent
    pub fn submit(&self) -> Result<Submission, ValidationErrors> {
        let hex = self.hex.to_uppercase();
        let errors = validate_paxton_reset_input(&hex);
        if !errors.is_empty() {
            return Err(ValidationErrors::with_header(
                "Invalid Paxton HEX value. Please check the following issues:",
                errors,
            ));
        }

        let confirmation = format!("Paxton Reset Card has been updated to: {hex}");
        Ok(Submission::new(Command::PaxtonReset { hex }, confirmation))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderForm {
    pub reader_type: String,
}

impl ReaderForm {
    pub fn submit(&self) -> Result<Submission, ValidationErrors> {
        let reader: ReaderType = self
            .reader_type
            .parse()
            .map_err(|e: InvalidReaderType| ValidationErrors::new(vec![e.to_string()]))?;
        Ok(Submission::new(
            Command::ReaderType { reader },
            "Reader configuration has been updated.",
        ))
    }
}

impl MaintenanceAction {
    /// Question the user must confirm before the action is sent
    pub fn confirmation_prompt(&self) -> &'static str {
        match self {
            MaintenanceAction::WipeCards => "Are you sure you want to erase the stored card data?",
            MaintenanceAction::RestoreResetCard => {
                "Are you sure you want to reset the Reset Card to the default values?"
            }
            MaintenanceAction::RestoreNotifications => {
                "Are you sure you want to restore the notification settings to the default values?"
            }
            MaintenanceAction::ResetGpio => {
                "Are you sure you want to reset GPIO settings to default values?"
            }
            MaintenanceAction::ResetWireless => {
                "Are you sure you want to reset the wireless credentials to the default values?"
            }
            MaintenanceAction::ResetDevice => "Are you sure you want to perform a full factory reset?",
        }
    }

    pub fn submit(&self) -> Submission {
        Submission::new(Command::Maintenance(*self), self.confirmation_prompt())
    }

    /// Outcome text for the device's reply to this action
    pub fn reply_message(&self, success: bool) -> &'static str {
        match (self, success) {
            (MaintenanceAction::WipeCards, true) => "Card data has been erased successfully.",
            (MaintenanceAction::WipeCards, false) => "Error erasing card data.",
            (MaintenanceAction::RestoreResetCard, true) => {
                "Reset card has been restored to default values."
            }
            (MaintenanceAction::RestoreResetCard, false) => "Error resetting card values.",
            (MaintenanceAction::RestoreNotifications, true) => {
                "Notification settings have been restored to defaults."
            }
            (MaintenanceAction::RestoreNotifications, false) => {
                "Error resetting notification settings."
            }
            (MaintenanceAction::ResetGpio, true) => "GPIO settings have been reset to defaults.",
            (MaintenanceAction::ResetGpio, false) => "Error resetting GPIO settings.",
            (MaintenanceAction::ResetWireless, true) => {
                "Wireless credentials have been reset. Device will reboot."
            }
            (MaintenanceAction::ResetWireless, false) => "Error resetting wireless credentials.",
            (MaintenanceAction::ResetDevice, true) => {
                "Full device reset completed. Device will reboot."
            }
            (MaintenanceAction::ResetDevice, false) => "Error performing full device reset.",
        }
    }
}

/// Outcome text for a reply to one of the settings forms
pub fn settings_reply_message(event: &InboundEvent) -> Option<&'static str> {
    let message = match (event.source, event.is_success()) {
        (Source::ResetCard, true) => "Reset card settings have been updated.",
        (Source::ResetCard, false) => "Error updating reset card settings.",
        (Source::Notifications, true) => "Notification settings have been updated.",
        (Source::Notifications, false) => "Error updating notification settings.",
        (Source::Gpio, true) => "GPIO settings have been updated.",
        (Source::Gpio, false) => "Error updating GPIO settings.",
        (Source::Cards | Source::Wireless | Source::System, _) => return None,
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gpio_form_submits() {
        let form = GpioForm {
            pin35_status: "enabled".into(),
            pin35_pulse_duration: "1500".into(),
            pin36_status: "disabled".into(),
            pin36_pulse_duration: " 100 ".into(),
        };
        let submission = form.submit().unwrap();
        assert_eq!(
            submission.command,
            Command::Gpio(GpioCommand {
                pin35_enabled: true,
                pin35_pulse_duration: 1500,
                pin36_enabled: false,
                pin36_pulse_duration: 100,
            })
        );
    }

    #[test]
    fn test_gpio_form_rejects_bad_durations() {
        let form = GpioForm {
            pin35_status: "enabled".into(),
            pin35_pulse_duration: "abc".into(),
            pin36_status: "enabled".into(),
            pin36_pulse_duration: "50".into(),
        };
        let errors = form.submit().unwrap_err();
        assert_eq!(errors.errors.len(), 2);
    }

    #[test]
    fn test_notifications_enabled_keeps_fields() {
        let form = NotificationsForm {
            enable_email: "true".into(),
            smtp_host: "smtp.example.com".into(),
            smtp_port: "465".into(),
            smtp_user: "me@example.com".into(),
            smtp_pass: "pw".into(),
            smtp_recipient: "you@example.com".into(),
        };
        let submission = form.submit();
        assert_eq!(
            submission.confirmation,
            "Notifications will be sent to: you@example.com"
        );
        let value = serde_json::to_value(&submission.command).unwrap();
        assert_eq!(value["smtp_host"], json!("smtp.example.com"));
        assert_eq!(value["enable_email"], json!("true"));
    }

    #[test]
    fn test_notifications_disabled_uses_placeholders() {
        let form = NotificationsForm {
            enable_email: "false".into(),
            smtp_host: "real.host".into(),
            ..Default::default()
        };
        let submission = form.submit();
        let value = serde_json::to_value(&submission.command).unwrap();
        assert_eq!(value["enable_email"], json!("false"));
        assert_eq!(value["smtp_host"], json!("smtp.<domain>.com"));
        assert_eq!(value["smtp_pass"], json!("AppPassword"));
        assert_eq!(submission.confirmation, "Notifications have been disabled.");
    }

    #[test]
    fn test_reset_card_form() {
        let form = ResetCardForm {
            bit_length: "26".into(),
            facility_code: "12".into(),
            card_number: "12,345".into(),
        };
        let submission = form.submit().unwrap();
        assert_eq!(
            submission.command,
            Command::ResetCard(ResetCardCommand::new(26, 12, 12345))
        );

        let bad = ResetCardForm {
            bit_length: "27".into(),
            facility_code: "0".into(),
            card_number: "70000".into(),
        };
        assert_eq!(bad.submit().unwrap_err().errors.len(), 3);
    }

    #[test]
    fn test_paxton_form_uppercases() {
        let form = PaxtonResetForm {
            hex: "00000abcde".into(),
        };
        let submission = form.submit().unwrap();
        assert_eq!(
            submission.command,
            Command::PaxtonReset {
                hex: "00000ABCDE".into()
            }
        );
        assert_eq!(
            submission.confirmation,
            "Paxton Reset Card has been updated to: 00000ABCDE"
        );

        let err = PaxtonResetForm { hex: "12".into() }.submit().unwrap_err();
        assert!(err.to_string().starts_with("Invalid Paxton HEX value."));
    }

    #[test]
    fn test_reader_form() {
        let ok = ReaderForm {
            reader_type: "PAXTON".into(),
        };
        assert_eq!(
            ok.submit().unwrap().command,
            Command::ReaderType {
                reader: ReaderType::Paxton
            }
        );
        let bad = ReaderForm {
            reader_type: "WIEGAND".into(),
        };
        assert_eq!(
            bad.submit().unwrap_err().errors,
            vec!["Invalid reader type selected"]
        );
    }

    #[test]
    fn test_settings_reply_messages() {
        let event = InboundEvent {
            source: Source::Notifications,
            status: Some("failed".into()),
            body: json!({"source": "notifications", "status": "failed"}),
        };
        assert_eq!(
            settings_reply_message(&event),
            Some("Error updating notification settings.")
        );

        let event = InboundEvent {
            source: Source::Cards,
            status: Some("success".into()),
            body: json!({}),
        };
        assert_eq!(settings_reply_message(&event), None);
    }

    #[test]
    fn test_maintenance_submission() {
        let submission = MaintenanceAction::WipeCards.submit();
        assert_eq!(
            submission.command,
            Command::Maintenance(MaintenanceAction::WipeCards)
        );
        assert_eq!(
            MaintenanceAction::ResetDevice.reply_message(true),
            "Full device reset completed. Device will reboot."
        );
    }
}
