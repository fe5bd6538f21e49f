//! Client-side input checks for the configuration forms
//!
//! Each validator returns every violated constraint, one message per field,
//! so the user sees all problems at once.

use thiserror::Error;

pub const GPIO_DURATION_MIN_MS: i64 = 100;
pub const GPIO_DURATION_MAX_MS: i64 = 10_000;

const PAXTON_HEX_LEN: usize = 10;

/// Rejected form input, listing every violated constraint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.render())]
pub struct ValidationErrors {
    header: &'static str,
    pub errors: Vec<String>,
}

impl ValidationErrors {
    pub fn new(errors: Vec<String>) -> Self {
        Self {
            header: "Invalid input parameters. Please check the following issues:",
            errors,
        }
    }

    pub(crate) fn with_header(header: &'static str, errors: Vec<String>) -> Self {
        Self { header, errors }
    }

    /// `Ok(())` when no constraint was violated
    pub fn check(errors: Vec<String>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::new(errors))
        }
    }

    /// Header line followed by one bullet per violation
    fn render(&self) -> String {
        let mut text = self.header.to_string();
        for error in &self.errors {
            text.push_str("\n• ");
            text.push_str(error);
        }
        text
    }
}



fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Digits-only value within `min..=max`; overlong digit strings are out of range
fn digits_in_range(s: &str, min: u64, max: u64) -> bool {
    is_digits(s) && s.parse::<u64>().is_ok_and(|n| (min..=max).contains(&n))
}

/// Check a reset card template as typed into the form
pub fn validate_reset_card_input(
    bit_length: &str,
    facility_code: &str,
    card_number: &str,
) -> Vec<String> {
    let mut errors = Vec::new();

    if bit_length != "26" && bit_length != "35" {
        errors.push("Reset Cards must be either 26 or 35 bit cards".to_string());
    }

    if !digits_in_range(facility_code, 1, 255) {
        errors.push("Facility Code must be a numeric value between 1 and 255".to_string());
    }

    let card_number = card_number.replace(',', "");
    if !digits_in_range(&card_number, 1, 65_535) {
        errors.push("Card Number must be a numeric value between 1 and 65,535".to_string());
    }

    errors
}

/// Check a Paxton reset card value: exactly ten hex digits
pub fn validate_paxton_reset_input(hex: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if hex.chars().count() != PAXTON_HEX_LEN {
        errors.push("HEX value must be exactly 10 characters".to_string());
    }

    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        errors.push("HEX value must contain only hexadecimal characters (0-9, A-F)".to_string());
    }

    errors
}

/// Check both pulse durations; `None` is a value that did not parse as a number
pub fn validate_gpio_input(pin35_duration: Option<i64>, pin36_duration: Option<i64>) -> Vec<String> {
    let range = GPIO_DURATION_MIN_MS..=GPIO_DURATION_MAX_MS;
    let mut errors = Vec::new();

    for (pin, duration) in [(35, pin35_duration), (36, pin36_duration)] {
        if !duration.is_some_and(|ms| range.contains(&ms)) {
            errors.push(format!(
                "GPIO {} duration must be between {} and {} ms",
                pin, GPIO_DURATION_MIN_MS, GPIO_DURATION_MAX_MS
            ));
        }
    }

    errors
}
