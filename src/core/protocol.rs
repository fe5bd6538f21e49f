//! Inbound side of the device WebSocket protocol
//!
//! Every reply the device pushes is a JSON object tagged by `source`. The
//! connection greeting is a plain text line and is recognised before any
//! JSON parsing happens.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix of the greeting line the device sends on every new connection
pub const BANNER_PREFIX: &str = "Connected";

/// Configuration domain a message concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Gpio,
    Notifications,
    ResetCard,
    Cards,
    Wireless,
    System,
}

impl Source {
    pub const ALL: &'static [Source] = &[
        Source::Gpio,
        Source::Notifications,
        Source::ResetCard,
        Source::Cards,
        Source::Wireless,
        Source::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Gpio => "gpio",
            Source::Notifications => "notifications",
            Source::ResetCard => "reset_card",
            Source::Cards => "cards",
            Source::Wireless => "wireless",
            Source::System => "system",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message source `{0}`")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// A routed reply from the device
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub source: Source,
    /// Value of the `status` field, when it is a string
    pub status: Option<String>,
    /// The full parsed object, `source` and `status` included
    pub body: Value,
}

impl InboundEvent {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

/// Classification of one inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Connection greeting, never parsed
    Banner,
    Event(InboundEvent),
    /// Valid JSON without a known `source` tag
    Unrouted { source: Option<String> },
    Malformed(String),
}

/// Classify a text frame received from the device
pub fn classify_frame(text: &str) -> Frame {
    if text.starts_with(BANNER_PREFIX) {
        return Frame::Banner;
    }

    let json: Value = match serde_json::from_str(text) {
        Ok(json) => json,
        Err(e) => return Frame::Malformed(e.to_string()),
    };

    let Some(tag) = json.get("source").and_then(Value::as_str) else {
        return Frame::Unrouted { source: None };
    };

    let source = match tag.parse::<Source>() {
        Ok(source) => source,
        Err(_) => {
            return Frame::Unrouted {
                source: Some(tag.to_string()),
            }
        }
    };

    let status = json
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_owned);

    Frame::Event(InboundEvent {
        source,
        status,
        body: json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_is_not_parsed() {
        assert_eq!(classify_frame("Connected to Doppelgänger server."), Frame::Banner);
        assert_eq!(classify_frame("Connected"), Frame::Banner);
    }

    #[test]
    fn test_routed_event() {
        let frame = classify_frame(r#"{"source":"reset_card","status":"success","RBL":26}"#);
        let Frame::Event(event) = frame else {
            panic!("expected event, got {frame:?}");
        };
        assert_eq!(event.source, Source::ResetCard);
        assert!(event.is_success());
        assert_eq!(event.field("RBL"), Some(&Value::from(26)));
    }

    #[test]
    fn test_failure_status() {
        let Frame::Event(event) = classify_frame(r#"{"source":"gpio","status":"error"}"#) else {
            panic!("expected event");
        };
        assert!(!event.is_success());
        assert_eq!(event.status.as_deref(), Some("error"));
    }

    #[test]
    fn test_unknown_and_missing_source() {
        assert_eq!(
            classify_frame(r#"{"source":"firmware","status":"success"}"#),
            Frame::Unrouted {
                source: Some("firmware".into())
            }
        );
        assert_eq!(
            classify_frame(r#"{"status":"success"}"#),
            Frame::Unrouted { source: None }
        );
        assert_eq!(classify_frame("[1, 2]"), Frame::Unrouted { source: None });
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(classify_frame("{not json"), Frame::Malformed(_)));
        assert!(matches!(classify_frame(""), Frame::Malformed(_)));
    }

    #[test]
    fn test_source_round_trips_through_str() {
        for source in Source::ALL {
            assert_eq!(source.as_str().parse::<Source>(), Ok(*source));
        }
        assert!("GPIO".parse::<Source>().is_err());
    }
}
