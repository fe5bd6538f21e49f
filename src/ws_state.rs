//! Shared WebSocket link state
//!
//! Used by the dispatcher core and by both the WASM and native transports.

/// State of the dispatcher's single device connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkState {
    /// No socket has been created yet
    #[default]
    Absent,
    Connecting,
    Open,
    /// The last socket closed; a reconnect may be pending
    Closed,
}

impl LinkState {
    pub fn is_open(&self) -> bool {
        matches!(self, LinkState::Open)
    }

    pub fn label(&self) -> &'static str {
        match self {
            LinkState::Absent => "absent",
            LinkState::Connecting => "connecting",
            LinkState::Open => "open",
            LinkState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
