//! Platform-agnostic core module - shared between the browser build and CLI

pub mod cards;
pub mod commands;
pub mod dispatcher;
pub mod forms;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod validation;

pub use cards::{parse_cards_csv, CardRow, CardTable, Cell, Column, SortOrder};
pub use commands::{
    Command, GpioCommand, MaintenanceAction, NotificationsCommand, ReaderType, ResetCardCommand,
};
pub use dispatcher::{
    ConnectionId, DispatchError, Dispatcher, Link, LinkConfig, Transport, TransportError,
    TransportEvent, DEFAULT_RECONNECT_DELAY, DEVICE_WS_PORT,
};
pub use forms::{
    settings_reply_message, DebugForm, GpioForm, NotificationsForm, PaxtonResetForm, ReaderForm,
    ResetCardForm, Submission,
};
pub use protocol::{classify_frame, Frame, InboundEvent, Source};
pub use registry::{Handler, HandlerError, HandlerRegistry, RouteOutcome, SharedRegistry};
pub use resources::{
    DebugConfig, FirmwareInfo, GpioSettings, NetworkInfo, NotificationSettings, ReaderConfig,
    ResetCardConfig, ResetCardEntry, ResourceError, CARDS_CSV_PATH, DEFAULT_PAXTON_RESET_HEX,
};
pub use validation::{
    validate_gpio_input, validate_paxton_reset_input, validate_reset_card_input, ValidationErrors,
};
