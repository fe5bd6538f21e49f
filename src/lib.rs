//! Doppelganger admin link
//!
//! Keeps one WebSocket to the card-reader controller, routes its replies to
//! handlers keyed by `source`, and turns admin form input into commands.
//! The same core is driven by a native CLI and by the browser page.

pub mod core;
pub mod ws_state;

#[cfg(feature = "cli")]
pub mod websocket_native;

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
pub mod websocket_wasm;

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();

    // Initialize tracing for browser console
    tracing_wasm::set_as_global_default();
}
