//! Host for web-content overlays drawn above other windows
//!
//! Each [`OverlayInstance`] owns a window on its own thread, keeps it in sync
//! with a live [`config::OverlayConfig`], binds an optional global hotkey and
//! receives event-bus payloads into its page.

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod error;
pub mod event_bus;
pub mod hotkeys;
pub mod logging;
pub mod overlay;
pub mod renderer;
pub mod types;
pub mod window;

pub use error::{OverlayError, Result};
pub use overlay::{OverlayHandle, OverlayInstance, OverlayOptions, Services};
