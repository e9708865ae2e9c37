//! Configuration: live per-overlay records and the plugin-wide store

pub mod overlay;
pub mod plugin;

pub use overlay::{
    Change, ConfigChange, GlobalHotkeyType, HotkeySettings, ListenerId, OverlayConfig, OverlayConfigData,
};
pub use plugin::{GlobalSettings, PluginConfig};
