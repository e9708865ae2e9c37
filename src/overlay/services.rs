//! Shared services an overlay is built from

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::OverlayHandle;
use crate::config::PluginConfig;
use crate::constants::timing;
use crate::error::OverlayError;
use crate::event_bus::EventBus;
use crate::hotkeys::HotkeyDispatcher;
use crate::window::Platform;

/// Per-tick work injected into an overlay. Errors and panics are logged and
/// the timer keeps running.
pub type UpdateHook = Arc<dyn Fn(&OverlayHandle) -> anyhow::Result<()> + Send + Sync>;

/// Process-wide collaborators, built once at startup and shared by every overlay
#[derive(Clone, Default)]
pub struct Services {
    plugin_config: Option<Arc<PluginConfig>>,
    hotkeys: Option<Arc<HotkeyDispatcher>>,
    event_bus: Option<Arc<EventBus>>,
    platform: Option<Arc<dyn Platform>>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("plugin_config", &self.plugin_config.as_ref().map(|c| c.path().to_path_buf()))
            .field("hotkeys", &self.hotkeys.is_some())
            .field("event_bus", &self.event_bus.is_some())
            .field("platform", &self.platform.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin_config(mut self, plugin_config: Arc<PluginConfig>) -> Self {
        self.plugin_config = Some(plugin_config);
        self
    }

    pub fn with_hotkeys(mut self, hotkeys: Arc<HotkeyDispatcher>) -> Self {
        self.hotkeys = Some(hotkeys);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    fn resolve<T: ?Sized>(slot: &Option<Arc<T>>, overlay: &str, service: &str) -> Result<Arc<T>, OverlayError> {
        slot.clone().ok_or_else(|| OverlayError::Initialization {
            name: overlay.to_string(),
            reason: format!("{} service is not available", service),
        })
    }

    pub fn resolve_plugin_config(&self, overlay: &str) -> Result<Arc<PluginConfig>, OverlayError> {
        Self::resolve(&self.plugin_config, overlay, "plugin config")
    }

    pub fn resolve_hotkeys(&self, overlay: &str) -> Result<Arc<HotkeyDispatcher>, OverlayError> {
        Self::resolve(&self.hotkeys, overlay, "hotkey")
    }

    pub fn resolve_event_bus(&self, overlay: &str) -> Result<Arc<EventBus>, OverlayError> {
        Self::resolve(&self.event_bus, overlay, "event bus")
    }

    pub fn resolve_platform(&self, overlay: &str) -> Result<Arc<dyn Platform>, OverlayError> {
        Self::resolve(&self.platform, overlay, "window platform")
    }
}

/// Per-overlay construction options
#[derive(Clone)]
pub struct OverlayOptions {
    pub update_interval: Duration,
    pub update_hook: Option<UpdateHook>,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            update_interval: timing::UPDATE_INTERVAL,
            update_hook: None,
        }
    }
}

impl OverlayOptions {
    pub fn with_update_hook(
        mut self,
        hook: impl Fn(&OverlayHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.update_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_service_is_initialization_error() {
        let services = Services::new().with_event_bus(Arc::new(EventBus::new()));

        let err = services.resolve_plugin_config("mini").unwrap_err();
        assert!(matches!(err, OverlayError::Initialization { ref name, .. } if name == "mini"));
        assert!(err.to_string().contains("plugin config"));
        assert!(services.resolve_event_bus("mini").is_ok());
    }

    #[test]
    fn test_default_options_tick_every_second() {
        let options = OverlayOptions::default();
        assert_eq!(options.update_interval, Duration::from_millis(1000));
        assert!(options.update_hook.is_none());
    }
}
