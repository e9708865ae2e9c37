//! Overlay lifecycle
//!
//! An [`OverlayInstance`] ties one config, one window, one update timer, a
//! global hotkey and a set of event-bus subscriptions together. Construction
//! only fails when a shared service is missing; everything after that is
//! logged and leaves the overlay in a degraded but usable state.

mod bridge;
mod scripts;
mod services;
mod timer;

pub use bridge::{ConfigBridge, ConfigTarget};
pub use services::{OverlayOptions, Services, UpdateHook};

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::config::{GlobalHotkeyType, OverlayConfig, PluginConfig};
use crate::error::OverlayError;
use crate::event_bus::{self, EventBus, EventSubscriber, SubscriberId};
use crate::hotkeys::{Hotkey, HotkeyCallback, HotkeyDispatcher, Key};
use crate::logging::{LogEntry, LogLevel, LogOutcome, OverlayLog};
use crate::renderer::RendererEvent;
use crate::window::{OverlayWindow, Platform, WindowOptions};
use timer::UpdateTimer;

struct OverlayCore {
    name: String,
    self_ref: Weak<OverlayCore>,
    config: RwLock<Option<Arc<OverlayConfig>>>,
    plugin_config: Arc<PluginConfig>,
    hotkeys: Arc<HotkeyDispatcher>,
    bus: Arc<EventBus>,
    subscriber_id: SubscriberId,
    window: RwLock<Option<Arc<OverlayWindow>>>,
    bridge: Mutex<Option<ConfigBridge>>,
    hotkey_callback: Mutex<Option<HotkeyCallback>>,
    timer: Mutex<Option<UpdateTimer>>,
    update_hook: Option<UpdateHook>,
    log: OverlayLog,
    disposed: AtomicBool,
}

impl OverlayCore {
    fn config(&self) -> Option<Arc<OverlayConfig>> {
        self.config.read().clone()
    }

    fn window(&self) -> Option<Arc<OverlayWindow>> {
        self.window.read().clone()
    }

    fn log(&self, level: LogLevel, message: &str) {
        if self.log.log(level, message) == LogOutcome::IncompatibleAddon {
            self.stop();
        }
    }

    fn stop(&self) {
        if let Some(timer) = self.timer.lock().as_ref() {
            timer.stop();
        }
    }

    fn initialize(&self, platform: Arc<dyn Platform>) -> anyhow::Result<()> {
        let config = self.config().context("overlay has no configuration")?;

        // Wired first so config changes still apply after a failed window
        *self.bridge.lock() = Some(ConfigBridge::attach(&config, self.self_ref.clone()));

        let window = Arc::new(OverlayWindow::create(
            platform,
            WindowOptions {
                title: self.name.clone(),
                url: config.url(),
                position: config.position(),
                size: config.size(),
                max_frame_rate: config.max_frame_rate(),
            },
        )?);
        *self.window.write() = Some(window.clone());

        window.set_title(&self.name);
        window.set_click_through(config.is_click_thru());

        let weak = self.self_ref.clone();
        window.set_event_handler(Arc::new(move |event| {
            if let Some(core) = weak.upgrade() {
                core.on_renderer_event(event);
            }
        }));

        self.update_hotkey();

        if let Err(e) = window.load_current() {
            self.log(LogLevel::Error, &format!("Initial page load failed: {:#}", e));
        }

        window.set_visible(config.is_visible());
        window.set_locked(config.is_locked());
        window.set_max_frame_rate(config.max_frame_rate());
        Ok(())
    }

    fn on_renderer_event(&self, event: RendererEvent) {
        match event {
            RendererEvent::LoadError { code, text, url } => {
                self.log(LogLevel::Error, &format!("BrowserError: {}, {}, {}", code, text, url));
            }
            RendererEvent::LoadStart => {
                // The new page has not subscribed to anything yet
                self.bus.unsubscribe_all(self.subscriber_id);
            }
            RendererEvent::LoadComplete { status_code, url } => {
                self.log(LogLevel::Debug, &format!("BrowserLoad: {}: {}", status_code, url));
                self.notify_lock_state();
            }
            RendererEvent::ConsoleMessage { message, source, line } => {
                let enabled = self.config().is_some_and(|config| config.log_console_messages());
                if enabled {
                    self.log(
                        LogLevel::Info,
                        &format!("BrowserConsole: {} (Source: {}, Line: {})", message, source, line),
                    );
                }
            }
        }
    }

    fn execute_script(&self, code: &str) {
        let Some(window) = self.window() else {
            return;
        };
        if let Err(e) = window.execute_script(code) {
            self.log(LogLevel::Warning, &format!("ExecuteScript: {:#}", e));
        }
    }

    fn hotkey_callback(config: &Arc<OverlayConfig>, kind: GlobalHotkeyType) -> HotkeyCallback {
        let config = Arc::downgrade(config);
        match kind {
            GlobalHotkeyType::ToggleVisible => Arc::new(move || {
                if let Some(config) = config.upgrade() {
                    config.set_visible(!config.is_visible());
                }
            }),
            GlobalHotkeyType::ToggleClickthru => Arc::new(move || {
                if let Some(config) = config.upgrade() {
                    config.set_click_thru(!config.is_click_thru());
                }
            }),
            GlobalHotkeyType::ToggleLock => Arc::new(move || {
                if let Some(config) = config.upgrade() {
                    config.set_locked(!config.is_locked());
                }
            }),
        }
    }

    fn release_hotkey(&self) {
        let previous = self.hotkey_callback.lock().take();
        if let Some(previous) = previous {
            self.hotkeys.unregister(&previous);
        }
    }

    fn tick(&self) {
        let Some(hook) = &self.update_hook else {
            return;
        };
        let Some(core) = self.self_ref.upgrade() else {
            return;
        };
        let handle = OverlayHandle { core };

        let error = match panic::catch_unwind(AssertUnwindSafe(|| hook(&handle))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => OverlayError::UpdateTick(format!("{:#}", e)),
            Err(panic) => OverlayError::UpdateTick(panic_message(panic.as_ref())),
        };
        self.log(LogLevel::Error, &format!("Update: {}", error));
    }

    /// Run one teardown step, containing any panic so the next step still runs
    fn teardown_step(&self, step: &str, f: impl FnOnce()) {
        if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
            self.log(LogLevel::Error, &format!("Dispose: {} failed", step));
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.teardown_step("unsubscribe", || self.bus.unsubscribe_all(self.subscriber_id));
        // No lock may be held while a thread is joined
        self.teardown_step("timer", || {
            let timer = self.timer.lock().take();
            if let Some(timer) = timer {
                timer.shutdown();
            }
        });
        self.teardown_step("config listener", || {
            let bridge = self.bridge.lock().take();
            if let Some(bridge) = bridge {
                bridge.detach();
            }
        });
        self.teardown_step("window", || {
            let window = self.window.write().take();
            if let Some(window) = window {
                window.close();
            }
        });
        self.teardown_step("hotkey", || self.release_hotkey());

        *self.config.write() = None;
        info!(overlay = %self.name, "Overlay disposed");
    }
}

impl ConfigTarget for OverlayCore {
    fn navigate(&self, url: &str) {
        let Some(window) = self.window() else {
            return;
        };
        if let Err(e) = window.navigate(url) {
            self.log(LogLevel::Error, &format!("Navigate: {:#}", e));
        }
    }

    fn apply_visible(&self, visible: bool) {
        if let Some(window) = self.window() {
            window.set_visible(visible);
        }
    }

    fn apply_click_through(&self, click_through: bool) {
        if let Some(window) = self.window() {
            window.set_click_through(click_through);
        }
    }

    fn apply_locked(&self, locked: bool) {
        if let Some(window) = self.window() {
            window.set_locked(locked);
        }
    }

    fn apply_max_frame_rate(&self, fps: u32) {
        if let Some(window) = self.window() {
            window.set_max_frame_rate(fps);
        }
    }

    /// Push the current lock state to the page
    fn notify_lock_state(&self) {
        let Some(config) = self.config() else {
            return;
        };
        self.execute_script(&scripts::lock_state(config.is_locked()));
    }

    /// Re-bind the global hotkey from config. The old binding is always
    /// released first, so calling this repeatedly leaves at most one binding.
    fn update_hotkey(&self) {
        let Some(config) = self.config() else {
            return;
        };
        let settings = config.hotkey_settings();

        let mut slot = self.hotkey_callback.lock();
        if let Some(previous) = slot.take() {
            self.hotkeys.unregister(&previous);
        }
        if !settings.enabled || settings.key == Key::None {
            return;
        }

        let callback = Self::hotkey_callback(&config, settings.kind);
        match self.hotkeys.register(settings.modifiers, settings.key, callback.clone()) {
            Ok(()) => *slot = Some(callback),
            Err(e) => {
                drop(slot);
                let combo = Hotkey::new(settings.modifiers, settings.key);
                self.log(
                    LogLevel::Error,
                    &format!("Failed to register global hotkey {}: {}", combo, e),
                );
            }
        }
    }
}

impl EventSubscriber for OverlayCore {
    fn handle_event(&self, payload: &Value) {
        self.execute_script(&scripts::event_callback(payload));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// View of an overlay handed to its update hook
#[derive(Clone)]
pub struct OverlayHandle {
    core: Arc<OverlayCore>,
}

impl OverlayHandle {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn config(&self) -> Option<Arc<OverlayConfig>> {
        self.core.config()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.core.bus
    }

    pub fn execute_script(&self, code: &str) {
        self.core.execute_script(code);
    }

    pub fn send_message(&self, message: &str) {
        self.core.execute_script(&scripts::broadcast_message(message));
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.core.log(level, message);
    }
}

/// One overlay: window, config, update timer, hotkey and subscriptions
pub struct OverlayInstance {
    core: Arc<OverlayCore>,
}

impl OverlayInstance {
    /// Build and initialize an overlay.
    ///
    /// When `config` is `None` the plugin config's entry for `name` is used,
    /// created with defaults if it does not exist yet. Only missing services
    /// are reported as errors; failures while setting up the window are
    /// logged and the instance is returned anyway.
    pub fn new(
        name: &str,
        config: Option<Arc<OverlayConfig>>,
        services: &Services,
        options: OverlayOptions,
    ) -> Result<Self, OverlayError> {
        let plugin_config = services.resolve_plugin_config(name)?;
        let hotkeys = services.resolve_hotkeys(name)?;
        let bus = services.resolve_event_bus(name)?;
        let platform = services.resolve_platform(name)?;

        let config = config
            .unwrap_or_else(|| plugin_config.overlay_or_insert_with(name, OverlayConfig::with_name));

        let core = Arc::new_cyclic(|self_ref| OverlayCore {
            name: name.to_string(),
            self_ref: self_ref.clone(),
            config: RwLock::new(Some(config)),
            plugin_config,
            hotkeys,
            bus,
            subscriber_id: event_bus::next_subscriber_id(),
            window: RwLock::new(None),
            bridge: Mutex::new(None),
            hotkey_callback: Mutex::new(None),
            timer: Mutex::new(None),
            update_hook: options.update_hook,
            log: OverlayLog::new(name),
            disposed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&core);
        match UpdateTimer::spawn(name, options.update_interval, move || {
            if let Some(core) = weak.upgrade() {
                core.tick();
            }
        }) {
            Ok(timer) => *core.timer.lock() = Some(timer),
            Err(e) => core.log(LogLevel::Error, &format!("Update timer: {:#}", e)),
        }

        if let Err(e) = core.initialize(platform) {
            core.log(LogLevel::Error, &format!("InitializeOverlay: {} {:#}", name, e));
        }
        info!(overlay = %name, "Overlay created");

        Ok(Self { core })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// `None` once the overlay is disposed
    pub fn config(&self) -> Option<Arc<OverlayConfig>> {
        self.core.config()
    }

    pub fn plugin_config(&self) -> &Arc<PluginConfig> {
        &self.core.plugin_config
    }

    pub fn window(&self) -> Option<Arc<OverlayWindow>> {
        self.core.window()
    }

    pub fn handle(&self) -> OverlayHandle {
        OverlayHandle {
            core: self.core.clone(),
        }
    }

    /// Open a receiver for this overlay's log lines
    pub fn subscribe_log(&self) -> Receiver<LogEntry> {
        self.core.log.subscribe()
    }

    /// Arm the update timer; calling again restarts the interval
    pub fn start(&self) -> Result<(), OverlayError> {
        if self.core.config().is_none() {
            return Err(OverlayError::InvalidState {
                name: self.core.name.clone(),
                operation: "start",
            });
        }
        match self.core.timer.lock().as_ref() {
            Some(timer) => timer.start(),
            None => debug!(overlay = %self.core.name, "No update timer to start"),
        }
        Ok(())
    }

    /// Disarm the update timer; the window stays up
    pub fn stop(&self) {
        self.core.stop();
    }

    pub fn is_running(&self) -> bool {
        self.core.timer.lock().as_ref().is_some_and(|timer| timer.is_running())
    }

    pub fn navigate(&self, url: &str) {
        self.core.navigate(url);
    }

    pub fn reload(&self) {
        let Some(window) = self.core.window() else {
            return;
        };
        if let Err(e) = window.reload() {
            self.core.log(LogLevel::Error, &format!("Reload: {:#}", e));
        }
    }

    pub fn execute_script(&self, code: &str) {
        self.core.execute_script(code);
    }

    /// Broadcast `message` to the page as a custom event
    pub fn send_message(&self, message: &str) {
        self.core.execute_script(&scripts::broadcast_message(message));
    }

    /// Text sent to this overlay by the host; ignored by default
    pub fn overlay_message(&self, message: &str) {
        debug!(overlay = %self.core.name, message = %message, "Overlay message ignored");
    }

    pub fn set_accept_focus(&self, accept_focus: bool) {
        if let Some(window) = self.core.window() {
            window.set_accept_focus(accept_focus);
        }
    }

    pub fn visible(&self) -> bool {
        self.core.window().is_some_and(|window| window.visible())
    }

    pub fn set_visible(&self, visible: bool) {
        self.core.apply_visible(visible);
    }

    /// Copy the window's live geometry into the config
    pub fn save_position_and_size(&self) {
        let (Some(config), Some(window)) = (self.core.config(), self.core.window()) else {
            return;
        };
        config.set_position(window.position());
        config.set_size(window.size());
    }

    pub fn subscribe(&self, topic: &str) {
        let Some(core) = self.core.self_ref.upgrade() else {
            return;
        };
        let subscriber: Arc<dyn EventSubscriber> = core;
        self.core.bus.subscribe(topic, self.core.subscriber_id, &subscriber);
    }

    pub fn unsubscribe(&self, topic: &str) {
        self.core.bus.unsubscribe(topic, self.core.subscriber_id);
    }

    pub fn unsubscribe_all(&self) {
        self.core.bus.unsubscribe_all(self.core.subscriber_id);
    }

    pub fn subscriber_id(&self) -> SubscriberId {
        self.core.subscriber_id
    }

    /// Re-bind the global hotkey from the current config
    pub fn update_hotkey(&self) {
        self.core.update_hotkey();
    }

    /// Tear everything down. Each step runs even if an earlier one failed;
    /// nothing is reported to the caller and later calls do nothing.
    pub fn dispose(&self) {
        self.core.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::Acquire)
    }
}

impl Drop for OverlayInstance {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlayConfigData;
    use crate::hotkeys::Modifiers;
    use crate::types::{Dimensions, Position};
    use crate::window::headless::{HeadlessPlatform, HeadlessRecorder};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct Fixture {
        platform: Arc<HeadlessPlatform>,
        hotkeys: Arc<HotkeyDispatcher>,
        bus: Arc<EventBus>,
        services: Services,
    }

    impl Fixture {
        fn new() -> Self {
            let platform = Arc::new(HeadlessPlatform::new());
            let hotkeys = Arc::new(HotkeyDispatcher::local());
            let bus = Arc::new(EventBus::new());
            let plugin_config = Arc::new(PluginConfig::new(
                std::env::temp_dir().join("overlay-host-overlay-tests.json"),
            ));
            let services = Services::new()
                .with_plugin_config(plugin_config)
                .with_hotkeys(hotkeys.clone())
                .with_event_bus(bus.clone())
                .with_platform(platform.clone());
            Self {
                platform,
                hotkeys,
                bus,
                services,
            }
        }

        fn recorder(&self) -> Arc<HeadlessRecorder> {
            self.platform.recorder()
        }

        fn overlay(&self, config: OverlayConfigData) -> (OverlayInstance, Arc<OverlayConfig>) {
            self.overlay_with(config, OverlayOptions::default())
        }

        fn overlay_with(
            &self,
            config: OverlayConfigData,
            options: OverlayOptions,
        ) -> (OverlayInstance, Arc<OverlayConfig>) {
            let config = Arc::new(OverlayConfig::from_data(config));
            let overlay = OverlayInstance::new("mini", Some(config.clone()), &self.services, options).unwrap();
            flush(&overlay);
            (overlay, config)
        }
    }

    fn flush(overlay: &OverlayInstance) {
        if let Some(window) = overlay.window() {
            window.flush().unwrap();
        }
    }

    fn data() -> OverlayConfigData {
        OverlayConfigData {
            name: "mini".to_string(),
            ..OverlayConfigData::default()
        }
    }

    fn lock_scripts(recorder: &HeadlessRecorder) -> usize {
        recorder
            .snapshot()
            .scripts
            .iter()
            .filter(|script| script.contains("onOverlayStateUpdate"))
            .count()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_missing_service_fails_construction() {
        let services = Services::new().with_event_bus(Arc::new(EventBus::new()));
        let result = OverlayInstance::new("mini", None, &services, OverlayOptions::default());
        assert!(matches!(result, Err(OverlayError::Initialization { .. })));
    }

    #[test]
    fn test_window_failure_is_logged_not_raised() {
        let fixture = Fixture::new();
        let services = fixture
            .services
            .clone()
            .with_platform(Arc::new(HeadlessPlatform::failing()));

        let overlay = OverlayInstance::new("mini", None, &services, OverlayOptions::default()).unwrap();

        assert!(overlay.window().is_none());
        assert!(!overlay.visible());
        overlay.navigate("https://example.invalid/");
        overlay.execute_script("1");
        overlay.dispose();
    }

    #[test]
    fn test_hotkey_rebinds_after_window_failure() {
        let fixture = Fixture::new();
        let services = fixture
            .services
            .clone()
            .with_platform(Arc::new(HeadlessPlatform::failing()));
        let config = Arc::new(OverlayConfig::from_data(data()));
        let overlay = OverlayInstance::new("mini", Some(config.clone()), &services, OverlayOptions::default()).unwrap();
        assert!(overlay.window().is_none());

        config.set_global_hotkey_modifiers(Modifiers::CONTROL);
        config.set_global_hotkey(Key::Char('J'));
        config.set_global_hotkey_enabled(true);

        assert!(fixture.hotkeys.is_bound(Hotkey::new(Modifiers::CONTROL, Key::Char('J'))));
        overlay.dispose();
        assert_eq!(fixture.hotkeys.binding_count(), 0);
        assert_eq!(config.listener_count(), 0);
    }

    /// Backend whose release panics, as a broken OS hook might
    struct PanickingUngrab;

    impl crate::hotkeys::HotkeyBackend for PanickingUngrab {
        fn grab(&self, _hotkey: Hotkey) -> anyhow::Result<()> {
            Ok(())
        }

        fn ungrab(&self, _hotkey: Hotkey) -> anyhow::Result<()> {
            panic!("ungrab exploded");
        }
    }

    #[test]
    fn test_dispose_contains_panicking_step() {
        let fixture = Fixture::new();
        let hotkeys = Arc::new(HotkeyDispatcher::new(Box::new(PanickingUngrab)));
        let services = fixture.services.clone().with_hotkeys(hotkeys.clone());
        let config = Arc::new(OverlayConfig::from_data(OverlayConfigData {
            global_hotkey_enabled: true,
            global_hotkey_modifiers: Modifiers::ALT,
            global_hotkey: Key::F(8),
            ..data()
        }));
        let overlay = OverlayInstance::new("mini", Some(config.clone()), &services, OverlayOptions::default()).unwrap();
        overlay.subscribe("party");
        let window = overlay.window().unwrap();
        let log = overlay.subscribe_log();

        overlay.dispose();

        assert!(overlay.is_disposed());
        assert!(window.is_closed());
        assert!(overlay.config().is_none());
        assert_eq!(fixture.bus.subscriber_count("party"), 0);
        assert_eq!(config.listener_count(), 0);
        let entry = log.try_iter().find(|entry| entry.level == LogLevel::Error).unwrap();
        assert_eq!(entry.message, "mini: Dispose: hotkey failed");
    }

    #[test]
    fn test_missing_config_comes_from_plugin_config() {
        let fixture = Fixture::new();
        let overlay = OverlayInstance::new("fresh", None, &fixture.services, OverlayOptions::default()).unwrap();

        let config = overlay.config().unwrap();
        assert_eq!(config.name(), "fresh");
        assert!(Arc::ptr_eq(&config, &overlay.plugin_config().overlay("fresh").unwrap()));
    }

    #[test]
    fn test_initialization_loads_page_and_applies_state() {
        let fixture = Fixture::new();
        let (overlay, _config) = fixture.overlay(OverlayConfigData {
            url: "https://example.invalid/mini.html".to_string(),
            is_locked: true,
            is_click_thru: true,
            max_frame_rate: 10,
            ..data()
        });

        let recorder = fixture.recorder().snapshot();
        assert_eq!(recorder.loads, vec!["https://example.invalid/mini.html".to_string()]);
        assert_eq!(recorder.visible_calls, vec![true]);
        assert_eq!(recorder.locked, vec![true]);
        assert_eq!(recorder.click_through, vec![true]);
        assert!(recorder.titles.iter().all(|title| title == "mini"));
        assert_eq!(overlay.window().unwrap().max_frame_rate(), 10);
        assert!(overlay.visible());
    }

    #[test]
    fn test_load_complete_pushes_lock_state() {
        let fixture = Fixture::new();
        let (_overlay, _config) = fixture.overlay(OverlayConfigData {
            is_locked: true,
            ..data()
        });

        let scripts = fixture.recorder().snapshot().scripts;
        assert_eq!(
            scripts,
            vec!["document.dispatchEvent(new CustomEvent('onOverlayStateUpdate', { detail: { isLocked: true } }));"]
        );
    }

    #[test]
    fn test_start_without_config_is_invalid_state() {
        let fixture = Fixture::new();
        let (overlay, _config) = fixture.overlay(data());
        overlay.dispose();

        let err = overlay.start().unwrap_err();
        assert!(matches!(err, OverlayError::InvalidState { operation: "start", .. }));
    }

    #[test]
    fn test_hidden_overlay_becomes_visible_exactly_once() {
        let fixture = Fixture::new();
        let (overlay, config) = fixture.overlay(OverlayConfigData {
            is_visible: false,
            ..data()
        });
        overlay.start().unwrap();

        config.set_visible(true);
        flush(&overlay);

        assert!(overlay.visible());
        assert_eq!(fixture.recorder().snapshot().visible_calls, vec![true]);
    }

    #[test]
    fn test_lock_change_locks_window_and_notifies_page_once() {
        let fixture = Fixture::new();
        let (overlay, config) = fixture.overlay(data());
        let before = lock_scripts(&fixture.recorder());

        config.set_locked(true);
        flush(&overlay);

        assert!(overlay.window().unwrap().is_locked());
        assert_eq!(lock_scripts(&fixture.recorder()), before + 1);
        assert!(fixture.recorder().snapshot().scripts.last().unwrap().contains("isLocked: true"));
    }

    #[test]
    fn test_ctrl_l_toggles_lock() {
        let fixture = Fixture::new();
        let (overlay, config) = fixture.overlay(OverlayConfigData {
            global_hotkey_enabled: true,
            global_hotkey_modifiers: Modifiers::CONTROL,
            global_hotkey: Key::Char('L'),
            global_hotkey_type: GlobalHotkeyType::ToggleLock,
            ..data()
        });
        let before = lock_scripts(&fixture.recorder());

        assert!(fixture.hotkeys.dispatch(Hotkey::new(Modifiers::CONTROL, Key::Char('L'))));
        flush(&overlay);

        assert!(config.is_locked());
        assert!(overlay.window().unwrap().is_locked());
        assert_eq!(lock_scripts(&fixture.recorder()), before + 1);
    }

    #[test]
    fn test_update_hotkey_is_idempotent() {
        let fixture = Fixture::new();
        let (overlay, _config) = fixture.overlay(OverlayConfigData {
            global_hotkey_enabled: true,
            global_hotkey_modifiers: Modifiers::ALT,
            global_hotkey: Key::F(3),
            ..data()
        });

        overlay.update_hotkey();
        overlay.update_hotkey();

        assert_eq!(fixture.hotkeys.binding_count(), 1);
    }

    #[test]
    fn test_hotkey_change_rebinds() {
        let fixture = Fixture::new();
        let (_overlay, config) = fixture.overlay(OverlayConfigData {
            global_hotkey_enabled: true,
            global_hotkey_modifiers: Modifiers::ALT,
            global_hotkey: Key::F(3),
            ..data()
        });

        config.set_global_hotkey(Key::F(4));
        assert!(!fixture.hotkeys.is_bound(Hotkey::new(Modifiers::ALT, Key::F(3))));
        assert!(fixture.hotkeys.is_bound(Hotkey::new(Modifiers::ALT, Key::F(4))));

        config.set_global_hotkey_enabled(false);
        assert_eq!(fixture.hotkeys.binding_count(), 0);
    }

    #[test]
    fn test_hotkey_conflict_is_logged() {
        let fixture = Fixture::new();
        let squatter: HotkeyCallback = Arc::new(|| {});
        fixture
            .hotkeys
            .register(Modifiers::CONTROL, Key::Char('L'), squatter)
            .unwrap();

        let (overlay, config) = fixture.overlay(data());
        let log = overlay.subscribe_log();
        config.set_global_hotkey_modifiers(Modifiers::CONTROL);
        config.set_global_hotkey(Key::Char('L'));
        config.set_global_hotkey_enabled(true);

        let entry = log.try_iter().find(|entry| entry.level == LogLevel::Error).unwrap();
        assert!(entry.message.contains("Ctrl+L"));
        assert_eq!(fixture.hotkeys.binding_count(), 1);
    }

    #[test]
    fn test_dispose_releases_everything_and_is_idempotent() {
        let fixture = Fixture::new();
        let (overlay, config) = fixture.overlay(OverlayConfigData {
            global_hotkey_enabled: true,
            global_hotkey: Key::Char('K'),
            global_hotkey_modifiers: Modifiers::CONTROL,
            ..data()
        });
        overlay.subscribe("party");
        let window = overlay.window().unwrap();

        overlay.dispose();
        overlay.dispose();

        assert!(overlay.is_disposed());
        assert!(window.is_closed());
        assert!(overlay.window().is_none());
        assert_eq!(fixture.hotkeys.binding_count(), 0);
        assert_eq!(fixture.bus.subscriber_count("party"), 0);
        assert_eq!(config.listener_count(), 0);
        assert_eq!(fixture.recorder().snapshot().destroyed, 1);
    }

    #[test]
    fn test_paint_after_dispose_does_nothing() {
        let fixture = Fixture::new();
        let (overlay, _config) = fixture.overlay(data());
        let window = overlay.window().unwrap();
        overlay.dispose();
        let blits = fixture.recorder().snapshot().blits;

        window.request_frame();
        assert!(!window.paint());
        assert_eq!(fixture.recorder().snapshot().blits, blits);
    }

    #[test]
    fn test_send_message_script_round_trips() {
        let fixture = Fixture::new();
        let (overlay, _config) = fixture.overlay(data());

        overlay.send_message("a\"b");

        let script = fixture.recorder().snapshot().scripts.last().unwrap().clone();
        let start = script.find("message: ").unwrap() + "message: ".len();
        let end = script.rfind(" } }").unwrap();
        let parsed: String = serde_json::from_str(&script[start..end]).unwrap();
        assert_eq!(parsed, "a\"b");
    }

    #[test]
    fn test_event_bus_delivery_follows_subscription() {
        let fixture = Fixture::new();
        let (overlay, _config) = fixture.overlay(data());
        let callbacks = |recorder: &HeadlessRecorder| {
            recorder
                .snapshot()
                .scripts
                .iter()
                .filter(|script| script.starts_with("if(window.__OverlayCallback)"))
                .count()
        };

        overlay.subscribe("T");
        fixture.bus.publish("T", &json!({"n": 1}));
        assert_eq!(callbacks(&fixture.recorder()), 1);

        overlay.unsubscribe("T");
        fixture.bus.publish("T", &json!({"n": 2}));
        assert_eq!(callbacks(&fixture.recorder()), 1);
    }

    #[test]
    fn test_page_load_drops_subscriptions() {
        let fixture = Fixture::new();
        let (overlay, _config) = fixture.overlay(data());
        overlay.subscribe("T");

        overlay.reload();

        assert_eq!(fixture.bus.subscriber_count("T"), 0);
    }

    #[test]
    fn test_url_change_navigates() {
        let fixture = Fixture::new();
        let (_overlay, config) = fixture.overlay(data());

        config.set_url("https://example.invalid/next.html");

        let loads = fixture.recorder().snapshot().loads;
        assert_eq!(loads.last().unwrap(), "https://example.invalid/next.html");
    }

    #[test]
    fn test_console_messages_follow_config() {
        let fixture = Fixture::new();
        let (overlay, config) = fixture.overlay(data());
        let log = overlay.subscribe_log();
        let console = || RendererEvent::ConsoleMessage {
            message: "hello".to_string(),
            source: "app.js".to_string(),
            line: 7,
        };

        fixture.recorder().emit(console());
        assert!(log.try_recv().is_err());

        config.set_log_console_messages(true);
        fixture.recorder().emit(console());
        assert_eq!(
            log.try_recv().unwrap().message,
            "mini: BrowserConsole: hello (Source: app.js, Line: 7)"
        );
    }

    #[test]
    fn test_incompatible_addon_stops_and_silences() {
        let fixture = Fixture::new();
        let (overlay, _config) = fixture.overlay(data());
        let log = overlay.subscribe_log();
        overlay.start().unwrap();

        fixture.recorder().emit(RendererEvent::LoadError {
            code: -2,
            text: "Xilium.CefGlue.CefRuntimeException".to_string(),
            url: "about:blank".to_string(),
        });

        assert!(!overlay.is_running());
        assert_eq!(log.try_iter().count(), 2);

        fixture.recorder().emit(RendererEvent::LoadError {
            code: -2,
            text: "again".to_string(),
            url: "about:blank".to_string(),
        });
        assert!(log.try_recv().is_err());
    }

    #[test]
    fn test_update_hook_runs_each_tick_and_survives_errors() {
        let fixture = Fixture::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let options = OverlayOptions::default()
            .with_update_interval(Duration::from_millis(5))
            .with_update_hook(move |handle| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(handle.name(), "mini");
                match n {
                    0 => anyhow::bail!("first tick fails"),
                    1 => panic!("second tick panics"),
                    _ => Ok(()),
                }
            });
        let (overlay, _config) = fixture.overlay_with(data(), options);
        let log = overlay.subscribe_log();

        overlay.start().unwrap();

        assert!(wait_until(|| ticks.load(Ordering::SeqCst) >= 3));
        overlay.stop();
        let errors: Vec<_> = log.try_iter().filter(|e| e.level == LogLevel::Error).collect();
        assert!(errors[0].message.contains("first tick fails"));
        assert!(errors[1].message.contains("second tick panics"));
    }

    #[test]
    fn test_save_position_and_size_copies_live_geometry() {
        let fixture = Fixture::new();
        let (overlay, config) = fixture.overlay(OverlayConfigData {
            position: Position::new(40, 50),
            size: Dimensions::new(320, 200),
            ..data()
        });
        let window = overlay.window().unwrap();
        window.set_position(Position::new(400, 300));
        window.set_size(Dimensions::new(640, 480));
        window.flush().unwrap();

        overlay.save_position_and_size();

        assert_eq!(config.position(), Position::new(400, 300));
        assert_eq!(config.size(), Dimensions::new(640, 480));
    }

    #[test]
    fn test_set_accept_focus_forwards_to_window() {
        let fixture = Fixture::new();
        let (overlay, _config) = fixture.overlay(data());

        overlay.set_accept_focus(false);
        flush(&overlay);

        assert_eq!(fixture.recorder().snapshot().accept_focus, vec![false]);
    }
}
