//! Live, observable configuration of a single overlay
//!
//! The host owns the config (usually through [`super::PluginConfig`]) and shares
//! it with the overlay. Every field has its own change notification; setters are
//! individually atomic and notify only when the value actually changed.
//! Listeners run after the field lock is released, so they may read or write
//! the config themselves.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::constants;
use crate::hotkeys::{Key, Modifiers};
use crate::types::{Dimensions, Position};

/// Action bound to the overlay's global hotkey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GlobalHotkeyType {
    #[default]
    ToggleVisible,
    ToggleClickthru,
    ToggleLock,
}

impl fmt::Display for GlobalHotkeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GlobalHotkeyType::ToggleVisible => "ToggleVisible",
            GlobalHotkeyType::ToggleClickthru => "ToggleClickthru",
            GlobalHotkeyType::ToggleLock => "ToggleLock",
        };
        f.write_str(s)
    }
}

impl From<String> for GlobalHotkeyType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ToggleVisible" => GlobalHotkeyType::ToggleVisible,
            "ToggleClickthru" => GlobalHotkeyType::ToggleClickthru,
            "ToggleLock" => GlobalHotkeyType::ToggleLock,
            other => {
                warn!(hotkey_type = %other, "Unknown hotkey type, falling back to ToggleVisible");
                GlobalHotkeyType::ToggleVisible
            }
        }
    }
}

impl From<GlobalHotkeyType> for String {
    fn from(value: GlobalHotkeyType) -> Self {
        value.to_string()
    }
}

/// Persisted form of an overlay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfigData {
    pub name: String,
    pub url: String,
    pub position: Position,
    pub size: Dimensions,
    pub is_visible: bool,
    pub is_click_thru: bool,
    pub is_locked: bool,
    pub max_frame_rate: u32,
    pub global_hotkey_enabled: bool,
    pub global_hotkey_modifiers: Modifiers,
    pub global_hotkey: Key,
    pub global_hotkey_type: GlobalHotkeyType,
    pub log_console_messages: bool,
}

impl Default for OverlayConfigData {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: constants::config::DEFAULT_URL.to_string(),
            position: Position::new(20, 20),
            size: Dimensions::default(),
            is_visible: true,
            is_click_thru: false,
            is_locked: false,
            max_frame_rate: constants::timing::DEFAULT_MAX_FRAME_RATE,
            global_hotkey_enabled: false,
            global_hotkey_modifiers: Modifiers::NONE,
            global_hotkey: Key::None,
            global_hotkey_type: GlobalHotkeyType::ToggleVisible,
            log_console_messages: false,
        }
    }
}

/// Old and new value of a changed field
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    Url(Change<String>),
    Position(Change<Position>),
    Size(Change<Dimensions>),
    Visible(Change<bool>),
    ClickThru(Change<bool>),
    Locked(Change<bool>),
    MaxFrameRate(Change<u32>),
    GlobalHotkeyEnabled(Change<bool>),
    GlobalHotkeyModifiers(Change<Modifiers>),
    GlobalHotkey(Change<Key>),
    GlobalHotkeyType(Change<GlobalHotkeyType>),
    LogConsoleMessages(Change<bool>),
}

/// Hotkey fields read together under one lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeySettings {
    pub enabled: bool,
    pub modifiers: Modifiers,
    pub key: Key,
    pub kind: GlobalHotkeyType,
}

pub type ListenerId = u64;
type Listener = Arc<dyn Fn(&ConfigChange) + Send + Sync>;

pub struct OverlayConfig {
    data: RwLock<OverlayConfigData>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl fmt::Debug for OverlayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayConfig")
            .field("data", &*self.data.read())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl OverlayConfig {
    /// Default configuration for a freshly created overlay
    pub fn with_name(name: &str) -> Self {
        Self::from_data(OverlayConfigData {
            name: name.to_string(),
            ..OverlayConfigData::default()
        })
    }

    pub fn from_data(mut data: OverlayConfigData) -> Self {
        data.max_frame_rate = data.max_frame_rate.max(1);
        Self {
            data: RwLock::new(data),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> OverlayConfigData {
        self.data.read().clone()
    }

    /// Register a change listener; keep the id to remove it again
    pub fn subscribe(&self, listener: impl Fn(&ConfigChange) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn notify(&self, change: ConfigChange) {
        debug!(overlay = %self.name(), change = ?change, "Overlay config changed");
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&change);
        }
    }

    /// Write one field and notify if it changed
    fn update<T: Clone + PartialEq>(
        &self,
        field: fn(&mut OverlayConfigData) -> &mut T,
        value: T,
        wrap: fn(Change<T>) -> ConfigChange,
    ) -> bool {
        let change = {
            let mut data = self.data.write();
            let slot = field(&mut data);
            if *slot == value {
                return false;
            }
            let old = std::mem::replace(slot, value.clone());
            Change { old, new: value }
        };
        self.notify(wrap(change));
        true
    }

    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    pub fn url(&self) -> String {
        self.data.read().url.clone()
    }

    pub fn position(&self) -> Position {
        self.data.read().position
    }

    pub fn size(&self) -> Dimensions {
        self.data.read().size
    }

    pub fn is_visible(&self) -> bool {
        self.data.read().is_visible
    }

    pub fn is_click_thru(&self) -> bool {
        self.data.read().is_click_thru
    }

    pub fn is_locked(&self) -> bool {
        self.data.read().is_locked
    }

    pub fn max_frame_rate(&self) -> u32 {
        self.data.read().max_frame_rate
    }

    pub fn log_console_messages(&self) -> bool {
        self.data.read().log_console_messages
    }

    pub fn hotkey_settings(&self) -> HotkeySettings {
        let data = self.data.read();
        HotkeySettings {
            enabled: data.global_hotkey_enabled,
            modifiers: data.global_hotkey_modifiers,
            key: data.global_hotkey,
            kind: data.global_hotkey_type,
        }
    }

    pub fn set_url(&self, url: impl Into<String>) -> bool {
        self.update(|d| &mut d.url, url.into(), ConfigChange::Url)
    }

    pub fn set_position(&self, position: Position) -> bool {
        self.update(|d| &mut d.position, position, ConfigChange::Position)
    }

    pub fn set_size(&self, size: Dimensions) -> bool {
        self.update(|d| &mut d.size, size, ConfigChange::Size)
    }

    pub fn set_visible(&self, visible: bool) -> bool {
        self.update(|d| &mut d.is_visible, visible, ConfigChange::Visible)
    }

    pub fn set_click_thru(&self, click_thru: bool) -> bool {
        self.update(|d| &mut d.is_click_thru, click_thru, ConfigChange::ClickThru)
    }

    pub fn set_locked(&self, locked: bool) -> bool {
        self.update(|d| &mut d.is_locked, locked, ConfigChange::Locked)
    }

    /// Frame rate must stay positive; zero is clamped to one
    pub fn set_max_frame_rate(&self, fps: u32) -> bool {
        if fps == 0 {
            warn!(overlay = %self.name(), "Max frame rate must be positive, clamping to 1");
        }
        self.update(|d| &mut d.max_frame_rate, fps.max(1), ConfigChange::MaxFrameRate)
    }

    pub fn set_global_hotkey_enabled(&self, enabled: bool) -> bool {
        self.update(|d| &mut d.global_hotkey_enabled, enabled, ConfigChange::GlobalHotkeyEnabled)
    }

    pub fn set_global_hotkey_modifiers(&self, modifiers: Modifiers) -> bool {
        self.update(|d| &mut d.global_hotkey_modifiers, modifiers, ConfigChange::GlobalHotkeyModifiers)
    }

    pub fn set_global_hotkey(&self, key: Key) -> bool {
        self.update(|d| &mut d.global_hotkey, key, ConfigChange::GlobalHotkey)
    }

    pub fn set_global_hotkey_type(&self, kind: GlobalHotkeyType) -> bool {
        self.update(|d| &mut d.global_hotkey_type, kind, ConfigChange::GlobalHotkeyType)
    }

    pub fn set_log_console_messages(&self, enabled: bool) -> bool {
        self.update(|d| &mut d.log_console_messages, enabled, ConfigChange::LogConsoleMessages)
    }
}

impl Serialize for OverlayConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OverlayConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        OverlayConfigData::deserialize(deserializer).map(OverlayConfig::from_data)
    }
}
