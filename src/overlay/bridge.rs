//! Applies overlay config changes to the live window
//!
//! Visibility, click-through, lock and frame rate go straight to the window;
//! a lock change also tells the page. Every hotkey field funnels into one
//! re-registration. Position and size are only written back from the window
//! (see `save_position_and_size`), never pushed to it.

use std::sync::{Arc, Weak};

use crate::config::{ConfigChange, ListenerId, OverlayConfig};

/// Receiver of the actions a config change maps to
pub trait ConfigTarget: Send + Sync {
    fn navigate(&self, url: &str);

    fn apply_visible(&self, visible: bool);

    fn apply_click_through(&self, click_through: bool);

    fn apply_locked(&self, locked: bool);

    fn apply_max_frame_rate(&self, fps: u32);

    fn notify_lock_state(&self);

    fn update_hotkey(&self);
}

pub fn apply(target: &dyn ConfigTarget, change: &ConfigChange) {
    match change {
        ConfigChange::Url(change) => target.navigate(&change.new),
        ConfigChange::Visible(change) => target.apply_visible(change.new),
        ConfigChange::ClickThru(change) => target.apply_click_through(change.new),
        ConfigChange::Locked(change) => {
            target.apply_locked(change.new);
            target.notify_lock_state();
        }
        ConfigChange::MaxFrameRate(change) => target.apply_max_frame_rate(change.new),
        ConfigChange::GlobalHotkeyEnabled(_)
        | ConfigChange::GlobalHotkeyModifiers(_)
        | ConfigChange::GlobalHotkey(_)
        | ConfigChange::GlobalHotkeyType(_) => target.update_hotkey(),
        ConfigChange::Position(_) | ConfigChange::Size(_) | ConfigChange::LogConsoleMessages(_) => {}
    }
}

/// Live subscription of a target to one config
#[derive(Debug)]
pub struct ConfigBridge {
    config: Weak<OverlayConfig>,
    listener: ListenerId,
}

impl ConfigBridge {
    /// Subscribe `target` to `config`. The target is held weakly.
    pub fn attach<T: ConfigTarget + 'static>(config: &Arc<OverlayConfig>, target: Weak<T>) -> Self {
        let listener = config.subscribe(move |change| {
            if let Some(target) = target.upgrade() {
                apply(target.as_ref(), change);
            }
        });
        Self {
            config: Arc::downgrade(config),
            listener,
        }
    }

    pub fn detach(self) {
        if let Some(config) = self.config.upgrade() {
            config.unsubscribe(self.listener);
        }
    }
}
