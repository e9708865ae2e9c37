//! Global hotkey registry
//!
//! One [`HotkeyDispatcher`] is built at startup and shared by every overlay.
//! Bindings are keyed by the resolved (modifiers, key) combo and removed by the
//! identity of the callback that was registered, never by recomputing the combo
//! from configuration that may have changed since.

mod keys;
pub mod x11;

pub use keys::{Hotkey, Key, Modifiers};

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;
use tracing::{debug, info, warn};

use crate::error::OverlayError;

/// Action run when a bound combo is pressed
pub type HotkeyCallback = Arc<dyn Fn() + Send + Sync>;

/// OS-level side of the registry: acquires and releases the system-wide grab
pub trait HotkeyBackend: Send + Sync {
    /// Fails when the combo is owned by another client or cannot be expressed
    fn grab(&self, hotkey: Hotkey) -> Result<()>;

    fn ungrab(&self, hotkey: Hotkey) -> Result<()>;
}

/// Backend that only tracks bindings inside this process
#[derive(Debug, Default)]
pub struct LocalHotkeyBackend;

impl HotkeyBackend for LocalHotkeyBackend {
    fn grab(&self, hotkey: Hotkey) -> Result<()> {
        if hotkey.key == Key::None {
            anyhow::bail!("no key given");
        }
        Ok(())
    }

    fn ungrab(&self, _hotkey: Hotkey) -> Result<()> {
        Ok(())
    }
}

fn same_callback(a: &HotkeyCallback, b: &HotkeyCallback) -> bool {
    // Compare data pointers only; vtable addresses are not unique
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

pub struct HotkeyDispatcher {
    backend: Box<dyn HotkeyBackend>,
    bindings: Mutex<HashMap<Hotkey, HotkeyCallback>>,
}

impl HotkeyDispatcher {
    pub fn new(backend: Box<dyn HotkeyBackend>) -> Self {
        Self {
            backend,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatcher without any OS grab, used headless and in tests
    pub fn local() -> Self {
        Self::new(Box::new(LocalHotkeyBackend))
    }

    pub fn register(
        &self,
        modifiers: Modifiers,
        key: Key,
        callback: HotkeyCallback,
    ) -> Result<(), OverlayError> {
        let hotkey = Hotkey::new(modifiers, key);
        let mut bindings = self.bindings.lock();

        if bindings.contains_key(&hotkey) {
            return Err(OverlayError::HotkeyConflict {
                combo: hotkey.to_string(),
                reason: "already registered in this process".to_string(),
            });
        }

        self.backend
            .grab(hotkey)
            .map_err(|e| OverlayError::HotkeyConflict {
                combo: hotkey.to_string(),
                reason: format!("{:#}", e),
            })?;

        bindings.insert(hotkey, callback);
        info!(hotkey = %hotkey, "Registered global hotkey");
        Ok(())
    }

    /// Remove the binding owning `callback`; no-op when it is not bound
    pub fn unregister(&self, callback: &HotkeyCallback) {
        let mut bindings = self.bindings.lock();
        let Some(hotkey) = bindings
            .iter()
            .find(|(_, bound)| same_callback(bound, callback))
            .map(|(hotkey, _)| *hotkey)
        else {
            return;
        };

        bindings.remove(&hotkey);
        if let Err(e) = self.backend.ungrab(hotkey) {
            warn!(hotkey = %hotkey, error = %e, "Failed to release global hotkey grab");
        }
        info!(hotkey = %hotkey, "Unregistered global hotkey");
    }

    /// Run the callback bound to `hotkey`. Returns false when nothing is bound.
    pub fn dispatch(&self, hotkey: Hotkey) -> bool {
        let hotkey = hotkey.normalized();
        // Clone out so the callback can re-enter the registry
        let callback = self.bindings.lock().get(&hotkey).cloned();
        match callback {
            Some(callback) => {
                debug!(hotkey = %hotkey, "Dispatching global hotkey");
                callback();
                true
            }
            None => {
                debug!(hotkey = %hotkey, "No binding for pressed hotkey");
                false
            }
        }
    }

    pub fn is_bound(&self, hotkey: Hotkey) -> bool {
        self.bindings.lock().contains_key(&hotkey.normalized())
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.lock().len()
    }

    /// Forward presses reported by a backend listener into [`Self::dispatch`]
    pub fn spawn_pump(self: &Arc<Self>, presses: Receiver<Hotkey>) -> thread::JoinHandle<()> {
        let dispatcher = Arc::downgrade(self);
        thread::spawn(move || {
            for hotkey in presses {
                let Some(dispatcher) = dispatcher.upgrade() else {
                    break;
                };
                dispatcher.dispatch(hotkey);
            }
            debug!("Hotkey pump stopped");
        })
    }
}
