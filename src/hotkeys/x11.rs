//! X11 global hotkeys via passive key grabs on the root window
//!
//! The server refuses a grab another client already holds (`BadAccess`), which
//! is reported back as a registration conflict. Presses arrive on a dedicated
//! connection and are forwarded over a channel to the dispatcher's pump.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing::{debug, error, info};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use super::{Hotkey, HotkeyBackend, Modifiers};

// Core protocol modifier bits
const MASK_SHIFT: u16 = 1 << 0;
const MASK_LOCK: u16 = 1 << 1;
const MASK_CONTROL: u16 = 1 << 2;
const MASK_MOD1: u16 = 1 << 3;
const MASK_MOD2: u16 = 1 << 4;
const MASK_MOD4: u16 = 1 << 6;

/// Caps Lock / Num Lock combinations that must not change whether a combo matches
const IGNORED_MASKS: [u16; 4] = [0, MASK_LOCK, MASK_MOD2, MASK_LOCK | MASK_MOD2];

fn mod_mask(modifiers: Modifiers) -> u16 {
    let mut mask = 0u16;
    if modifiers.contains(Modifiers::SHIFT) {
        mask |= MASK_SHIFT;
    }
    if modifiers.contains(Modifiers::CONTROL) {
        mask |= MASK_CONTROL;
    }
    if modifiers.contains(Modifiers::ALT) {
        mask |= MASK_MOD1;
    }
    if modifiers.contains(Modifiers::WIN) {
        mask |= MASK_MOD4;
    }
    mask
}

/// Strip Caps Lock / Num Lock from an event state
fn clean_state(state: u16) -> u16 {
    state & !(MASK_LOCK | MASK_MOD2)
}

type GrabTable = Arc<Mutex<HashMap<(Keycode, u16), Hotkey>>>;

pub struct X11HotkeyBackend {
    conn: Arc<RustConnection>,
    root: Window,
    keysym_to_keycode: HashMap<u32, Keycode>,
    grabs: GrabTable,
}

impl X11HotkeyBackend {
    /// Connect to the display and start the press listener
    pub fn connect() -> Result<(Self, Receiver<Hotkey>)> {
        let (conn, screen_num) = x11rb::connect(None)
            .context("Failed to connect to X11 server for hotkeys. Is DISPLAY set correctly?")?;
        let root = conn.setup().roots[screen_num].root;
        let keysym_to_keycode = Self::load_keymap(&conn)?;
        info!(keycodes = keysym_to_keycode.len(), "Loaded keyboard mapping for hotkeys");

        let conn = Arc::new(conn);
        let grabs: GrabTable = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::channel();
        spawn_listener(conn.clone(), grabs.clone(), tx);

        Ok((
            Self {
                conn,
                root,
                keysym_to_keycode,
                grabs,
            },
            rx,
        ))
    }

    fn load_keymap(conn: &RustConnection) -> Result<HashMap<u32, Keycode>> {
        let setup = conn.setup();
        let (min, max) = (setup.min_keycode, setup.max_keycode);
        let mapping = conn
            .get_keyboard_mapping(min, max - min + 1)
            .context("Failed to request keyboard mapping")?
            .reply()
            .context("Failed to get keyboard mapping reply")?;

        let per_keycode = mapping.keysyms_per_keycode.max(1) as usize;
        let mut table = HashMap::new();
        for (index, syms) in mapping.keysyms.chunks(per_keycode).enumerate() {
            let keycode = min + index as u8;
            for sym in syms.iter().filter(|sym| **sym != 0) {
                // First keycode producing a keysym wins
                table.entry(*sym).or_insert(keycode);
            }
        }
        Ok(table)
    }

    fn keycode(&self, hotkey: Hotkey) -> Result<Keycode> {
        let sym = hotkey
            .key
            .keysym()
            .ok_or_else(|| anyhow::anyhow!("no key given"))?;
        self.keysym_to_keycode
            .get(&sym)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("key {} is not on the current keyboard layout", hotkey.key))
    }

    fn ungrab_masks(&self, keycode: Keycode, masks: &[u16]) {
        for mask in masks {
            if let Err(e) = self.conn.ungrab_key(keycode, self.root, ModMask::from(*mask)) {
                debug!(keycode = keycode, mask = mask, error = %e, "Failed to ungrab key");
            }
        }
    }
}

impl HotkeyBackend for X11HotkeyBackend {
    fn grab(&self, hotkey: Hotkey) -> Result<()> {
        let keycode = self.keycode(hotkey)?;
        let base = mod_mask(hotkey.modifiers);

        let mut acquired = Vec::new();
        for ignored in IGNORED_MASKS {
            let mask = base | ignored;
            let result = self
                .conn
                .grab_key(false, self.root, ModMask::from(mask), keycode, GrabMode::ASYNC, GrabMode::ASYNC)
                .context("Failed to send key grab")
                .and_then(|cookie| cookie.check().context("key combination is grabbed by another client"));
            if let Err(e) = result {
                self.ungrab_masks(keycode, &acquired);
                let _ = self.conn.flush();
                return Err(e);
            }
            acquired.push(mask);
        }
        self.conn.flush().context("Failed to flush X11 connection after key grab")?;

        self.grabs.lock().insert((keycode, base), hotkey);
        Ok(())
    }

    fn ungrab(&self, hotkey: Hotkey) -> Result<()> {
        let keycode = self.keycode(hotkey)?;
        let base = mod_mask(hotkey.modifiers);
        self.grabs.lock().remove(&(keycode, base));

        let masks: Vec<u16> = IGNORED_MASKS.iter().map(|ignored| base | ignored).collect();
        self.ungrab_masks(keycode, &masks);
        self.conn.flush().context("Failed to flush X11 connection after key ungrab")?;
        Ok(())
    }
}

fn spawn_listener(conn: Arc<RustConnection>, grabs: GrabTable, sender: Sender<Hotkey>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!("Hotkey listener started");
        loop {
            let event = match conn.wait_for_event() {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "Hotkey listener lost X11 connection");
                    break;
                }
            };

            let Event::KeyPress(press) = event else {
                continue;
            };
            let state = clean_state(u16::from(press.state));
            let Some(hotkey) = grabs.lock().get(&(press.detail, state)).copied() else {
                continue;
            };

            debug!(hotkey = %hotkey, "Global hotkey pressed");
            if sender.send(hotkey).is_err() {
                break;
            }
        }
    })
}
