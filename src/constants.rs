//! Application-wide constants
//!
//! Magic numbers and string literals used throughout the crate, kept in one
//! place so the page-facing contract and the X11 protocol values are easy to audit.

/// Overlay lifecycle timing
pub mod timing {
    use std::time::Duration;

    /// Default interval between update ticks (independent of the frame rate)
    pub const UPDATE_INTERVAL: Duration = Duration::from_millis(1000);

    /// How long the UI thread sleeps between native event polls when idle
    pub const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(16);

    /// Frame rate used when a config carries no explicit value
    pub const DEFAULT_MAX_FRAME_RATE: u32 = 30;
}

/// Script snippets executed in the page (bit-exact contract with overlay pages)
pub mod page {
    /// Custom event carrying `{ isLocked: <bool> }`
    pub const STATE_UPDATE_EVENT: &str = "onOverlayStateUpdate";

    /// Custom event carrying `{ message: <string> }`
    pub const BROADCAST_MESSAGE_EVENT: &str = "onBroadcastMessageReceive";

    /// Page-global function receiving event-bus payloads
    pub const EVENT_CALLBACK: &str = "__OverlayCallback";
}

/// Log handling
pub mod logging {
    /// Downstream error text identifying a conflicting browser addon
    pub const INCOMPATIBLE_ADDON_MARKER: &str = "Xilium.CefGlue";

    /// Escalated message logged once when the marker is seen
    pub const INCOMPATIBLE_ADDON_MESSAGE: &str =
        "an incompatible addon is loaded into this process; overlay stopped and further logging disabled";
}

/// Configuration file location
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "overlay-host";

    /// Config file name
    pub const FILENAME: &str = "config.json";

    /// Default page shown by freshly created overlays
    pub const DEFAULT_URL: &str = "about:blank";
}

/// X11 protocol constants
pub mod x11 {
    /// WM_CLASS instance and class name
    pub const WM_CLASS: &[u8] = b"overlay-host\0overlay-host\0";

    /// _MOTIF_WM_HINTS flag: functions field is valid
    pub const MWM_HINTS_FUNCTIONS: u32 = 1 << 0;

    /// _MOTIF_WM_HINTS flag: decorations field is valid
    pub const MWM_HINTS_DECORATIONS: u32 = 1 << 1;

    /// _MOTIF_WM_HINTS function: window may be resized
    pub const MWM_FUNC_RESIZE: u32 = 1 << 1;

    /// _MOTIF_WM_HINTS function: window may be moved
    pub const MWM_FUNC_MOVE: u32 = 1 << 2;

    /// Number of 32-bit fields in _MOTIF_WM_HINTS
    pub const MWM_HINTS_LEN: usize = 5;

    /// Left mouse button number (drags an unlocked overlay)
    pub const BUTTON_LEFT: u8 = 1;

    /// Bytes per pixel in the back-buffer and in ZPixmap uploads
    pub const BYTES_PER_PIXEL: usize = 4;
}
