//! Typed errors surfaced to the host application

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    /// A mandatory service could not be resolved while constructing an overlay
    #[error("failed to initialize overlay '{name}': {reason}")]
    Initialization { name: String, reason: String },

    #[error("overlay '{name}' cannot {operation}: configuration is missing")]
    InvalidState { name: String, operation: &'static str },

    #[error("hotkey {combo} could not be registered: {reason}")]
    HotkeyConflict { combo: String, reason: String },

    #[error("render failure: {0}")]
    Render(String),

    #[error("update tick failed: {0}")]
    UpdateTick(String),

    #[error("window thread for '{0}' is no longer running")]
    WindowClosed(String),
}

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hotkey_conflict_message_names_combo() {
        let err = OverlayError::HotkeyConflict {
            combo: "Ctrl+L".to_string(),
            reason: "grabbed by another client".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "hotkey Ctrl+L could not be registered: grabbed by another client"
        );
    }

    #[test]
    fn test_invalid_state_message() {
        let err = OverlayError::InvalidState {
            name: "mini".to_string(),
            operation: "start",
        };
        assert_eq!(err.to_string(), "overlay 'mini' cannot start: configuration is missing");
    }
}
