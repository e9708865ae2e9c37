//! Scripts executed in overlay pages
//!
//! Pages rely on these exact strings, so they are built in one place.

use serde_json::Value;

use crate::constants::page;

/// Notify the page of the current lock state
pub fn lock_state(locked: bool) -> String {
    format!(
        "document.dispatchEvent(new CustomEvent('{}', {{ detail: {{ isLocked: {} }} }}));",
        page::STATE_UPDATE_EVENT,
        locked
    )
}

/// Deliver a broadcast text message; the text is embedded as a JSON string literal
pub fn broadcast_message(message: &str) -> String {
    format!(
        "document.dispatchEvent(new CustomEvent('{}', {{ detail: {{ message: {} }} }}));",
        page::BROADCAST_MESSAGE_EVENT,
        Value::String(message.to_string())
    )
}

/// Hand an event-bus payload to the page callback, if the page defines one
pub fn event_callback(payload: &Value) -> String {
    format!(
        "if(window.{cb}) {cb}({payload});",
        cb = page::EVENT_CALLBACK,
        payload = payload
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lock_state_script() {
        assert_eq!(
            lock_state(true),
            "document.dispatchEvent(new CustomEvent('onOverlayStateUpdate', { detail: { isLocked: true } }));"
        );
        assert!(lock_state(false).contains("isLocked: false"));
    }

    #[test]
    fn test_broadcast_message_escapes_text() {
        let script = broadcast_message("a\"b");
        assert_eq!(
            script,
            r#"document.dispatchEvent(new CustomEvent('onBroadcastMessageReceive', { detail: { message: "a\"b" } }));"#
        );

        let start = script.find("message: ").unwrap() + "message: ".len();
        let end = script.rfind(" } }").unwrap();
        let parsed: String = serde_json::from_str(&script[start..end]).unwrap();
        assert_eq!(parsed, "a\"b");
    }

    #[test]
    fn test_broadcast_message_escapes_backslashes_and_newlines() {
        let script = broadcast_message("c:\\tmp\nnext");
        assert!(script.contains(r#""c:\\tmp\nnext""#));
    }

    #[test]
    fn test_event_callback_uses_compact_json() {
        let script = event_callback(&json!({"type": "party", "members": [1, 2]}));
        assert_eq!(
            script,
            r#"if(window.__OverlayCallback) __OverlayCallback({"members":[1,2],"type":"party"});"#
        );
    }
}
