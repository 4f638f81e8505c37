// ---------------------------------------------------------------------------
// Topic names
// ---------------------------------------------------------------------------

/// Prefix for everything the station publishes about its devices.
pub const DATA_PREFIX: &str = "d/";

/// Inbound pump relay commands.
pub const PUMP_COMMAND: &str = "c/pump";

/// Inbound display text.
pub const DISPLAY_COMMAND: &str = "c/lcd";

/// Outbound topic for a device: `d/<name>`.
pub fn data_topic(device: &str) -> String {
    format!("{DATA_PREFIX}{device}")
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One topic message, either produced locally or received from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, for logging.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Parse an on/off switch payload into a bool (case-insensitive, trims
/// whitespace).
pub fn parse_switch_command(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_lowercase();
    match s.as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(s),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- data_topic ------------------------------------------------------------

    #[test]
    fn data_topic_prefixes_device_name() {
        assert_eq!(data_topic("soil"), "d/soil");
        assert_eq!(data_topic("on"), "d/on");
    }

    // -- parse_switch_command -------------------------------------------------

    #[test]
    fn parse_switch_command_on_off() {
        assert_eq!(parse_switch_command(b"on"), Ok(true));
        assert_eq!(parse_switch_command(b"off"), Ok(false));
    }

    #[test]
    fn parse_switch_command_mixed_case() {
        assert_eq!(parse_switch_command(b"ON"), Ok(true));
        assert_eq!(parse_switch_command(b"oFf"), Ok(false));
    }

    #[test]
    fn parse_switch_command_numeric_and_bool() {
        assert_eq!(parse_switch_command(b"1"), Ok(true));
        assert_eq!(parse_switch_command(b"false"), Ok(false));
    }

    #[test]
    fn parse_switch_command_with_whitespace() {
        assert_eq!(parse_switch_command(b"  on  "), Ok(true));
        assert_eq!(parse_switch_command(b"\toff\n"), Ok(false));
    }

    #[test]
    fn parse_switch_command_garbage() {
        assert_eq!(parse_switch_command(b"TOGGLE"), Err("toggle".to_string()));
    }

    #[test]
    fn parse_switch_command_empty() {
        assert!(parse_switch_command(b"").is_err());
    }

    // -- Message --------------------------------------------------------------

    #[test]
    fn message_keeps_payload_bytes() {
        let msg = Message::new("c/pump", b"on".to_vec());
        assert_eq!(msg.topic, "c/pump");
        assert_eq!(msg.payload, b"on");
        assert_eq!(msg.payload_lossy(), "on");
    }
}
