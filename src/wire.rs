//! JSON codec for the gateway wire protocol.
//!
//! Every message is a single field-tagged JSON object. Clients send
//! `{"token": ...}` (the authentication credential, first message only) and
//! `{"prompt": ...}` (a generation request). The server sends
//! `{"status": ...}`, `{"error": ...}`, and `{"token": ...}` (one generated
//! fragment). The `token` field name is shared between the client credential
//! and the server fragment; the two directions are decoded by different types
//! and never conflated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::GatewayError;

pub const STATUS_AUTHENTICATED: &str = "authenticated";
pub const STATUS_DONE: &str = "done";
pub const ERROR_AUTH_FAILED: &str = "Authentication failed";
pub const ERROR_PROMPT_REQUIRED: &str = "Prompt is required";

/// A message received from a client, after decoding.
///
/// Decoding never fails: anything that is not a JSON object carrying a
/// recognized field comes out as [`ClientMessage::Malformed`], and the
/// session decides whether that is fatal.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `{"token": ...}` — an authentication attempt.
    Credential { token: String },
    /// `{"prompt": ...}` — a generation request. The prompt may be empty;
    /// validating that is the session's job, not the codec's.
    Prompt { prompt: String },
    /// Unparseable payload, or an object with no recognized field.
    Malformed,
}

// Credentials must never end up in logs, so Debug redacts them.
impl fmt::Debug for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMessage::Credential { .. } => {
                f.debug_struct("Credential").field("token", &"<redacted>").finish()
            }
            ClientMessage::Prompt { prompt } => {
                f.debug_struct("Prompt").field("prompt", prompt).finish()
            }
            ClientMessage::Malformed => f.write_str("Malformed"),
        }
    }
}

#[derive(Deserialize)]
struct RawClientMessage {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// Decodes one inbound frame. If a frame somehow carries both fields the
/// credential wins, matching the handshake-first reading of the protocol.
pub fn decode(raw: &str) -> ClientMessage {
    let Ok(frame) = serde_json::from_str::<RawClientMessage>(raw) else {
        return ClientMessage::Malformed;
    };
    if let Some(token) = frame.token {
        return ClientMessage::Credential { token };
    }
    if let Some(prompt) = frame.prompt {
        return ClientMessage::Prompt { prompt };
    }
    ClientMessage::Malformed
}

/// A message sent to a client.
///
/// The untagged representation serializes each variant as the bare
/// single-field object the protocol calls for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Status { status: String },
    Error { error: String },
    Token { token: String },
}

impl ServerMessage {
    pub fn authenticated() -> Self {
        ServerMessage::Status { status: STATUS_AUTHENTICATED.to_string() }
    }

    pub fn done() -> Self {
        ServerMessage::Status { status: STATUS_DONE.to_string() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { error: message.into() }
    }

    pub fn token(fragment: impl Into<String>) -> Self {
        ServerMessage::Token { token: fragment.into() }
    }
}

pub fn encode(message: &ServerMessage) -> Result<String, GatewayError> {
    Ok(serde_json::to_string(message)?)
}

/// Encodes a client credential frame. Used by [`crate::GatewayClient`].
pub fn credential_frame(token: &str) -> Result<String, GatewayError> {
    Ok(serde_json::to_string(&serde_json::json!({ "token": token }))?)
}

/// Encodes a client prompt frame. Used by [`crate::GatewayClient`].
pub fn prompt_frame(prompt: &str) -> Result<String, GatewayError> {
    Ok(serde_json::to_string(&serde_json::json!({ "prompt": prompt }))?)
}

#[cfg(test)]
mod decode_tests {
    use super::*;

    #[test]
    fn credential_message() {
        let decoded = decode(r#"{"token":"sk-abc"}"#);
        assert_eq!(decoded, ClientMessage::Credential { token: "sk-abc".to_string() });
    }

    #[test]
    fn prompt_message() {
        let decoded = decode(r#"{"prompt":"hello"}"#);
        assert_eq!(decoded, ClientMessage::Prompt { prompt: "hello".to_string() });
    }

    #[test]
    fn empty_prompt_decodes_as_prompt() {
        // Emptiness is a validation concern, not a codec concern.
        assert_eq!(decode(r#"{"prompt":""}"#), ClientMessage::Prompt { prompt: String::new() });
    }

    #[test]
    fn credential_wins_when_both_fields_present() {
        let decoded = decode(r#"{"token":"t","prompt":"p"}"#);
        assert_eq!(decoded, ClientMessage::Credential { token: "t".to_string() });
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let decoded = decode(r#"{"prompt":"hi","extra":42}"#);
        assert_eq!(decoded, ClientMessage::Prompt { prompt: "hi".to_string() });
    }

    #[test]
    fn object_without_recognized_fields_is_malformed() {
        assert_eq!(decode(r#"{"other":"x"}"#), ClientMessage::Malformed);
        assert_eq!(decode("{}"), ClientMessage::Malformed);
    }

    #[test]
    fn non_json_is_malformed() {
        assert_eq!(decode("not json at all"), ClientMessage::Malformed);
        assert_eq!(decode(""), ClientMessage::Malformed);
        assert_eq!(decode("[1,2,3]"), ClientMessage::Malformed);
    }

    #[test]
    fn wrongly_typed_field_is_malformed() {
        assert_eq!(decode(r#"{"token":42}"#), ClientMessage::Malformed);
        assert_eq!(decode(r#"{"prompt":null,"token":null}"#), ClientMessage::Malformed);
    }

    #[test]
    fn debug_never_prints_the_credential() {
        let decoded = decode(r#"{"token":"sk-very-secret"}"#);
        let printed = format!("{decoded:?}");
        assert!(!printed.contains("sk-very-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
