//! Wire codec for pooled channels.
//!
//! Text messages are wrapped so control commands can share the channel with
//! application text; binary messages pass through untouched.
//!
//! ```text
//! {"data":"<application text>"}
//! {"control":"open"} | {"control":"close"} | {"control":"close-ack"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::Message;

/// Control commands of the pool channel protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlCommand {
    Open,
    Close,
    CloseAck,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Envelope {
    Data(String),
    Control(ControlCommand),
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Application message, unwrapped
    Data(Message),
    Control(ControlCommand),
}

/// Wrap an outbound application message.
pub fn encode(message: Message) -> Result<Message> {
    match message {
        Message::Text(text) => Ok(Message::Text(serde_json::to_string(&Envelope::Data(
            text,
        ))?)),
        binary @ Message::Binary(_) => Ok(binary),
    }
}

/// Encode a control command.
pub fn control(command: ControlCommand) -> Message {
    let text = match command {
        ControlCommand::Open => r#"{"control":"open"}"#,
        ControlCommand::Close => r#"{"control":"close"}"#,
        ControlCommand::CloseAck => r#"{"control":"close-ack"}"#,
    };
    Message::from(text)
}

/// Decode an inbound message.
pub fn decode(message: Message) -> Result<Inbound> {
    match message {
        Message::Binary(_) => Ok(Inbound::Data(message)),
        Message::Text(text) => match serde_json::from_str(&text) {
            Ok(Envelope::Data(data)) => Ok(Inbound::Data(Message::Text(data))),
            Ok(Envelope::Control(command)) => Ok(Inbound::Control(command)),
            Err(e) => Err(Error::invalid_message(format!(
                "bad envelope {:?}: {}",
                text, e
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_text_is_wrapped() {
        let wire = encode(Message::from("hi \"there\"")).unwrap();
        assert_eq!(wire, Message::from(r#"{"data":"hi \"there\""}"#));
        assert_eq!(
            decode(wire).unwrap(),
            Inbound::Data(Message::from("hi \"there\""))
        );
    }

    #[test]
    fn test_binary_passes_through() {
        let payload = Message::Binary(Bytes::from_static(b"{\"control\":\"open\"}"));
        assert_eq!(encode(payload.clone()).unwrap(), payload);
        assert_eq!(decode(payload.clone()).unwrap(), Inbound::Data(payload));
    }

    #[test]
    fn test_control_matches_serde_form() {
        for command in [
            ControlCommand::Open,
            ControlCommand::Close,
            ControlCommand::CloseAck,
        ] {
            let Message::Text(text) = control(command) else {
                panic!("control must be text");
            };
            assert_eq!(
                text,
                serde_json::to_string(&Envelope::Control(command)).unwrap()
            );
            assert_eq!(
                decode(control(command)).unwrap(),
                Inbound::Control(command)
            );
        }
    }

    #[test]
    fn test_malformed_envelopes() {
        for text in [
            "plain text",
            r#"{"control":"reopen"}"#,
            r#"{"data":1}"#,
            r#"{"data":"a","control":"open"}"#,
            "{}",
        ] {
            assert!(decode(Message::from(text)).is_err(), "accepted {}", text);
        }
    }
}
