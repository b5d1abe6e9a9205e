//! Line codec
//!
//! One JSON object per line, no framing beyond the newline. The writer side
//! appends the newline; [`encode_line`] never includes it.

use crate::error::ProtocolError;
use crate::message::Message;

/// Decode one input line
pub fn decode_line(line: &str) -> Result<Message, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }
    Ok(serde_json::from_str(line)?)
}

/// Encode one message, without the trailing newline
pub fn encode_line(message: &Message) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;
    use crate::payload::BroadcastReadOk;
    use proptest::prelude::*;

    #[test]
    fn test_decode_init() {
        let msg = decode_line(
            r#"{"src":"c0","dest":"n1","body":{"type":"init","msg_id":1,"node_id":"n1","node_ids":["n1","n2"]}}"#,
        )
        .unwrap();

        assert_eq!(msg.src, "c0");
        assert_eq!(msg.kind(), "init");
        assert_eq!(msg.body.msg_id, Some(1));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_line("   "), Err(ProtocolError::EmptyLine)));
        assert!(matches!(decode_line("{not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            decode_line(r#"{"src":"c0","body":{}}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_encode_is_single_line() {
        let body = Body::with_payload("read_ok", &BroadcastReadOk { messages: vec![1, 2] }).unwrap();
        let line = encode_line(&Message::new("n1", "c1", body)).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""messages":[1,2]"#));
    }

    proptest! {
        #[test]
        fn prop_broadcast_lines_decode(value in any::<i64>(), msg_id in any::<u64>()) {
            let line = format!(
                r#"{{"src":"c1","dest":"n1","body":{{"type":"broadcast","msg_id":{msg_id},"message":{value}}}}}"#
            );
            let msg = decode_line(&line).unwrap();
            prop_assert_eq!(msg.body.msg_id, Some(msg_id));
            prop_assert_eq!(msg.body.fields["message"].as_i64(), Some(value));
        }
    }
}
