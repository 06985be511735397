//! Line framing codec.
//!
//! The wire unit is one UTF-8 JSON object per line, terminated by a carriage
//! return. Transport reads arrive in arbitrary chunks, so the decoder buffers
//! until a full line is available and yields one classified message per line.

use crate::error::ProtocolError;
use crate::message::{self, Request, RpcMessage};
use crate::DELIMITER;
use bytes::BytesMut;
use serde_json::Value;

/// Encodes outbound messages into wire lines.
pub struct Encoder;

impl Encoder {
    /// Encodes a request into a delimiter-terminated wire line.
    pub fn encode_request(request: &Request) -> Result<Vec<u8>, ProtocolError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(DELIMITER);
        Ok(line)
    }
}

/// Buffering decoder that splits a byte stream into classified messages.
pub struct LineDecoder {
    buffer: BytesMut,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Appends raw transport data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next message from the buffer.
    ///
    /// Returns `Ok(None)` when no complete line is buffered yet. A malformed
    /// line is consumed before its error is returned, so the next call
    /// continues with the following line.
    pub fn decode_message(&mut self) -> Result<Option<RpcMessage>, ProtocolError> {
        match self.next_line() {
            Some(line) => {
                let text =
                    std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8("line"))?;
                let value: Value = serde_json::from_str(text)?;
                message::decode(value).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Next complete line, without its delimiter.
    ///
    /// Lines that do not open with a brace are transport noise (boot banners,
    /// partial first reads) and are dropped here without a decode attempt.
    fn next_line(&mut self) -> Option<BytesMut> {
        loop {
            let pos = self.buffer.iter().position(|&b| b == DELIMITER)?;
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.first() == Some(&b'{') {
                return Some(line);
            }
        }
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards any buffered data.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MethodKey, RpcNotification};
    use proptest::prelude::*;
    use serde_json::json;

    fn decode_all(decoder: &mut LineDecoder) -> Vec<RpcMessage> {
        let mut messages = Vec::new();
        while let Some(message) = decoder.decode_message().unwrap() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let request = Request::new("get_hub_info", json!({})).with_id("ab12");
        let encoded = Encoder::encode_request(&request).unwrap();
        assert_eq!(*encoded.last().unwrap(), DELIMITER);

        let mut decoder = LineDecoder::new();
        decoder.extend(&encoded);
        let decoded = decoder.decode_message().unwrap().unwrap();
        assert_eq!(decoded, RpcMessage::Request(request));
    }

    #[test]
    fn test_partial_line_buffers() {
        let mut decoder = LineDecoder::new();
        decoder.extend(br#"{"i":"a1","r":"do"#);
        assert!(decoder.decode_message().unwrap().is_none());

        decoder.extend(b"ne\"}\r");
        let decoded = decoder.decode_message().unwrap().unwrap();
        assert_eq!(
            decoded,
            RpcMessage::Response {
                id: "a1".to_string(),
                result: json!("done"),
            }
        );
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{\"m\":2,\"p\":[8.1,73]}\r{\"i\":\"b2\",\"r\":0}\r");
        let messages = decode_all(&mut decoder);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], RpcMessage::Notification(_)));
        assert!(matches!(messages[1], RpcMessage::Response { .. }));
    }

    #[test]
    fn test_noise_lines_discarded() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"MicroPython v1.12\rGarbage\r{\"m\":4,\"p\":\"tapped\"}\r");
        let messages = decode_all(&mut decoder);
        assert_eq!(
            messages,
            vec![RpcMessage::Notification(RpcNotification {
                method: MethodKey::Code(4),
                parameters: json!("tapped"),
            })]
        );
    }

    #[test]
    fn test_malformed_line_consumed_before_error() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{not json\r{\"i\":\"c3\",\"r\":1}\r");
        assert!(decoder.decode_message().is_err());
        // the bad line is gone; the next call yields the following message
        let decoded = decoder.decode_message().unwrap().unwrap();
        assert!(matches!(decoded, RpcMessage::Response { .. }));
    }

    #[test]
    fn test_empty_lines_skipped() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"\r\r{\"m\":7,\"p\":\"s1\"}\r");
        assert_eq!(decode_all(&mut decoder).len(), 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_clear_discards_buffer() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{\"partial");
        assert_eq!(decoder.buffered(), 9);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    proptest! {
        /// Chunk boundaries must not affect the decoded message sequence.
        #[test]
        fn prop_decode_is_chunking_invariant(split in 0usize..60) {
            let wire = b"{\"m\":2,\"p\":[7.9,50]}\rnoise\r{\"i\":\"d4\",\"r\":\"done\"}\r";
            let split = split.min(wire.len());

            let mut decoder = LineDecoder::new();
            decoder.extend(&wire[..split]);
            let mut messages = decode_all(&mut decoder);
            decoder.extend(&wire[split..]);
            messages.extend(decode_all(&mut decoder));

            prop_assert_eq!(messages.len(), 2);
            prop_assert!(matches!(messages[0], RpcMessage::Notification(_)));
            let is_response = matches!(messages[1], RpcMessage::Response { .. });
            prop_assert!(is_response);
        }
    }
}
