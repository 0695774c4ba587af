use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use super::message::{IncomingMessage, ValueSet};
use crate::error::LauncherError;

/// Largest message accepted before the frame is discarded.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Frames UTF-8 JSON objects on a byte stream.
///
/// Messages are written back to back. Bytes outside an object, NUL padding included,
/// are skipped. A frame ends where its outermost brace closes, so a malformed message
/// is dropped on its own and the messages buffered after it still decode. The scan
/// position is kept between calls, so each byte is inspected once per frame.
#[derive(Debug, Clone)]
pub struct JsonMessageCodec {
    max_frame_length: usize,
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    discarding: bool,
}

impl Default for JsonMessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn is_padding(b: &u8) -> bool {
    *b == 0 || b.is_ascii_whitespace()
}

impl JsonMessageCodec {
    pub fn new() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            scanned: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            discarding: false,
        }
    }

    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    /// Continues the scan of the current frame. Returns its length once it is closed.
    fn scan(&mut self, src: &[u8]) -> Option<usize> {
        for (i, &b) in src.iter().enumerate().skip(self.scanned) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        self.scanned = src.len();
        None
    }
}

impl Decoder for JsonMessageCodec {
    type Item = IncomingMessage;
    type Error = LauncherError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.depth == 0 {
                let skip = src.iter().take_while(|b| **b != b'{').count();
                if src[..skip].iter().any(|b| !is_padding(b)) {
                    tracing::warn!(target: "ipc::codec", skipped = skip, "Skipping bytes outside a message");
                }
                src.advance(skip);
                if src.is_empty() {
                    return Ok(None);
                }
            }

            let Some(end) = self.scan(&src[..]) else {
                if self.discarding {
                    src.clear();
                    self.scanned = 0;
                } else if src.len() > self.max_frame_length {
                    tracing::warn!(
                        target: "ipc::codec",
                        buffered = src.len(),
                        max = self.max_frame_length,
                        "Message exceeds the frame limit, discarding it"
                    );
                    self.discarding = true;
                    src.clear();
                    self.scanned = 0;
                }
                return Ok(None);
            };

            let frame = src.split_to(end);
            self.reset();
            if std::mem::take(&mut self.discarding) || frame.len() > self.max_frame_length {
                tracing::warn!(target: "ipc::codec", "Dropped oversized message");
                continue;
            }

            match serde_json::from_slice::<Value>(&frame) {
                Ok(value) => match IncomingMessage::from_value(value) {
                    Some(message) => return Ok(Some(message)),
                    None => {
                        tracing::warn!(target: "ipc::codec", "Skipping message that is not a JSON object");
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        target: "ipc::codec",
                        error = %e,
                        discarded = frame.len(),
                        "Discarding malformed message"
                    );
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        if !src.is_empty() {
            tracing::warn!(
                target: "ipc::codec",
                discarded = src.len(),
                "Stream closed with an incomplete message"
            );
        }
        src.clear();
        self.reset();
        self.discarding = false;
        Ok(None)
    }
}

impl Encoder<ValueSet> for JsonMessageCodec {
    type Error = LauncherError;

    fn encode(&mut self, item: ValueSet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        serde_json::to_writer(dst.writer(), &item)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(input: &[u8]) -> Vec<IncomingMessage> {
        let mut codec = JsonMessageCodec::new();
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(msg) = codec.decode(&mut buf).unwrap() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_back_to_back_messages_with_padding() {
        let messages =
            decode_all(b"{\"Arguments\":\"Terminate\"}\0\0 \n{\"Arguments\":\"Elevate\"}\0");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].arguments(), Some("Terminate"));
        assert_eq!(messages[1].arguments(), Some("Elevate"));
    }

    #[test]
    fn test_partial_message_waits_for_more_bytes() {
        let mut codec = JsonMessageCodec::new();
        let mut buf = BytesMut::from(&b"{\"Arguments\":\"Ter"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 17);

        buf.extend_from_slice(b"minate\"}");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.arguments(), Some("Terminate"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_message_fed_one_byte_at_a_time() {
        let input = br#"{"Arguments":"LaunchApp","Application":"a}b{c","Parameters":"\"[x]\""}"#;
        let mut codec = JsonMessageCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in input {
            buf.put_u8(*byte);
            if let Some(msg) = codec.decode(&mut buf).unwrap() {
                decoded.push(msg);
            }
        }
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].get_str("Application"), Some("a}b{c"));
        assert_eq!(decoded[0].get_str("Parameters"), Some("\"[x]\""));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_non_objects_are_skipped() {
        let messages = decode_all(b"null [1] {\"RequestID\":\"7\"}");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].request_id(), Some("7"));
    }

    #[test]
    fn test_malformed_input_is_discarded() {
        let mut codec = JsonMessageCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\": }"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(b"{\"Arguments\":\"Terminate\"}");
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_malformed_message_keeps_following_message() {
        let mut codec = JsonMessageCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\": }{\"Arguments\":\"Terminate\"}"[..]);

        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.arguments(), Some("Terminate"));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_message_is_dropped_and_stream_recovers() {
        let mut codec = JsonMessageCodec::new().with_max_frame_length(32);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"{\"Arguments\":\"");
        buf.extend_from_slice(&[b'a'; 40]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(b"aaaa\"}{\"Arguments\":\"Terminate\"}");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.arguments(), Some("Terminate"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_eof_drops_incomplete_message() {
        let mut codec = JsonMessageCodec::new();
        let mut buf = BytesMut::from(&b"{\"Arguments\":\"Terminate\"}{\"Argu"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_some());
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_writes_compact_json() {
        let mut codec = JsonMessageCodec::new();
        let mut buf = BytesMut::new();
        let set = crate::ipc::message::value_set(json!({ "Success": true }));
        codec.encode(set, &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"Success\":true}");
    }
}
