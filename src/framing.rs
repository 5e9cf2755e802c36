//! Recovers JSON values from an undelimited inbound byte stream.

use serde_json::{Deserializer, Value};
use tracing::warn;

/// Result of one framing attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A complete value was decoded and its bytes removed from the buffer.
    Value(Value),
    /// The buffer holds no complete value yet.
    Incomplete,
    /// The buffer held bytes that can never form valid JSON and was discarded.
    Malformed,
}

/// Accumulates inbound bytes and splits them into JSON values.
///
/// Values are concatenated on the wire with optional whitespace between them.
/// The decoder consumes exactly the bytes of each value as reported by the
/// streaming parser, so a value split across reads is decoded once all of
/// its bytes have arrived.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes verbatim.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered, not yet decoded bytes.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to decode the next value at the front of the buffer.
    pub fn next_frame(&mut self) -> Frame {
        let Some(start) = self.buffer.iter().position(|b| !b.is_ascii_whitespace()) else {
            self.buffer.clear();
            return Frame::Incomplete;
        };

        let (frame, consumed) = {
            let mut stream = Deserializer::from_slice(&self.buffer[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) => (Frame::Value(value), start + stream.byte_offset()),
                Some(Err(e)) if e.is_eof() => (Frame::Incomplete, start),
                Some(Err(e)) => {
                    warn!(
                        "Discarding {} undecodable bytes: {}",
                        self.buffer.len(),
                        e
                    );
                    (Frame::Malformed, self.buffer.len())
                }
                None => (Frame::Incomplete, start),
            }
        };

        self.buffer.drain(..consumed);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Value> {
        let mut out = Vec::new();
        while let Frame::Value(value) = decoder.next_frame() {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_single_object() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"{"action":"login"}"#);
        assert_eq!(decode_all(&mut decoder), vec![json!({"action": "login"})]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_concatenated_objects_with_whitespace() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b" \n{\"a\":1}{\"b\":2}\t {\"c\":3}");
        assert_eq!(
            decode_all(&mut decoder),
            vec![json!({"a": 1}), json!({"b": 2}), json!({"c": 3})]
        );
    }

    #[test]
    fn test_incomplete_object_is_retained() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"{"action":"lo"#);
        assert_eq!(decoder.next_frame(), Frame::Incomplete);
        assert_eq!(decoder.buffered(), 13);
        decoder.extend(br#"gin"}"#);
        assert_eq!(decoder.next_frame(), Frame::Value(json!({"action": "login"})));
    }

    #[test]
    fn test_trailing_partial_is_kept_after_complete_value() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"{"a":1}{"b":"#);
        assert_eq!(decoder.next_frame(), Frame::Value(json!({"a": 1})));
        assert_eq!(decoder.next_frame(), Frame::Incomplete);
        decoder.extend(b"2}");
        assert_eq!(decoder.next_frame(), Frame::Value(json!({"b": 2})));
    }

    #[test]
    fn test_non_canonical_bytes_are_consumed_exactly() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"{ "z" : 1.50 , "a" : "A" }{"next":true}"#);
        assert_eq!(
            decode_all(&mut decoder),
            vec![json!({"z": 1.5, "a": "A"}), json!({"next": true})]
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_chunk_invariance() {
        let stream = br#"{"action":"login","username":"a","password":"b"} {"action":"login"}{"action":"ping","nested":{"x":[1,2,{"y":"}"}]}}"#;

        let mut whole = FrameDecoder::new();
        whole.extend(stream);
        let expected = decode_all(&mut whole);
        assert_eq!(expected.len(), 3);

        for chunk_size in 1..stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut got = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                decoder.extend(chunk);
                got.extend(decode_all(&mut decoder));
            }
            assert_eq!(got, expected, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_malformed_bytes_are_discarded() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"}garbage{");
        assert_eq!(decoder.next_frame(), Frame::Malformed);
        assert_eq!(decoder.buffered(), 0);
        decoder.extend(br#"{"ok":1}"#);
        assert_eq!(decoder.next_frame(), Frame::Value(json!({"ok": 1})));
    }

    #[test]
    fn test_whitespace_only_is_dropped() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"  \r\n ");
        assert_eq!(decoder.next_frame(), Frame::Incomplete);
        assert_eq!(decoder.buffered(), 0);
    }
}
