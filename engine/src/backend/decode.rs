//! Incremental UTF-8 decoding for chunked bodies
//!
//! Transport chunk boundaries can fall inside a multi-byte character. The
//! decoder holds back an incomplete trailing sequence until the next chunk
//! completes it.

/// Stateful decoder turning byte chunks into text chunks
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk. Invalid sequences become U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let held = rest.to_vec();
        self.pending = held;
        out
    }

    /// Flush whatever is held back at end of stream
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.push(b"hello "), "hello ");
        assert_eq!(decoder.push(b"world"), "world");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_split_multibyte_character() {
        let bytes = "市场".as_bytes();
        let mut decoder = Utf8Decoder::new();

        assert_eq!(decoder.push(&bytes[..2]), "");
        assert_eq!(decoder.push(&bytes[2..4]), "市");
        assert_eq!(decoder.push(&bytes[4..]), "场");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.push(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn test_truncated_tail_flushed_lossy() {
        let bytes = "é".as_bytes();
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.push(&bytes[..1]), "");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }
}
