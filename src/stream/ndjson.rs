//! Incremental NDJSON line reassembly over arbitrarily chunked bytes.

use memchr::memchr_iter;

const REPLACEMENT: char = '\u{fffd}';

/// Turns raw byte chunks into complete, non-blank text lines.
///
/// UTF-8 decoding is stateful: a multi-byte character split across two chunks
/// is held back until its remaining bytes arrive. Invalid sequences decode to
/// U+FFFD instead of failing the stream.
#[derive(Debug, Default)]
pub struct NdjsonReassembler {
    buffer: String,
    read_offset: usize,
    remainder: Vec<u8>,
}

impl NdjsonReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and append every newly completed line to `out`.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        if self.remainder.is_empty() {
            let consumed = decode_utf8_prefix(chunk, &mut self.buffer);
            self.remainder.extend_from_slice(&chunk[consumed..]);
        } else {
            self.remainder.extend_from_slice(chunk);
            let consumed = decode_utf8_prefix(&self.remainder, &mut self.buffer);
            self.remainder.drain(..consumed);
        }
        self.drain_lines(out);
    }

    /// Flush at end of input: undecodable tail bytes and a final unterminated line.
    pub fn finish_into(&mut self, out: &mut Vec<String>) {
        if !self.remainder.is_empty() {
            self.buffer
                .push_str(&String::from_utf8_lossy(&self.remainder));
            self.remainder.clear();
        }
        self.drain_lines(out);
        let tail = self.buffer[self.read_offset..].trim();
        if !tail.is_empty() {
            out.push(tail.to_owned());
        }
        self.buffer.clear();
        self.read_offset = 0;
    }

    fn drain_lines(&mut self, out: &mut Vec<String>) {
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = self.buffer[processed_up_to..line_end].trim();
            if !line.is_empty() {
                out.push(line.to_owned());
            }
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }
}

/// Decode as much of `bytes` as is complete, returning the consumed length.
/// An incomplete trailing sequence is left unconsumed.
fn decode_utf8_prefix(bytes: &[u8], out: &mut String) -> usize {
    let mut pos = 0;
    loop {
        match std::str::from_utf8(&bytes[pos..]) {
            Ok(text) => {
                out.push_str(text);
                return bytes.len();
            }
            Err(err) => {
                let valid_up_to = pos + err.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&bytes[pos..valid_up_to]) {
                    out.push_str(text);
                }
                match err.error_len() {
                    Some(bad_len) => {
                        out.push(REPLACEMENT);
                        pos = valid_up_to + bad_len;
                    }
                    None => return valid_up_to,
                }
            }
        }
    }
}
