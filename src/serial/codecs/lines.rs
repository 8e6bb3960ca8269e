use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::serial::{error::SerialPortError, SerialMessageBytes};

/// The longest line we are willing to buffer, excluding the delimiter.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// This codec has a configurable delimiter character for reading,
/// and optionally adds a character to each line it encodes.
///
/// Lines longer than the maximum length are thrown away in full,
/// up to and including their delimiter.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a newline into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,

    /// If provided, which byte to append when writing (encoding) messages.
    /// If `None`, forwards the data as-is.
    write_delimiter: Option<u8>,

    max_length: usize,

    /// Set while skipping the rest of an overlong line.
    discarding: bool,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8, write_delimiter: Option<u8>) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            write_delimiter,
            max_length: DEFAULT_MAX_LINE_LENGTH,
            discarding: false,
        }
    }

    /// Set the longest line that will be yielded.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n', Some(b'\n'))
    }
}

impl Decoder for LinesCodec {
    type Item = SerialMessageBytes;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = src.len();

            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let found = src[self.cursor..read_to]
                .iter()
                .position(|&byte| byte == self.read_delimiter)
                .map(|position| self.cursor + position);

            match (self.discarding, found) {
                (true, Some(position)) => {
                    // The tail of the overlong line, delimiter included.
                    src.advance(position + 1);
                    self.cursor = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.cursor = 0;
                    return Ok(None);
                }
                (false, Some(position)) => {
                    // Next time we need to start over.
                    self.cursor = 0;

                    // Split at the delimiter, getting a slice of the bytes before it.
                    let line = src.split_to(position);

                    // Discard the delimiter by advancing the source buffer beyond it.
                    src.advance(1);

                    if line.len() > self.max_length {
                        warn!(length = line.len(), "Discarding overlong line");
                        continue;
                    }

                    return Ok(Some(line[..].to_vec()));
                }
                (false, None) if read_to > self.max_length => {
                    warn!(
                        length = read_to,
                        "No delimiter within the maximum line length, discarding until the next one"
                    );
                    src.advance(read_to);
                    self.cursor = 0;
                    self.discarding = true;
                    return Ok(None);
                }
                (false, None) => {
                    // We did not find a full frame.
                    // The next time we are called the same buffer `src` will be provided to us,
                    // possibly with more data,
                    // so we don't need to re-read the bytes we have looked at.
                    self.cursor = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        if !src.is_empty() {
            debug!(bytes = src.len(), "Dropping partial line at end of stream");
            src.clear();
        }
        self.cursor = 0;
        self.discarding = false;

        Ok(None)
    }
}

impl Encoder<SerialMessageBytes> for LinesCodec {
    type Error = SerialPortError;

    fn encode(&mut self, item: SerialMessageBytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);

        if let Some(character) = self.write_delimiter {
            dst.extend_from_slice(&[character]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LinesCodec, src: &mut BytesMut) -> Vec<Vec<u8>> {
        let mut lines = vec![];
        while let Some(line) = codec.decode(src).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn splits_lines() {
        let mut codec = LinesCodec::default();
        let mut src = BytesMut::from(&b"ABC123\nXYZ\n"[..]);

        let lines = decode_all(&mut codec, &mut src);

        assert_eq!(lines, vec![b"ABC123".to_vec(), b"XYZ".to_vec()]);
        assert!(src.is_empty());
    }

    #[test]
    fn line_split_across_reads() {
        let mut codec = LinesCodec::default();
        let mut src = BytesMut::from(&b"ABC"[..]);

        assert_eq!(codec.decode(&mut src).unwrap(), None);

        src.extend_from_slice(b"123\r\nrest");
        assert_eq!(codec.decode(&mut src).unwrap(), Some(b"ABC123\r".to_vec()));
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        assert_eq!(&src[..], b"rest");
    }

    #[test]
    fn overlong_line_is_discarded_entirely() {
        let mut codec = LinesCodec::default().with_max_length(4);
        let mut src = BytesMut::from(&b"123456"[..]);

        assert_eq!(codec.decode(&mut src).unwrap(), None);

        // The tail of the overlong line must not show up as a line of its own.
        src.extend_from_slice(b"789\nok\n");
        let lines = decode_all(&mut codec, &mut src);

        assert_eq!(lines, vec![b"ok".to_vec()]);
    }

    #[test]
    fn overlong_complete_line_is_skipped() {
        let mut codec = LinesCodec::default().with_max_length(4);
        let mut src = BytesMut::from(&b"toolong\nfine\n"[..]);

        let lines = decode_all(&mut codec, &mut src);

        assert_eq!(lines, vec![b"fine".to_vec()]);
    }

    #[test]
    fn partial_line_at_eof_is_dropped() {
        let mut codec = LinesCodec::default();
        let mut src = BytesMut::from(&b"done\npartial"[..]);

        assert_eq!(codec.decode_eof(&mut src).unwrap(), Some(b"done".to_vec()));
        assert_eq!(codec.decode_eof(&mut src).unwrap(), None);
        assert!(src.is_empty());
    }

    #[test]
    fn encode_appends_newline() {
        let mut codec = LinesCodec::default();
        let mut dst = BytesMut::new();

        codec.encode(b"MANUEL_SOL".to_vec(), &mut dst).unwrap();

        assert_eq!(&dst[..], b"MANUEL_SOL\n");
    }

    #[test]
    fn encode_without_delimiter_is_verbatim() {
        let mut codec = LinesCodec::new(b'\n', None);
        let mut dst = BytesMut::new();

        codec.encode(b"raw".to_vec(), &mut dst).unwrap();

        assert_eq!(&dst[..], b"raw");
    }
}
