//! Newline-delimited framing for feeder status lines, and the single-byte command encoding.
//!
//! The radio link gives no message boundaries: a status line may arrive split over any
//! number of notifications, and one notification may carry several lines. [`LineFramer`]
//! accumulates chunks and yields whole lines as they complete.
use bytes::{Buf, BytesMut};

use crate::device::constants::{FRAME_TERMINATOR, MAX_FRAME_LEN};
use crate::device::types::{Command, StatusReport};
use crate::error::FramerError;

pub fn encode(command: Command) -> [u8; 1] {
    [command.opcode()]
}

pub struct LineFramer {
    buf: BytesMut,
    max_len: usize,
    // set after an oversized line was reported; bytes are dropped until the next terminator
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        LineFramer { buf: BytesMut::with_capacity(max_len + 2), max_len, discarding: false }
    }

    /// Append `chunk` and iterate over every frame that is now complete.
    /// Frames are extracted lazily; bytes after the last terminator stay buffered.
    pub fn decode(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buf.extend_from_slice(chunk);
        Frames { framer: self }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn next_frame(&mut self) -> Option<Result<StatusReport, FramerError>> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == FRAME_TERMINATOR) else {
                // a trailing \r may be the first half of a CRLF and does not count toward the limit
                let pending = match self.buf.last() {
                    Some(b'\r') => self.buf.len() - 1,
                    _ => self.buf.len(),
                };
                if self.discarding {
                    self.buf.clear();
                } else if pending > self.max_len {
                    let len = pending;
                    self.buf.clear();
                    self.discarding = true;
                    return Some(Err(FramerError::FrameTooLarge { len, max: self.max_len }));
                }
                return None;
            };

            if self.discarding {
                self.buf.advance(pos + 1);
                self.discarding = false;
                continue;
            }

            let line = self.buf.split_to(pos + 1);
            let mut line = &line[..pos];
            if let Some((b'\r', rest)) = line.split_last() {
                line = rest;
            }

            if line.len() > self.max_len {
                return Some(Err(FramerError::FrameTooLarge { len: line.len(), max: self.max_len }));
            }
            if line.is_empty() {
                continue;
            }

            return Some(Ok(StatusReport::new(String::from_utf8_lossy(line).into_owned())));
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer::new(MAX_FRAME_LEN)
    }
}

pub struct Frames<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Frames<'_> {
    type Item = Result<StatusReport, FramerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(framer: &mut LineFramer, chunk: &[u8]) -> Vec<String> {
        framer.decode(chunk)
            .map(|frame| frame.expect("unexpected framing error").text)
            .collect()
    }

    #[test]
    fn commands_encode_to_their_opcode() {
        assert_eq!(encode(Command::Dispense), [0x46]);
        assert_eq!(encode(Command::RequestStatus), [0x57]);
    }

    #[test]
    fn frame_spanning_two_chunks_is_reassembled() {
        let mut framer = LineFramer::default();
        assert!(texts(&mut framer, b"Food: 5").is_empty());
        assert_eq!(framer.buffered(), 7);
        assert_eq!(texts(&mut framer, b"0%\n"), vec!["Food: 50%"]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let mut framer = LineFramer::default();
        assert_eq!(texts(&mut framer, b"Food: 10%\r\nFood: 20%\nFo"), vec!["Food: 10%", "Food: 20%"]);
        assert_eq!(texts(&mut framer, b"od: 30%\n"), vec!["Food: 30%"]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut framer = LineFramer::default();
        assert_eq!(texts(&mut framer, b"\r\n\nEmpty\n"), vec!["Empty"]);
    }

    #[test]
    fn decoding_is_lazy() {
        let mut framer = LineFramer::default();
        let mut frames = framer.decode(b"a\nb\n");
        assert_eq!(frames.next(), Some(Ok(StatusReport::new("a"))));
        drop(frames);
        // the second line is still buffered and comes out with the next chunk
        assert_eq!(texts(&mut framer, b"c\n"), vec!["b", "c"]);
    }

    #[test]
    fn oversized_unterminated_buffer_is_an_error() {
        let mut framer = LineFramer::new(8);
        let frames: Vec<_> = framer.decode(b"0123456789").collect();
        assert_eq!(frames, vec![Err(FramerError::FrameTooLarge { len: 10, max: 8 })]);
        assert_eq!(framer.buffered(), 0);

        // the tail of the oversized line is dropped, the next line decodes normally
        assert_eq!(texts(&mut framer, b"tail\nok\n"), vec!["ok"]);
    }

    #[test]
    fn oversized_terminated_line_is_an_error() {
        let mut framer = LineFramer::new(4);
        let frames: Vec<_> = framer.decode(b"toolong\nfine\n").collect();
        assert_eq!(frames, vec![
            Err(FramerError::FrameTooLarge { len: 7, max: 4 }),
            Ok(StatusReport::new("fine")),
        ]);
    }

    #[test]
    fn crlf_split_before_newline_fits_the_limit() {
        let mut framer = LineFramer::new(4);
        assert!(texts(&mut framer, b"abcd\r").is_empty());
        assert_eq!(texts(&mut framer, b"\n"), vec!["abcd"]);

        let frames: Vec<_> = framer.decode(b"abcde\r").collect();
        assert_eq!(frames, vec![Err(FramerError::FrameTooLarge { len: 5, max: 4 })]);
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut framer = LineFramer::default();
        assert!(texts(&mut framer, b"stale").is_empty());
        framer.reset();
        assert_eq!(texts(&mut framer, b"fresh\n"), vec!["fresh"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut framer = LineFramer::default();
        assert_eq!(texts(&mut framer, b"Food: \xff\n"), vec!["Food: \u{fffd}"]);
    }
}
